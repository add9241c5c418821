//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! End-to-end publish/subscribe scenarios across the bus, STOMP and
//! virtual-topic transports.

use brokerpc::BrokerpcError;
use brokerpc::broker::StompConnection;
use brokerpc::broker::memory::{MemoryBus, MemoryStompBroker, VirtualTopicRule};
use brokerpc::context::Context;
use brokerpc::middleware::{Invocation, ServiceMiddleware, handler_fn, middleware_fn};
use brokerpc::pubsub::{
    BusPublisherTransportFactory, BusSubscriberTransportFactory, PrefixTemplate,
    PublisherTransport, PublisherTransportFactory, ScopeProvider, StompPublisherTransport,
    StompSubscriberTransport, SubscriberCallback, SubscriberTransport, SubscriberTransportFactory,
    Topic, VIRTUAL_TOPIC_PREFIX, VirtualTopicPublisherTransport, VirtualTopicSubscriberTransport,
    callback_fn,
};
use brokerpc::wire;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

const EVENT: &[u8] = br#"{"message":"Sending call"}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("brokerpc=debug")
        .with_test_writer()
        .try_init();
}

fn collecting() -> (SubscriberCallback, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = callback_fn(move |payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
            Ok(())
        }
    });
    (callback, rx)
}

async fn wait_for_acks(broker: &MemoryStompBroker) {
    while broker.unacked() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn event_topic() -> Topic {
    let template = PrefixTemplate::parse("foo.bar").unwrap();
    Topic::resolve(&template, &HashMap::new(), "Events", "EventCreated").unwrap()
}

fn stomp_scope(broker: &MemoryStompBroker) -> ScopeProvider {
    stomp_scope_with(broker, Vec::new(), Vec::new())
}

fn stomp_scope_with(
    broker: &MemoryStompBroker,
    outer: Vec<ServiceMiddleware>,
    inner: Vec<ServiceMiddleware>,
) -> ScopeProvider {
    let publish_conn = broker.connect();
    let subscribe_conn = broker.connect();
    let publishers: Arc<dyn PublisherTransportFactory> =
        Arc::new(move || -> Arc<dyn PublisherTransport> {
            Arc::new(StompPublisherTransport::builder(publish_conn.clone()).build())
        });
    let subscribers: Arc<dyn SubscriberTransportFactory> =
        Arc::new(move || -> Arc<dyn SubscriberTransport> {
            Arc::new(StompSubscriberTransport::builder(subscribe_conn.clone()).build())
        });
    ScopeProvider::with_middleware(publishers, subscribers, outer, inner)
}

#[tokio::test]
async fn test_event_created_delivered_once_and_acked() {
    init_tracing();
    let broker = MemoryStompBroker::new();
    let provider = stomp_scope(&broker);
    let topic = event_topic();
    assert_eq!(topic.as_str(), "foo.bar.Events.EventCreated");

    let (callback, mut received) = collecting();
    let subscription = provider.subscribe(&topic, callback).await.unwrap();

    let publisher = provider.publisher();
    publisher.open().await.unwrap();
    publisher.publish(topic.as_str(), EVENT).await.unwrap();

    assert_eq!(received.recv().await.unwrap(), Bytes::from_static(EVENT));
    wait_for_acks(&broker).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(received.try_recv().is_err());

    let sent = broker.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, "/topic/frugal.foo.bar.Events.EventCreated");

    subscription.unsubscribe().await.unwrap();
    assert!(!subscription.is_subscribed());
}

#[tokio::test]
async fn test_prefix_variables_from_context_over_bus() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let provider = ScopeProvider::new(
        Arc::new(BusPublisherTransportFactory::new(bus.clone())),
        Arc::new(BusSubscriberTransportFactory::new(bus.clone())),
        Vec::new(),
    );

    let mut ctx = Context::new();
    ctx.add_request_header("_topic_tenant", "acme").unwrap();
    let template = PrefixTemplate::parse("billing.{tenant}").unwrap();
    let topic = Topic::from_context(&template, &ctx, "Invoices", "Issued").unwrap();
    assert_eq!(topic.as_str(), "billing.acme.Invoices.Issued");

    let (callback, mut received) = collecting();
    let subscription = provider.subscribe(&topic, callback).await.unwrap();
    provider.publisher().publish(topic.as_str(), EVENT).await.unwrap();
    assert_eq!(received.recv().await.unwrap(), Bytes::from_static(EVENT));
    assert_eq!(
        bus.published()[0].subject,
        "frugal.billing.acme.Invoices.Issued"
    );

    subscription.unsubscribe().await.unwrap();
    subscription.unsubscribe().await.unwrap();
    assert_eq!(bus.unsubscribe_calls(), 1);
    assert_eq!(bus.subscription_count(), 0);
}

#[tokio::test]
async fn test_virtual_topic_consumers_each_get_a_copy() {
    init_tracing();
    let broker = MemoryStompBroker::new().with_virtual_topic(VirtualTopicRule::new(
        VIRTUAL_TOPIC_PREFIX,
        "frugalConsumer.",
        false,
    ));
    let billing_conn = broker.connect();
    let audit_conn = broker.connect();
    let billing = VirtualTopicSubscriberTransport::new(billing_conn.clone(), "billing");
    let audit = VirtualTopicSubscriberTransport::new(audit_conn.clone(), "audit");
    let (billing_cb, mut billing_rx) = collecting();
    let (audit_cb, mut audit_rx) = collecting();
    SubscriberTransport::subscribe(&billing, "orders.Created", billing_cb)
        .await
        .unwrap();
    SubscriberTransport::subscribe(&audit, "orders.Created", audit_cb)
        .await
        .unwrap();

    let publisher = VirtualTopicPublisherTransport::new(broker.connect());
    PublisherTransport::publish(&publisher, "orders.Created", EVENT)
        .await
        .unwrap();

    assert_eq!(billing_rx.recv().await.unwrap(), Bytes::from_static(EVENT));
    assert_eq!(audit_rx.recv().await.unwrap(), Bytes::from_static(EVENT));
    wait_for_acks(&broker).await;
    assert_eq!(billing_conn.acked().len(), 1);
    assert_eq!(audit_conn.acked().len(), 1);

    SubscriberTransport::unsubscribe(&billing).await.unwrap();
    assert_eq!(billing_conn.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_failed_message_is_redelivered_to_next_consumer() {
    init_tracing();
    let broker = MemoryStompBroker::new();
    let flaky_conn = broker.connect();
    let flaky = StompSubscriberTransport::builder(flaky_conn.clone())
        .with_queue(true)
        .build();
    let (tx, mut attempts) = mpsc::unbounded_channel();
    let failing = callback_fn(move |_payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            Err(BrokerpcError::processor("downstream unavailable"))
        }
    });
    SubscriberTransport::subscribe(&flaky, "jobs", failing)
        .await
        .unwrap();

    // Publishers only target /topic/ destinations, so the job is sent
    // straight to the queue.
    let frame = brokerpc::wire::encode(EVENT).unwrap();
    broker
        .connect()
        .send("/queue/frugal.jobs", "application/octet-stream", &[], frame)
        .await
        .unwrap();
    attempts.recv().await.unwrap();
    assert_eq!(broker.unacked(), 1);
    assert!(flaky_conn.acked().is_empty());

    flaky_conn.sever();
    let healthy_conn = broker.connect();
    let healthy = StompSubscriberTransport::builder(healthy_conn.clone())
        .with_queue(true)
        .build();
    let (callback, mut received) = collecting();
    SubscriberTransport::subscribe(&healthy, "jobs", callback)
        .await
        .unwrap();

    assert_eq!(received.recv().await.unwrap(), Bytes::from_static(EVENT));
    wait_for_acks(&broker).await;
    assert_eq!(healthy_conn.acked().len(), 1);
}

#[tokio::test]
async fn test_scope_middleware_runs_once_per_delivery() {
    init_tracing();
    let broker = MemoryStompBroker::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let auditing = {
        let calls = calls.clone();
        let seen = seen.clone();
        middleware_fn(move |next| {
            let calls = calls.clone();
            let seen = seen.clone();
            handler_fn(move |invocation: Invocation| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().push(format!(
                    "{} tenant={}",
                    invocation.method,
                    invocation.context.request_header("tenant").unwrap_or("-")
                ));
                next(invocation)
            })
        })
    };
    let rejecting = middleware_fn(|next| {
        handler_fn(move |invocation: Invocation| {
            let rejected = invocation
                .arguments
                .downcast_ref::<Bytes>()
                .is_some_and(|payload| payload.ends_with(b"reject"));
            let next = next.clone();
            async move {
                if rejected {
                    return Err(BrokerpcError::processor("rejected by middleware"));
                }
                next(invocation).await
            }
        })
    });

    let provider = stomp_scope_with(&broker, vec![auditing], vec![rejecting]);
    let topic = event_topic();
    let (callback, mut received) = collecting();
    let subscription = provider.subscribe(&topic, callback).await.unwrap();

    let mut ctx = Context::new();
    ctx.add_request_header("tenant", "acme").unwrap();
    let mut accepted = wire::write_request_header(&ctx).unwrap().to_vec();
    accepted.extend_from_slice(EVENT);

    let publisher = provider.publisher();
    publisher.open().await.unwrap();
    publisher.publish(topic.as_str(), &accepted).await.unwrap();
    publisher.publish(topic.as_str(), b"reject").await.unwrap();

    assert_eq!(received.recv().await.unwrap(), Bytes::from(accepted));
    while calls.load(Ordering::SeqCst) < 2 || broker.unacked() != 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(received.try_recv().is_err());
    assert_eq!(
        *seen.lock(),
        vec!["Events.EventCreated tenant=acme", "Events.EventCreated tenant=-"]
    );
    // only the delivery that passed the chain is acknowledged
    assert_eq!(broker.unacked(), 1);

    subscription.unsubscribe().await.unwrap();
}
