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

//! Pub/sub over brokers that fan topics out to per-consumer queues.
//!
//! Publishers send to `/topic/frugal.VirtualTopic.<topic>`; the broker copies
//! each message to every `/queue/frugalConsumer.<consumer>.<topic>` queue, so
//! each named consumer sees every message once no matter how many instances
//! of it are subscribed. The transports own their connection: closing the
//! publisher or unsubscribing the subscriber disconnects it.

use super::dispatch::{Dispatcher, SubscriptionSlot, released};
use super::{
    DurablePublisherTransport, DurableSubscriberCallback, DurableSubscriberTransport,
    GROUP_ID_HEADER, PublisherTransport, SubscriberCallback, SubscriberTransport,
};
use crate::broker::{AckMode, StompConnection, StompSubscription};
use crate::observability::{SubscriberMetrics, SubscriberMetricsSnapshot};
use crate::transport::TransportError;
use crate::wire;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Prefix of virtual topic destinations.
pub const VIRTUAL_TOPIC_PREFIX: &str = "frugal.VirtualTopic.";

const CONSUMER_QUEUE_PREFIX: &str = "frugalConsumer.";
const CONTENT_TYPE_TEXT: &str = "text/plain";

fn not_open() -> TransportError {
    TransportError::not_open("mq transport not open")
}

/// Publishes frames to virtual topics.
///
/// Publishing is unbounded: [`publish_size_limit`](PublisherTransport::publish_size_limit)
/// is always `0`.
pub struct VirtualTopicPublisherTransport {
    connection: Mutex<Option<Arc<dyn StompConnection>>>,
}

impl VirtualTopicPublisherTransport {
    /// Creates a publisher that owns `connection`.
    pub fn new(connection: Arc<dyn StompConnection>) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }

    fn current(&self) -> Result<Arc<dyn StompConnection>, TransportError> {
        self.connection.lock().clone().ok_or_else(not_open)
    }

    async fn send(
        &self,
        topic: &str,
        group_id: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let connection = self.current()?;
        let destination = format!("/topic/{VIRTUAL_TOPIC_PREFIX}{topic}");
        let headers: Vec<(&str, &str)> = group_id
            .map(|group_id| vec![(GROUP_ID_HEADER, group_id)])
            .unwrap_or_default();
        connection
            .send(&destination, CONTENT_TYPE_TEXT, &headers, wire::encode(payload)?)
            .await
            .map_err(TransportError::from)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };
        connection
            .disconnect()
            .await
            .map_err(|e| TransportError::unknown(format!("error closing transport: {e}")))
    }
}

#[async_trait]
impl PublisherTransport for VirtualTopicPublisherTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.current().map(|_| ())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown().await
    }

    fn is_open(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn publish_size_limit(&self) -> usize {
        0
    }

    #[cfg_attr(feature = "observability", instrument(skip(self, payload), fields(len = payload.len())))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(topic, None, payload).await
    }
}

#[async_trait]
impl DurablePublisherTransport for VirtualTopicPublisherTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.current().map(|_| ())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown().await
    }

    fn is_open(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn publish_size_limit(&self) -> usize {
        0
    }

    #[cfg_attr(feature = "observability", instrument(skip(self, payload), fields(len = payload.len())))]
    async fn publish(&self, topic: &str, group_id: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(topic, Some(group_id), payload).await
    }
}

enum Handler {
    Plain(SubscriberCallback),
    Durable(DurableSubscriberCallback),
}

/// Consumes a named consumer's copy of a virtual topic.
pub struct VirtualTopicSubscriberTransport {
    connection: Arc<dyn StompConnection>,
    consumer: String,
    slot: Arc<SubscriptionSlot>,
    metrics: Arc<SubscriberMetrics>,
}

impl VirtualTopicSubscriberTransport {
    /// Creates a subscriber reading the queues of `consumer`.
    pub fn new(connection: Arc<dyn StompConnection>, consumer: impl Into<String>) -> Self {
        Self {
            connection,
            consumer: consumer.into(),
            slot: Arc::new(SubscriptionSlot::new()),
            metrics: Arc::new(SubscriberMetrics::new()),
        }
    }

    /// Shares `metrics` with other subscribers.
    pub fn with_metrics(mut self, metrics: Arc<SubscriberMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the delivery counters.
    pub fn metrics(&self) -> SubscriberMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn start(&self, queue: &str, handler: Handler) -> Result<(), TransportError> {
        if !self.connection.is_connected() {
            return Err(not_open());
        }
        if queue.is_empty() {
            return Err(TransportError::unknown(
                "mq transport cannot subscribe to empty queue",
            ));
        }
        self.slot.reserve("mq")?;

        let destination = format!("/queue/{CONSUMER_QUEUE_PREFIX}{}.{queue}", self.consumer);
        let subscription = match self
            .connection
            .subscribe(&destination, AckMode::ClientIndividual)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.slot.release();
                return Err(e.into());
            }
        };
        debug!(destination = %destination, "mq subscribed");

        let stop = self.slot.activate(subscription.id());
        tokio::spawn(process_messages(
            Arc::clone(&self.connection),
            Dispatcher::new(&destination, Arc::clone(&self.metrics)),
            handler,
            subscription,
            stop,
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let Some(active) = self.slot.take() else {
            return Ok(());
        };
        released(active.id, self.connection.unsubscribe(active.id).await)?;
        self.connection.disconnect().await?;
        Ok(())
    }
}

async fn process_messages(
    connection: Arc<dyn StompConnection>,
    dispatcher: Dispatcher,
    handler: Handler,
    mut subscription: StompSubscription,
    stop: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = stop.cancelled() => return,
            message = subscription.next() => message,
        };
        let Some(message) = message else {
            if !stop.is_cancelled() {
                error!(
                    destination = subscription.destination(),
                    "error processing subscription messages, message channel closed unexpectedly"
                );
            }
            return;
        };

        let ack = match &handler {
            Handler::Plain(callback) => dispatcher.dispatch(&message.body, |payload| callback(payload)).await,
            Handler::Durable(callback) => {
                let group_id = message.header(GROUP_ID_HEADER).map(str::to_string);
                dispatcher
                    .dispatch(&message.body, |payload| callback(group_id, payload))
                    .await
            }
        };
        if ack {
            let connection = Arc::clone(&connection);
            let message_id = message.message_id.clone();
            dispatcher.ack(message_id, async move { connection.ack(&message).await });
        }
    }
}

#[async_trait]
impl SubscriberTransport for VirtualTopicSubscriberTransport {
    #[cfg_attr(feature = "observability", instrument(skip(self, callback)))]
    async fn subscribe(&self, topic: &str, callback: SubscriberCallback) -> Result<(), TransportError> {
        self.start(topic, Handler::Plain(callback)).await
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.stop().await
    }

    fn is_subscribed(&self) -> bool {
        self.connection.is_connected() && self.slot.is_active()
    }
}

#[async_trait]
impl DurableSubscriberTransport for VirtualTopicSubscriberTransport {
    #[cfg_attr(feature = "observability", instrument(skip(self, callback)))]
    async fn subscribe(
        &self,
        topic: &str,
        callback: DurableSubscriberCallback,
    ) -> Result<(), TransportError> {
        self.start(topic, Handler::Durable(callback)).await
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.stop().await
    }

    fn is_subscribed(&self) -> bool {
        self.connection.is_connected() && self.slot.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::{MemoryStompBroker, VirtualTopicRule};
    use crate::pubsub::{callback_fn, durable_callback_fn};
    use crate::transport::TransportErrorKind;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn broker() -> MemoryStompBroker {
        MemoryStompBroker::new().with_virtual_topic(VirtualTopicRule::new(
            VIRTUAL_TOPIC_PREFIX,
            CONSUMER_QUEUE_PREFIX,
            false,
        ))
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

    #[tokio::test]
    async fn test_publish_destination() {
        let broker = broker();
        let publisher = VirtualTopicPublisherTransport::new(broker.connect());
        assert_eq!(PublisherTransport::publish_size_limit(&publisher), 0);
        PublisherTransport::publish(&publisher, "orders", &[0u8; 64 * 1024])
            .await
            .unwrap();

        let sent = broker.sent();
        assert_eq!(sent[0].destination, "/topic/frugal.VirtualTopic.orders");
        assert_eq!(sent[0].content_type, "text/plain");
        assert!(sent[0].headers.is_empty());
    }

    #[tokio::test]
    async fn test_close_disconnects() {
        let broker = broker();
        let conn = broker.connect();
        let publisher = VirtualTopicPublisherTransport::new(conn.clone());
        PublisherTransport::open(&publisher).await.unwrap();
        PublisherTransport::close(&publisher).await.unwrap();
        assert_eq!(conn.disconnect_calls(), 1);
        assert!(!PublisherTransport::is_open(&publisher));

        let err = PublisherTransport::publish(&publisher, "orders", b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::NotOpen);
        assert_eq!(err.message(), "mq transport not open");
        let err = PublisherTransport::open(&publisher).await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::NotOpen);
    }

    #[tokio::test]
    async fn test_each_consumer_gets_a_copy() {
        let broker = broker();
        let billing = VirtualTopicSubscriberTransport::new(broker.connect(), "billing");
        let audit = VirtualTopicSubscriberTransport::new(broker.connect(), "audit");
        let (billing_cb, mut billing_rx) = collecting();
        let (audit_cb, mut audit_rx) = collecting();
        SubscriberTransport::subscribe(&billing, "orders", billing_cb)
            .await
            .unwrap();
        SubscriberTransport::subscribe(&audit, "orders", audit_cb)
            .await
            .unwrap();

        let publisher = VirtualTopicPublisherTransport::new(broker.connect());
        PublisherTransport::publish(&publisher, "orders", b"o-1")
            .await
            .unwrap();

        assert_eq!(billing_rx.recv().await.unwrap(), Bytes::from_static(b"o-1"));
        assert_eq!(audit_rx.recv().await.unwrap(), Bytes::from_static(b"o-1"));
        while broker.unacked() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(billing.metrics().acked, 1);
    }

    #[tokio::test]
    async fn test_subscribe_errors() {
        let broker = broker();
        let subscriber = VirtualTopicSubscriberTransport::new(broker.connect(), "c");
        let (callback, _rx) = collecting();

        let err = SubscriberTransport::subscribe(&subscriber, "", callback.clone())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "mq transport cannot subscribe to empty queue");

        SubscriberTransport::subscribe(&subscriber, "q", callback.clone())
            .await
            .unwrap();
        let err = SubscriberTransport::subscribe(&subscriber, "q", callback)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "mq transport already has a subscription");
    }

    #[tokio::test]
    async fn test_unsubscribe_disconnects_once() {
        let broker = broker();
        let conn = broker.connect();
        let subscriber = VirtualTopicSubscriberTransport::new(conn.clone(), "c");
        let (callback, _rx) = collecting();
        SubscriberTransport::subscribe(&subscriber, "q", callback)
            .await
            .unwrap();
        assert!(SubscriberTransport::is_subscribed(&subscriber));

        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        assert_eq!(conn.unsubscribe_calls(), 1);
        assert_eq!(conn.disconnect_calls(), 1);
        assert!(!SubscriberTransport::is_subscribed(&subscriber));
    }

    #[tokio::test]
    async fn test_durable_group_round_trip() {
        let broker = broker();
        let subscriber = VirtualTopicSubscriberTransport::new(broker.connect(), "c");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback = durable_callback_fn(move |group_id, payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((group_id, payload));
                Ok(())
            }
        });
        DurableSubscriberTransport::subscribe(&subscriber, "orders", callback)
            .await
            .unwrap();

        let publisher = VirtualTopicPublisherTransport::new(broker.connect());
        DurablePublisherTransport::publish(&publisher, "orders", "customer-9", b"o-2")
            .await
            .unwrap();

        let (group_id, payload) = rx.recv().await.unwrap();
        assert_eq!(group_id.as_deref(), Some("customer-9"));
        assert_eq!(payload, Bytes::from_static(b"o-2"));
    }
}
