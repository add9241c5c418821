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


//! Integration tests for the bus worker-pool server talking to bus
//! transports, including a client-side middleware chain.

use async_trait::async_trait;
use brokerpc::broker::memory::MemoryBus;
use brokerpc::config::RuntimeConfig;
use brokerpc::context::Context;
use brokerpc::middleware::{Invocation, Method, MethodDescriptor, handler_fn, middleware_fn};
use brokerpc::pubsub::ServiceProvider;
use brokerpc::server::{BrokerServer, BrokerServerBuilder, ContextProcessor, Processor, RequestProperties};
use brokerpc::transport::{BusTransport, UnaryTransport};
use brokerpc::{BrokerpcError, wire};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("brokerpc=debug")
        .with_test_writer()
        .try_init();
}

async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn start(server: &BrokerServer) -> JoinHandle<Result<(), BrokerpcError>> {
    let server = server.clone();
    tokio::spawn(async move { server.serve().await })
}

fn request(ctx: &Context, body: &[u8]) -> Bytes {
    let mut payload = BytesMut::from(&wire::write_request_header(ctx).unwrap()[..]);
    payload.extend_from_slice(body);
    payload.freeze()
}

/// Sleeps before echoing, so overlapping calls show whether workers run in
/// parallel.
struct SlowEcho {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Processor for SlowEcho {
    async fn process(&self, request: Bytes, _: &RequestProperties) -> Result<Bytes, BrokerpcError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (ctx, consumed) = wire::read_request_header(&request)?;
        let mut reply = BytesMut::from(&wire::write_response_header(&ctx)?[..]);
        reply.extend_from_slice(&request[consumed..]);
        Ok(reply.freeze())
    }
}

#[tokio::test(start_paused = true)]
async fn test_workers_process_in_parallel() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let processor = Arc::new(SlowEcho {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let server = BrokerServerBuilder::new(bus.clone(), processor.clone(), ["slow"])
        .with_worker_count(4)
        .build();
    let running = start(&server);
    wait_until(|| bus.subscription_count() == 1).await;

    let client = Arc::new(BusTransport::builder(bus.clone(), "slow").build());
    client.open().await.unwrap();

    let started = Instant::now();
    let mut calls = JoinSet::new();
    for i in 0..4u8 {
        let client = Arc::clone(&client);
        calls.spawn(async move {
            let mut ctx = Context::new();
            let payload = request(&ctx, &[i]);
            client.request(&mut ctx, &payload).await.unwrap()
        });
    }
    while let Some(reply) = calls.join_next().await {
        reply.unwrap();
    }

    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(processor.peak.load(Ordering::SeqCst), 4);
    wait_until(|| server.metrics().processed == 4).await;

    server.stop();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_queue_group_shares_requests() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let echo = || -> Arc<dyn Processor> {
        Arc::new(ContextProcessor::new(|ctx, body: Bytes| async move {
            Ok::<_, BrokerpcError>((ctx, body))
        }))
    };
    let first = BrokerServerBuilder::new(bus.clone(), echo(), ["orders"])
        .with_queue_group("order-service")
        .build();
    let second = BrokerServerBuilder::new(bus.clone(), echo(), ["orders"])
        .with_queue_group("order-service")
        .build();
    let first_running = start(&first);
    let second_running = start(&second);
    wait_until(|| bus.subscription_count() == 2).await;

    let client = BusTransport::builder(bus.clone(), "orders").build();
    client.open().await.unwrap();
    for i in 0..6u8 {
        let mut ctx = Context::new();
        let payload = request(&ctx, &[i]);
        let reply = client.request(&mut ctx, &payload).await.unwrap();
        assert!(reply.ends_with(&[i]));
    }

    wait_until(|| first.metrics().processed + second.metrics().processed == 6).await;

    first.stop();
    second.stop();
    first_running.await.unwrap().unwrap();
    second_running.await.unwrap().unwrap();
    assert_eq!(bus.subscription_count(), 1);
}

#[tokio::test]
async fn test_server_from_runtime_config() {
    init_tracing();
    let config = RuntimeConfig::from_json(
        r#"{"server": {"worker_count": 3, "queue_length": 8, "max_response_size": 16}}"#,
    )
    .unwrap();
    let bus = Arc::new(MemoryBus::new());
    let echo = ContextProcessor::new(|ctx, body: Bytes| async move {
        Ok::<_, BrokerpcError>((ctx, body))
    });
    let server = BrokerServerBuilder::new(bus.clone(), Arc::new(echo), ["cfg"])
        .with_config(&config.server)
        .build();
    let running = start(&server);
    wait_until(|| bus.subscription_count() == 1).await;

    let client = BusTransport::builder(bus.clone(), "cfg").build();
    client.open().await.unwrap();

    // The response header block alone exceeds 16 bytes.
    let mut ctx = Context::new();
    ctx.set_timeout(Duration::from_millis(50));
    let payload = request(&ctx, b"x");
    assert!(client.request(&mut ctx, &payload).await.is_err());
    wait_until(|| server.metrics().failed == 1).await;

    server.stop();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_middleware_reaches_server() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let greeter = ContextProcessor::new(|mut ctx: Context, body: Bytes| async move {
        let caller = ctx.request_header("caller").unwrap_or("anonymous").to_string();
        ctx.add_response_header("greeted", caller.as_str())?;
        let mut reply = BytesMut::from(&b"hello "[..]);
        reply.extend_from_slice(&body);
        Ok::<_, BrokerpcError>((ctx, reply.freeze()))
    });
    let server = BrokerServerBuilder::new(bus.clone(), Arc::new(greeter), ["greeter"]).build();
    let running = start(&server);
    wait_until(|| bus.subscription_count() == 1).await;

    let transport = BusTransport::builder(bus.clone(), "greeter").build();
    transport.open().await.unwrap();
    let identify = middleware_fn(|next| {
        handler_fn(move |mut invocation: Invocation| {
            let next = next.clone();
            async move {
                invocation.context.add_request_header("caller", "billing")?;
                next(invocation).await
            }
        })
    });
    let provider = ServiceProvider::new(Arc::new(transport), vec![identify]);

    let client = provider.transport();
    let greet: Method<String, (String, Option<String>)> = Method::new(
        MethodDescriptor::new("Greeter", "greet"),
        move |mut ctx: Context, name: String| {
            let client = client.clone();
            async move {
                let payload = request(&ctx, name.as_bytes());
                let reply = client.request(&mut ctx, &payload).await?;
                let consumed = wire::read_response_header(&reply, &mut ctx)?;
                let body = String::from_utf8_lossy(&reply[consumed..]).into_owned();
                let greeted = ctx.response_header("greeted").map(str::to_string);
                Ok::<_, BrokerpcError>((body, greeted))
            }
        },
        provider.middleware_chain(),
    );

    let (body, greeted) = greet.invoke(Context::new(), "world".to_string()).await.unwrap();
    assert_eq!(body, "hello world");
    assert_eq!(greeted.as_deref(), Some("billing"));

    server.stop();
    running.await.unwrap().unwrap();
}
