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

//! Pub/sub over a STOMP broker.
//!
//! Publishers send to `/topic/<topic_prefix>frugal.<topic>`. Subscribers
//! read `/topic/<consumer_prefix>frugal.<topic>`, or the `/queue/` form when
//! configured to consume from a queue, with client-individual
//! acknowledgement. Durable subscribers always use the queue form.
//!
//! When the broker connection drops, both roles can recover through a
//! [`ReconnectHandler`]: a publisher reconnects and retries the failed send
//! once, and a subscriber reconnects and resubscribes when its message
//! stream ends.

use super::dispatch::{Dispatcher, SubscriptionSlot, released};
use super::{
    DurablePublisherTransport, DurableSubscriberCallback, DurableSubscriberTransport,
    FRUGAL_PREFIX, GROUP_ID_HEADER, PublisherTransport, SubscriberCallback, SubscriberTransport,
};
use crate::broker::{
    AckMode, ReconnectHandler, StompConnection, StompMessage, StompSubscription,
    SubscriptionId,
};
use crate::config::StompConfig;
use crate::observability::{SubscriberMetrics, SubscriberMetricsSnapshot};
use crate::transport::{TransportError, check_request_size};
use crate::wire;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Default publish limit of the STOMP family.
pub const DEFAULT_STOMP_PUBLISH_SIZE_LIMIT: usize = 32 * 1024 * 1024;

const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Builder for [`StompPublisherTransport`].
pub struct StompPublisherTransportBuilder {
    connection: Arc<dyn StompConnection>,
    topic_prefix: String,
    max_publish_size: usize,
    reconnect: Option<Arc<dyn ReconnectHandler>>,
    reconnect_attempts: u32,
}

impl StompPublisherTransportBuilder {
    /// Sets the prefix inserted before `frugal.` in destinations.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Sets the publish limit. `0` means unbounded.
    pub fn with_max_publish_size(mut self, size: usize) -> Self {
        self.max_publish_size = size;
        self
    }

    /// Reconnects through `handler`, trying at most `max_attempts` times,
    /// when a send fails because the broker disconnected.
    pub fn with_reconnect_handler(
        mut self,
        handler: Arc<dyn ReconnectHandler>,
        max_attempts: u32,
    ) -> Self {
        self.reconnect = Some(handler);
        self.reconnect_attempts = max_attempts;
        self
    }

    /// Applies the publisher settings of `config`.
    pub fn with_config(mut self, config: &StompConfig) -> Self {
        self.topic_prefix = config.topic_prefix.clone();
        self.max_publish_size = config.max_publish_size;
        self.reconnect_attempts = config.reconnect_attempts;
        self
    }

    /// Builds the transport.
    pub fn build(self) -> StompPublisherTransport {
        StompPublisherTransport {
            connection: Mutex::new(Some(self.connection)),
            topic_prefix: self.topic_prefix,
            max_publish_size: self.max_publish_size,
            reconnect: self.reconnect,
            reconnect_attempts: self.reconnect_attempts,
            closed: AtomicBool::new(false),
        }
    }
}

/// Publishes frames to STOMP topics.
///
/// # Examples
///
/// ```rust
/// use brokerpc::broker::memory::MemoryStompBroker;
/// use brokerpc::pubsub::{PublisherTransport, StompPublisherTransport};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = MemoryStompBroker::new();
/// let publisher = StompPublisherTransport::builder(broker.connect())
///     .with_topic_prefix("prod.")
///     .build();
/// publisher.publish("v1.music.AlbumWinners.Winner", b"payload").await?;
///
/// assert_eq!(
///     broker.sent()[0].destination,
///     "/topic/prod.frugal.v1.music.AlbumWinners.Winner"
/// );
/// # Ok(())
/// # }
/// ```
pub struct StompPublisherTransport {
    connection: Mutex<Option<Arc<dyn StompConnection>>>,
    topic_prefix: String,
    max_publish_size: usize,
    reconnect: Option<Arc<dyn ReconnectHandler>>,
    reconnect_attempts: u32,
    closed: AtomicBool,
}

impl StompPublisherTransport {
    /// Starts building a publisher on `connection`.
    pub fn builder(connection: Arc<dyn StompConnection>) -> StompPublisherTransportBuilder {
        StompPublisherTransportBuilder {
            connection,
            topic_prefix: String::new(),
            max_publish_size: DEFAULT_STOMP_PUBLISH_SIZE_LIMIT,
            reconnect: None,
            reconnect_attempts: StompConfig::default().reconnect_attempts,
        }
    }

    fn destination(&self, topic: &str) -> String {
        format!("/topic/{}{FRUGAL_PREFIX}{topic}", self.topic_prefix)
    }

    fn current(&self) -> Result<Arc<dyn StompConnection>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::not_open("stomp transport not open"));
        }
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| TransportError::not_open("stomp transport not open"))
    }

    async fn send(
        &self,
        topic: &str,
        group_id: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let connection = self.current()?;
        check_request_size(payload.len(), self.max_publish_size)?;
        let frame = wire::encode(payload)?;
        let destination = self.destination(topic);
        let mut headers = vec![("persistent", "true")];
        if let Some(group_id) = group_id {
            headers.push((GROUP_ID_HEADER, group_id));
        }

        let error = match connection
            .send(&destination, CONTENT_TYPE_OCTET_STREAM, &headers, frame.clone())
            .await
        {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        let handler = match &self.reconnect {
            Some(handler) if error.is_disconnect() && !self.closed.load(Ordering::SeqCst) => handler,
            _ => return Err(error.into()),
        };
        warn!(destination = %destination, error = %error, "stomp send failed, reconnecting");
        let fresh = handler
            .reconnect(self.reconnect_attempts)
            .await
            .map_err(|e| TransportError::not_open(format!("stomp reconnect failed: {e}")))?;
        *self.connection.lock() = Some(Arc::clone(&fresh));
        info!(destination = %destination, "stomp publisher reconnected, retrying send");
        fresh
            .send(&destination, CONTENT_TYPE_OCTET_STREAM, &headers, frame)
            .await
            .map_err(TransportError::from)
    }
}

#[async_trait]
impl PublisherTransport for StompPublisherTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if self.connection.lock().is_none() {
            return Err(TransportError::not_open("stomp transport not open"));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connection.lock().is_some()
    }

    fn publish_size_limit(&self) -> usize {
        self.max_publish_size
    }

    #[cfg_attr(feature = "observability", instrument(skip(self, payload), fields(len = payload.len())))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(topic, None, payload).await
    }
}

#[async_trait]
impl DurablePublisherTransport for StompPublisherTransport {
    async fn open(&self) -> Result<(), TransportError> {
        PublisherTransport::open(self).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        PublisherTransport::close(self).await
    }

    fn is_open(&self) -> bool {
        PublisherTransport::is_open(self)
    }

    fn publish_size_limit(&self) -> usize {
        self.max_publish_size
    }

    #[cfg_attr(feature = "observability", instrument(skip(self, payload), fields(len = payload.len())))]
    async fn publish(&self, topic: &str, group_id: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(topic, Some(group_id), payload).await
    }
}

/// Builder for [`StompSubscriberTransport`].
pub struct StompSubscriberTransportBuilder {
    connection: Arc<dyn StompConnection>,
    consumer_prefix: String,
    use_queue: bool,
    reconnect: Option<Arc<dyn ReconnectHandler>>,
    reconnect_attempts: u32,
    metrics: Arc<SubscriberMetrics>,
}

impl StompSubscriberTransportBuilder {
    /// Sets the prefix inserted before `frugal.` in destinations.
    pub fn with_consumer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_prefix = prefix.into();
        self
    }

    /// Consumes from `/queue/` destinations instead of `/topic/`.
    pub fn with_queue(mut self, use_queue: bool) -> Self {
        self.use_queue = use_queue;
        self
    }

    /// Resubscribes through `handler` when the message stream ends.
    pub fn with_reconnect_handler(
        mut self,
        handler: Arc<dyn ReconnectHandler>,
        max_attempts: u32,
    ) -> Self {
        self.reconnect = Some(handler);
        self.reconnect_attempts = max_attempts;
        self
    }

    /// Shares `metrics` with other subscribers.
    pub fn with_metrics(mut self, metrics: Arc<SubscriberMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Applies the subscriber settings of `config`.
    pub fn with_config(mut self, config: &StompConfig) -> Self {
        self.consumer_prefix = config.consumer_prefix.clone();
        self.use_queue = config.use_queue;
        self.reconnect_attempts = config.reconnect_attempts;
        self
    }

    /// Builds the transport.
    pub fn build(self) -> StompSubscriberTransport {
        StompSubscriberTransport {
            connection: Arc::new(Mutex::new(self.connection)),
            consumer_prefix: self.consumer_prefix,
            use_queue: self.use_queue,
            reconnect: self.reconnect,
            reconnect_attempts: self.reconnect_attempts,
            slot: Arc::new(SubscriptionSlot::new()),
            metrics: self.metrics,
        }
    }
}

enum Handler {
    Plain(SubscriberCallback),
    Durable(DurableSubscriberCallback),
}

/// Consumes frames from a STOMP topic or queue.
pub struct StompSubscriberTransport {
    connection: Arc<Mutex<Arc<dyn StompConnection>>>,
    consumer_prefix: String,
    use_queue: bool,
    reconnect: Option<Arc<dyn ReconnectHandler>>,
    reconnect_attempts: u32,
    slot: Arc<SubscriptionSlot>,
    metrics: Arc<SubscriberMetrics>,
}

impl StompSubscriberTransport {
    /// Starts building a subscriber on `connection`.
    pub fn builder(connection: Arc<dyn StompConnection>) -> StompSubscriberTransportBuilder {
        StompSubscriberTransportBuilder {
            connection,
            consumer_prefix: String::new(),
            use_queue: false,
            reconnect: None,
            reconnect_attempts: StompConfig::default().reconnect_attempts,
            metrics: Arc::new(SubscriberMetrics::new()),
        }
    }

    /// Returns the delivery counters.
    pub fn metrics(&self) -> SubscriberMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn destination(&self, topic: &str, queue: bool) -> String {
        let kind = if queue { "queue" } else { "topic" };
        format!("/{kind}/{}{FRUGAL_PREFIX}{topic}", self.consumer_prefix)
    }

    async fn start(&self, topic: &str, queue: bool, handler: Handler) -> Result<(), TransportError> {
        let connection = Arc::clone(&*self.connection.lock());
        if !connection.is_connected() {
            return Err(TransportError::not_open("stomp transport not open"));
        }
        if topic.is_empty() {
            return Err(TransportError::unknown(
                "stomp transport cannot subscribe to empty topic",
            ));
        }
        self.slot.reserve("stomp")?;

        let destination = self.destination(topic, queue);
        let subscription = match connection
            .subscribe(&destination, AckMode::ClientIndividual)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.slot.release();
                return Err(e.into());
            }
        };
        debug!(destination = %destination, "stomp subscribed");

        let stop = self.slot.activate(subscription.id());
        let worker = MessageWorker {
            connection: Arc::clone(&self.connection),
            slot: Arc::clone(&self.slot),
            reconnect: self.reconnect.clone(),
            reconnect_attempts: self.reconnect_attempts,
            dispatcher: Dispatcher::new(&destination, Arc::clone(&self.metrics)),
            destination,
            handler,
            stop,
        };
        tokio::spawn(worker.run(subscription));
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let Some(active) = self.slot.take() else {
            return Ok(());
        };
        let connection = Arc::clone(&*self.connection.lock());
        released(active.id, connection.unsubscribe(active.id).await)
    }
}

/// Reads one subscription's messages.
struct MessageWorker {
    connection: Arc<Mutex<Arc<dyn StompConnection>>>,
    slot: Arc<SubscriptionSlot>,
    reconnect: Option<Arc<dyn ReconnectHandler>>,
    reconnect_attempts: u32,
    dispatcher: Dispatcher,
    destination: String,
    handler: Handler,
    stop: CancellationToken,
}

impl MessageWorker {
    async fn run(self, mut subscription: StompSubscription) {
        loop {
            let message = tokio::select! {
                _ = self.stop.cancelled() => return,
                message = subscription.next() => message,
            };
            match message {
                Some(message) => self.handle(message).await,
                None if self.stop.is_cancelled() => return,
                None => match self.resubscribe().await {
                    Some(fresh) => subscription = fresh,
                    None => return,
                },
            }
        }
    }

    async fn handle(&self, message: StompMessage) {
        let ack = match &self.handler {
            Handler::Plain(callback) => {
                self.dispatcher
                    .dispatch(&message.body, |payload| callback(payload))
                    .await
            }
            Handler::Durable(callback) => {
                let group_id = message.header(GROUP_ID_HEADER).map(str::to_string);
                self.dispatcher
                    .dispatch(&message.body, |payload| callback(group_id, payload))
                    .await
            }
        };
        if ack {
            let connection = Arc::clone(&*self.connection.lock());
            let message_id = message.message_id.clone();
            self.dispatcher
                .ack(message_id, async move { connection.ack(&message).await });
        }
    }

    async fn resubscribe(&self) -> Option<StompSubscription> {
        let Some(handler) = &self.reconnect else {
            error!(
                destination = %self.destination,
                "error processing subscription messages, message channel closed unexpectedly"
            );
            return None;
        };
        warn!(destination = %self.destination, "stomp message channel closed, reconnecting");
        let connection = match handler.reconnect(self.reconnect_attempts).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(destination = %self.destination, error = %e, "stomp reconnect failed");
                return None;
            }
        };
        if self.stop.is_cancelled() {
            self.abandon(connection, None).await;
            return None;
        }
        let subscription = match connection
            .subscribe(&self.destination, AckMode::ClientIndividual)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(destination = %self.destination, error = %e, "stomp resubscribe failed");
                return None;
            }
        };

        let installed = {
            let mut current = self.connection.lock();
            let replaced = self.slot.replace_id(subscription.id(), &self.stop);
            if replaced {
                *current = Arc::clone(&connection);
            }
            replaced
        };
        if !installed {
            self.abandon(connection, Some(subscription.id())).await;
            return None;
        }
        info!(destination = %self.destination, "stomp subscriber resubscribed");
        Some(subscription)
    }

    /// Releases a connection made for a subscriber that was stopped while
    /// it reconnected.
    async fn abandon(&self, connection: Arc<dyn StompConnection>, subscription: Option<SubscriptionId>) {
        debug!(destination = %self.destination, "subscriber stopped during reconnect");
        if let Some(id) = subscription {
            if let Err(e) = connection.unsubscribe(id).await {
                warn!(destination = %self.destination, error = %e, "could not unsubscribe");
            }
        }
        if let Err(e) = connection.disconnect().await {
            warn!(destination = %self.destination, error = %e, "could not disconnect");
        }
    }
}

#[async_trait]
impl SubscriberTransport for StompSubscriberTransport {
    #[cfg_attr(feature = "observability", instrument(skip(self, callback)))]
    async fn subscribe(&self, topic: &str, callback: SubscriberCallback) -> Result<(), TransportError> {
        self.start(topic, self.use_queue, Handler::Plain(callback)).await
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.stop().await
    }

    fn is_subscribed(&self) -> bool {
        self.connection.lock().is_connected() && self.slot.is_active()
    }
}

#[async_trait]
impl DurableSubscriberTransport for StompSubscriberTransport {
    #[cfg_attr(feature = "observability", instrument(skip(self, callback)))]
    async fn subscribe(
        &self,
        topic: &str,
        callback: DurableSubscriberCallback,
    ) -> Result<(), TransportError> {
        self.start(topic, true, Handler::Durable(callback)).await
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.stop().await
    }

    fn is_subscribed(&self) -> bool {
        SubscriberTransport::is_subscribed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::broker::memory::{MemoryStompBroker, MemoryStompConnection};
    use crate::error::BrokerpcError;
    use crate::pubsub::{callback_fn, durable_callback_fn};
    use crate::transport::TransportErrorKind;
    use bytes::Bytes;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

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
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_publish_headers_and_destination() {
        let broker = MemoryStompBroker::new();
        let publisher = StompPublisherTransport::builder(broker.connect())
            .with_topic_prefix("VirtualTopic.")
            .build();
        assert_eq!(
            PublisherTransport::publish_size_limit(&publisher),
            DEFAULT_STOMP_PUBLISH_SIZE_LIMIT
        );
        PublisherTransport::publish(&publisher, "foo.Events.Created", b"x")
            .await
            .unwrap();

        let sent = broker.sent();
        assert_eq!(sent[0].destination, "/topic/VirtualTopic.frugal.foo.Events.Created");
        assert_eq!(sent[0].content_type, "application/octet-stream");
        assert_eq!(sent[0].headers["persistent"], "true");
        assert!(!sent[0].headers.contains_key(GROUP_ID_HEADER));
        assert_eq!(sent[0].body, wire::encode(b"x").unwrap());
    }

    #[tokio::test]
    async fn test_publish_errors() {
        let broker = MemoryStompBroker::new();
        let publisher = StompPublisherTransport::builder(broker.connect())
            .with_max_publish_size(2)
            .build();
        let err = PublisherTransport::publish(&publisher, "t", b"abc").await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::RequestTooLarge);

        PublisherTransport::close(&publisher).await.unwrap();
        assert!(!PublisherTransport::is_open(&publisher));
        let err = PublisherTransport::publish(&publisher, "t", b"a").await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::NotOpen);
        assert_eq!(err.message(), "stomp transport not open");
    }

    #[tokio::test]
    async fn test_publish_reconnects_once() {
        let broker = MemoryStompBroker::new();
        let first = broker.connect();
        let calls = Arc::new(AtomicU32::new(0));
        let handler = {
            let broker = broker.clone();
            let calls = calls.clone();
            move |max_attempts: u32| {
                assert_eq!(max_attempts, 5);
                calls.fetch_add(1, Ordering::SeqCst);
                let broker = broker.clone();
                async move { Ok::<Arc<dyn StompConnection>, BrokerError>(broker.connect()) }
            }
        };
        let publisher = StompPublisherTransport::builder(first.clone())
            .with_reconnect_handler(Arc::new(handler), 5)
            .build();

        first.sever();
        PublisherTransport::publish(&publisher, "t", b"after").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.sent().len(), 1);

        // the new connection is kept for later sends
        PublisherTransport::publish(&publisher, "t", b"again").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_reconnect_without_handler() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let publisher = StompPublisherTransport::builder(conn.clone()).build();
        conn.sever();
        let err = PublisherTransport::publish(&publisher, "t", b"x").await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::EndOfFile);
    }

    #[tokio::test]
    async fn test_durable_publish_sets_group() {
        let broker = MemoryStompBroker::new();
        let publisher = StompPublisherTransport::builder(broker.connect()).build();
        DurablePublisherTransport::publish(&publisher, "t", "group-7", b"x")
            .await
            .unwrap();
        assert_eq!(broker.sent()[0].headers[GROUP_ID_HEADER], "group-7");
    }

    #[tokio::test]
    async fn test_subscribe_and_ack() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let subscriber = StompSubscriberTransport::builder(conn.clone())
            .with_consumer_prefix("VirtualTopic.")
            .build();
        let (callback, mut received) = collecting();
        SubscriberTransport::subscribe(&subscriber, "a.B.c", callback)
            .await
            .unwrap();

        let publisher = StompPublisherTransport::builder(broker.connect())
            .with_topic_prefix("VirtualTopic.")
            .build();
        PublisherTransport::publish(&publisher, "a.B.c", b"hello")
            .await
            .unwrap();

        assert_eq!(received.recv().await.unwrap(), Bytes::from_static(b"hello"));
        wait_for_acks(&broker).await;
        assert_eq!(conn.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_callback_is_not_acked() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let subscriber = StompSubscriberTransport::builder(conn.clone())
            .with_queue(true)
            .build();
        let (tx, mut failures) = mpsc::unbounded_channel();
        let callback = callback_fn(move |_payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                Err(BrokerpcError::processor("cannot handle"))
            }
        });
        SubscriberTransport::subscribe(&subscriber, "t", callback)
            .await
            .unwrap();
        conn.send("/queue/frugal.t", "application/octet-stream", &[], wire::encode(b"x").unwrap())
            .await
            .unwrap();

        failures.recv().await.unwrap();
        assert_eq!(broker.unacked(), 1);
        assert!(conn.acked().is_empty());
        assert_eq!(subscriber.metrics().rejected, 1);
    }

    #[tokio::test]
    async fn test_subscribe_errors() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let subscriber = StompSubscriberTransport::builder(conn.clone()).build();
        let (callback, _rx) = collecting();

        let err = SubscriberTransport::subscribe(&subscriber, "", callback.clone())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "stomp transport cannot subscribe to empty topic");

        SubscriberTransport::subscribe(&subscriber, "t", callback.clone())
            .await
            .unwrap();
        let err = SubscriberTransport::subscribe(&subscriber, "t", callback.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::AlreadyOpen);
        assert_eq!(err.message(), "stomp transport already has a subscription");

        let dead = broker.connect();
        dead.sever();
        let err = SubscriberTransport::subscribe(
            &StompSubscriberTransport::builder(dead).build(),
            "t",
            callback,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::NotOpen);
    }

    #[tokio::test]
    async fn test_unsubscribe_once() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let subscriber = StompSubscriberTransport::builder(conn.clone()).build();
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        let (callback, _rx) = collecting();
        SubscriberTransport::subscribe(&subscriber, "t", callback)
            .await
            .unwrap();
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        assert_eq!(conn.unsubscribe_calls(), 1);
        assert!(!SubscriberTransport::is_subscribed(&subscriber));
    }

    #[tokio::test]
    async fn test_resubscribes_after_disconnect() {
        let broker = MemoryStompBroker::new();
        let first = broker.connect();
        let handler = {
            let broker = broker.clone();
            move |_: u32| {
                let broker = broker.clone();
                async move { Ok::<Arc<dyn StompConnection>, BrokerError>(broker.connect()) }
            }
        };
        let subscriber = StompSubscriberTransport::builder(first.clone())
            .with_queue(true)
            .with_reconnect_handler(Arc::new(handler), 3)
            .build();
        let (callback, mut received) = collecting();
        SubscriberTransport::subscribe(&subscriber, "t", callback)
            .await
            .unwrap();

        first.sever();
        // the queue holds the message until the resubscribe lands
        let publisher = broker.connect();
        publisher
            .send("/queue/frugal.t", "application/octet-stream", &[], wire::encode(b"back").unwrap())
            .await
            .unwrap();
        assert_eq!(received.recv().await.unwrap(), Bytes::from_static(b"back"));
        assert!(SubscriberTransport::is_subscribed(&subscriber));

        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        assert_eq!(first.unsubscribe_calls(), 0);
    }

    #[tokio::test]
    async fn test_durable_subscriber_receives_group() {
        let broker = MemoryStompBroker::new();
        let subscriber = StompSubscriberTransport::builder(broker.connect()).build();
        let (tx, mut received) = mpsc::unbounded_channel();
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

        // durable subscribers read the queue form of the destination
        broker
            .connect()
            .send(
                "/queue/frugal.orders",
                CONTENT_TYPE_OCTET_STREAM,
                &[(GROUP_ID_HEADER, "g1")],
                wire::encode(b"o-1").unwrap(),
            )
            .await
            .unwrap();

        let (group_id, payload) = received.recv().await.unwrap();
        assert_eq!(group_id.as_deref(), Some("g1"));
        assert_eq!(payload, Bytes::from_static(b"o-1"));
        wait_for_acks(&broker).await;
    }

    #[tokio::test]
    async fn test_unsubscribe_while_severed_succeeds() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let subscriber = StompSubscriberTransport::builder(conn.clone()).build();
        let (callback, _received) = collecting();
        SubscriberTransport::subscribe(&subscriber, "t", callback)
            .await
            .unwrap();

        conn.sever();
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        assert_eq!(conn.unsubscribe_calls(), 1);
        assert!(!SubscriberTransport::is_subscribed(&subscriber));
    }

    #[tokio::test]
    async fn test_unsubscribe_during_reconnect_releases_fresh_connection() {
        let broker = MemoryStompBroker::new();
        let first = broker.connect();
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let fresh: Arc<Mutex<Option<Arc<MemoryStompConnection>>>> = Arc::new(Mutex::new(None));
        let handler = {
            let broker = broker.clone();
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            let fresh = Arc::clone(&fresh);
            move |_: u32| {
                let broker = broker.clone();
                let entered = Arc::clone(&entered);
                let release = Arc::clone(&release);
                let fresh = Arc::clone(&fresh);
                async move {
                    entered.notify_one();
                    release.notified().await;
                    let connection = broker.connect();
                    *fresh.lock() = Some(Arc::clone(&connection));
                    Ok::<Arc<dyn StompConnection>, BrokerError>(connection)
                }
            }
        };
        let subscriber = StompSubscriberTransport::builder(first.clone())
            .with_queue(true)
            .with_reconnect_handler(Arc::new(handler), 3)
            .build();
        let (callback, mut received) = collecting();
        SubscriberTransport::subscribe(&subscriber, "t", callback)
            .await
            .unwrap();

        first.sever();
        entered.notified().await;
        SubscriberTransport::unsubscribe(&subscriber).await.unwrap();
        release.notify_one();

        let connection = loop {
            let done = fresh
                .lock()
                .as_ref()
                .filter(|connection| !connection.is_connected())
                .cloned();
            match done {
                Some(connection) => break connection,
                None => tokio::task::yield_now().await,
            }
        };
        // stopped before resubscribing, so only the connection is released
        assert_eq!(connection.unsubscribe_calls(), 0);
        assert_eq!(connection.disconnect_calls(), 1);
        assert!(!SubscriberTransport::is_subscribed(&subscriber));

        let publisher = broker.connect();
        publisher
            .send("/queue/frugal.t", "application/octet-stream", &[], wire::encode(b"late").unwrap())
            .await
            .unwrap();
        assert_eq!(broker.pending("/queue/frugal.t"), 1);
        assert!(received.try_recv().is_err());
    }
}
