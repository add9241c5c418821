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

//! Publish/subscribe transports.
//!
//! A scope publishes framed payloads to topics through a
//! [`PublisherTransport`] and receives them through a
//! [`SubscriberTransport`]. Three broker families implement both roles:
//!
//! | Family | Publisher | Subscriber | Publish destination |
//! |--------|-----------|------------|---------------------|
//! | Broadcast bus | [`BusPublisherTransport`] | [`BusSubscriberTransport`] | `frugal.<topic>` |
//! | STOMP | [`StompPublisherTransport`] | [`StompSubscriberTransport`] | `/topic/<prefix>frugal.<topic>` |
//! | Virtual topic | [`VirtualTopicPublisherTransport`] | [`VirtualTopicSubscriberTransport`] | `/topic/frugal.VirtualTopic.<topic>` |
//!
//! The STOMP and virtual-topic families also implement the durable roles,
//! [`DurablePublisherTransport`] and [`DurableSubscriberTransport`], which
//! carry a delivery group id so that one consumer per group sees each
//! message.
//!
//! # Delivery
//!
//! Each subscriber transport holds at most one subscription. A single task
//! per subscription reads broker messages, so callbacks for one transport
//! never run concurrently. Messages that are not a valid frame are dropped
//! with a warning. A message whose callback fails is left unacknowledged so
//! the broker can redeliver it; successful messages are acknowledged on a
//! separate task.
//!
//! # Topics
//!
//! [`Topic`] builds `<prefix><scope>.<operation>` strings, resolving
//! `{variable}` tokens in the prefix from explicit values or from the
//! `_topic_<name>` request headers of a [`Context`](crate::context::Context).

mod bus;
mod dispatch;
mod provider;
mod stomp;
mod subscription;
mod topic;
mod virtual_topic;

pub use self::bus::{
    BusPublisherTransport, BusPublisherTransportFactory, BusSubscriberTransport,
    BusSubscriberTransportFactory, DEFAULT_BUS_PUBLISH_SIZE_LIMIT,
};
pub use self::provider::{DurableScopeProvider, ScopeProvider, ServiceProvider};
pub use self::stomp::{
    DEFAULT_STOMP_PUBLISH_SIZE_LIMIT, StompPublisherTransport, StompPublisherTransportBuilder,
    StompSubscriberTransport, StompSubscriberTransportBuilder,
};
pub use self::subscription::{DurableSubscription, Subscription};
pub use self::topic::{DEFAULT_DELIMITER, PrefixTemplate, Topic, TopicError};
pub use self::virtual_topic::{
    VIRTUAL_TOPIC_PREFIX, VirtualTopicPublisherTransport, VirtualTopicSubscriberTransport,
};

use crate::error::BrokerpcError;
use crate::transport::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Prefix of every pub/sub topic on the wire.
pub const FRUGAL_PREFIX: &str = "frugal.";

/// Header carrying the delivery group id of durable messages.
pub const GROUP_ID_HEADER: &str = "JMSXGroupID";

/// Receives the unframed payload of each message.
///
/// Returning an error leaves the message unacknowledged.
pub type SubscriberCallback =
    Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<(), BrokerpcError>> + Send + Sync>;

/// Receives the delivery group id and the unframed payload of each durable
/// message.
pub type DurableSubscriberCallback = Arc<
    dyn Fn(Option<String>, Bytes) -> BoxFuture<'static, Result<(), BrokerpcError>> + Send + Sync,
>;

/// Builds a [`SubscriberCallback`] from an async closure.
pub fn callback_fn<F, Fut>(callback: F) -> SubscriberCallback
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BrokerpcError>> + Send + 'static,
{
    Arc::new(move |payload| callback(payload).boxed())
}

/// Builds a [`DurableSubscriberCallback`] from an async closure.
pub fn durable_callback_fn<F, Fut>(callback: F) -> DurableSubscriberCallback
where
    F: Fn(Option<String>, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BrokerpcError>> + Send + 'static,
{
    Arc::new(move |group_id, payload| callback(group_id, payload).boxed())
}

/// Publishes payloads to topics.
#[async_trait]
pub trait PublisherTransport: Send + Sync + 'static {
    /// Prepares the transport for publishing.
    async fn open(&self) -> Result<(), TransportError>;

    /// Stops publishing.
    async fn close(&self) -> Result<(), TransportError>;

    /// Returns `true` if [`publish`](Self::publish) may be called.
    fn is_open(&self) -> bool;

    /// Largest payload accepted by [`publish`](Self::publish), `0` meaning
    /// unbounded.
    fn publish_size_limit(&self) -> usize;

    /// Frames `payload` and publishes it to `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Delivers messages on one topic to a callback.
#[async_trait]
pub trait SubscriberTransport: Send + Sync + 'static {
    /// Subscribes to `topic`.
    ///
    /// Fails with `AlreadyOpen` if this transport already has a subscription.
    async fn subscribe(&self, topic: &str, callback: SubscriberCallback) -> Result<(), TransportError>;

    /// Stops delivery and releases the broker subscription. Calling it when
    /// not subscribed succeeds without doing anything.
    async fn unsubscribe(&self) -> Result<(), TransportError>;

    /// Unsubscribes and removes any broker-side state for the subscription.
    async fn remove(&self) -> Result<(), TransportError> {
        self.unsubscribe().await
    }

    /// Returns `true` while subscribed.
    fn is_subscribed(&self) -> bool;
}

/// Publishes payloads to topics within a delivery group.
#[async_trait]
pub trait DurablePublisherTransport: Send + Sync + 'static {
    /// Prepares the transport for publishing.
    async fn open(&self) -> Result<(), TransportError>;

    /// Stops publishing.
    async fn close(&self) -> Result<(), TransportError>;

    /// Returns `true` if [`publish`](Self::publish) may be called.
    fn is_open(&self) -> bool;

    /// Largest payload accepted, `0` meaning unbounded.
    fn publish_size_limit(&self) -> usize;

    /// Frames `payload` and publishes it to `topic` for `group_id`.
    async fn publish(&self, topic: &str, group_id: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Delivers durable messages on one topic to a callback.
#[async_trait]
pub trait DurableSubscriberTransport: Send + Sync + 'static {
    /// Subscribes to `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        callback: DurableSubscriberCallback,
    ) -> Result<(), TransportError>;

    /// Stops delivery. Idempotent.
    async fn unsubscribe(&self) -> Result<(), TransportError>;

    /// Unsubscribes and removes any broker-side state for the subscription.
    async fn remove(&self) -> Result<(), TransportError> {
        self.unsubscribe().await
    }

    /// Returns `true` while subscribed.
    fn is_subscribed(&self) -> bool;
}

/// Creates publisher transports for a scope.
pub trait PublisherTransportFactory: Send + Sync {
    /// Returns a new publisher transport.
    fn get_transport(&self) -> Arc<dyn PublisherTransport>;
}

/// Creates subscriber transports for a scope.
pub trait SubscriberTransportFactory: Send + Sync {
    /// Returns a new subscriber transport.
    fn get_transport(&self) -> Arc<dyn SubscriberTransport>;
}

/// Creates durable publisher transports.
pub trait DurablePublisherTransportFactory: Send + Sync {
    /// Returns a new durable publisher transport.
    fn get_transport(&self) -> Arc<dyn DurablePublisherTransport>;
}

/// Creates durable subscriber transports.
pub trait DurableSubscriberTransportFactory: Send + Sync {
    /// Returns a new durable subscriber transport.
    fn get_transport(&self) -> Arc<dyn DurableSubscriberTransport>;
}

impl<F> PublisherTransportFactory for F
where
    F: Fn() -> Arc<dyn PublisherTransport> + Send + Sync,
{
    fn get_transport(&self) -> Arc<dyn PublisherTransport> {
        self()
    }
}

impl<F> SubscriberTransportFactory for F
where
    F: Fn() -> Arc<dyn SubscriberTransport> + Send + Sync,
{
    fn get_transport(&self) -> Arc<dyn SubscriberTransport> {
        self()
    }
}

impl<F> DurablePublisherTransportFactory for F
where
    F: Fn() -> Arc<dyn DurablePublisherTransport> + Send + Sync,
{
    fn get_transport(&self) -> Arc<dyn DurablePublisherTransport> {
        self()
    }
}

impl<F> DurableSubscriberTransportFactory for F
where
    F: Fn() -> Arc<dyn DurableSubscriberTransport> + Send + Sync,
{
    fn get_transport(&self) -> Arc<dyn DurableSubscriberTransport> {
        self()
    }
}
