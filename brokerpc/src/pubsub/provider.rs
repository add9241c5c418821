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

//! Bundles of transport factories and middleware handed to generated
//! publishers, subscribers and clients.

use super::{
    DurablePublisherTransport, DurablePublisherTransportFactory, DurableSubscriberCallback,
    DurableSubscriberTransport, DurableSubscriberTransportFactory, DurableSubscription,
    PublisherTransport, PublisherTransportFactory, SubscriberCallback, SubscriberTransport,
    SubscriberTransportFactory, Subscription, Topic, callback_fn, durable_callback_fn,
};
use crate::context::Context;
use crate::middleware::{Method, MethodDescriptor, ServiceMiddleware};
use crate::transport::{TransportError, UnaryTransport};
use crate::wire;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

fn chain(outer: &[ServiceMiddleware], inner: &[ServiceMiddleware]) -> Vec<ServiceMiddleware> {
    outer.iter().chain(inner).cloned().collect()
}

/// Context handed to subscriber middleware: the message's own header block
/// when it carries one, a fresh context otherwise.
fn delivery_context(payload: &[u8]) -> Context {
    wire::read_request_header(payload).map_or_else(|_| Context::new(), |(ctx, _)| ctx)
}

fn descriptor(topic: &Topic) -> MethodDescriptor {
    MethodDescriptor::new(topic.scope(), topic.operation())
}

/// Runs `callback` behind `middleware` for every delivered message.
fn wrap_callback(
    topic: &Topic,
    middleware: Vec<ServiceMiddleware>,
    callback: SubscriberCallback,
) -> SubscriberCallback {
    if middleware.is_empty() {
        return callback;
    }
    let method = Method::new(
        descriptor(topic),
        move |_ctx: Context, payload: Bytes| callback(payload),
        middleware,
    );
    callback_fn(move |payload: Bytes| {
        let method = method.clone();
        async move { method.invoke(delivery_context(&payload), payload).await }
    })
}

fn wrap_durable_callback(
    topic: &Topic,
    middleware: Vec<ServiceMiddleware>,
    callback: DurableSubscriberCallback,
) -> DurableSubscriberCallback {
    if middleware.is_empty() {
        return callback;
    }
    let method = Method::new(
        descriptor(topic),
        move |_ctx: Context, (group_id, payload): (Option<String>, Bytes)| {
            callback(group_id, payload)
        },
        middleware,
    );
    durable_callback_fn(move |group_id: Option<String>, payload: Bytes| {
        let method = method.clone();
        async move {
            let ctx = delivery_context(&payload);
            method.invoke(ctx, (group_id, payload)).await
        }
    })
}

/// Creates the transports and middleware of a pub/sub scope.
///
/// # Examples
///
/// ```rust
/// use brokerpc::broker::memory::MemoryBus;
/// use brokerpc::pubsub::{
///     BusPublisherTransportFactory, BusSubscriberTransportFactory, ScopeProvider,
/// };
/// use std::sync::Arc;
///
/// let bus = Arc::new(MemoryBus::new());
/// let provider = ScopeProvider::new(
///     Arc::new(BusPublisherTransportFactory::new(bus.clone())),
///     Arc::new(BusSubscriberTransportFactory::new(bus)),
///     Vec::new(),
/// );
/// assert!(provider.outer_middleware().is_empty());
/// ```
pub struct ScopeProvider {
    publishers: Arc<dyn PublisherTransportFactory>,
    subscribers: Arc<dyn SubscriberTransportFactory>,
    outer_middleware: Vec<ServiceMiddleware>,
    inner_middleware: Vec<ServiceMiddleware>,
}

impl ScopeProvider {
    /// Creates a provider whose `middleware` wraps every call outermost.
    pub fn new(
        publishers: Arc<dyn PublisherTransportFactory>,
        subscribers: Arc<dyn SubscriberTransportFactory>,
        middleware: Vec<ServiceMiddleware>,
    ) -> Self {
        Self::with_middleware(publishers, subscribers, middleware, Vec::new())
    }

    /// Creates a provider with separate outer and inner middleware.
    pub fn with_middleware(
        publishers: Arc<dyn PublisherTransportFactory>,
        subscribers: Arc<dyn SubscriberTransportFactory>,
        outer_middleware: Vec<ServiceMiddleware>,
        inner_middleware: Vec<ServiceMiddleware>,
    ) -> Self {
        Self {
            publishers,
            subscribers,
            outer_middleware,
            inner_middleware,
        }
    }

    /// Returns a new publisher transport.
    pub fn publisher(&self) -> Arc<dyn PublisherTransport> {
        self.publishers.get_transport()
    }

    /// Returns a new subscriber transport.
    pub fn subscriber(&self) -> Arc<dyn SubscriberTransport> {
        self.subscribers.get_transport()
    }

    /// Subscribes a new transport to `topic`.
    ///
    /// Each delivered message passes through the outer and then the inner
    /// middleware before `callback` runs. A middleware error fails the
    /// delivery, so the message is not acknowledged.
    pub async fn subscribe(
        &self,
        topic: &Topic,
        callback: SubscriberCallback,
    ) -> Result<Subscription, TransportError> {
        let callback = wrap_callback(
            topic,
            chain(&self.outer_middleware, &self.inner_middleware),
            callback,
        );
        let transport = self.subscriber();
        transport.subscribe(topic.as_str(), callback).await?;
        debug!(topic = %topic, "scope subscribed");
        Ok(Subscription::new(topic.as_str(), transport))
    }

    /// Returns the middleware applied outside the inner middleware.
    pub fn outer_middleware(&self) -> Vec<ServiceMiddleware> {
        self.outer_middleware.clone()
    }

    /// Returns the middleware applied closest to the handler.
    pub fn inner_middleware(&self) -> Vec<ServiceMiddleware> {
        self.inner_middleware.clone()
    }
}

/// Creates the transports and middleware of a durable pub/sub scope.
pub struct DurableScopeProvider {
    publishers: Arc<dyn DurablePublisherTransportFactory>,
    subscribers: Arc<dyn DurableSubscriberTransportFactory>,
    outer_middleware: Vec<ServiceMiddleware>,
    inner_middleware: Vec<ServiceMiddleware>,
}

impl DurableScopeProvider {
    /// Creates a provider whose `middleware` wraps every call outermost.
    pub fn new(
        publishers: Arc<dyn DurablePublisherTransportFactory>,
        subscribers: Arc<dyn DurableSubscriberTransportFactory>,
        middleware: Vec<ServiceMiddleware>,
    ) -> Self {
        Self::with_middleware(publishers, subscribers, middleware, Vec::new())
    }

    /// Creates a provider with separate outer and inner middleware.
    pub fn with_middleware(
        publishers: Arc<dyn DurablePublisherTransportFactory>,
        subscribers: Arc<dyn DurableSubscriberTransportFactory>,
        outer_middleware: Vec<ServiceMiddleware>,
        inner_middleware: Vec<ServiceMiddleware>,
    ) -> Self {
        Self {
            publishers,
            subscribers,
            outer_middleware,
            inner_middleware,
        }
    }

    /// Returns a new durable publisher transport.
    pub fn publisher(&self) -> Arc<dyn DurablePublisherTransport> {
        self.publishers.get_transport()
    }

    /// Returns a new durable subscriber transport.
    pub fn subscriber(&self) -> Arc<dyn DurableSubscriberTransport> {
        self.subscribers.get_transport()
    }

    /// Subscribes a new durable transport to `topic`, with the provider's
    /// middleware around `callback`.
    pub async fn subscribe(
        &self,
        topic: &Topic,
        callback: DurableSubscriberCallback,
    ) -> Result<DurableSubscription, TransportError> {
        let callback = wrap_durable_callback(
            topic,
            chain(&self.outer_middleware, &self.inner_middleware),
            callback,
        );
        let transport = self.subscriber();
        transport.subscribe(topic.as_str(), callback).await?;
        debug!(topic = %topic, "durable scope subscribed");
        Ok(DurableSubscription::new(topic.as_str(), transport))
    }

    /// Returns the middleware applied outside the inner middleware.
    pub fn outer_middleware(&self) -> Vec<ServiceMiddleware> {
        self.outer_middleware.clone()
    }

    /// Returns the middleware applied closest to the handler.
    pub fn inner_middleware(&self) -> Vec<ServiceMiddleware> {
        self.inner_middleware.clone()
    }
}

/// The unary transport and middleware of a service client.
pub struct ServiceProvider {
    transport: Arc<dyn UnaryTransport>,
    outer_middleware: Vec<ServiceMiddleware>,
    inner_middleware: Vec<ServiceMiddleware>,
}

impl ServiceProvider {
    /// Creates a provider whose `middleware` wraps every call outermost.
    pub fn new(transport: Arc<dyn UnaryTransport>, middleware: Vec<ServiceMiddleware>) -> Self {
        Self::with_middleware(transport, middleware, Vec::new())
    }

    /// Creates a provider with separate outer and inner middleware.
    pub fn with_middleware(
        transport: Arc<dyn UnaryTransport>,
        outer_middleware: Vec<ServiceMiddleware>,
        inner_middleware: Vec<ServiceMiddleware>,
    ) -> Self {
        Self {
            transport,
            outer_middleware,
            inner_middleware,
        }
    }

    /// Returns the shared unary transport.
    pub fn transport(&self) -> Arc<dyn UnaryTransport> {
        Arc::clone(&self.transport)
    }

    /// Returns the middleware applied outside the inner middleware.
    pub fn outer_middleware(&self) -> Vec<ServiceMiddleware> {
        self.outer_middleware.clone()
    }

    /// Returns the middleware applied closest to the handler.
    pub fn inner_middleware(&self) -> Vec<ServiceMiddleware> {
        self.inner_middleware.clone()
    }

    /// Returns the outer middleware followed by the inner middleware, the
    /// order in which a client composes them.
    pub fn middleware_chain(&self) -> Vec<ServiceMiddleware> {
        chain(&self.outer_middleware, &self.inner_middleware)
    }
}
