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

use super::{DurableSubscriberTransport, SubscriberTransport};
use crate::transport::TransportError;
use std::fmt;
use std::sync::Arc;

/// An active subscription on one topic.
///
/// The subscription owns its transport. Unsubscribing releases the broker
/// subscription once; later calls succeed without touching the broker.
pub struct Subscription {
    topic: String,
    transport: Arc<dyn SubscriberTransport>,
}

impl Subscription {
    /// Wraps a transport already subscribed to `topic`.
    pub fn new(topic: impl Into<String>, transport: Arc<dyn SubscriberTransport>) -> Self {
        Self {
            topic: topic.into(),
            transport,
        }
    }

    /// Returns the subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns `true` while the transport is delivering messages.
    pub fn is_subscribed(&self) -> bool {
        self.transport.is_subscribed()
    }

    /// Stops delivery.
    pub async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.transport.unsubscribe().await
    }

    /// Stops delivery and removes broker-side state.
    pub async fn remove(&self) -> Result<(), TransportError> {
        self.transport.remove().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// An active durable subscription on one topic.
pub struct DurableSubscription {
    topic: String,
    transport: Arc<dyn DurableSubscriberTransport>,
}

impl DurableSubscription {
    /// Wraps a durable transport already subscribed to `topic`.
    pub fn new(topic: impl Into<String>, transport: Arc<dyn DurableSubscriberTransport>) -> Self {
        Self {
            topic: topic.into(),
            transport,
        }
    }

    /// Returns the subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns `true` while the transport is delivering messages.
    pub fn is_subscribed(&self) -> bool {
        self.transport.is_subscribed()
    }

    /// Stops delivery.
    pub async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.transport.unsubscribe().await
    }

    /// Stops delivery and removes broker-side state.
    pub async fn remove(&self) -> Result<(), TransportError> {
        self.transport.remove().await
    }
}

impl fmt::Debug for DurableSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableSubscription")
            .field("topic", &self.topic)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
