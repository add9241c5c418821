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

//! Subject-broadcast bus contract.

use super::{BrokerError, SubscriptionId};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message was published to
    pub subject: String,
    /// Reply subject supplied by the publisher, if any
    pub reply: Option<String>,
    /// Message body
    pub data: Bytes,
}

/// A live bus subscription.
///
/// Messages arrive on an internal channel. The channel closes when the
/// connection drops, which is how transports detect an unclean close.
#[derive(Debug)]
pub struct BusSubscription {
    id: SubscriptionId,
    subject: String,
    queue_group: Option<String>,
    messages: mpsc::UnboundedReceiver<BusMessage>,
}

impl BusSubscription {
    /// Creates a subscription handle around a delivery channel.
    pub fn new(
        id: SubscriptionId,
        subject: impl Into<String>,
        queue_group: Option<String>,
        messages: mpsc::UnboundedReceiver<BusMessage>,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            queue_group,
            messages,
        }
    }

    /// Returns the broker subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the subscribed subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the queue group, if any.
    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    /// Waits for the next message. Returns `None` once the connection
    /// has dropped the subscription.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.messages.recv().await
    }

    /// Returns an already delivered message without waiting.
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.messages.try_recv().ok()
    }
}

/// Connection to a subject-broadcast bus.
///
/// Every subscriber on a subject sees every message, except subscribers that
/// share a queue group, among which each message is delivered to exactly one.
#[async_trait]
pub trait BusConnection: Send + Sync + 'static {
    /// Returns `true` while the connection is established.
    fn is_connected(&self) -> bool;

    /// Returns a fresh, unique reply subject.
    fn new_inbox(&self) -> String;

    /// Publishes `data` to `subject`, optionally naming a reply subject.
    async fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        data: Bytes,
    ) -> Result<(), BrokerError>;

    /// Subscribes to `subject`, optionally within a queue group.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<BusSubscription, BrokerError>;

    /// Removes a subscription at the broker.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError>;
}
