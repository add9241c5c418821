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

//! STOMP broker contract.

use super::{BrokerError, SubscriptionId};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// STOMP acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// The broker considers messages acknowledged on delivery.
    Auto,
    /// An ack covers the message and every earlier one.
    Client,
    /// Each message is acknowledged individually.
    ClientIndividual,
}

impl AckMode {
    /// Returns the STOMP header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::ClientIndividual => "client-individual",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A MESSAGE frame received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompMessage {
    /// Destination the message was delivered from
    pub destination: String,
    /// Subscription that received the message
    pub subscription: SubscriptionId,
    /// Broker-assigned message id, used for acknowledgement
    pub message_id: String,
    /// Frame headers
    pub headers: HashMap<String, String>,
    /// Frame body
    pub body: Bytes,
}

impl StompMessage {
    /// Returns a frame header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A live STOMP subscription.
#[derive(Debug)]
pub struct StompSubscription {
    id: SubscriptionId,
    destination: String,
    ack_mode: AckMode,
    messages: mpsc::UnboundedReceiver<StompMessage>,
}

impl StompSubscription {
    /// Creates a subscription handle around a delivery channel.
    pub fn new(
        id: SubscriptionId,
        destination: impl Into<String>,
        ack_mode: AckMode,
        messages: mpsc::UnboundedReceiver<StompMessage>,
    ) -> Self {
        Self {
            id,
            destination: destination.into(),
            ack_mode,
            messages,
        }
    }

    /// Returns the broker subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the subscribed destination.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns the acknowledgement mode.
    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Waits for the next message. Returns `None` once the connection
    /// has dropped the subscription.
    pub async fn next(&mut self) -> Option<StompMessage> {
        self.messages.recv().await
    }

    /// Returns an already delivered message without waiting.
    pub fn try_next(&mut self) -> Option<StompMessage> {
        self.messages.try_recv().ok()
    }
}

/// Connection to a STOMP broker.
#[async_trait]
pub trait StompConnection: Send + Sync + 'static {
    /// Returns `true` while the connection is established.
    fn is_connected(&self) -> bool;

    /// Sends a message to `destination`.
    async fn send(
        &self,
        destination: &str,
        content_type: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<(), BrokerError>;

    /// Subscribes to `destination`.
    async fn subscribe(
        &self,
        destination: &str,
        ack_mode: AckMode,
    ) -> Result<StompSubscription, BrokerError>;

    /// Removes a subscription at the broker.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError>;

    /// Acknowledges a received message.
    async fn ack(&self, message: &StompMessage) -> Result<(), BrokerError>;

    /// Closes the connection.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Re-establishes a STOMP connection after the broker dropped it.
///
/// Implemented for any async closure taking the maximum number of attempts:
///
/// ```rust
/// use brokerpc::broker::memory::MemoryStompBroker;
/// use brokerpc::broker::{BrokerError, ReconnectHandler, StompConnection};
/// use std::sync::Arc;
///
/// let broker = MemoryStompBroker::new();
/// let handler = move |_max_attempts: u32| {
///     let broker = broker.clone();
///     async move { Ok::<Arc<dyn StompConnection>, BrokerError>(broker.connect()) }
/// };
/// let _handler: Arc<dyn ReconnectHandler> = Arc::new(handler);
/// ```
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    /// Attempts to reconnect, giving up after `max_attempts` tries.
    async fn reconnect(&self, max_attempts: u32) -> Result<Arc<dyn StompConnection>, BrokerError>;
}

#[async_trait]
impl<F, Fut> ReconnectHandler for F
where
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<dyn StompConnection>, BrokerError>> + Send + 'static,
{
    async fn reconnect(&self, max_attempts: u32) -> Result<Arc<dyn StompConnection>, BrokerError> {
        self(max_attempts).await
    }
}
