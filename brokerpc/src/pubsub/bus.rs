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

//! Pub/sub over the broadcast bus.

use super::dispatch::{Dispatcher, SubscriptionSlot, released};
use super::{
    FRUGAL_PREFIX, PublisherTransport, PublisherTransportFactory, SubscriberCallback,
    SubscriberTransport, SubscriberTransportFactory,
};
use crate::broker::{BusConnection, BusSubscription};
use crate::observability::{SubscriberMetrics, SubscriberMetricsSnapshot};
use crate::transport::{TransportError, check_request_size};
use crate::wire;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Default publish limit of the bus family.
pub const DEFAULT_BUS_PUBLISH_SIZE_LIMIT: usize = 1024 * 1024;

fn subject(topic: &str) -> String {
    format!("{FRUGAL_PREFIX}{topic}")
}

/// Publishes frames to `frugal.<topic>` subjects.
pub struct BusPublisherTransport {
    connection: Arc<dyn BusConnection>,
    size_limit: usize,
}

impl BusPublisherTransport {
    /// Creates a publisher with the default 1 MiB limit.
    pub fn new(connection: Arc<dyn BusConnection>) -> Self {
        Self {
            connection,
            size_limit: DEFAULT_BUS_PUBLISH_SIZE_LIMIT,
        }
    }

    /// Overrides the publish limit. `0` means unbounded.
    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = limit;
        self
    }
}

#[async_trait]
impl PublisherTransport for BusPublisherTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if !self.connection.is_connected() {
            return Err(TransportError::not_open("bus not connected"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.is_connected()
    }

    fn publish_size_limit(&self) -> usize {
        self.size_limit
    }

    #[cfg_attr(feature = "observability", instrument(skip(self, payload), fields(len = payload.len())))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::not_open("bus transport not open"));
        }
        check_request_size(payload.len(), self.size_limit)?;
        let frame = wire::encode(payload)?;
        self.connection
            .publish(&subject(topic), None, frame)
            .await
            .map_err(TransportError::from)
    }
}

/// Subscribes to `frugal.<topic>` subjects, optionally as a member of a
/// queue group so that one member receives each message.
pub struct BusSubscriberTransport {
    connection: Arc<dyn BusConnection>,
    queue_group: Option<String>,
    slot: Arc<SubscriptionSlot>,
    metrics: Arc<SubscriberMetrics>,
}

impl BusSubscriberTransport {
    /// Creates a subscriber where every instance sees every message.
    pub fn new(connection: Arc<dyn BusConnection>) -> Self {
        Self {
            connection,
            queue_group: None,
            slot: Arc::new(SubscriptionSlot::new()),
            metrics: Arc::new(SubscriberMetrics::new()),
        }
    }

    /// Joins `queue_group`.
    pub fn with_queue_group(mut self, queue_group: impl Into<String>) -> Self {
        self.queue_group = Some(queue_group.into());
        self
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
}

async fn process_messages(
    mut subscription: BusSubscription,
    callback: SubscriberCallback,
    dispatcher: Dispatcher,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            message = subscription.next() => match message {
                Some(message) => {
                    let callback = &callback;
                    dispatcher.dispatch(&message.data, |payload| callback(payload)).await;
                }
                None => {
                    if !stop.is_cancelled() {
                        error!(
                            subject = subscription.subject(),
                            "error processing subscription messages, message channel closed unexpectedly"
                        );
                    }
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl SubscriberTransport for BusSubscriberTransport {
    #[cfg_attr(feature = "observability", instrument(skip(self, callback)))]
    async fn subscribe(&self, topic: &str, callback: SubscriberCallback) -> Result<(), TransportError> {
        if !self.connection.is_connected() {
            return Err(TransportError::not_open("bus not connected"));
        }
        if topic.is_empty() {
            return Err(TransportError::unknown(
                "bus transport cannot subscribe to empty topic",
            ));
        }
        self.slot.reserve("bus")?;

        let subject = subject(topic);
        let subscription = match self
            .connection
            .subscribe(&subject, self.queue_group.as_deref())
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.slot.release();
                return Err(e.into());
            }
        };
        debug!(subject = %subject, queue_group = ?self.queue_group, "subscribed");

        let stop = self.slot.activate(subscription.id());
        let dispatcher = Dispatcher::new(&subject, Arc::clone(&self.metrics));
        tokio::spawn(process_messages(subscription, callback, dispatcher, stop));
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        let Some(active) = self.slot.take() else {
            return Ok(());
        };
        released(active.id, self.connection.unsubscribe(active.id).await)
    }

    fn is_subscribed(&self) -> bool {
        self.connection.is_connected() && self.slot.is_active()
    }
}

/// Creates [`BusPublisherTransport`]s on one connection.
pub struct BusPublisherTransportFactory {
    connection: Arc<dyn BusConnection>,
    size_limit: usize,
}

impl BusPublisherTransportFactory {
    /// Creates a factory with the default publish limit.
    pub fn new(connection: Arc<dyn BusConnection>) -> Self {
        Self {
            connection,
            size_limit: DEFAULT_BUS_PUBLISH_SIZE_LIMIT,
        }
    }

    /// Overrides the publish limit of created transports.
    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = limit;
        self
    }
}

impl PublisherTransportFactory for BusPublisherTransportFactory {
    fn get_transport(&self) -> Arc<dyn PublisherTransport> {
        Arc::new(
            BusPublisherTransport::new(Arc::clone(&self.connection))
                .with_size_limit(self.size_limit),
        )
    }
}

/// Creates [`BusSubscriberTransport`]s on one connection.
pub struct BusSubscriberTransportFactory {
    connection: Arc<dyn BusConnection>,
    queue_group: Option<String>,
    metrics: Arc<SubscriberMetrics>,
}

impl BusSubscriberTransportFactory {
    /// Creates a factory whose transports share one set of counters.
    pub fn new(connection: Arc<dyn BusConnection>) -> Self {
        Self {
            connection,
            queue_group: None,
            metrics: Arc::new(SubscriberMetrics::new()),
        }
    }

    /// Places created transports in `queue_group`.
    pub fn with_queue_group(mut self, queue_group: impl Into<String>) -> Self {
        self.queue_group = Some(queue_group.into());
        self
    }

    /// Returns the counters shared by created transports.
    pub fn metrics(&self) -> SubscriberMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl SubscriberTransportFactory for BusSubscriberTransportFactory {
    fn get_transport(&self) -> Arc<dyn SubscriberTransport> {
        let mut transport = BusSubscriberTransport::new(Arc::clone(&self.connection))
            .with_metrics(Arc::clone(&self.metrics));
        if let Some(group) = &self.queue_group {
            transport = transport.with_queue_group(group.clone());
        }
        Arc::new(transport)
    }
}
