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

//! Unary transport over a subject-broadcast bus.

use super::{CloseCause, TransportError, UnaryTransport, check_request_size};
use crate::broker::{BusConnection, BusSubscription, SubscriptionId};
use crate::context::Context;
use crate::registry::Registry;
use crate::wire;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Largest request a bus message can carry (1 MiB).
pub const DEFAULT_BUS_REQUEST_SIZE_LIMIT: usize = 1024 * 1024;

const CLOSE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
enum Lifecycle {
    Closed,
    Opening,
    Open {
        subscription: SubscriptionId,
        stop: CancellationToken,
    },
}

struct Shared {
    registry: Registry,
    lifecycle: Mutex<Lifecycle>,
    closed: broadcast::Sender<CloseCause>,
}

impl Shared {
    /// Marks the transport closed after its inbox stream ended on its own.
    fn close_uncleanly(&self, inbox: &str) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Open { .. }) {
                return;
            }
            *lifecycle = Lifecycle::Closed;
        }
        let cause = TransportError::end_of_file(format!("inbox {inbox} closed unexpectedly"));
        warn!(inbox, "bus transport closed uncleanly");
        // No receivers just means nobody is watching.
        let _ = self.closed.send(CloseCause::Unclean(cause));
    }
}

/// Builder for [`BusTransport`].
pub struct BusTransportBuilder {
    connection: Arc<dyn BusConnection>,
    subject: String,
    inbox: Option<String>,
    request_size_limit: usize,
}

impl BusTransportBuilder {
    /// Uses a fixed inbox instead of a generated one.
    pub fn with_inbox(mut self, inbox: impl Into<String>) -> Self {
        self.inbox = Some(inbox.into());
        self
    }

    /// Overrides the request size limit. `0` means unbounded.
    pub fn with_request_size_limit(mut self, limit: usize) -> Self {
        self.request_size_limit = limit;
        self
    }

    /// Builds the transport. It starts closed.
    pub fn build(self) -> BusTransport {
        let inbox = self
            .inbox
            .unwrap_or_else(|| self.connection.new_inbox());
        let (closed, _) = broadcast::channel(CLOSE_CHANNEL_CAPACITY);
        BusTransport {
            connection: self.connection,
            subject: self.subject,
            inbox,
            request_size_limit: self.request_size_limit,
            shared: Arc::new(Shared {
                registry: Registry::new(),
                lifecycle: Mutex::new(Lifecycle::Closed),
                closed,
            }),
        }
    }
}

/// Request/response over a broadcast bus.
///
/// Requests are published to a fixed subject with this transport's inbox as
/// the reply subject. One background task per open transport reads the inbox
/// and routes replies through a [`Registry`] keyed by operation id.
///
/// # Examples
///
/// ```rust
/// use brokerpc::broker::memory::MemoryBus;
/// use brokerpc::transport::{BusTransport, UnaryTransport};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = Arc::new(MemoryBus::new());
/// let transport = BusTransport::builder(bus, "music.Store").build();
/// transport.open().await?;
/// assert!(transport.is_open());
/// transport.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct BusTransport {
    connection: Arc<dyn BusConnection>,
    subject: String,
    inbox: String,
    request_size_limit: usize,
    shared: Arc<Shared>,
}

impl BusTransport {
    /// Starts building a transport that sends requests to `subject`.
    pub fn builder(
        connection: Arc<dyn BusConnection>,
        subject: impl Into<String>,
    ) -> BusTransportBuilder {
        BusTransportBuilder {
            connection,
            subject: subject.into(),
            inbox: None,
            request_size_limit: DEFAULT_BUS_REQUEST_SIZE_LIMIT,
        }
    }

    /// Returns the request subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the reply inbox.
    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    /// Returns the number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.registry.len()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::not_open("bus transport not open"));
        }
        Ok(())
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = wire::encode(payload)?;
        self.connection
            .publish(&self.subject, Some(&self.inbox), frame)
            .await
            .map_err(TransportError::from)
    }
}

async fn read_inbox(
    mut subscription: BusSubscription,
    shared: Arc<Shared>,
    stop: CancellationToken,
    inbox: String,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            message = subscription.next() => match message {
                Some(message) => {
                    if let Err(error) = shared.registry.execute(&message.data) {
                        warn!(inbox = %inbox, error = %error, "discarding reply frame");
                    }
                }
                None => {
                    shared.close_uncleanly(&inbox);
                    break;
                }
            },
        }
    }
    debug!(inbox = %inbox, "inbox reader stopped");
}

#[async_trait]
impl UnaryTransport for BusTransport {
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(subject = %self.subject)))]
    async fn open(&self) -> Result<(), TransportError> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Closed) {
                return Err(TransportError::already_open("bus transport already open"));
            }
            if !self.connection.is_connected() {
                return Err(TransportError::not_open("bus connection not connected"));
            }
            *lifecycle = Lifecycle::Opening;
        }

        let subscription = match self.connection.subscribe(&self.inbox, None).await {
            Ok(subscription) => subscription,
            Err(error) => {
                *self.shared.lifecycle.lock() = Lifecycle::Closed;
                return Err(error.into());
            }
        };

        let stop = CancellationToken::new();
        let installed = {
            let mut lifecycle = self.shared.lifecycle.lock();
            let opening = matches!(*lifecycle, Lifecycle::Opening);
            if opening {
                *lifecycle = Lifecycle::Open {
                    subscription: subscription.id(),
                    stop: stop.clone(),
                };
            }
            opening
        };
        if !installed {
            // close() ran while the inbox subscription was being set up.
            if let Err(error) = self.connection.unsubscribe(subscription.id()).await {
                warn!(inbox = %self.inbox, error = %error, "could not unsubscribe inbox");
            }
            return Err(TransportError::not_open("bus transport closed while opening"));
        }
        tokio::spawn(read_inbox(
            subscription,
            Arc::clone(&self.shared),
            stop,
            self.inbox.clone(),
        ));
        debug!(subject = %self.subject, inbox = %self.inbox, "bus transport open");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let previous = {
            let mut lifecycle = self.shared.lifecycle.lock();
            let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Closed);
            if !matches!(previous, Lifecycle::Open { .. }) {
                // Sent under the lock so an open or reopen racing this close sees it.
                let _ = self.shared.closed.send(CloseCause::Clean);
            }
            previous
        };
        let Lifecycle::Open { subscription, stop } = previous else {
            debug!(subject = %self.subject, "close called on a bus transport that is not open");
            return Ok(());
        };
        stop.cancel();
        if let Err(error) = self.connection.unsubscribe(subscription).await {
            warn!(inbox = %self.inbox, error = %error, "could not unsubscribe inbox");
        }
        let _ = self.shared.closed.send(CloseCause::Clean);
        Ok(())
    }

    fn is_open(&self) -> bool {
        matches!(*self.shared.lifecycle.lock(), Lifecycle::Open { .. })
            && self.connection.is_connected()
    }

    fn request_size_limit(&self) -> usize {
        self.request_size_limit
    }

    async fn oneway(&self, _ctx: &Context, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        check_request_size(payload.len(), self.request_size_limit)?;
        self.publish(payload).await
    }

    #[cfg_attr(
        feature = "observability",
        instrument(skip_all, fields(subject = %self.subject, correlation_id = %ctx.correlation_id()))
    )]
    async fn request(&self, ctx: &mut Context, payload: &[u8]) -> Result<Bytes, TransportError> {
        self.ensure_open()?;
        check_request_size(payload.len(), self.request_size_limit)?;

        let op_id = ctx.op_id()?;
        let mut closed = self.shared.closed.subscribe();
        let reply = self.shared.registry.register(ctx)?;
        if let Err(error) = self.publish(payload).await {
            self.shared.registry.unregister(op_id);
            return Err(error);
        }

        let timeout = ctx.timeout();
        let outcome = tokio::select! {
            reply = reply => reply.map_err(|_| TransportError::unknown("reply slot cancelled")),
            _ = closed.recv() => Err(TransportError::unknown("transport closed before a reply arrived")),
            _ = tokio::time::sleep(timeout) => Err(TransportError::timed_out(format!(
                "request timed out after {} ms", timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(payload) => {
                wire::read_response_header(&payload, ctx)?;
                Ok(payload)
            }
            Err(error) => {
                self.shared.registry.unregister(op_id);
                Err(error)
            }
        }
    }

    fn closed(&self) -> broadcast::Receiver<CloseCause> {
        self.shared.closed.subscribe()
    }
}
