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

//! Bus-backed server with a bounded worker pool.
//!
//! ```text
//! subject ──► receiver task ──► bounded queue ──► worker 1..N ──► processor
//!   (one per subject)   │                                           │
//!                       └─ no reply subject: discarded              └─► publish to reply subject
//! ```
//!
//! The received hook runs on the receiver task before the frame is queued,
//! the started and finished hooks run on the worker around the processor.

use super::properties::{self, RequestHook, RequestProperties};
use super::Processor;
use crate::broker::{BusConnection, BusSubscription, SubscriptionId};
use crate::config::ServerConfig;
use crate::error::BrokerpcError;
use crate::observability::{ServerMetrics, ServerMetricsSnapshot};
use crate::transport::TransportError;
use crate::wire;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Builder for [`BrokerServer`].
///
/// Defaults: one worker, a queue of 64 frames, a 5 second high watermark,
/// 1 MiB responses, no queue group.
pub struct BrokerServerBuilder {
    connection: Arc<dyn BusConnection>,
    processor: Arc<dyn Processor>,
    subjects: Vec<String>,
    queue_group: Option<String>,
    config: ServerConfig,
    on_received: Option<RequestHook>,
    on_started: Option<RequestHook>,
    on_finished: Option<RequestHook>,
    metrics: Arc<ServerMetrics>,
}

impl BrokerServerBuilder {
    /// Serves requests published to `subjects`.
    pub fn new<I, S>(connection: Arc<dyn BusConnection>, processor: Arc<dyn Processor>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            connection,
            processor,
            subjects: subjects.into_iter().map(Into::into).collect(),
            queue_group: None,
            config: ServerConfig::default(),
            on_received: None,
            on_started: None,
            on_finished: None,
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    /// Subscribes within `group`, so that each request reaches one server
    /// of the group.
    pub fn with_queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    /// Sets the number of worker tasks.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Sets the capacity of the work queue.
    pub fn with_queue_length(mut self, length: usize) -> Self {
        self.config.queue_length = length;
        self
    }

    /// Sets how long a frame may wait in the queue before it counts as
    /// lagged.
    pub fn with_high_watermark(mut self, watermark: Duration) -> Self {
        self.config.high_watermark_ms = u64::try_from(watermark.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the largest reply payload published, `0` meaning unbounded.
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    /// Applies every setting of `config`.
    pub fn with_config(mut self, config: &ServerConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Replaces the hook run when a frame is received.
    ///
    /// The default records the receive time that the lag check relies on.
    pub fn with_request_received_hook(mut self, hook: RequestHook) -> Self {
        self.on_received = Some(hook);
        self
    }

    /// Replaces the hook run when a worker picks a frame up.
    ///
    /// The default warns when the frame waited longer than the high
    /// watermark.
    pub fn with_request_started_hook(mut self, hook: RequestHook) -> Self {
        self.on_started = Some(hook);
        self
    }

    /// Replaces the hook run after a frame is processed.
    pub fn with_request_finished_hook(mut self, hook: RequestHook) -> Self {
        self.on_finished = Some(hook);
        self
    }

    /// Shares `metrics` with other servers.
    pub fn with_metrics(mut self, metrics: Arc<ServerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Builds the server.
    pub fn build(self) -> BrokerServer {
        let high_watermark = self.config.high_watermark();
        let inner = Inner {
            connection: self.connection,
            processor: self.processor,
            subjects: self.subjects,
            queue_group: self.queue_group,
            worker_count: self.config.worker_count.max(1),
            queue_length: self.config.queue_length.max(1),
            high_watermark,
            max_response_size: self.config.max_response_size,
            on_received: self.on_received.unwrap_or_else(properties::record_received_time),
            on_started: self
                .on_started
                .unwrap_or_else(|| properties::warn_above_watermark(high_watermark)),
            on_finished: self.on_finished.unwrap_or_else(properties::noop),
            metrics: self.metrics,
        };
        BrokerServer {
            inner: Arc::new(inner),
            quit: CancellationToken::new(),
        }
    }
}

struct Work {
    data: Bytes,
    reply: String,
    properties: RequestProperties,
}

struct Inner {
    connection: Arc<dyn BusConnection>,
    processor: Arc<dyn Processor>,
    subjects: Vec<String>,
    queue_group: Option<String>,
    worker_count: usize,
    queue_length: usize,
    high_watermark: Duration,
    max_response_size: usize,
    on_received: RequestHook,
    on_started: RequestHook,
    on_finished: RequestHook,
    metrics: Arc<ServerMetrics>,
}

/// Answers requests published on bus subjects.
///
/// Clones share the same server, so one clone can [`serve`](Self::serve)
/// while another calls [`stop`](Self::stop).
///
/// # Examples
///
/// ```rust
/// use brokerpc::broker::memory::MemoryBus;
/// use brokerpc::server::{BrokerServerBuilder, ContextProcessor};
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), brokerpc::BrokerpcError> {
/// let bus = Arc::new(MemoryBus::new());
/// let echo = ContextProcessor::new(|ctx, body: Bytes| async move {
///     Ok::<_, brokerpc::BrokerpcError>((ctx, body))
/// });
/// let server = BrokerServerBuilder::new(bus, Arc::new(echo), ["echo"])
///     .with_worker_count(4)
///     .build();
///
/// let running = tokio::spawn({
///     let server = server.clone();
///     async move { server.serve().await }
/// });
/// server.stop();
/// running.await.unwrap()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrokerServer {
    inner: Arc<Inner>,
    quit: CancellationToken,
}

impl BrokerServer {
    /// Subscribes to every subject, starts the workers and runs until
    /// [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns the broker error if a subscription fails. Subscriptions made
    /// before the failure are released.
    pub async fn serve(&self) -> Result<(), BrokerpcError> {
        let inner = &self.inner;
        let mut subscriptions = Vec::with_capacity(inner.subjects.len());
        for subject in &inner.subjects {
            match inner
                .connection
                .subscribe(subject, inner.queue_group.as_deref())
                .await
            {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    let ids: Vec<SubscriptionId> = subscriptions.iter().map(BusSubscription::id).collect();
                    self.release(&ids).await;
                    return Err(e.into());
                }
            }
        }
        let ids: Vec<SubscriptionId> = subscriptions.iter().map(BusSubscription::id).collect();

        let (queue, receiver) = mpsc::channel(inner.queue_length);
        let receiver = Arc::new(Mutex::new(receiver));
        let mut tasks = JoinSet::new();
        for subscription in subscriptions {
            tasks.spawn(receive(
                Arc::clone(inner),
                subscription,
                queue.clone(),
                self.quit.clone(),
            ));
        }
        drop(queue);
        for worker in 0..inner.worker_count {
            tasks.spawn(work(
                Arc::clone(inner),
                worker,
                Arc::clone(&receiver),
                self.quit.clone(),
            ));
        }

        info!(
            subjects = ?inner.subjects,
            workers = inner.worker_count,
            queue_group = inner.queue_group.as_deref().unwrap_or(""),
            "server running"
        );
        self.quit.cancelled().await;
        info!("server stopping");

        self.release(&ids).await;
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Signals [`serve`](Self::serve) to return. Frames being processed are
    /// finished; queued frames are dropped.
    pub fn stop(&self) {
        self.quit.cancel();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Returns the server counters.
    pub fn metrics(&self) -> ServerMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    async fn release(&self, ids: &[SubscriptionId]) {
        for id in ids {
            if let Err(e) = self.inner.connection.unsubscribe(*id).await {
                warn!(subscription = %id, error = %e, "error unsubscribing");
            }
        }
    }
}

async fn receive(
    inner: Arc<Inner>,
    mut subscription: BusSubscription,
    queue: mpsc::Sender<Work>,
    quit: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = quit.cancelled() => return,
            message = subscription.next() => message,
        };
        let Some(message) = message else {
            if !quit.is_cancelled() {
                error!(subject = subscription.subject(), "subscription closed unexpectedly");
            }
            return;
        };

        let properties = RequestProperties::new();
        (inner.on_received)(&properties);
        let reply = match message.reply {
            Some(reply) if !reply.is_empty() => reply,
            _ => {
                warn!(subject = %message.subject, "discarding invalid request (no reply)");
                inner.metrics.record_discarded();
                continue;
            }
        };

        let work = Work {
            data: message.data,
            reply,
            properties,
        };
        tokio::select! {
            _ = quit.cancelled() => {
                inner.metrics.record_discarded();
                return;
            }
            queued = queue.send(work) => {
                if queued.is_err() {
                    return;
                }
                inner.metrics.record_received();
            }
        }
    }
}

async fn work(
    inner: Arc<Inner>,
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<Work>>>,
    quit: CancellationToken,
) {
    debug!(worker, "worker started");
    loop {
        let next = tokio::select! {
            _ = quit.cancelled() => break,
            next = async { queue.lock().await.recv().await } => next,
        };
        let Some(work) = next else {
            break;
        };
        inner.handle(work).await;
    }
    debug!(worker, "worker stopped");
}

impl Inner {
    #[cfg_attr(feature = "observability", instrument(skip_all, fields(reply = %work.reply)))]
    async fn handle(&self, work: Work) {
        (self.on_started)(&work.properties);
        if work
            .properties
            .queued_for()
            .is_some_and(|waited| waited > self.high_watermark)
        {
            self.metrics.record_lagged();
        }

        match self.process(&work).await {
            Ok(()) => self.metrics.record_processed(),
            Err(e) => {
                error!(reply = %work.reply, error = %e, "error processing request");
                self.metrics.record_failed();
            }
        }
        (self.on_finished)(&work.properties);
    }

    async fn process(&self, work: &Work) -> Result<(), BrokerpcError> {
        let request = wire::frame::decode_bytes(&work.data)?;
        let reply = self.processor.process(request, &work.properties).await?;
        if reply.is_empty() {
            return Ok(());
        }
        if self.max_response_size > 0 && reply.len() > self.max_response_size {
            return Err(TransportError::response_too_large(format!(
                "response of {} bytes exceeds the {} byte limit",
                reply.len(),
                self.max_response_size
            ))
            .into());
        }
        let frame = wire::encode(&reply)?;
        self.connection.publish(&work.reply, None, frame).await?;
        Ok(())
    }
}
