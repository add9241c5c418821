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

//! Counters for the broker server and pub/sub subscribers.
//!
//! Metrics are kept in atomic counters readable at any time. With the
//! `observability` feature enabled each increment is also forwarded to the
//! [`metrics`](https://docs.rs/metrics) facade under the `brokerpc.` prefix,
//! so any installed recorder picks them up.
//!
//! # Examples
//!
//! ```rust
//! use brokerpc::observability::ServerMetrics;
//!
//! let metrics = ServerMetrics::new();
//! metrics.record_received();
//! metrics.record_processed();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.received, 1);
//! assert_eq!(snapshot.processed, 1);
//! assert_eq!(snapshot.in_flight(), 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! forward {
    ($name:literal) => {
        #[cfg(feature = "observability")]
        metrics::counter!($name).increment(1);
    };
}

/// Broker server counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    received: AtomicU64,
    discarded: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    lagged: AtomicU64,
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerMetricsSnapshot {
    /// Frames taken off a subscription and queued
    pub received: u64,
    /// Frames dropped before processing (no reply address, server stopping)
    pub discarded: u64,
    /// Frames processed and answered
    pub processed: u64,
    /// Frames whose processing or reply failed
    pub failed: u64,
    /// Frames that waited in the queue longer than the high watermark
    pub lagged: u64,
}

impl ServerMetricsSnapshot {
    /// Frames queued but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.received
            .saturating_sub(self.processed)
            .saturating_sub(self.failed)
    }
}

impl ServerMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame accepted into the work queue.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.server.received");
    }

    /// Records a frame dropped before processing.
    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.server.discarded");
    }

    /// Records a frame processed and answered.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.server.processed");
    }

    /// Records a frame whose processing failed.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.server.failed");
    }

    /// Records a frame that exceeded the high watermark.
    pub fn record_lagged(&self) {
        self.lagged.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.server.lagged");
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        ServerMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
        }
    }
}

/// Subscriber counters, shared by every pub/sub subscriber transport.
#[derive(Debug, Default)]
pub struct SubscriberMetrics {
    delivered: AtomicU64,
    rejected: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
}

/// Point-in-time copy of [`SubscriberMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberMetricsSnapshot {
    /// Messages handed to the callback
    pub delivered: u64,
    /// Messages not acknowledged: invalid frames and callback failures
    pub rejected: u64,
    /// Acknowledgements sent
    pub acked: u64,
    /// Acknowledgements the broker refused
    pub ack_failures: u64,
}

impl SubscriberMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message handed to the callback.
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.subscriber.delivered");
    }

    /// Records a message left unacknowledged.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.subscriber.rejected");
    }

    /// Records a successful acknowledgement.
    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.subscriber.acked");
    }

    /// Records a failed acknowledgement.
    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
        forward!("brokerpc.subscriber.ack_failures");
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> SubscriberMetricsSnapshot {
        SubscriberMetricsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}
