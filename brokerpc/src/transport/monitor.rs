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

//! Reconnect monitor for unary transports.
//!
//! A [`TransportMonitor`] watches a transport's [`closed`](UnaryTransport::closed)
//! signal. A clean close ends the monitor. An unclean close starts a reopen
//! loop paced by a [`MonitorPolicy`]: sleep, call
//! [`open`](UnaryTransport::open), and on failure ask the policy for the next
//! wait until it refuses.
//!
//! ```text
//! Watching ──clean──▶ ClosedCleanly
//!    │
//!  unclean
//!    ▼
//! ClosedUncleanly ──▶ Reopening ──ok──▶ Watching
//!                        │
//!                     refused
//!                        ▼
//!                      GaveUp
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use brokerpc::broker::memory::MemoryBus;
//! use brokerpc::transport::{BackoffPolicy, BusTransport, TransportMonitor, UnaryTransport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(MemoryBus::new());
//! let transport = Arc::new(BusTransport::builder(bus, "calc").build());
//! transport.open().await?;
//!
//! let policy = BackoffPolicy::builder()
//!     .max_attempts(10)
//!     .initial_wait(Duration::from_millis(100))
//!     .max_wait(Duration::from_secs(5))
//!     .build();
//! let monitor = TransportMonitor::new(transport.clone(), Arc::new(policy));
//! let handle = monitor.spawn();
//!
//! transport.close().await?;
//! let exit = handle.await?;
//! # Ok(())
//! # }
//! ```

use super::{CloseCause, TransportError, UnaryTransport};
use crate::config::MonitorConfig;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Decides whether and when a monitor reopens a transport.
///
/// Implementations are consulted by a single monitor run. The attempt count
/// is owned by the runner and passed in, so one policy may be shared.
pub trait MonitorPolicy: Send + Sync {
    /// Called when the transport was closed by an explicit `close()`.
    fn on_closed_cleanly(&self) {}

    /// Called on an unclean close. Returns the wait before the first reopen
    /// attempt, or `None` to give up immediately.
    fn on_closed_uncleanly(&self, cause: &TransportError) -> Option<Duration>;

    /// Called after reopen attempt number `attempts` failed having waited
    /// `wait` beforehand. Returns the next wait, or `None` to give up.
    fn on_reopen_failed(
        &self,
        error: &TransportError,
        attempts: u32,
        wait: Duration,
    ) -> Option<Duration>;

    /// Called when a reopen attempt succeeds.
    fn on_reopen_succeeded(&self) {}

    /// Human-readable name used in logs.
    fn name(&self) -> &str;
}

/// Counters kept by [`BackoffPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorMetrics {
    /// Unclean closes observed
    pub unclean_closes: u64,
    /// Reopen attempts made
    pub total_attempts: u64,
    /// Reopen attempts that succeeded
    pub successful_reopens: u64,
    /// Reopen attempts that failed
    pub failed_reopens: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last reopen error
    pub last_error: Option<String>,
}

impl MonitorMetrics {
    fn record_failure(&mut self, error: &TransportError) {
        self.total_attempts += 1;
        self.failed_reopens += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
    }

    fn record_success(&mut self) {
        self.total_attempts += 1;
        self.successful_reopens += 1;
        self.consecutive_failures = 0;
        self.last_error = None;
    }
}

/// Doubling backoff capped at a maximum wait and a maximum attempt count.
///
/// # Examples
///
/// ```rust
/// use brokerpc::transport::{BackoffPolicy, MonitorPolicy, TransportError};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::builder()
///     .max_attempts(3)
///     .initial_wait(Duration::from_millis(10))
///     .max_wait(Duration::from_millis(40))
///     .build();
/// let error = TransportError::end_of_file("broker went away");
///
/// let first = policy.on_closed_uncleanly(&error).unwrap();
/// assert_eq!(first, Duration::from_millis(10));
/// let second = policy.on_reopen_failed(&error, 1, first).unwrap();
/// assert_eq!(second, Duration::from_millis(20));
/// let third = policy.on_reopen_failed(&error, 2, second).unwrap();
/// assert_eq!(third, Duration::from_millis(40));
/// assert!(policy.on_reopen_failed(&error, 3, third).is_none());
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    max_attempts: u32,
    initial_wait: Duration,
    max_wait: Duration,
    metrics: Mutex<MonitorMetrics>,
}

impl BackoffPolicy {
    /// Default number of reopen attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
    /// Default wait before the first attempt.
    pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(2);
    /// Default cap on the wait between attempts.
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

    /// Starts a builder with the default settings.
    pub fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder::default()
    }

    /// Returns the maximum number of reopen attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the wait before the first attempt.
    pub fn initial_wait(&self) -> Duration {
        self.initial_wait
    }

    /// Returns the cap on the wait between attempts.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Returns a snapshot of the counters.
    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics.lock().clone()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&MonitorConfig> for BackoffPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self::builder()
            .max_attempts(config.max_attempts)
            .initial_wait(Duration::from_millis(config.initial_wait_ms))
            .max_wait(Duration::from_millis(config.max_wait_ms))
            .build()
    }
}

impl MonitorPolicy for BackoffPolicy {
    fn on_closed_uncleanly(&self, _cause: &TransportError) -> Option<Duration> {
        self.metrics.lock().unclean_closes += 1;
        if self.max_attempts == 0 {
            return None;
        }
        Some(self.initial_wait.min(self.max_wait))
    }

    fn on_reopen_failed(
        &self,
        error: &TransportError,
        attempts: u32,
        wait: Duration,
    ) -> Option<Duration> {
        self.metrics.lock().record_failure(error);
        if attempts >= self.max_attempts {
            return None;
        }
        Some(wait.saturating_mul(2).min(self.max_wait))
    }

    fn on_reopen_succeeded(&self) {
        self.metrics.lock().record_success();
    }

    fn name(&self) -> &str {
        "BackoffPolicy"
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    max_attempts: u32,
    initial_wait: Duration,
    max_wait: Duration,
}

impl Default for BackoffPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: BackoffPolicy::DEFAULT_MAX_ATTEMPTS,
            initial_wait: BackoffPolicy::DEFAULT_INITIAL_WAIT,
            max_wait: BackoffPolicy::DEFAULT_MAX_WAIT,
        }
    }
}

impl BackoffPolicyBuilder {
    /// Sets the maximum number of reopen attempts. `0` never reopens.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the wait before the first attempt.
    pub fn initial_wait(mut self, wait: Duration) -> Self {
        self.initial_wait = wait;
        self
    }

    /// Sets the cap on the wait between attempts.
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Builds the policy.
    pub fn build(self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            initial_wait: self.initial_wait,
            max_wait: self.max_wait,
            metrics: Mutex::new(MonitorMetrics::default()),
        }
    }
}

/// A policy that never reopens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverReopen;

impl MonitorPolicy for NeverReopen {
    fn on_closed_uncleanly(&self, _cause: &TransportError) -> Option<Duration> {
        None
    }

    fn on_reopen_failed(&self, _: &TransportError, _: u32, _: Duration) -> Option<Duration> {
        None
    }

    fn name(&self) -> &str {
        "NeverReopen"
    }
}

/// Observable state of a monitor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for the transport to close
    Watching,
    /// The transport was closed explicitly
    ClosedCleanly,
    /// The transport closed unexpectedly
    ClosedUncleanly,
    /// Sleeping before reopen attempt `attempt`
    Reopening {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Wait before this attempt
        wait: Duration,
    },
    /// The policy refused further attempts
    GaveUp,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watching => write!(f, "Watching"),
            Self::ClosedCleanly => write!(f, "ClosedCleanly"),
            Self::ClosedUncleanly => write!(f, "ClosedUncleanly"),
            Self::Reopening { attempt, wait } => {
                write!(f, "Reopening(attempt {attempt}, wait {wait:?})")
            }
            Self::GaveUp => write!(f, "GaveUp"),
        }
    }
}

/// Why a monitor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// The transport was closed explicitly.
    ClosedCleanly,
    /// The policy refused to continue after `attempts` failed reopens.
    GaveUp {
        /// Reopen attempts made
        attempts: u32,
    },
    /// The transport's close signal went away.
    SignalLost,
}

/// Drives reopen attempts for one transport.
pub struct TransportMonitor {
    transport: Arc<dyn UnaryTransport>,
    policy: Arc<dyn MonitorPolicy>,
    state: watch::Sender<MonitorState>,
}

impl TransportMonitor {
    /// Creates a monitor for `transport`.
    pub fn new(transport: Arc<dyn UnaryTransport>, policy: Arc<dyn MonitorPolicy>) -> Self {
        let (state, _) = watch::channel(MonitorState::Watching);
        Self {
            transport,
            policy,
            state,
        }
    }

    /// Returns a receiver tracking the monitor's state.
    pub fn states(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Subscribes to the close signal now and runs the monitor on a new task.
    pub fn spawn(self) -> JoinHandle<MonitorExit> {
        let closed = self.transport.closed();
        tokio::spawn(self.watch(closed))
    }

    /// Runs the monitor on the current task until it exits.
    pub async fn run(self) -> MonitorExit {
        let closed = self.transport.closed();
        self.watch(closed).await
    }

    fn set_state(&self, state: MonitorState) {
        debug!(policy = self.policy.name(), state = %state, "monitor state");
        self.state.send_replace(state);
    }

    async fn watch(self, mut closed: broadcast::Receiver<CloseCause>) -> MonitorExit {
        loop {
            self.set_state(MonitorState::Watching);
            let cause = match closed.recv().await {
                Ok(cause) => cause,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "monitor lagged behind close signals");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return MonitorExit::SignalLost,
            };

            let error = match cause {
                CloseCause::Clean => return self.exit_cleanly(),
                CloseCause::Unclean(error) => error,
            };

            warn!(error = %error, "transport closed uncleanly");
            self.set_state(MonitorState::ClosedUncleanly);
            match self.reopen(&error, &mut closed).await {
                Reopen::Opened => {}
                Reopen::ClosedCleanly => return self.exit_cleanly(),
                Reopen::GaveUp(attempts) => {
                    warn!(attempts, policy = self.policy.name(), "giving up on reopening transport");
                    self.set_state(MonitorState::GaveUp);
                    return MonitorExit::GaveUp { attempts };
                }
            }
        }
    }

    fn exit_cleanly(&self) -> MonitorExit {
        info!("transport closed cleanly, monitor exiting");
        self.policy.on_closed_cleanly();
        self.set_state(MonitorState::ClosedCleanly);
        MonitorExit::ClosedCleanly
    }

    /// Keeps reading `signals` across every attempt so an explicit close
    /// during the backoff or inside `open` stops the monitor.
    async fn reopen(
        &self,
        cause: &TransportError,
        signals: &mut broadcast::Receiver<CloseCause>,
    ) -> Reopen {
        let Some(mut wait) = self.policy.on_closed_uncleanly(cause) else {
            return Reopen::GaveUp(0);
        };
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.set_state(MonitorState::Reopening {
                attempt: attempts,
                wait,
            });
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Ok(CloseCause::Clean) = signals.recv() => return Reopen::ClosedCleanly,
            }

            match self.transport.open().await {
                Ok(()) | Err(TransportError::AlreadyOpen { .. }) => {
                    info!(attempts, "transport reopened");
                    self.policy.on_reopen_succeeded();
                    return Reopen::Opened;
                }
                Err(_) if closed_cleanly(signals) => return Reopen::ClosedCleanly,
                Err(error) => {
                    warn!(attempt = attempts, error = %error, "reopen attempt failed");
                    match self.policy.on_reopen_failed(&error, attempts, wait) {
                        Some(next) => wait = next,
                        None => return Reopen::GaveUp(attempts),
                    }
                }
            }
        }
    }
}

enum Reopen {
    Opened,
    ClosedCleanly,
    GaveUp(u32),
}

/// Drains pending close signals and reports whether any was a clean close.
fn closed_cleanly(signals: &mut broadcast::Receiver<CloseCause>) -> bool {
    let mut clean = false;
    loop {
        match signals.try_recv() {
            Ok(CloseCause::Clean) => clean = true,
            Ok(CloseCause::Unclean(_)) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return clean,
        }
    }
}
