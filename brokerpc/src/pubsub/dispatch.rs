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

//! Frame validation, callback dispatch and acknowledgement shared by every
//! subscriber transport.

use crate::broker::{BrokerError, SubscriptionId};
use crate::error::BrokerpcError;
use crate::observability::SubscriberMetrics;
use crate::transport::TransportError;
use crate::wire::{self, FRAME_HEADER_SIZE};
use bytes::Bytes;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

/// Runs callbacks for one subscription.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    destination: Arc<str>,
    metrics: Arc<SubscriberMetrics>,
}

impl Dispatcher {
    pub(crate) fn new(destination: &str, metrics: Arc<SubscriberMetrics>) -> Self {
        Self {
            destination: destination.into(),
            metrics,
        }
    }

    /// Validates `body` as a frame and hands its payload to `callback`.
    ///
    /// Returns `true` if the message should be acknowledged.
    pub(crate) async fn dispatch<F, Fut>(&self, body: &Bytes, callback: F) -> bool
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = Result<(), BrokerpcError>>,
    {
        if body.len() < FRAME_HEADER_SIZE {
            warn!(
                destination = %self.destination,
                len = body.len(),
                "discarding message shorter than the frame header"
            );
            self.metrics.record_rejected();
            return false;
        }
        let payload = match wire::frame::decode_bytes(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(destination = %self.destination, error = %e, "discarding invalid frame");
                self.metrics.record_rejected();
                return false;
            }
        };

        self.metrics.record_delivered();
        match callback(payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(destination = %self.destination, error = %e, "error executing callback");
                self.metrics.record_rejected();
                false
            }
        }
    }

    /// Sends an acknowledgement on its own task so the next message is not
    /// held up.
    pub(crate) fn ack<Fut>(&self, message_id: String, ack: Fut)
    where
        Fut: Future<Output = Result<(), BrokerError>> + Send + 'static,
    {
        let metrics = Arc::clone(&self.metrics);
        let destination = Arc::clone(&self.destination);
        tokio::spawn(async move {
            match ack.await {
                Ok(()) => {
                    trace!(destination = %destination, message_id = %message_id, "acked message");
                    metrics.record_acked();
                }
                Err(e) => {
                    error!(destination = %destination, message_id = %message_id, error = %e, "error acking message");
                    metrics.record_ack_failure();
                }
            }
        });
    }
}

/// Maps the broker's answer to an unsubscribe. A connection that is already
/// gone took the subscription with it, so that counts as released.
pub(crate) fn released(
    id: SubscriptionId,
    result: Result<(), BrokerError>,
) -> Result<(), TransportError> {
    match result {
        Ok(()) => Ok(()),
        Err(e @ (BrokerError::NotConnected | BrokerError::Disconnected { .. })) => {
            warn!(subscription = %id, error = %e, "unsubscribe skipped, connection gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// The broker subscription held by a subscriber transport.
pub(crate) struct Active {
    pub(crate) id: SubscriptionId,
    pub(crate) stop: CancellationToken,
}

enum SlotState {
    Idle,
    Pending,
    Active(Active),
}

/// At most one subscription per transport.
///
/// `reserve` claims the slot under the lock before the broker call, so a
/// concurrent second `subscribe` fails without waiting on the network.
pub(crate) struct SubscriptionSlot {
    state: Mutex<SlotState>,
}

impl SubscriptionSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
        }
    }

    pub(crate) fn reserve(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Idle) {
            return Err(TransportError::already_open(format!(
                "{name} transport already has a subscription"
            )));
        }
        *state = SlotState::Pending;
        Ok(())
    }

    /// Returns a claimed slot to idle after a failed broker subscribe.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Idle;
        }
    }

    pub(crate) fn activate(&self, id: SubscriptionId) -> CancellationToken {
        let stop = CancellationToken::new();
        *self.state.lock() = SlotState::Active(Active {
            id,
            stop: stop.clone(),
        });
        stop
    }

    /// Records the new broker id after a resubscribe. Returns `false` when
    /// the subscription owning `stop` was taken in the meantime, in which case
    /// the caller still owns the new broker subscription.
    pub(crate) fn replace_id(&self, id: SubscriptionId, stop: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if stop.is_cancelled() {
            return false;
        }
        match &mut *state {
            SlotState::Active(active) => {
                active.id = id;
                true
            }
            _ => false,
        }
    }

    /// Takes the active subscription and cancels its token, leaving the slot
    /// idle.
    pub(crate) fn take(&self) -> Option<Active> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Idle) {
            SlotState::Active(active) => {
                active.stop.cancel();
                Some(active)
            }
            other => {
                *state = other;
                None
            }
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Active(_))
    }
}
