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

//! Request/response transports.
//!
//! A [`UnaryTransport`] carries a framed request to a remote processor and
//! hands back the framed reply, or sends a oneway frame without waiting. Two
//! implementations are provided:
//!
//! - [`BusTransport`]: publishes to a subject on a broadcast bus and receives
//!   replies on a private inbox, matching them to callers through a
//!   [`Registry`](crate::registry::Registry)
//! - [`HttpTransport`]: POSTs base64-encoded frames to an HTTP endpoint
//!
//! # Lifecycle
//!
//! ```text
//! Closed --open()--> Open --close()--> Closed        (CloseCause::Clean)
//!                    Open --broker drop--> Closed    (CloseCause::Unclean)
//! ```
//!
//! Every transition to closed is announced on the channel returned by
//! [`UnaryTransport::closed`]. A [`TransportMonitor`] watches that channel
//! and reopens the transport after an unclean close.
//!
//! # Size Limits
//!
//! [`UnaryTransport::request_size_limit`] returns `0` for unbounded. Payloads
//! over the limit fail with [`TransportError::RequestTooLarge`] before any
//! network I/O.

mod bus;
mod error;
mod http;
pub mod monitor;

pub use self::bus::{BusTransport, BusTransportBuilder, DEFAULT_BUS_REQUEST_SIZE_LIMIT};
pub use self::error::{TransportError, TransportErrorKind};
pub use self::http::{
    CONTENT_TYPE_FRUGAL, ContextHeaderFn, HEADER_CONTENT_TRANSFER_ENCODING, HEADER_PAYLOAD_LIMIT,
    HttpTransport, HttpTransportBuilder,
};
pub use self::monitor::{
    BackoffPolicy, BackoffPolicyBuilder, MonitorExit, MonitorMetrics, MonitorPolicy, MonitorState,
    NeverReopen, TransportMonitor,
};

use crate::context::{Context, ContextError};
use crate::registry::RegistryError;
use crate::wire::FrameError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The caller closed the transport.
    Clean,
    /// The transport closed on its own, e.g. because the broker dropped.
    Unclean(TransportError),
}

impl CloseCause {
    /// Returns `true` for [`CloseCause::Clean`].
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// A request/response transport.
#[async_trait]
pub trait UnaryTransport: Send + Sync + 'static {
    /// Opens the transport.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AlreadyOpen`] if already open
    /// - [`TransportError::NotOpen`] if the broker connection is absent
    async fn open(&self) -> Result<(), TransportError>;

    /// Closes the transport and announces [`CloseCause::Clean`].
    async fn close(&self) -> Result<(), TransportError>;

    /// Returns `true` while the transport is open.
    fn is_open(&self) -> bool;

    /// Returns the maximum request payload size, `0` meaning unbounded.
    fn request_size_limit(&self) -> usize;

    /// Sends `payload` without waiting for a reply.
    async fn oneway(&self, ctx: &Context, payload: &[u8]) -> Result<(), TransportError>;

    /// Sends `payload` and waits for the reply, at most `ctx.timeout()`.
    ///
    /// The reply's response headers are copied into `ctx`. The returned
    /// bytes are the reply payload with the frame prefix stripped.
    async fn request(&self, ctx: &mut Context, payload: &[u8]) -> Result<Bytes, TransportError>;

    /// Subscribes to close announcements.
    fn closed(&self) -> broadcast::Receiver<CloseCause>;
}

/// Fails with [`TransportError::RequestTooLarge`] if `len` exceeds a non-zero
/// `limit`.
pub(crate) fn check_request_size(len: usize, limit: usize) -> Result<(), TransportError> {
    if limit > 0 && len > limit {
        return Err(TransportError::request_too_large(format!(
            "message exceeds {limit} bytes, was {len} bytes"
        )));
    }
    Ok(())
}

impl From<FrameError> for TransportError {
    fn from(error: FrameError) -> Self {
        TransportError::unknown(error.to_string())
    }
}

impl From<ContextError> for TransportError {
    fn from(error: ContextError) -> Self {
        TransportError::unknown(error.to_string())
    }
}

impl From<RegistryError> for TransportError {
    fn from(error: RegistryError) -> Self {
        TransportError::unknown(error.to_string())
    }
}
