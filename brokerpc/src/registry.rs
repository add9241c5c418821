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

//! Matching of asynchronous replies to waiting callers.
//!
//! On a broadcast bus every reply for every caller sharing an inbox may show
//! up on the same subscription. The [`Registry`] maps each in-flight
//! operation id to a one-shot reply slot so each reply reaches exactly one
//! waiting caller, and stale or duplicated replies are rejected instead of
//! being delivered twice.
//!
//! # Example
//!
//! ```rust
//! use brokerpc::context::{Context, OP_ID_HEADER};
//! use brokerpc::registry::Registry;
//! use brokerpc::wire;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! let ctx = Context::new();
//! let reply = registry.register(&ctx)?;
//!
//! // The server answers with the caller's op id in its response headers.
//! let mut server_ctx = Context::new();
//! server_ctx.add_response_header(OP_ID_HEADER, ctx.op_id()?.to_string())?;
//! let frame = wire::encode(&wire::write_response_header(&server_ctx)?)?;
//!
//! registry.execute(&frame)?;
//! assert!(!reply.await?.is_empty());
//! assert!(registry.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::context::{Context, ContextError, OP_ID_HEADER, parse_op_id};
use crate::wire::{self, FrameError, headers::decode_headers};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;

use tracing::trace;

/// Errors raised by the [`Registry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A reply slot is already registered for this operation id.
    #[error("context already registered for opid {op_id}")]
    Duplicate {
        /// The operation id
        op_id: u64,
    },

    /// No caller is waiting for this operation id.
    ///
    /// Expected for replies that arrive after a timeout or that the broker
    /// redelivered.
    #[error("no handler registered for opid {op_id}")]
    Unrecognized {
        /// The operation id
        op_id: u64,
    },

    /// The reply frame could not be decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The context or reply headers carry a malformed operation id.
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Debug)]
struct Entry {
    correlation_id: String,
    reply: oneshot::Sender<Bytes>,
}

/// Thread-safe map from operation id to a single-use reply slot.
///
/// Firing and removal happen under one lock, so at most one reply is ever
/// delivered per registration. The lock is never held across an await.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<u64, Entry>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reply slot for the context's operation id.
    ///
    /// The returned receiver resolves with the reply payload (frame prefix
    /// stripped, header block included). It errors if the registration is
    /// removed with [`unregister`](Self::unregister).
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Duplicate`] if the op id is already registered
    /// - [`RegistryError::Context`] if the context has no valid op id
    pub fn register(&self, ctx: &Context) -> Result<oneshot::Receiver<Bytes>, RegistryError> {
        let op_id = ctx.op_id()?;
        let mut entries = self.entries.lock();
        if entries.contains_key(&op_id) {
            return Err(RegistryError::Duplicate { op_id });
        }
        let (reply, receiver) = oneshot::channel();
        entries.insert(
            op_id,
            Entry {
                correlation_id: ctx.correlation_id().to_string(),
                reply,
            },
        );
        Ok(receiver)
    }

    /// Routes a reply frame to its waiting caller.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Frame`] if the frame or its header block is invalid
    /// - [`RegistryError::Context`] if the reply has no valid `_opid`
    /// - [`RegistryError::Unrecognized`] if no caller is waiting for it
    pub fn execute(&self, frame: &[u8]) -> Result<(), RegistryError> {
        let payload = wire::decode(frame)?;
        let (headers, _) = decode_headers(payload)?;
        let op_id = headers
            .get(OP_ID_HEADER)
            .ok_or(ContextError::MissingOpId)
            .and_then(|value| parse_op_id(value))?;

        let entry = self
            .entries
            .lock()
            .remove(&op_id)
            .ok_or(RegistryError::Unrecognized { op_id })?;

        if entry.reply.send(Bytes::copy_from_slice(payload)).is_err() {
            // The caller stopped waiting between lookup and delivery.
            trace!(op_id, correlation_id = %entry.correlation_id, "reply dropped by caller");
        }
        Ok(())
    }

    /// Removes a registration. Returns `true` if one was present.
    pub fn unregister(&self, op_id: u64) -> bool {
        self.entries.lock().remove(&op_id).is_some()
    }

    /// Returns the number of callers waiting for a reply.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no caller is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
