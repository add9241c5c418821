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

//! Per-call context carrying correlation metadata.
//!
//! A [`Context`] travels with every request, oneway call and publish. It holds
//! two header maps: request headers sent to the remote side and response
//! headers filled in when a reply arrives. Three request headers are reserved:
//!
//! | Header     | Meaning                                           |
//! |------------|---------------------------------------------------|
//! | `_cid`     | Correlation id, caller-supplied or generated      |
//! | `_opid`    | Operation id, used to match replies to requests   |
//! | `_timeout` | Call deadline in milliseconds (default `"5000"`)  |
//!
//! Operation ids come from a process-wide counter, so two contexts never
//! share one. [`Clone`] copies every header but draws a fresh operation id;
//! cloning is the supported way to fan one logical call out to several
//! transports concurrently.
//!
//! # Examples
//!
//! ```rust
//! use brokerpc::context::Context;
//! use std::time::Duration;
//!
//! let mut ctx = Context::with_correlation_id("order-42");
//! ctx.set_timeout(Duration::from_millis(250));
//! ctx.add_request_header("tenant", "acme").unwrap();
//!
//! let copy = ctx.clone();
//! assert_eq!(copy.correlation_id(), "order-42");
//! assert_eq!(copy.request_header("tenant"), Some("acme"));
//! assert_ne!(copy.op_id().unwrap(), ctx.op_id().unwrap());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Header holding the correlation id.
pub const CORRELATION_ID_HEADER: &str = "_cid";

/// Header holding the operation id.
pub const OP_ID_HEADER: &str = "_opid";

/// Header holding the call timeout in milliseconds.
pub const TIMEOUT_HEADER: &str = "_timeout";

/// Prefix of the request headers that carry scope prefix variables, e.g.
/// `_topic_user` for the `{user}` token.
pub const TOPIC_VARIABLE_HEADER_PREFIX: &str = "_topic_";

/// Timeout applied when none is set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(0);

fn next_op_id() -> u64 {
    NEXT_OP_ID.fetch_add(1, Ordering::Relaxed) + 1
}

fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Errors raised by malformed context headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The operation id header is absent.
    #[error("context does not have the required _opid request header")]
    MissingOpId,

    /// The operation id header is not a non-negative integer.
    #[error("context has an opid that is not a non-negative integer: {value}")]
    InvalidOpId {
        /// The offending value
        value: String,
    },

    /// The timeout header is not a millisecond count.
    #[error("context has a timeout that is not a non-negative integer: {value}")]
    InvalidTimeout {
        /// The offending value
        value: String,
    },

    /// The header is managed by the context and cannot be overwritten.
    #[error("header {name} cannot be set once assigned")]
    ReservedHeader {
        /// The reserved header name
        name: String,
    },
}

/// Parses an operation id header value.
pub(crate) fn parse_op_id(value: &str) -> Result<u64, ContextError> {
    value.parse::<u64>().map_err(|_| ContextError::InvalidOpId {
        value: value.to_string(),
    })
}

/// Per-call metadata carrier.
///
/// Header mutation takes `&mut self`; share a context across tasks by cloning
/// it rather than by locking it.
#[derive(Debug, PartialEq, Eq)]
pub struct Context {
    request_headers: HashMap<String, String>,
    response_headers: HashMap<String, String>,
}

impl Context {
    /// Creates a context with a generated correlation id.
    pub fn new() -> Self {
        Self::with_correlation_id(String::new())
    }

    /// Creates a context with the given correlation id.
    ///
    /// An empty id is replaced by a generated one.
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        let mut correlation_id = correlation_id.into();
        if correlation_id.is_empty() {
            correlation_id = generate_correlation_id();
        }
        let mut request_headers = HashMap::with_capacity(3);
        request_headers.insert(CORRELATION_ID_HEADER.to_string(), correlation_id);
        request_headers.insert(OP_ID_HEADER.to_string(), next_op_id().to_string());
        request_headers.insert(
            TIMEOUT_HEADER.to_string(),
            DEFAULT_TIMEOUT.as_millis().to_string(),
        );
        Self {
            request_headers,
            response_headers: HashMap::new(),
        }
    }

    /// Rebuilds a context from headers received on the wire.
    ///
    /// The received operation id is kept and mirrored into the response
    /// headers so the reply can be correlated by the caller.
    pub(crate) fn from_wire(mut request_headers: HashMap<String, String>) -> Self {
        if request_headers
            .get(CORRELATION_ID_HEADER)
            .is_none_or(|cid| cid.is_empty())
        {
            request_headers.insert(CORRELATION_ID_HEADER.to_string(), generate_correlation_id());
        }
        let mut response_headers = HashMap::new();
        if let Some(op_id) = request_headers.get(OP_ID_HEADER) {
            response_headers.insert(OP_ID_HEADER.to_string(), op_id.clone());
        }
        Self {
            request_headers,
            response_headers,
        }
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> &str {
        self.request_headers
            .get(CORRELATION_ID_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Returns the operation id.
    ///
    /// # Errors
    ///
    /// Fails if the header is missing or not a non-negative integer, which can
    /// only happen for contexts rebuilt from foreign wire data.
    pub fn op_id(&self) -> Result<u64, ContextError> {
        let value = self
            .request_headers
            .get(OP_ID_HEADER)
            .ok_or(ContextError::MissingOpId)?;
        parse_op_id(value)
    }

    /// Returns the call timeout.
    pub fn timeout(&self) -> Duration {
        self.request_headers
            .get(TIMEOUT_HEADER)
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Sets the call timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_headers.insert(
            TIMEOUT_HEADER.to_string(),
            timeout.as_millis().to_string(),
        );
        self
    }

    /// Adds a request header, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// - [`ContextError::ReservedHeader`] for `_cid`
    /// - [`ContextError::InvalidOpId`] for a malformed `_opid`
    /// - [`ContextError::InvalidTimeout`] for a malformed `_timeout`
    pub fn add_request_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, ContextError> {
        let name = name.into();
        let value = value.into();
        match name.as_str() {
            CORRELATION_ID_HEADER => return Err(ContextError::ReservedHeader { name }),
            OP_ID_HEADER => {
                parse_op_id(&value)?;
            }
            TIMEOUT_HEADER => {
                if value.parse::<u64>().is_err() {
                    return Err(ContextError::InvalidTimeout { value });
                }
            }
            _ => {}
        }
        self.request_headers.insert(name, value);
        Ok(self)
    }

    /// Adds a response header, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// [`ContextError::InvalidOpId`] for a malformed `_opid`.
    pub fn add_response_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, ContextError> {
        let name = name.into();
        let value = value.into();
        if name == OP_ID_HEADER {
            parse_op_id(&value)?;
        }
        self.response_headers.insert(name, value);
        Ok(self)
    }

    /// Returns a request header.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.get(name).map(String::as_str)
    }

    /// Returns a response header.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.get(name).map(String::as_str)
    }

    /// Returns a copy of the request headers.
    pub fn request_headers(&self) -> HashMap<String, String> {
        self.request_headers.clone()
    }

    /// Returns a copy of the response headers.
    pub fn response_headers(&self) -> HashMap<String, String> {
        self.response_headers.clone()
    }

    pub(crate) fn request_header_map(&self) -> &HashMap<String, String> {
        &self.request_headers
    }

    pub(crate) fn response_header_map(&self) -> &HashMap<String, String> {
        &self.response_headers
    }

    pub(crate) fn set_response_header_unchecked(&mut self, name: String, value: String) {
        self.response_headers.insert(name, value);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Context {
    /// Copies every header and assigns a fresh operation id, so the clone
    /// never collides with the original in a request registry.
    fn clone(&self) -> Self {
        let mut request_headers = self.request_headers.clone();
        request_headers.insert(OP_ID_HEADER.to_string(), next_op_id().to_string());
        Self {
            request_headers,
            response_headers: self.response_headers.clone(),
        }
    }
}
