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

//! Top-level error type for brokerpc.
//!
//! Each component reports its own error type at its boundary:
//!
//! - [`TransportError`]: unary and pub/sub transport failures, each with a
//!   machine-checkable [`TransportErrorKind`]
//! - [`FrameError`]: malformed frames and header blocks
//! - [`ContextError`]: invalid reserved headers
//! - [`RegistryError`]: reply correlation failures
//! - [`TopicError`]: malformed topics and prefix templates
//! - [`BrokerError`]: failures reported by a broker connection
//! - [`ConfigError`]: configuration parse and validation failures
//!
//! [`BrokerpcError`] composes them for code, such as processors and
//! middleware, that crosses component boundaries.
//!
//! # Examples
//!
//! ```rust
//! use brokerpc::BrokerpcError;
//! use brokerpc::transport::{TransportError, TransportErrorKind};
//!
//! let error: BrokerpcError = TransportError::timed_out("no reply after 5000 ms").into();
//! assert!(error.is_transport_error());
//! assert_eq!(error.transport_kind(), Some(TransportErrorKind::TimedOut));
//! assert!(!error.is_recoverable());
//! ```

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::context::ContextError;
use crate::pubsub::TopicError;
use crate::registry::RegistryError;
use crate::transport::{TransportError, TransportErrorKind};
use crate::wire::FrameError;
use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for brokerpc operations.
#[derive(Debug)]
pub enum BrokerpcError {
    /// A transport failed.
    Transport(TransportError),
    /// A frame or header block was malformed.
    Frame(FrameError),
    /// A context header was invalid.
    Context(ContextError),
    /// A reply could not be correlated.
    Registry(RegistryError),
    /// A topic could not be built.
    Topic(TopicError),
    /// A broker connection failed.
    Broker(BrokerError),
    /// Configuration was invalid.
    Config(ConfigError),
    /// A user-supplied processor, handler or middleware failed.
    Processor {
        /// Description of the failure
        message: String,
    },
}

impl BrokerpcError {
    /// Creates a [`BrokerpcError::Processor`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use brokerpc::BrokerpcError;
    ///
    /// let error = BrokerpcError::processor("unknown method ping");
    /// assert!(error.is_processor_error());
    /// assert_eq!(error.to_string(), "processor error: unknown method ping");
    /// ```
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a transport error.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this is a framing error.
    #[must_use]
    pub const fn is_frame_error(&self) -> bool {
        matches!(self, Self::Frame(_))
    }

    /// Returns `true` if this is a processor error.
    #[must_use]
    pub const fn is_processor_error(&self) -> bool {
        matches!(self, Self::Processor { .. })
    }

    /// Returns `true` if the error was raised by a broker or a transport,
    /// as opposed to bad input or configuration.
    #[must_use]
    pub const fn is_broker_error(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::Transport(_))
    }

    /// Returns the transport kind, if this wraps a transport error.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Returns `true` if retrying may succeed.
    ///
    /// Only transport and broker failures are recoverable. Malformed input,
    /// configuration and processor failures fail the same way again.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_recoverable(),
            Self::Broker(e) => e.is_disconnect(),
            Self::Frame(_)
            | Self::Context(_)
            | Self::Registry(_)
            | Self::Topic(_)
            | Self::Config(_)
            | Self::Processor { .. } => false,
        }
    }
}

impl fmt::Display for BrokerpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Frame(e) => write!(f, "frame error: {e}"),
            Self::Context(e) => write!(f, "context error: {e}"),
            Self::Registry(e) => write!(f, "registry error: {e}"),
            Self::Topic(e) => write!(f, "topic error: {e}"),
            Self::Broker(e) => write!(f, "broker error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Processor { message } => write!(f, "processor error: {message}"),
        }
    }
}

impl StdError for BrokerpcError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Frame(e) => Some(e),
            Self::Context(e) => Some(e),
            Self::Registry(e) => Some(e),
            Self::Topic(e) => Some(e),
            Self::Broker(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Processor { .. } => None,
        }
    }
}

impl From<TransportError> for BrokerpcError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

impl From<FrameError> for BrokerpcError {
    fn from(error: FrameError) -> Self {
        Self::Frame(error)
    }
}

impl From<ContextError> for BrokerpcError {
    fn from(error: ContextError) -> Self {
        Self::Context(error)
    }
}

impl From<RegistryError> for BrokerpcError {
    fn from(error: RegistryError) -> Self {
        Self::Registry(error)
    }
}

impl From<TopicError> for BrokerpcError {
    fn from(error: TopicError) -> Self {
        Self::Topic(error)
    }
}

impl From<BrokerError> for BrokerpcError {
    fn from(error: BrokerError) -> Self {
        Self::Broker(error)
    }
}

impl From<ConfigError> for BrokerpcError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}
