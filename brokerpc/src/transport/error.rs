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

//! Transport layer error types.
//!
//! Transport errors are what every unary, publisher and subscriber transport
//! reports at its boundary. Each error carries a machine-checkable
//! [`TransportErrorKind`] plus a human-readable message so callers can decide
//! whether to retry, reopen, chunk, or give up.
//!
//! # Error Categories
//!
//! - **Lifecycle errors**: [`NotOpen`](TransportError::NotOpen) and
//!   [`AlreadyOpen`](TransportError::AlreadyOpen)
//! - **Capacity errors**: [`RequestTooLarge`](TransportError::RequestTooLarge)
//!   and [`ResponseTooLarge`](TransportError::ResponseTooLarge)
//! - **Deadline errors**: [`TimedOut`](TransportError::TimedOut)
//! - **Broker errors**: [`EndOfFile`](TransportError::EndOfFile) and
//!   [`Unknown`](TransportError::Unknown)

use crate::broker::BrokerError;
use std::fmt;
use thiserror::Error;

/// Machine-checkable category of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The transport is not open.
    NotOpen,
    /// The transport is already open.
    AlreadyOpen,
    /// The outgoing payload exceeds the configured limit.
    RequestTooLarge,
    /// The reply exceeds the configured limit.
    ResponseTooLarge,
    /// The caller's deadline elapsed before a reply arrived.
    TimedOut,
    /// The underlying stream ended.
    EndOfFile,
    /// Any other transport failure.
    Unknown,
}

impl TransportErrorKind {
    /// Returns the stable name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotOpen => "not_open",
            Self::AlreadyOpen => "already_open",
            Self::RequestTooLarge => "request_too_large",
            Self::ResponseTooLarge => "response_too_large",
            Self::TimedOut => "timed_out",
            Self::EndOfFile => "end_of_file",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by transports.
///
/// # Examples
///
/// ```rust
/// use brokerpc::transport::{TransportError, TransportErrorKind};
///
/// let error = TransportError::request_too_large("message is too large: 2048 > 1024");
/// assert_eq!(error.kind(), TransportErrorKind::RequestTooLarge);
/// assert!(!error.is_recoverable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport (or its broker connection) is not open.
    #[error("transport not open: {message}")]
    NotOpen {
        /// Description of the failure
        message: String,
    },

    /// The transport is already open or already subscribed.
    #[error("transport already open: {message}")]
    AlreadyOpen {
        /// Description of the failure
        message: String,
    },

    /// The outgoing payload exceeds the configured size limit.
    ///
    /// Returned before any network write takes place.
    #[error("request too large: {message}")]
    RequestTooLarge {
        /// Description of the failure
        message: String,
    },

    /// The reply exceeds the size limit the caller advertised.
    #[error("response too large: {message}")]
    ResponseTooLarge {
        /// Description of the failure
        message: String,
    },

    /// The caller's context deadline elapsed.
    ///
    /// This is the caller's own deadline, not a broker-detected fault, so
    /// transports never retry it.
    #[error("timed out: {message}")]
    TimedOut {
        /// Description of the failure
        message: String,
    },

    /// The broker stream ended.
    #[error("end of file: {message}")]
    EndOfFile {
        /// Description of the failure
        message: String,
    },

    /// Any other transport failure, including broker rejections and
    /// non-success HTTP statuses.
    #[error("{message}")]
    Unknown {
        /// Description of the failure
        message: String,
    },
}

impl TransportError {
    /// Creates a [`TransportError::NotOpen`].
    pub fn not_open(message: impl Into<String>) -> Self {
        Self::NotOpen {
            message: message.into(),
        }
    }

    /// Creates a [`TransportError::AlreadyOpen`].
    pub fn already_open(message: impl Into<String>) -> Self {
        Self::AlreadyOpen {
            message: message.into(),
        }
    }

    /// Creates a [`TransportError::RequestTooLarge`].
    pub fn request_too_large(message: impl Into<String>) -> Self {
        Self::RequestTooLarge {
            message: message.into(),
        }
    }

    /// Creates a [`TransportError::ResponseTooLarge`].
    pub fn response_too_large(message: impl Into<String>) -> Self {
        Self::ResponseTooLarge {
            message: message.into(),
        }
    }

    /// Creates a [`TransportError::TimedOut`].
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut {
            message: message.into(),
        }
    }

    /// Creates a [`TransportError::EndOfFile`].
    pub fn end_of_file(message: impl Into<String>) -> Self {
        Self::EndOfFile {
            message: message.into(),
        }
    }

    /// Creates a [`TransportError::Unknown`].
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        match self {
            Self::NotOpen { .. } => TransportErrorKind::NotOpen,
            Self::AlreadyOpen { .. } => TransportErrorKind::AlreadyOpen,
            Self::RequestTooLarge { .. } => TransportErrorKind::RequestTooLarge,
            Self::ResponseTooLarge { .. } => TransportErrorKind::ResponseTooLarge,
            Self::TimedOut { .. } => TransportErrorKind::TimedOut,
            Self::EndOfFile { .. } => TransportErrorKind::EndOfFile,
            Self::Unknown { .. } => TransportErrorKind::Unknown,
        }
    }

    /// Returns the human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::NotOpen { message }
            | Self::AlreadyOpen { message }
            | Self::RequestTooLarge { message }
            | Self::ResponseTooLarge { message }
            | Self::TimedOut { message }
            | Self::EndOfFile { message }
            | Self::Unknown { message } => message,
        }
    }

    /// Returns `true` if reopening the transport or retrying the call may help.
    ///
    /// Capacity and deadline errors are never recoverable: resending the same
    /// payload fails the same way, and a timeout is the caller's own decision.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use brokerpc::transport::TransportError;
    ///
    /// assert!(TransportError::not_open("bus disconnected").is_recoverable());
    /// assert!(!TransportError::timed_out("request timed out").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotOpen { .. } | Self::EndOfFile { .. } | Self::Unknown { .. } => true,
            Self::AlreadyOpen { .. }
            | Self::RequestTooLarge { .. }
            | Self::ResponseTooLarge { .. }
            | Self::TimedOut { .. } => false,
        }
    }

    /// Returns `true` if the error means the transport can no longer be used
    /// until it is reopened.
    pub fn should_close_transport(&self) -> bool {
        matches!(self, Self::EndOfFile { .. })
    }
}

impl From<BrokerError> for TransportError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::NotConnected => TransportError::not_open(error.to_string()),
            BrokerError::Disconnected { .. } => TransportError::end_of_file(error.to_string()),
            BrokerError::Rejected { .. } => TransportError::unknown(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            TransportError::not_open("x").kind(),
            TransportErrorKind::NotOpen
        );
        assert_eq!(
            TransportError::already_open("x").kind(),
            TransportErrorKind::AlreadyOpen
        );
        assert_eq!(
            TransportError::request_too_large("x").kind(),
            TransportErrorKind::RequestTooLarge
        );
        assert_eq!(
            TransportError::response_too_large("x").kind(),
            TransportErrorKind::ResponseTooLarge
        );
        assert_eq!(
            TransportError::timed_out("x").kind(),
            TransportErrorKind::TimedOut
        );
        assert_eq!(
            TransportError::end_of_file("x").kind(),
            TransportErrorKind::EndOfFile
        );
        assert_eq!(
            TransportError::unknown("x").kind(),
            TransportErrorKind::Unknown
        );
    }

    #[test]
    fn test_unknown_displays_message_verbatim() {
        let error =
            TransportError::unknown("response errored with code 400 and message bad request");
        assert_eq!(
            error.to_string(),
            "response errored with code 400 and message bad request"
        );
        assert_eq!(
            error.message(),
            "response errored with code 400 and message bad request"
        );
    }

    #[test]
    fn test_capacity_errors_not_recoverable() {
        assert!(!TransportError::request_too_large("big").is_recoverable());
        assert!(!TransportError::response_too_large("big").is_recoverable());
        assert!(!TransportError::timed_out("late").is_recoverable());
    }

    #[test]
    fn test_broker_errors_convert() {
        let error: TransportError = BrokerError::NotConnected.into();
        assert_eq!(error.kind(), TransportErrorKind::NotOpen);

        let error: TransportError = BrokerError::disconnected("socket reset").into();
        assert_eq!(error.kind(), TransportErrorKind::EndOfFile);
        assert!(error.should_close_transport());

        let error: TransportError = BrokerError::rejected("no such destination").into();
        assert_eq!(error.kind(), TransportErrorKind::Unknown);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportErrorKind::TimedOut.to_string(), "timed_out");
    }
}
