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

//! Wire format error types.

use thiserror::Error;

/// Errors produced while decoding frames or header blocks.
///
/// A framing error is always returned before any payload interpretation is
/// attempted, so a malformed message never reaches a callback or processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than four bytes were available for the length prefix.
    #[error("invalid frame size {len}")]
    TooShort {
        /// Number of bytes available
        len: usize,
    },

    /// The body is shorter than the length prefix declares.
    #[error("missing data: frame declares {declared} bytes but {actual} are present")]
    MissingData {
        /// Length declared by the prefix
        declared: usize,
        /// Bytes actually present after the prefix
        actual: usize,
    },

    /// The payload cannot be described by a 4-byte length prefix.
    #[error("payload of {len} bytes exceeds the maximum frame size")]
    Oversized {
        /// Payload length
        len: usize,
    },

    /// The header block starts with an unknown version byte.
    #[error("unsupported header version {version}")]
    UnsupportedHeaderVersion {
        /// Version byte found on the wire
        version: u8,
    },

    /// The header block is truncated or its lengths are inconsistent.
    #[error("malformed header block: {reason}")]
    MalformedHeaders {
        /// Description of the defect
        reason: String,
    },
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FrameError::MalformedHeaders {
            reason: reason.into(),
        }
    }
}
