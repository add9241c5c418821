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

use thiserror::Error;

/// Failures reported by a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The connection was never established or has been closed.
    #[error("broker connection not connected")]
    NotConnected,

    /// The broker connection dropped during the operation.
    #[error("broker disconnected: {reason}")]
    Disconnected {
        /// Description of the disconnect
        reason: String,
    },

    /// The broker refused the operation.
    #[error("broker rejected operation: {reason}")]
    Rejected {
        /// Description of the rejection
        reason: String,
    },
}

impl BrokerError {
    /// Creates a [`BrokerError::Disconnected`].
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Creates a [`BrokerError::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error means the connection is gone and a
    /// reconnect may help.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Disconnected { .. })
    }
}
