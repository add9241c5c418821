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

//! Broker connection contracts.
//!
//! The runtime does not speak any broker protocol itself. Each broker family
//! is reached through a connection trait that a client library adapter
//! implements:
//!
//! - [`BusConnection`]: a subject-based broadcast bus with request inboxes and
//!   queue groups
//! - [`StompConnection`]: a STOMP 1.2 broker with topic and queue
//!   destinations and client-individual acknowledgement
//!
//! Both traits deliver inbound messages over a channel owned by the returned
//! subscription handle, so the transports above them consume broker traffic as
//! an ordinary async stream.
//!
//! The [`memory`] module provides in-process brokers implementing both traits,
//! used by the test suite and available to downstream crates that want to
//! exercise generated code without a broker.

mod bus;
mod error;
pub mod memory;
mod stomp;

pub use self::bus::{BusConnection, BusMessage, BusSubscription};
pub use self::error::BrokerError;
pub use self::stomp::{
    AckMode, ReconnectHandler, StompConnection, StompMessage, StompSubscription,
};

use std::fmt;

/// Identifier of a broker-side subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wraps a raw broker subscription id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
