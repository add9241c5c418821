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

//! In-memory brokers for testing.
//!
//! [`MemoryBus`] and [`MemoryStompBroker`] implement the broker connection
//! traits entirely inside the process. Besides delivering messages they keep
//! counters of broker-level calls (publishes, unsubscribes, acks) and can drop
//! connections on demand, which is what the transport tests assert against.

mod bus;
mod stomp;

pub use self::bus::MemoryBus;
pub use self::stomp::{MemoryStompBroker, MemoryStompConnection, SentMessage, VirtualTopicRule};

/// Matches a subject against a pattern using `*` for one token and `>` for
/// the remaining tokens.
pub(crate) fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
