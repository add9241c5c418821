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

//! Per-request properties shared by the server lifecycle hooks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Property recording when a frame was taken off its subscription.
pub const REQUEST_RECEIVED_TIME: &str = "_request_received_time";

/// A value stored in [`RequestProperties`].
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A point in time
    Instant(Instant),
    /// A span of time
    Duration(Duration),
    /// Free-form text
    Text(String),
    /// A signed integer
    Integer(i64),
    /// A flag
    Bool(bool),
}

impl From<Instant> for PropertyValue {
    fn from(value: Instant) -> Self {
        Self::Instant(value)
    }
}

impl From<Duration> for PropertyValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Properties of one request, visible to every hook and to the processor.
///
/// The bag is created when a frame is received and dropped once the
/// finished hook has run. It is never shared between requests.
#[derive(Debug, Default)]
pub struct RequestProperties {
    values: Mutex<HashMap<String, PropertyValue>>,
}

impl RequestProperties {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.values.lock().insert(key.into(), value.into());
    }

    /// Returns a copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.values.lock().get(key).cloned()
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&self, key: &str) -> Option<PropertyValue> {
        self.values.lock().remove(key)
    }

    /// Returns `true` if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Returns when the frame was received, if the received hook recorded it.
    pub fn received_at(&self) -> Option<Instant> {
        match self.get(REQUEST_RECEIVED_TIME) {
            Some(PropertyValue::Instant(at)) => Some(at),
            _ => None,
        }
    }

    /// Returns how long the frame has waited since it was received.
    pub fn queued_for(&self) -> Option<Duration> {
        self.received_at().map(|at| at.elapsed())
    }
}

/// Called with the properties of a request at one point of its lifecycle.
pub type RequestHook = Arc<dyn Fn(&RequestProperties) + Send + Sync>;

/// Records [`REQUEST_RECEIVED_TIME`].
pub fn record_received_time() -> RequestHook {
    Arc::new(|properties: &RequestProperties| {
        properties.insert(REQUEST_RECEIVED_TIME, Instant::now());
    })
}

/// Warns when a request waited in the work queue longer than
/// `high_watermark`.
pub fn warn_above_watermark(high_watermark: Duration) -> RequestHook {
    Arc::new(move |properties: &RequestProperties| {
        if let Some(waited) = properties.queued_for()
            && waited > high_watermark
        {
            warn!(
                waited_ms = waited.as_millis() as u64,
                high_watermark_ms = high_watermark.as_millis() as u64,
                "request spent {waited:?} in the transport buffer, your consumer might be backed up"
            );
        }
    })
}

/// Does nothing.
pub fn noop() -> RequestHook {
    Arc::new(|_: &RequestProperties| {})
}
