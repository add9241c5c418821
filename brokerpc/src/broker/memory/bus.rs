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

use super::subject_matches;
use crate::broker::{BrokerError, BusConnection, BusMessage, BusSubscription, SubscriptionId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

use tracing::debug;

struct BusEntry {
    subject: String,
    queue_group: Option<String>,
    sender: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct BusState {
    connected: bool,
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, BusEntry>,
    queue_cursors: HashMap<(String, String), usize>,
    published: Vec<BusMessage>,
    unsubscribe_calls: usize,
}

/// In-memory subject-broadcast bus.
///
/// Clones share the same bus. Subjects support the `*` and `>` wildcards and
/// queue groups receive each message round-robin.
///
/// # Examples
///
/// ```rust
/// use brokerpc::broker::BusConnection;
/// use brokerpc::broker::memory::MemoryBus;
/// use bytes::Bytes;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = MemoryBus::new();
/// let mut sub = bus.subscribe("frugal.greetings", None).await?;
/// bus.publish("frugal.greetings", None, Bytes::from_static(b"hi")).await?;
/// assert_eq!(sub.next().await.unwrap().data, Bytes::from_static(b"hi"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    /// Creates a connected bus.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                connected: true,
                ..BusState::default()
            })),
        }
    }

    /// Drops the connection. Every live subscription channel closes.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.subscriptions.clear();
        debug!("memory bus disconnected");
    }

    /// Re-establishes the connection. Earlier subscriptions are not restored.
    pub fn reconnect(&self) {
        self.state.lock().connected = true;
    }

    /// Returns every message published so far, in order.
    pub fn published(&self) -> Vec<BusMessage> {
        self.state.lock().published.clone()
    }

    /// Returns the number of broker-level unsubscribe calls.
    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }

    /// Returns the number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusConnection for MemoryBus {
    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", uuid::Uuid::new_v4().simple())
    }

    async fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        data: Bytes,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        let message = BusMessage {
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            data,
        };
        state.published.push(message.clone());

        let mut groups: BTreeMap<String, Vec<SubscriptionId>> = BTreeMap::new();
        let mut targets = Vec::new();
        for (id, entry) in &state.subscriptions {
            if !subject_matches(&entry.subject, subject) {
                continue;
            }
            match &entry.queue_group {
                Some(group) => groups.entry(group.clone()).or_default().push(*id),
                None => targets.push(*id),
            }
        }
        for (group, members) in groups {
            let cursor = state
                .queue_cursors
                .entry((subject.to_string(), group))
                .or_insert(0);
            targets.push(members[*cursor % members.len()]);
            *cursor += 1;
        }
        for id in targets {
            if let Some(entry) = state.subscriptions.get(&id) {
                // A dropped receiver only means the subscriber went away.
                let _ = entry.sender.send(message.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<BusSubscription, BrokerError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        state.next_id += 1;
        let id = SubscriptionId::new(state.next_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscriptions.insert(
            id,
            BusEntry {
                subject: subject.to_string(),
                queue_group: queue_group.map(str::to_string),
                sender,
            },
        );
        Ok(BusSubscription::new(
            id,
            subject,
            queue_group.map(str::to_string),
            receiver,
        ))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        state
            .subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| BrokerError::rejected(format!("unknown subscription {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("events", None).await.unwrap();
        let mut b = bus.subscribe("events", None).await.unwrap();
        bus.publish("events", Some("reply"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(a.next().await.unwrap().reply.as_deref(), Some("reply"));
        assert_eq!(b.next().await.unwrap().data, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_queue_group_delivers_once() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("work", Some("workers")).await.unwrap();
        let mut b = bus.subscribe("work", Some("workers")).await.unwrap();
        bus.publish("work", None, Bytes::from_static(b"1")).await.unwrap();
        bus.publish("work", None, Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(a.next().await.unwrap().data, Bytes::from_static(b"1"));
        assert_eq!(b.next().await.unwrap().data, Bytes::from_static(b"2"));
        assert!(a.try_next().is_none());
        assert!(b.try_next().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_closes_subscriptions() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("events", None).await.unwrap();
        bus.disconnect();
        assert!(sub.next().await.is_none());
        assert!(!bus.is_connected());
        assert_eq!(
            bus.publish("events", None, Bytes::new()).await,
            Err(BrokerError::NotConnected)
        );
        bus.reconnect();
        assert!(bus.is_connected());
    }

    #[tokio::test]
    async fn test_unsubscribe_counts_calls() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("events", None).await.unwrap();
        bus.unsubscribe(sub.id()).await.unwrap();
        assert!(bus.unsubscribe(sub.id()).await.is_err());
        assert_eq!(bus.unsubscribe_calls(), 2);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_inboxes_are_unique() {
        let bus = MemoryBus::new();
        assert_ne!(bus.new_inbox(), bus.new_inbox());
    }
}
