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

use crate::broker::{
    AckMode, BrokerError, StompConnection, StompMessage, StompSubscription, SubscriptionId,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use tracing::debug;

const TOPIC_PREFIX: &str = "/topic/";
const QUEUE_PREFIX: &str = "/queue/";

/// Maps a topic destination onto per-consumer queues, the way brokers with
/// virtual topics do.
///
/// A message sent to `/topic/<topic_prefix><rest>` is copied to every known
/// queue `/queue/<queue_prefix><consumer>.<name>`, where `<name>` is the full
/// topic name when `keep_topic_name` is set and `<rest>` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualTopicRule {
    topic_prefix: String,
    queue_prefix: String,
    keep_topic_name: bool,
}

impl VirtualTopicRule {
    /// Creates a rule.
    pub fn new(
        topic_prefix: impl Into<String>,
        queue_prefix: impl Into<String>,
        keep_topic_name: bool,
    ) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            queue_prefix: queue_prefix.into(),
            keep_topic_name,
        }
    }

    /// The `VirtualTopic.<name>` to `Consumer.<consumer>.VirtualTopic.<name>`
    /// convention.
    pub fn consumer_queues() -> Self {
        Self::new("VirtualTopic.", "Consumer.", true)
    }

    fn matches(&self, topic: &str, queue: &str) -> bool {
        let Some(rest) = topic.strip_prefix(self.topic_prefix.as_str()) else {
            return false;
        };
        let name = if self.keep_topic_name { topic } else { rest };
        let Some((consumer, tail)) = queue
            .strip_prefix(self.queue_prefix.as_str())
            .and_then(|after| after.split_once('.'))
        else {
            return false;
        };
        !consumer.is_empty() && tail == name
    }
}

/// A SEND frame recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination of the frame
    pub destination: String,
    /// Content type of the body
    pub content_type: String,
    /// Extra frame headers
    pub headers: HashMap<String, String>,
    /// Frame body
    pub body: Bytes,
}

struct StompEntry {
    connection: u64,
    destination: String,
    ack_mode: AckMode,
    sender: mpsc::UnboundedSender<StompMessage>,
}

struct Unacked {
    connection: u64,
    subscription: SubscriptionId,
    queue: Option<String>,
    message: StompMessage,
}

struct Stored {
    headers: HashMap<String, String>,
    body: Bytes,
}

#[derive(Default)]
struct BrokerState {
    next_connection: u64,
    next_subscription: u64,
    next_message: u64,
    subscriptions: BTreeMap<SubscriptionId, StompEntry>,
    queues: BTreeMap<String, VecDeque<Stored>>,
    cursors: HashMap<String, usize>,
    unacked: HashMap<String, Unacked>,
    rules: Vec<VirtualTopicRule>,
    sent: Vec<SentMessage>,
}

impl BrokerState {
    fn route(&mut self, destination: &str, headers: HashMap<String, String>, body: Bytes) {
        if let Some(topic) = destination.strip_prefix(TOPIC_PREFIX) {
            let subscribers: Vec<SubscriptionId> = self
                .subscriptions
                .iter()
                .filter(|(_, entry)| entry.destination == destination)
                .map(|(id, _)| *id)
                .collect();
            for id in subscribers {
                self.deliver(id, None, headers.clone(), body.clone());
            }

            let queues: Vec<String> = self
                .queues
                .keys()
                .filter(|queue| {
                    let name = queue.strip_prefix(QUEUE_PREFIX).unwrap_or(queue.as_str());
                    self.rules.iter().any(|rule| rule.matches(topic, name))
                })
                .cloned()
                .collect();
            for queue in queues {
                self.enqueue(&queue, headers.clone(), body.clone());
            }
        } else {
            self.enqueue(destination, headers, body);
        }
    }

    fn enqueue(&mut self, queue: &str, headers: HashMap<String, String>, body: Bytes) {
        let consumers: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, entry)| entry.destination == queue)
            .map(|(id, _)| *id)
            .collect();
        if consumers.is_empty() {
            self.queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Stored { headers, body });
            return;
        }
        let cursor = self.cursors.entry(queue.to_string()).or_insert(0);
        let id = consumers[*cursor % consumers.len()];
        *cursor += 1;
        self.deliver(id, Some(queue.to_string()), headers, body);
    }

    fn deliver(
        &mut self,
        id: SubscriptionId,
        queue: Option<String>,
        mut headers: HashMap<String, String>,
        body: Bytes,
    ) {
        let Some(entry) = self.subscriptions.get(&id) else {
            return;
        };
        let (connection, ack_mode, destination, sender) = (
            entry.connection,
            entry.ack_mode,
            entry.destination.clone(),
            entry.sender.clone(),
        );
        self.next_message += 1;
        let message_id = format!("msg-{}", self.next_message);
        headers.insert("message-id".to_string(), message_id.clone());
        headers.insert("destination".to_string(), destination.clone());
        headers.insert("subscription".to_string(), id.to_string());
        let message = StompMessage {
            destination,
            subscription: id,
            message_id: message_id.clone(),
            headers,
            body,
        };
        if sender.send(message.clone()).is_ok() && ack_mode != AckMode::Auto {
            self.unacked.insert(
                message_id,
                Unacked {
                    connection,
                    subscription: id,
                    queue,
                    message,
                },
            );
        }
    }

    fn drain(&mut self, queue: &str) {
        let pending = self.queues.insert(queue.to_string(), VecDeque::new());
        for stored in pending.into_iter().flatten() {
            self.enqueue(queue, stored.headers, stored.body);
        }
    }

    /// Returns unacknowledged queue messages matching `owned` to their queue.
    fn release_unacked(&mut self, owned: impl Fn(&Unacked) -> bool) {
        let released: Vec<String> = self
            .unacked
            .iter()
            .filter(|(_, unacked)| owned(unacked))
            .map(|(id, _)| id.clone())
            .collect();
        for message_id in released {
            let Some(unacked) = self.unacked.remove(&message_id) else {
                continue;
            };
            if let Some(queue) = unacked.queue {
                let mut headers = unacked.message.headers;
                headers.insert("redelivered".to_string(), "true".to_string());
                self.enqueue(&queue, headers, unacked.message.body);
            }
        }
    }
}

/// In-memory STOMP broker.
///
/// Topics fan out to every current subscriber. Queues deliver each message to
/// one consumer round-robin and hold messages until a consumer subscribes.
/// Messages received under a client acknowledgement mode stay pending until
/// acked; queue messages that are still pending when their subscription or
/// connection goes away are redelivered.
#[derive(Clone, Default)]
pub struct MemoryStompBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryStompBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a virtual-topic rule.
    pub fn with_virtual_topic(self, rule: VirtualTopicRule) -> Self {
        self.state.lock().rules.push(rule);
        self
    }

    /// Opens a new connection.
    pub fn connect(&self) -> Arc<MemoryStompConnection> {
        let id = {
            let mut state = self.state.lock();
            state.next_connection += 1;
            state.next_connection
        };
        debug!(connection = id, "memory stomp connection opened");
        Arc::new(MemoryStompConnection {
            id,
            broker: Arc::clone(&self.state),
            connected: AtomicBool::new(true),
            acked: Mutex::new(Vec::new()),
            unsubscribe_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        })
    }

    /// Returns every SEND frame received so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    /// Returns the number of messages waiting on a queue destination.
    pub fn pending(&self, destination: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(destination)
            .map_or(0, VecDeque::len)
    }

    /// Returns the number of delivered but unacknowledged messages.
    pub fn unacked(&self) -> usize {
        self.state.lock().unacked.len()
    }
}

/// A connection to a [`MemoryStompBroker`].
pub struct MemoryStompConnection {
    id: u64,
    broker: Arc<Mutex<BrokerState>>,
    connected: AtomicBool,
    acked: Mutex<Vec<String>>,
    unsubscribe_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MemoryStompConnection {
    /// Returns the ids of every message acknowledged on this connection.
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }

    /// Returns the number of broker-level unsubscribe calls.
    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of disconnect calls.
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Simulates the broker dropping this connection.
    pub fn sever(&self) {
        self.close();
    }

    fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.broker.lock();
        state
            .subscriptions
            .retain(|_, entry| entry.connection != self.id);
        let id = self.id;
        state.release_unacked(|unacked| unacked.connection == id);
        debug!(connection = self.id, "memory stomp connection closed");
    }
}

#[async_trait]
impl StompConnection for MemoryStompConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        destination: &str,
        content_type: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::disconnected("connection closed"));
        }
        let mut frame_headers: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut state = self.broker.lock();
        state.sent.push(SentMessage {
            destination: destination.to_string(),
            content_type: content_type.to_string(),
            headers: frame_headers.clone(),
            body: body.clone(),
        });
        frame_headers.insert("content-type".to_string(), content_type.to_string());
        state.route(destination, frame_headers, body);
        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &str,
        ack_mode: AckMode,
    ) -> Result<StompSubscription, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.broker.lock();
        state.next_subscription += 1;
        let id = SubscriptionId::new(state.next_subscription);
        state.subscriptions.insert(
            id,
            StompEntry {
                connection: self.id,
                destination: destination.to_string(),
                ack_mode,
                sender,
            },
        );
        if destination.starts_with(QUEUE_PREFIX) {
            state.drain(destination);
        }
        Ok(StompSubscription::new(id, destination, ack_mode, receiver))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let mut state = self.broker.lock();
        let owned = state
            .subscriptions
            .get(&id)
            .is_some_and(|entry| entry.connection == self.id);
        if !owned {
            return Err(BrokerError::rejected(format!("unknown subscription {id}")));
        }
        state.subscriptions.remove(&id);
        state.release_unacked(|unacked| unacked.subscription == id);
        Ok(())
    }

    async fn ack(&self, message: &StompMessage) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let removed = self.broker.lock().unacked.remove(&message.message_id);
        match removed {
            Some(_) => {
                self.acked.lock().push(message.message_id.clone());
                Ok(())
            }
            None => Err(BrokerError::rejected(format!(
                "no pending message {}",
                message.message_id
            ))),
        }
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_fans_out() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let mut a = conn.subscribe("/topic/t", AckMode::Auto).await.unwrap();
        let mut b = conn.subscribe("/topic/t", AckMode::Auto).await.unwrap();
        conn.send("/topic/t", "text/plain", &[], Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(a.next().await.unwrap().body, Bytes::from_static(b"x"));
        assert_eq!(b.next().await.unwrap().body, Bytes::from_static(b"x"));
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn test_queue_holds_until_subscribed() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        conn.send("/queue/q", "text/plain", &[("persistent", "true")], Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(broker.pending("/queue/q"), 1);
        let mut sub = conn
            .subscribe("/queue/q", AckMode::ClientIndividual)
            .await
            .unwrap();
        let message = sub.next().await.unwrap();
        assert_eq!(message.header("persistent"), Some("true"));
        assert_eq!(message.header("content-type"), Some("text/plain"));
        assert_eq!(broker.pending("/queue/q"), 0);
        assert_eq!(broker.unacked(), 1);
        conn.ack(&message).await.unwrap();
        assert_eq!(broker.unacked(), 0);
        assert_eq!(conn.acked(), vec![message.message_id.clone()]);
        assert!(conn.ack(&message).await.is_err());
    }

    #[tokio::test]
    async fn test_unacked_queue_message_redelivered() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let mut first = conn
            .subscribe("/queue/q", AckMode::ClientIndividual)
            .await
            .unwrap();
        conn.send("/queue/q", "text/plain", &[], Bytes::from_static(b"x"))
            .await
            .unwrap();
        first.next().await.unwrap();
        conn.unsubscribe(first.id()).await.unwrap();
        assert_eq!(broker.pending("/queue/q"), 1);

        let mut second = conn
            .subscribe("/queue/q", AckMode::ClientIndividual)
            .await
            .unwrap();
        let again = second.next().await.unwrap();
        assert_eq!(again.header("redelivered"), Some("true"));
    }

    #[tokio::test]
    async fn test_virtual_topic_copies_to_consumer_queues() {
        let broker = MemoryStompBroker::new().with_virtual_topic(VirtualTopicRule::new(
            "frugal.VirtualTopic.",
            "frugalConsumer.",
            false,
        ));
        let conn = broker.connect();
        let mut a = conn
            .subscribe("/queue/frugalConsumer.a.orders", AckMode::ClientIndividual)
            .await
            .unwrap();
        let mut b = conn
            .subscribe("/queue/frugalConsumer.b.orders", AckMode::ClientIndividual)
            .await
            .unwrap();
        conn.send(
            "/topic/frugal.VirtualTopic.orders",
            "text/plain",
            &[],
            Bytes::from_static(b"x"),
        )
        .await
        .unwrap();
        assert!(a.next().await.is_some());
        assert!(b.next().await.is_some());
    }

    #[test]
    fn test_consumer_queue_rule() {
        let rule = VirtualTopicRule::consumer_queues();
        assert!(rule.matches("VirtualTopic.frugal.q", "Consumer.c.VirtualTopic.frugal.q"));
        assert!(!rule.matches("frugal.q", "Consumer.c.VirtualTopic.frugal.q"));
        assert!(!rule.matches("VirtualTopic.frugal.q", "Consumer..VirtualTopic.frugal.q"));
    }

    #[tokio::test]
    async fn test_disconnect_closes_subscriptions_and_rejects_sends() {
        let broker = MemoryStompBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("/topic/t", AckMode::Auto).await.unwrap();
        conn.disconnect().await.unwrap();
        assert!(sub.next().await.is_none());
        assert_eq!(conn.disconnect_calls(), 1);
        let err = conn
            .send("/topic/t", "text/plain", &[], Bytes::new())
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
    }
}
