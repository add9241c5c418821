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


//! Integration tests for the reopen monitor driving a bus transport whose
//! broker goes away.

use brokerpc::broker::memory::MemoryBus;
use brokerpc::config::RuntimeConfig;
use brokerpc::transport::{
    BackoffPolicy, BusTransport, MonitorExit, MonitorState, NeverReopen, TransportMonitor,
    UnaryTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("brokerpc=debug")
        .with_test_writer()
        .try_init();
}

fn policy(max_attempts: u32) -> Arc<BackoffPolicy> {
    Arc::new(
        BackoffPolicy::builder()
            .max_attempts(max_attempts)
            .initial_wait(Duration::from_millis(10))
            .max_wait(Duration::from_millis(40))
            .build(),
    )
}

async fn open_client(bus: &Arc<MemoryBus>) -> Arc<BusTransport> {
    let client = Arc::new(BusTransport::builder(bus.clone(), "svc").build());
    client.open().await.unwrap();
    client
}

#[tokio::test(start_paused = true)]
async fn test_reopens_after_broker_returns() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let client = open_client(&bus).await;
    let policy = policy(5);

    let monitor = TransportMonitor::new(client.clone(), policy.clone());
    let mut states = monitor.states();
    let running = monitor.spawn();

    bus.disconnect();
    states
        .wait_for(|state| matches!(state, MonitorState::Reopening { attempt: 2, .. }))
        .await
        .unwrap();
    assert!(!client.is_open());

    bus.reconnect();
    states
        .wait_for(|state| *state == MonitorState::Watching)
        .await
        .unwrap();
    assert!(client.is_open());
    assert_eq!(bus.subscription_count(), 1);

    let metrics = policy.metrics();
    assert_eq!(metrics.unclean_closes, 1);
    assert_eq!(metrics.failed_reopens, 1);
    assert_eq!(metrics.successful_reopens, 1);
    assert_eq!(metrics.consecutive_failures, 0);

    client.close().await.unwrap();
    assert_eq!(running.await.unwrap(), MonitorExit::ClosedCleanly);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_gives_up() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let client = open_client(&bus).await;

    let monitor = TransportMonitor::new(client.clone(), policy(3));
    let mut states = monitor.states();
    let running = monitor.spawn();

    let started = Instant::now();
    bus.disconnect();

    let mut attempts = Vec::new();
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        match state {
            MonitorState::Reopening { attempt, wait } => {
                attempts.push((attempt, wait, started.elapsed()));
            }
            MonitorState::GaveUp => break,
            _ => {}
        }
    }

    let waits: Vec<_> = attempts.iter().map(|(_, wait, _)| *wait).collect();
    assert_eq!(
        waits,
        [
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(40)
        ]
    );
    assert_eq!(attempts[1].2 - attempts[0].2, Duration::from_millis(10));
    assert_eq!(attempts[2].2 - attempts[1].2, Duration::from_millis(20));

    assert_eq!(running.await.unwrap(), MonitorExit::GaveUp { attempts: 3 });
    assert!(started.elapsed() >= Duration::from_millis(70));
    assert!(!client.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_never_reopen_exits_on_first_unclean_close() {
    init_tracing();
    let bus = Arc::new(MemoryBus::new());
    let client = open_client(&bus).await;

    let running = TransportMonitor::new(client.clone(), Arc::new(NeverReopen)).spawn();
    bus.disconnect();

    assert_eq!(running.await.unwrap(), MonitorExit::GaveUp { attempts: 0 });
}

#[tokio::test(start_paused = true)]
async fn test_policy_from_runtime_config() {
    init_tracing();
    let config = RuntimeConfig::from_json(
        r#"{"monitor": {"max_attempts": 2, "initial_wait_ms": 5, "max_wait_ms": 5}}"#,
    )
    .unwrap();
    let policy = Arc::new(BackoffPolicy::from(&config.monitor));
    assert_eq!(policy.max_attempts(), 2);

    let bus = Arc::new(MemoryBus::new());
    let client = open_client(&bus).await;
    let running = TransportMonitor::new(client, policy.clone()).spawn();
    bus.disconnect();

    assert_eq!(running.await.unwrap(), MonitorExit::GaveUp { attempts: 2 });
    assert_eq!(policy.metrics().failed_reopens, 2);
}
