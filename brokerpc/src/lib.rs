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

#![doc = include_str!("../../README.md")]
#![allow(clippy::module_inception)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # Crate Layout
//!
//! brokerpc is organized into layers, from the wire up:
//!
//! - **[`wire`]**: 4-byte length frames and the request/response header block
//! - **[`context`]**: per-call correlation id, operation id, timeout and headers
//! - **[`registry`]**: matches broadcast replies to the one caller waiting on them
//! - **[`broker`]**: the bus and STOMP connection contracts, with in-memory brokers
//! - **[`transport`]**: unary request/oneway transports and the reopen monitor
//! - **[`pubsub`]**: publisher and subscriber transports, topics and providers
//! - **[`middleware`]**: composable wrappers around typed method handlers
//! - **[`server`]**: the bus worker-pool server and the HTTP front end
//! - **[`config`]**, **[`observability`]** and **[`error`]**: ambient support
//!
//! ## Request/Response Over a Bus
//!
//! ```rust
//! use brokerpc::broker::memory::MemoryBus;
//! use brokerpc::context::Context;
//! use brokerpc::server::{BrokerServerBuilder, ContextProcessor};
//! use brokerpc::transport::{BusTransport, UnaryTransport};
//! use brokerpc::wire;
//! use bytes::{Bytes, BytesMut};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(MemoryBus::new());
//! let upper = ContextProcessor::new(|ctx, body: Bytes| async move {
//!     Ok::<_, brokerpc::BrokerpcError>((ctx, Bytes::from(body.to_ascii_uppercase())))
//! });
//! let server = BrokerServerBuilder::new(bus.clone(), Arc::new(upper), ["shout"]).build();
//! let running = tokio::spawn({
//!     let server = server.clone();
//!     async move { server.serve().await }
//! });
//! while bus.subscription_count() == 0 {
//!     tokio::task::yield_now().await;
//! }
//!
//! let client = BusTransport::builder(bus.clone(), "shout").build();
//! client.open().await?;
//! let mut ctx = Context::new();
//! let mut request = BytesMut::from(&wire::write_request_header(&ctx)?[..]);
//! request.extend_from_slice(b"hello");
//! let reply = client.request(&mut ctx, &request).await?;
//! assert!(reply.ends_with(b"HELLO"));
//!
//! server.stop();
//! running.await??;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`observability`** (default): span instrumentation on transport and
//!   server entry points, and forwarding of counters to the `metrics` facade
//!
//! ## Error Handling
//!
//! Errors are layered:
//!
//! - [`TransportError`]: what every transport reports, with a machine-checkable
//!   [`TransportErrorKind`](transport::TransportErrorKind)
//! - [`FrameError`](wire::FrameError), [`ContextError`](context::ContextError),
//!   [`RegistryError`](registry::RegistryError) and
//!   [`BrokerError`](broker::BrokerError) for their own layers
//! - [`BrokerpcError`]: the top-level error wrapping all of them
//!
//! ## Safety
//!
//! brokerpc is written in safe Rust with `#![deny(unsafe_code)]`.

pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod pubsub;
pub mod registry;
pub mod server;
pub mod transport;
pub mod wire;

pub use context::Context;
pub use error::BrokerpcError;
pub use pubsub::{PublisherTransport, SubscriberTransport, Topic};
pub use server::{BrokerServer, BrokerServerBuilder, Processor};
pub use transport::{TransportError, UnaryTransport};

/// Shorthand for [`BrokerpcError`].
pub type Error = BrokerpcError;

/// Result type used throughout the crate.
pub type Result<T, E = BrokerpcError> = std::result::Result<T, E>;
