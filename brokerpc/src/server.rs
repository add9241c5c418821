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

//! Servers that answer unary requests.
//!
//! A [`Processor`] turns one request payload into one reply payload. Two
//! front ends feed it:
//!
//! - [`BrokerServer`] consumes requests from bus subjects with a bounded
//!   worker pool and publishes each reply to the request's reply subject
//! - [`HttpProcessor`] answers the requests of an
//!   [`HttpTransport`](crate::transport::HttpTransport)
//!
//! Payloads are unframed on both sides: the front end strips the frame
//! prefix before calling the processor and frames the reply afterwards.

mod broker;
mod http;
pub mod properties;

pub use self::broker::{BrokerServer, BrokerServerBuilder};
pub use self::http::HttpProcessor;
pub use self::properties::{PropertyValue, RequestHook, RequestProperties};

use crate::context::Context;
use crate::error::BrokerpcError;
use crate::wire;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::marker::PhantomData;

/// Handles one request.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Processes the unframed `request` payload and returns the unframed
    /// reply. An empty reply means there is nothing to send back.
    async fn process(
        &self,
        request: Bytes,
        properties: &RequestProperties,
    ) -> Result<Bytes, BrokerpcError>;
}

/// A [`Processor`] that reads the request header block into a [`Context`]
/// and writes the response header block in front of the handler's reply.
///
/// The handler receives the request context and the bytes following the
/// header block. It returns the context, with any response headers it
/// added, together with the reply body.
///
/// # Examples
///
/// ```rust
/// use brokerpc::server::ContextProcessor;
/// use bytes::Bytes;
///
/// let echo = ContextProcessor::new(|ctx, body: Bytes| async move {
///     Ok::<_, brokerpc::BrokerpcError>((ctx, body))
/// });
/// # let _ = echo;
/// ```
pub struct ContextProcessor<F, Fut> {
    handler: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> ContextProcessor<F, Fut>
where
    F: Fn(Context, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(Context, Bytes), BrokerpcError>> + Send + 'static,
{
    /// Wraps `handler`.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Processor for ContextProcessor<F, Fut>
where
    F: Fn(Context, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(Context, Bytes), BrokerpcError>> + Send + 'static,
{
    async fn process(
        &self,
        request: Bytes,
        _properties: &RequestProperties,
    ) -> Result<Bytes, BrokerpcError> {
        let (ctx, consumed) = wire::read_request_header(&request)?;
        let (ctx, body) = (self.handler)(ctx, request.slice(consumed..)).await?;
        let header = wire::write_response_header(&ctx)?;
        let mut reply = BytesMut::with_capacity(header.len() + body.len());
        reply.extend_from_slice(&header);
        reply.extend_from_slice(&body);
        Ok(reply.freeze())
    }
}
