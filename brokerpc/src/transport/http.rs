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

//! Unary transport over HTTP/1.1.
//!
//! Each request is a `POST` whose body is the base64 encoding of the framed
//! payload. The reply body is decoded the same way. Status `413` means the
//! reply exceeded the limit advertised in [`HEADER_PAYLOAD_LIMIT`]; any other
//! non-success status carries the server's message.

use super::{CloseCause, TransportError, UnaryTransport, check_request_size};
use crate::config::HttpConfig;
use crate::context::Context;
use crate::wire::{self, FRAME_HEADER_SIZE};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HOST};
use http::{HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Content type of framed request and reply bodies.
pub const CONTENT_TYPE_FRUGAL: &str = "application/x-frugal";

/// Header advertising the largest reply the caller accepts.
pub const HEADER_PAYLOAD_LIMIT: &str = "x-frugal-payload-limit";

/// Header naming the body transfer encoding.
pub const HEADER_CONTENT_TRANSFER_ENCODING: &str = "content-transfer-encoding";

/// Computes extra request headers from the call context.
pub type ContextHeaderFn = Arc<dyn Fn(&Context) -> HashMap<String, String> + Send + Sync>;

/// Builder for [`HttpTransport`].
///
/// # Examples
///
/// ```rust
/// use brokerpc::transport::{HttpTransport, UnaryTransport};
///
/// let transport = HttpTransport::builder("http://localhost:9090/frugal")
///     .with_request_size_limit(1024 * 1024)
///     .with_response_size_limit(4 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(transport.request_size_limit(), 1024 * 1024);
/// ```
pub struct HttpTransportBuilder {
    url: String,
    request_size_limit: usize,
    response_size_limit: usize,
    request_headers: HashMap<String, String>,
    context_headers: Option<ContextHeaderFn>,
}

impl HttpTransportBuilder {
    /// Limits outgoing payloads. `0` means unbounded.
    pub fn with_request_size_limit(mut self, limit: usize) -> Self {
        self.request_size_limit = limit;
        self
    }

    /// Limits replies; advertised to the server. `0` means unbounded.
    pub fn with_response_size_limit(mut self, limit: usize) -> Self {
        self.response_size_limit = limit;
        self
    }

    /// Applies both limits from configuration.
    pub fn with_config(self, config: &HttpConfig) -> Self {
        self.with_request_size_limit(config.request_size_limit)
            .with_response_size_limit(config.response_size_limit)
    }

    /// Adds static headers sent with every request.
    pub fn with_request_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.request_headers.extend(headers);
        self
    }

    /// Adds headers computed from each call's context.
    ///
    /// These are applied after the static headers and override them.
    pub fn with_context_headers(mut self, headers: ContextHeaderFn) -> Self {
        self.context_headers = Some(headers);
        self
    }

    /// Builds the transport.
    ///
    /// # Errors
    ///
    /// Fails if the URL is not an absolute `http://` URL.
    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let url: Uri = self
            .url
            .parse()
            .map_err(|e| TransportError::unknown(format!("invalid url {}: {e}", self.url)))?;
        if url.scheme_str() != Some("http") {
            return Err(TransportError::unknown(format!(
                "unsupported url {}: only http:// is supported",
                self.url
            )));
        }
        let host = url
            .host()
            .ok_or_else(|| TransportError::unknown(format!("url {} has no host", self.url)))?
            .to_string();
        let port = url.port_u16().unwrap_or(80);
        let (closed, _) = broadcast::channel(4);
        Ok(HttpTransport {
            url,
            host,
            port,
            request_size_limit: self.request_size_limit,
            response_size_limit: self.response_size_limit,
            request_headers: self.request_headers,
            context_headers: self.context_headers,
            closed,
        })
    }
}

/// Request/response over HTTP `POST`.
///
/// There is no connection state to manage: [`open`](UnaryTransport::open) is a
/// no-op and the transport always reports itself open. Each call opens a new
/// HTTP/1.1 connection.
pub struct HttpTransport {
    url: Uri,
    host: String,
    port: u16,
    request_size_limit: usize,
    response_size_limit: usize,
    request_headers: HashMap<String, String>,
    context_headers: Option<ContextHeaderFn>,
    closed: broadcast::Sender<CloseCause>,
}

impl HttpTransport {
    /// Starts building a transport that posts to `url`.
    pub fn builder(url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            url: url.into(),
            request_size_limit: 0,
            response_size_limit: 0,
            request_headers: HashMap::new(),
            context_headers: None,
        }
    }

    /// Returns the reply size limit, `0` meaning unbounded.
    pub fn response_size_limit(&self) -> usize {
        self.response_size_limit
    }

    fn build_request(&self, ctx: &Context, payload: &[u8]) -> Result<Request<Full<Bytes>>, TransportError> {
        let frame = wire::encode(payload)?;
        let body = STANDARD.encode(&frame);

        let path = self
            .url
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let authority = self
            .url
            .authority()
            .map_or_else(|| self.host.clone(), |a| a.to_string());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, authority)
            .header(CONTENT_TYPE, CONTENT_TYPE_FRUGAL)
            .header(HEADER_CONTENT_TRANSFER_ENCODING, "base64")
            .header(ACCEPT, CONTENT_TYPE_FRUGAL);
        if self.response_size_limit > 0 {
            builder = builder.header(HEADER_PAYLOAD_LIMIT, self.response_size_limit.to_string());
        }

        let mut extra = self.request_headers.clone();
        if let Some(context_headers) = &self.context_headers {
            extra.extend(context_headers(ctx));
        }
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in extra {
                let name = HeaderName::try_from(name.as_str())
                    .map_err(|e| TransportError::unknown(format!("invalid header {name}: {e}")))?;
                let value = HeaderValue::try_from(value.as_str())
                    .map_err(|e| TransportError::unknown(format!("invalid header value: {e}")))?;
                headers.insert(name, value);
            }
        }

        builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| TransportError::unknown(format!("could not build request: {e}")))
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), TransportError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::not_open(format!("could not connect to {}: {e}", self.url)))?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| TransportError::unknown(format!("http handshake failed: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "http connection error");
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| TransportError::unknown(format!("http request failed: {e}")))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::unknown(format!("could not read response body: {e}")))?
            .to_bytes();
        Ok((status, body))
    }

    async fn send(&self, ctx: &Context, payload: &[u8]) -> Result<Bytes, TransportError> {
        check_request_size(payload.len(), self.request_size_limit)?;
        let request = self.build_request(ctx, payload)?;

        let timeout = ctx.timeout();
        let (status, body) = tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| {
                TransportError::timed_out(format!(
                    "http request timed out after {} ms",
                    timeout.as_millis()
                ))
            })??;

        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(TransportError::response_too_large(
                "response was too large for the transport",
            ));
        }
        if !status.is_success() {
            return Err(TransportError::unknown(format!(
                "response errored with code {} and message {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        let frame = STANDARD
            .decode(&body)
            .map_err(|e| TransportError::unknown(format!("could not decode response body: {e}")))?;
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(TransportError::unknown("invalid frame size"));
        }
        Ok(Bytes::copy_from_slice(wire::decode(&frame)?))
    }
}

#[async_trait]
impl UnaryTransport for HttpTransport {
    async fn open(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let _ = self.closed.send(CloseCause::Clean);
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn request_size_limit(&self) -> usize {
        self.request_size_limit
    }

    async fn oneway(&self, ctx: &Context, payload: &[u8]) -> Result<(), TransportError> {
        self.send(ctx, payload).await.map(|_| ())
    }

    #[cfg_attr(
        feature = "observability",
        instrument(skip_all, fields(url = %self.url, correlation_id = %ctx.correlation_id()))
    )]
    async fn request(&self, ctx: &mut Context, payload: &[u8]) -> Result<Bytes, TransportError> {
        let reply = self.send(ctx, payload).await?;
        if reply.is_empty() {
            warn!(url = %self.url, "empty reply to a request");
            return Ok(reply);
        }
        wire::read_response_header(&reply, ctx)?;
        Ok(reply)
    }

    fn closed(&self) -> broadcast::Receiver<CloseCause> {
        self.closed.subscribe()
    }
}
