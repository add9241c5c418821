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

//! HTTP front end for a [`Processor`].
//!
//! Answers the requests of an [`HttpTransport`](crate::transport::HttpTransport):
//! the body is a base64 encoded frame, and so is the reply.
//!
//! | Status | Cause |
//! |--------|-------|
//! | 200 | processed, body is the base64 reply frame |
//! | 400 | malformed payload limit header, body or frame |
//! | 413 | reply larger than the caller's `x-frugal-payload-limit` |
//! | 500 | the processor failed |

use super::Processor;
use super::properties::{REQUEST_RECEIVED_TIME, RequestProperties};
use crate::transport::{CONTENT_TYPE_FRUGAL, HEADER_CONTENT_TRANSFER_ENCODING, HEADER_PAYLOAD_LIMIT};
use crate::wire::{self, FRAME_HEADER_SIZE};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serves a [`Processor`] over HTTP/1.1.
#[derive(Clone)]
pub struct HttpProcessor {
    processor: Arc<dyn Processor>,
}

impl HttpProcessor {
    /// Wraps `processor`.
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self { processor }
    }

    /// Handles one request.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        match self.try_handle(request).await {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, CONTENT_TYPE_FRUGAL)
                .header(HEADER_CONTENT_TRANSFER_ENCODING, "base64")
                .body(Full::new(body))
                .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, "could not build response")),
            Err((status, message)) => {
                if status.is_server_error() {
                    error!(status = status.as_u16(), %message, "http request failed");
                } else {
                    warn!(status = status.as_u16(), %message, "http request rejected");
                }
                plain(status, message)
            }
        }
    }

    async fn try_handle<B>(&self, request: Request<B>) -> Result<Bytes, (StatusCode, String)>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let limit = match request.headers().get(HEADER_PAYLOAD_LIMIT) {
            None => 0,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("{HEADER_PAYLOAD_LIMIT} header not an integer"),
                    )
                })?,
        };

        let body = request
            .into_body()
            .collect()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("could not read request body: {e}")))?
            .to_bytes();
        let frame = STANDARD
            .decode(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("could not decode request body: {e}")))?;
        if frame.len() < FRAME_HEADER_SIZE {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("invalid request size {}", frame.len()),
            ));
        }
        let payload = wire::decode(&frame)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("could not read the frame: {e}")))?;

        let properties = RequestProperties::new();
        properties.insert(REQUEST_RECEIVED_TIME, Instant::now());
        let reply = self
            .processor
            .process(Bytes::copy_from_slice(payload), &properties)
            .await
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("error processing request: {e}"),
                )
            })?;

        if limit > 0 && reply.len() > limit {
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "response size ({}) larger than requested size ({limit})",
                    reply.len()
                ),
            ));
        }
        let frame = wire::encode(&reply).map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("could not frame response: {e}"),
            )
        })?;
        Ok(Bytes::from(STANDARD.encode(&frame)))
    }

    /// Accepts connections on `listener` until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed accept.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        info!(address = ?listener.local_addr().ok(), "http processor listening");
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            debug!(%peer, "http connection accepted");

            let this = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let this = this.clone();
                    async move { Ok::<_, Infallible>(this.handle(request).await) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, error = %e, "http connection error");
                }
            });
        }
    }
}

fn plain(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.into())));
    *response.status_mut() = status;
    response
}
