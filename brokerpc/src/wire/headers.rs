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

//! Context header block.
//!
//! Every payload begins with a header block:
//!
//! ```text
//! +---------+------------------+-----------------------------------------+
//! | Version | Size (4 bytes)   | Pairs (Size bytes)                      |
//! +---------+------------------+-----------------------------------------+
//! pair := [key len: u32][key][value len: u32][value]
//! ```
//!
//! All integers are big-endian. Requests carry the caller's request headers;
//! replies carry the server's response headers, which always include the
//! `_opid` of the request being answered.

use super::FrameError;
use crate::context::{Context, OP_ID_HEADER};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// The only header block version understood by this runtime.
pub const HEADER_VERSION: u8 = 0x00;

const BLOCK_PREFIX_SIZE: usize = 5;

/// Encodes a header map into a header block.
///
/// Pairs are written in key order so equal maps encode to equal bytes.
pub fn encode_headers(headers: &HashMap<String, String>) -> Result<Bytes, FrameError> {
    let mut pairs: Vec<(&String, &String)> = headers.iter().collect();
    pairs.sort();

    let size: usize = pairs.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let block_size = u32::try_from(size).map_err(|_| FrameError::Oversized { len: size })?;

    let mut block = BytesMut::with_capacity(BLOCK_PREFIX_SIZE + size);
    block.put_u8(HEADER_VERSION);
    block.put_u32(block_size);
    for (key, value) in pairs {
        // Each length fits: both are bounded by block_size.
        block.put_u32(key.len() as u32);
        block.put_slice(key.as_bytes());
        block.put_u32(value.len() as u32);
        block.put_slice(value.as_bytes());
    }
    Ok(block.freeze())
}

/// Decodes a header block from the start of `payload`.
///
/// Returns the headers and the number of bytes the block occupied.
pub fn decode_headers(payload: &[u8]) -> Result<(HashMap<String, String>, usize), FrameError> {
    let version = *payload
        .first()
        .ok_or_else(|| FrameError::malformed("missing version byte"))?;
    if version != HEADER_VERSION {
        return Err(FrameError::UnsupportedHeaderVersion { version });
    }
    let size = read_u32(payload, 1)? as usize;
    let end = BLOCK_PREFIX_SIZE
        .checked_add(size)
        .filter(|end| *end <= payload.len())
        .ok_or_else(|| {
            FrameError::malformed(format!(
                "block declares {size} bytes but {} are present",
                payload.len().saturating_sub(BLOCK_PREFIX_SIZE)
            ))
        })?;

    let mut headers = HashMap::new();
    let mut cursor = BLOCK_PREFIX_SIZE;
    while cursor < end {
        let (key, next) = read_string(payload, cursor, end)?;
        let (value, next) = read_string(payload, next, end)?;
        headers.insert(key, value);
        cursor = next;
    }
    Ok((headers, end))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, FrameError> {
    bytes
        .get(at..at + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| FrameError::malformed(format!("truncated length at offset {at}")))
}

fn read_string(bytes: &[u8], at: usize, end: usize) -> Result<(String, usize), FrameError> {
    if at + 4 > end {
        return Err(FrameError::malformed(format!(
            "truncated length at offset {at}"
        )));
    }
    let len = read_u32(bytes, at)? as usize;
    let start = at + 4;
    let stop = start
        .checked_add(len)
        .filter(|stop| *stop <= end)
        .ok_or_else(|| FrameError::malformed(format!("string at offset {start} overruns block")))?;
    let value = std::str::from_utf8(&bytes[start..stop])
        .map_err(|e| FrameError::malformed(format!("invalid utf-8 at offset {start}: {e}")))?;
    Ok((value.to_string(), stop))
}

/// Writes the request header block for `ctx`.
pub fn write_request_header(ctx: &Context) -> Result<Bytes, FrameError> {
    encode_headers(ctx.request_header_map())
}

/// Reads a request header block and rebuilds the caller's context.
///
/// The received `_opid` is kept and mirrored into the response headers. A
/// correlation id is generated if the caller did not send one.
pub fn read_request_header(payload: &[u8]) -> Result<(Context, usize), FrameError> {
    let (headers, consumed) = decode_headers(payload)?;
    Ok((Context::from_wire(headers), consumed))
}

/// Writes the response header block for `ctx`.
pub fn write_response_header(ctx: &Context) -> Result<Bytes, FrameError> {
    encode_headers(ctx.response_header_map())
}

/// Reads a response header block into `ctx`.
///
/// Every header except `_opid` is copied into the response headers; the
/// context keeps its own operation id.
pub fn read_response_header(payload: &[u8], ctx: &mut Context) -> Result<usize, FrameError> {
    let (headers, consumed) = decode_headers(payload)?;
    for (name, value) in headers {
        if name == OP_ID_HEADER {
            continue;
        }
        ctx.set_response_header_unchecked(name, value);
    }
    Ok(consumed)
}
