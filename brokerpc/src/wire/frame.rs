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

//! Length-prefixed framing.
//!
//! Every broker message is a 4-byte big-endian length followed by exactly
//! that many payload bytes.
//!
//! # Examples
//!
//! ```rust
//! use brokerpc::wire::{decode, encode};
//!
//! let frame = encode(b"Hello").unwrap();
//! assert_eq!(&frame[..4], &5u32.to_be_bytes());
//! assert_eq!(decode(&frame).unwrap(), b"Hello");
//! ```

use super::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the frame length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Prepends the 4-byte big-endian length of `payload`.
///
/// # Errors
///
/// Returns [`FrameError::Oversized`] if the payload length does not fit in a
/// `u32`.
pub fn encode(payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::Oversized { len: payload.len() })?;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Validates a frame and returns its payload.
///
/// Bytes beyond the declared length are ignored.
///
/// # Errors
///
/// - [`FrameError::TooShort`] if fewer than four bytes are present
/// - [`FrameError::MissingData`] if the body is shorter than declared
pub fn decode(frame: &[u8]) -> Result<&[u8], FrameError> {
    let declared = declared_len(frame)?;
    let body = &frame[FRAME_HEADER_SIZE..];
    if body.len() < declared {
        return Err(FrameError::MissingData {
            declared,
            actual: body.len(),
        });
    }
    Ok(&body[..declared])
}

/// Like [`decode`] but returns the payload as a shared [`Bytes`] slice
/// without copying.
pub fn decode_bytes(frame: &Bytes) -> Result<Bytes, FrameError> {
    let len = decode(frame)?.len();
    Ok(frame.slice(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len))
}

/// Reads the declared payload length from the prefix.
pub fn declared_len(frame: &[u8]) -> Result<usize, FrameError> {
    let prefix: [u8; FRAME_HEADER_SIZE] = frame
        .get(..FRAME_HEADER_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or(FrameError::TooShort { len: frame.len() })?;
    Ok(u32::from_be_bytes(prefix) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_prefixes_length() {
        let frame = encode(b"Hello, world!").unwrap();
        assert_eq!(&frame[0..4], &13u32.to_be_bytes());
        assert_eq!(&frame[4..], b"Hello, world!");
    }

    #[test]
    fn test_round_trip() {
        for payload in [&b""[..], b"x", b"{\"message\":\"Sending call\"}"] {
            let frame = encode(payload).unwrap();
            assert_eq!(decode(&frame).unwrap(), payload);
        }
    }

    #[test]
    fn test_empty_frame() {
        let frame = encode(b"").unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE);
        assert!(decode(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_too_short() {
        for len in 0..FRAME_HEADER_SIZE {
            let bytes = vec![0u8; len];
            assert_eq!(decode(&bytes), Err(FrameError::TooShort { len }));
        }
    }

    #[test]
    fn test_missing_data() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        assert_eq!(
            decode(&bytes),
            Err(FrameError::MissingData {
                declared: 10,
                actual: 3
            })
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = 2u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abcdef");
        assert_eq!(decode(&bytes).unwrap(), b"ab");
    }

    #[test]
    fn test_decode_bytes_shares_buffer() {
        let frame = encode(b"payload").unwrap();
        let payload = decode_bytes(&frame).unwrap();
        assert_eq!(&payload[..], b"payload");
    }
}
