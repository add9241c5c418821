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

//! Wire format shared by every transport.
//!
//! Two layers make up a message on the wire:
//!
//! ```text
//! +------------------+----------------------------------------------+
//! | Length (4 bytes) | Payload (N bytes)                            |
//! +------------------+----------------------------------------------+
//!                    | Header block | Opaque body                   |
//!                    +--------------+-------------------------------+
//! ```
//!
//! - The [`frame`] layer is the 4-byte big-endian length prefix every
//!   broker message carries.
//! - The [`headers`] layer is the context header block written at the start
//!   of every payload by the serialization layer. The runtime only reads it
//!   to correlate replies; the body after it is opaque.

pub mod frame;
pub mod headers;

mod error;

pub use self::error::FrameError;
pub use self::frame::{FRAME_HEADER_SIZE, decode, encode};
pub use self::headers::{
    HEADER_VERSION, read_request_header, read_response_header, write_request_header,
    write_response_header,
};
