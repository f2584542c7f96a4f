//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
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

//! Wire framing
//!
//! Every frame is a single read unit: one frame-kind byte followed by up to
//! `DEFAULT_FRAME_SIZE - 1` bytes of text payload. The only kind byte in use
//! is [`HEARTBEAT_MARKER`], which means "the sender is alive and may carry a
//! payload". A frame with nothing after the marker is a pure heartbeat.
//!
//! ```text
//! +-----+---------------------------+
//! | '*' | payload (0..=255 bytes)   |
//! +-----+---------------------------+
//! ```
//!
//! Frames are not length prefixed. The relay assumes one frame per read, so
//! TCP segments that coalesce or split frames are not reassembled.

use crate::{RelayError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// Frame-kind byte prefixed to every frame
pub const HEARTBEAT_MARKER: u8 = b'*';

/// Maximum size of a frame, marker included
pub const DEFAULT_FRAME_SIZE: usize = 256;

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Liveness only, nothing to relay
    Heartbeat,
    /// Liveness plus a payload to relay
    Message(Bytes),
}

impl Frame {
    /// Decode a single read.
    ///
    /// The first byte is always stripped, whatever its value. `bytes` must
    /// not be empty; an empty read is end-of-stream and never reaches here.
    pub fn decode(bytes: &[u8]) -> Frame {
        match bytes.split_first() {
            Some((marker, payload)) => {
                if *marker != HEARTBEAT_MARKER {
                    tracing::trace!(marker = *marker, "Unexpected frame-kind byte");
                }
                if payload.is_empty() {
                    Frame::Heartbeat
                } else {
                    Frame::Message(Bytes::copy_from_slice(payload))
                }
            }
            None => Frame::Heartbeat,
        }
    }

    /// Encode a bare heartbeat frame
    pub fn encode_heartbeat() -> Bytes {
        Bytes::from_static(&[HEARTBEAT_MARKER])
    }

    /// Encode a message frame, checking it fits in `max_frame` bytes
    pub fn encode_message(text: &str, max_frame: usize) -> Result<Bytes> {
        let len = text.len() + 1;
        if len > max_frame {
            return Err(RelayError::FrameTooLarge {
                len,
                max: max_frame,
            });
        }
        let mut buf = BytesMut::with_capacity(len);
        buf.put_u8(HEARTBEAT_MARKER);
        buf.put_slice(text.as_bytes());
        Ok(buf.freeze())
    }

    /// Payload carried by this frame, if any
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Frame::Heartbeat => None,
            Frame::Message(payload) => Some(payload),
        }
    }
}

/// Render a relayed line as `"<addr> : <payload>"`
pub fn format_broadcast(peer_addr: SocketAddr, payload: &[u8]) -> String {
    format!("{} : {}", peer_addr, String::from_utf8_lossy(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_heartbeat() {
        assert_eq!(Frame::decode(b"*"), Frame::Heartbeat);
    }

    #[test]
    fn test_decode_message() {
        let frame = Frame::decode(b"*hello");
        assert_eq!(frame, Frame::Message(Bytes::from_static(b"hello")));
        assert_eq!(frame.payload().map(|p| p.as_ref()), Some(&b"hello"[..]));
    }

    #[test]
    fn test_decode_strips_any_marker() {
        assert_eq!(
            Frame::decode(b"#hi"),
            Frame::Message(Bytes::from_static(b"hi"))
        );
        assert_eq!(Frame::decode(b"x"), Frame::Heartbeat);
    }

    #[test]
    fn test_encode_message() {
        let bytes = Frame::encode_message("ping", DEFAULT_FRAME_SIZE).unwrap();
        assert_eq!(bytes.as_ref(), b"*ping");
        assert_eq!(Frame::encode_heartbeat().as_ref(), b"*");
    }

    #[test]
    fn test_encode_message_too_large() {
        let text = "a".repeat(DEFAULT_FRAME_SIZE);
        let err = Frame::encode_message(&text, DEFAULT_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge { len: 257, max: 256 }));

        let text = "a".repeat(DEFAULT_FRAME_SIZE - 1);
        assert!(Frame::encode_message(&text, DEFAULT_FRAME_SIZE).is_ok());
    }

    #[test]
    fn test_format_broadcast() {
        let addr: SocketAddr = "10.0.0.7:5123".parse().unwrap();
        assert_eq!(format_broadcast(addr, b"hello"), "10.0.0.7:5123 : hello");
    }

    proptest! {
        #[test]
        fn decode_drops_exactly_one_byte(marker in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..255)) {
            let mut raw = vec![marker];
            raw.extend_from_slice(&payload);
            match Frame::decode(&raw) {
                Frame::Heartbeat => prop_assert!(payload.is_empty()),
                Frame::Message(bytes) => prop_assert_eq!(bytes.as_ref(), payload.as_slice()),
            }
        }
    }
}
