// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Frame layout: `MAGIC | version | len (u16 LE) | payload | checksum`.
//!
//! The checksum is the modulo-256 sum of the version, length and payload
//! bytes, the same scheme the GDB remote serial protocol uses for its packets.

use super::TransportError;
use tracing::debug;

pub const MAGIC: u8 = 0xA5;
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4;
pub const TRAILER_LEN: usize = 1;
pub const DEFAULT_MAX_PAYLOAD: usize = 256;

pub fn checksum(version: u8, payload: &[u8]) -> u8 {
    let len = (payload.len() as u16).to_le_bytes();
    payload
        .iter()
        .fold(version.wrapping_add(len[0]).wrapping_add(len[1]), |acc, b| {
            acc.wrapping_add(*b)
        })
}

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > u16::MAX as usize {
        return Err(TransportError::FrameTooLarge {
            len: payload.len(),
            max: u16::MAX as usize,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.push(MAGIC);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(checksum(PROTOCOL_VERSION, payload));
    Ok(frame)
}

/// Incremental frame parser for byte-stream links.
///
/// Bytes before a magic byte are discarded. A frame that fails validation
/// only consumes its magic byte so a valid frame that follows is still found.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_payload: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        match self.buf.iter().position(|b| *b == MAGIC) {
            Some(0) => {}
            Some(skip) => {
                debug!("Discarding {} bytes before frame start", skip);
                self.buf.drain(..skip);
            }
            None => {
                if !self.buf.is_empty() {
                    debug!("Discarding {} bytes without frame start", self.buf.len());
                    self.buf.clear();
                }
                return None;
            }
        }

        if self.buf.len() < HEADER_LEN {
            return None;
        }

        let version = self.buf[1];
        if version != PROTOCOL_VERSION {
            self.buf.drain(..1);
            return Some(Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            }));
        }

        let len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
        if len > self.max_payload {
            self.buf.drain(..1);
            return Some(Err(TransportError::FrameTooLarge {
                len,
                max: self.max_payload,
            }));
        }

        let total = HEADER_LEN + len + TRAILER_LEN;
        if self.buf.len() < total {
            return None;
        }

        let payload = &self.buf[HEADER_LEN..HEADER_LEN + len];
        let expected = checksum(version, payload);
        let actual = self.buf[total - 1];
        if expected != actual {
            self.buf.drain(..1);
            return Some(Err(TransportError::ChecksumMismatch { expected, actual }));
        }

        let payload = payload.to_vec();
        self.buf.drain(..total);
        Some(Ok(payload))
    }
}
