// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod channel;
pub mod fault;
pub mod frame;
pub mod tcp;

pub use channel::ChannelLink;
pub use fault::{FaultHandle, FaultyLink};
pub use frame::{FrameDecoder, PROTOCOL_VERSION};
pub use tcp::TcpLink;

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out waiting for data")]
    Timeout,
    #[error("link disconnected")]
    Disconnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },
    #[error("protocol version mismatch (expected {expected}, got {actual})")]
    VersionMismatch { expected: u8, actual: u8 },
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// A raw byte medium between host and target (UART, socket, channel).
pub trait Link: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Blocks until some bytes arrive or `timeout` elapses.
    ///
    /// Returns `TransportError::Timeout` on expiry; never blocks longer.
    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

impl Link for Box<dyn Link> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(bytes)
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_chunk(timeout)
    }
}

/// Frame-level send/receive over a byte link.
pub struct FramedTransport<L: Link> {
    link: L,
    decoder: FrameDecoder,
}

impl<L: Link> FramedTransport<L> {
    pub fn new(link: L) -> Self {
        Self::with_max_payload(link, frame::DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(link: L, max_payload: usize) -> Self {
        Self {
            link,
            decoder: FrameDecoder::new(max_payload),
        }
    }

    /// Sends one payload. `Ok` means the link accepted every byte.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = frame::encode_frame(payload)?;
        debug!("tx frame: {} payload bytes", payload.len());
        self.link.write_all(&frame)
    }

    /// Receives the next valid payload or fails once `timeout` has elapsed.
    pub fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                if let Ok(payload) = &frame {
                    debug!("rx frame: {} payload bytes", payload.len());
                }
                return frame;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let chunk = self.link.read_chunk(remaining)?;
            self.decoder.push(&chunk);
        }
    }

    /// Drops partially received bytes, e.g. after abandoning a call.
    pub fn discard_pending(&mut self) {
        if self.decoder.buffered() > 0 {
            debug!("Discarding {} buffered bytes", self.decoder.buffered());
        }
        self.decoder.clear();
    }

    /// Next complete frame already buffered, without touching the link.
    pub fn next_buffered(&mut self) -> Option<Vec<u8>> {
        match self.decoder.next_frame() {
            Some(Ok(payload)) => Some(payload),
            _ => None,
        }
    }

    pub fn into_link(self) -> L {
        self.link
    }
}
