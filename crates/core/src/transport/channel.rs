// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{Link, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// In-process cross-link between two endpoints, one chunk per write.
#[derive(Debug)]
pub struct ChannelLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl ChannelLink {
    /// Returns `(host_end, target_end)`.
    pub fn pair() -> (ChannelLink, ChannelLink) {
        let (a_tx, a_rx) = crossbeam_channel::unbounded();
        let (b_tx, b_rx) = crossbeam_channel::unbounded();
        (
            ChannelLink { tx: a_tx, rx: b_rx },
            ChannelLink { tx: b_tx, rx: a_rx },
        )
    }
}

impl Link for ChannelLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(chunk),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}
