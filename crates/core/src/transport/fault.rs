// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{Link, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default)]
struct FaultPlan {
    drop_inbound: u32,
    corrupt_inbound: u32,
    drop_outbound: u32,
    corrupt_outbound: u32,
    injected: VecDeque<Vec<u8>>,
    dropped: u64,
    corrupted: u64,
}

/// Remote control for a [`FaultyLink`] after it has been moved into a harness.
#[derive(Debug, Clone, Default)]
pub struct FaultHandle {
    plan: Arc<Mutex<FaultPlan>>,
}

impl FaultHandle {
    /// Silently discards the next `n` chunks arriving from the peer.
    pub fn drop_next_inbound(&self, n: u32) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.drop_inbound += n;
        }
    }

    /// Flips one byte in each of the next `n` chunks arriving from the peer.
    pub fn corrupt_next_inbound(&self, n: u32) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.corrupt_inbound += n;
        }
    }

    /// Silently discards the next `n` writes towards the peer.
    pub fn drop_next_outbound(&self, n: u32) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.drop_outbound += n;
        }
    }

    /// Flips the checksum byte of each of the next `n` writes towards the peer.
    pub fn corrupt_next_outbound(&self, n: u32) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.corrupt_outbound += n;
        }
    }

    /// Queues raw bytes to be delivered before anything the peer sends.
    pub fn inject_inbound(&self, bytes: Vec<u8>) {
        if let Ok(mut plan) = self.plan.lock() {
            plan.injected.push_back(bytes);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.plan.lock().map(|p| p.dropped).unwrap_or(0)
    }

    pub fn corrupted(&self) -> u64 {
        self.plan.lock().map(|p| p.corrupted).unwrap_or(0)
    }
}

/// Link wrapper that loses or damages traffic on request.
pub struct FaultyLink<L: Link> {
    inner: L,
    handle: FaultHandle,
}

impl<L: Link> FaultyLink<L> {
    pub fn new(inner: L) -> (Self, FaultHandle) {
        let handle = FaultHandle::default();
        (
            Self {
                inner,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl<L: Link> Link for FaultyLink<L> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if let Ok(mut plan) = self.handle.plan.lock() {
            if plan.drop_outbound > 0 {
                plan.drop_outbound -= 1;
                plan.dropped += 1;
                warn!("Fault injection: dropping {} outbound bytes", bytes.len());
                return Ok(());
            }
            if plan.corrupt_outbound > 0 && !bytes.is_empty() {
                plan.corrupt_outbound -= 1;
                plan.corrupted += 1;
                let mut damaged = bytes.to_vec();
                let idx = damaged.len() - 1;
                damaged[idx] ^= 0x5A;
                warn!("Fault injection: corrupted outbound byte {}", idx);
                drop(plan);
                return self.inner.write_all(&damaged);
            }
        }
        self.inner.write_all(bytes)
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if let Ok(mut plan) = self.handle.plan.lock() {
            if let Some(chunk) = plan.injected.pop_front() {
                return Ok(chunk);
            }
        }

        let mut chunk = self.inner.read_chunk(timeout)?;

        if let Ok(mut plan) = self.handle.plan.lock() {
            if plan.drop_inbound > 0 {
                plan.drop_inbound -= 1;
                plan.dropped += 1;
                warn!("Fault injection: dropping {} inbound bytes", chunk.len());
                return Ok(Vec::new());
            }
            if plan.corrupt_inbound > 0 && !chunk.is_empty() {
                plan.corrupt_inbound -= 1;
                plan.corrupted += 1;
                // Leave the magic byte intact so the frame is parsed and its checksum fails.
                let idx = chunk.len() - 1;
                chunk[idx] ^= 0x5A;
                warn!("Fault injection: corrupted inbound byte {}", idx);
            }
        }
        Ok(chunk)
    }
}
