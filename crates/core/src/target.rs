// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! A simulated target: the stub loop on its own thread behind a link.

use crate::stub::{Status, Stub};
use crate::transport::{ChannelLink, FramedTransport, Link, TransportError};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Lifecycle of the simulated MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum McuState {
    /// Before the stub loop has started.
    Limbo,
    /// Serving requests.
    Running,
    /// The host hung up; the loop ended gracefully.
    Done,
    /// A target function crashed; the watchdog reset the device.
    Crashed,
}

impl McuState {
    pub fn initial() -> Self {
        McuState::Limbo
    }

    /// Whether the simulation is still live, regardless of earlier crashes.
    pub fn is_running(&self) -> bool {
        match *self {
            McuState::Limbo => true,
            McuState::Running => true,
            McuState::Crashed => true,
            McuState::Done => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSnapshot {
    pub state: McuState,
    pub status: Status,
    pub requests_served: u64,
    pub crashes: u64,
}

pub struct SimTarget {
    name: String,
    shared: Arc<Mutex<TargetSnapshot>>,
    handle: Option<JoinHandle<()>>,
}

impl SimTarget {
    /// Starts the stub behind an in-process link and returns the host end.
    pub fn spawn(stub: Stub) -> (SimTarget, ChannelLink) {
        let (host, target) = ChannelLink::pair();
        (Self::spawn_on(stub, target), host)
    }

    /// Starts the stub on an arbitrary link (e.g. an accepted TCP connection).
    pub fn spawn_on<L: Link + 'static>(mut stub: Stub, link: L) -> SimTarget {
        let name = stub.descriptor().name.clone();
        let shared = Arc::new(Mutex::new(TargetSnapshot {
            state: McuState::initial(),
            status: stub.status().clone(),
            requests_served: 0,
            crashes: 0,
        }));

        let thread_shared = shared.clone();
        let thread_name = format!("sim-target-{}", name);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut transport = FramedTransport::new(link);
                run_loop(&mut stub, &mut transport, &thread_shared);
            })
            .ok();

        if handle.is_none() {
            error!("Failed to spawn simulated target thread for {}", name);
        }

        SimTarget {
            name,
            shared,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        match self.shared.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Waits for the stub loop to end. The host end of the link must be
    /// dropped first or this blocks.
    pub fn join(mut self) -> TargetSnapshot {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Simulated target thread for {} panicked", self.name);
            }
        }
        self.snapshot()
    }
}

fn publish(shared: &Mutex<TargetSnapshot>, stub: &Stub, state: McuState, crashed: bool) {
    if let Ok(mut guard) = shared.lock() {
        guard.state = state;
        guard.status = stub.status().clone();
        guard.requests_served = stub.requests_served();
        if crashed {
            guard.crashes += 1;
        }
    }
}

fn run_loop<L: Link>(
    stub: &mut Stub,
    transport: &mut FramedTransport<L>,
    shared: &Mutex<TargetSnapshot>,
) {
    info!("Simulated target {} running", stub.descriptor().name);
    publish(shared, stub, McuState::Running, false);

    loop {
        let served = panic::catch_unwind(AssertUnwindSafe(|| stub.serve_one(transport, IDLE_POLL)));
        match served {
            Ok(Ok(true)) => publish(shared, stub, McuState::Running, false),
            Ok(Ok(false)) => {}
            Ok(Err(TransportError::Disconnected)) => {
                info!("Host disconnected from {}", stub.descriptor().name);
                publish(shared, stub, McuState::Done, false);
                return;
            }
            Ok(Err(e)) => {
                warn!("Simulated target transport error: {}", e);
            }
            Err(_) => {
                // The in-flight request is lost; the host will see a timeout.
                warn!(
                    "Target function crashed on {}; watchdog reset",
                    stub.descriptor().name
                );
                stub.hardware_reset();
                transport.discard_pending();
                publish(shared, stub, McuState::Crashed, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, RequestBody, Response, ResponseBody};
    use crate::stub::{DispatchTable, TargetDescriptor};

    #[test]
    fn test_initial_state_matches_expected() {
        assert_eq!(McuState::initial(), McuState::Limbo);
        assert!(McuState::Limbo.is_running());
        assert!(!McuState::Done.is_running());
    }

    #[test]
    fn test_sim_target_serves_and_stops_on_disconnect() {
        let mut table = DispatchTable::new();
        table.register(1, "inc", |(x,): (u8,)| x.wrapping_add(1));
        let (target, link) = SimTarget::spawn(Stub::new(table, TargetDescriptor::default()));

        let mut host = FramedTransport::new(link);
        host.send(
            &Request {
                seq: 1,
                body: RequestBody::Hello,
            }
            .encode(),
        )
        .unwrap();
        let reply = host.receive(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            Response::decode(&reply).unwrap().body,
            ResponseBody::HelloAck(_)
        ));

        drop(host);
        let snapshot = target.join();
        assert_eq!(snapshot.state, McuState::Done);
        assert_eq!(snapshot.requests_served, 1);
        assert_eq!(snapshot.status.reset_count, 0);
    }
}
