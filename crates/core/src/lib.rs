// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod codec;
pub mod error;
pub mod harness;
pub mod host;
pub mod protocol;
pub mod report;
pub mod session;
pub mod stub;
pub mod target;
pub mod transport;

pub use avrlit_config::ComparePolicy;
pub use codec::{DecodeError, Value, WireArgs, WireType, WireValue};
pub use error::{ErrorClass, HarnessError, HarnessResult};
pub use harness::{Harness, HarnessOptions, TestCase};
pub use host::{HostExecutor, TargetFn};
pub use protocol::{Capabilities, FunctionId, Signature, TargetFault, TargetInfo};
pub use report::{compare, CaseRecord, Outcome, Reporter, Summary};
pub use session::{Session, SessionOptions};
pub use stub::{DispatchTable, Stub, TargetDescriptor};
pub use target::{McuState, SimTarget, TargetSnapshot};
pub use transport::{ChannelLink, FaultHandle, FaultyLink, Link, TcpLink, TransportError};
