// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The resident dispatcher that runs on the target.

use crate::codec::{Value, WireArgs, WireType, WireValue};
use crate::protocol::{
    self, Capabilities, FunctionId, InvocationRequest, RawValue, Request, RequestBody, Response,
    ResponseBody, Signature, TargetFault, TargetInfo, NO_SEQ,
};
use crate::transport::{FramedTransport, Link, TransportError, PROTOCOL_VERSION};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

type Handler = Box<dyn Fn(&[Value]) -> Result<Value, TargetFault> + Send + Sync>;

pub struct TargetEntry {
    pub signature: Signature,
    handler: Handler,
}

impl fmt::Debug for TargetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetEntry")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Function id to target implementation, as linked into a target image.
#[derive(Debug, Default)]
pub struct DispatchTable {
    entries: BTreeMap<FunctionId, TargetEntry>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A, R, F>(&mut self, id: FunctionId, name: &str, f: F) -> &mut Self
    where
        A: WireArgs,
        R: WireValue,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.register_fallible(id, name, move |args: A| Ok(f(args)))
    }

    /// Registers a target implementation that may fault (e.g. divide by zero).
    pub fn register_fallible<A, R, F>(&mut self, id: FunctionId, name: &str, f: F) -> &mut Self
    where
        A: WireArgs,
        R: WireValue,
        F: Fn(A) -> Result<R, TargetFault> + Send + Sync + 'static,
    {
        let handler = move |values: &[Value]| {
            let args = A::from_values(values).map_err(|_| TargetFault::SignatureMismatch)?;
            f(args).map(R::into_value)
        };
        self.register_raw(
            Signature {
                id,
                name: name.to_string(),
                args: A::signature(),
                ret: R::TYPE,
            },
            handler,
        )
    }

    /// Registers an untyped handler.
    ///
    /// The returned value is sent as-is under the declared return tag, so a
    /// handler that yields a narrower type than it declares produces exactly
    /// the malformed response a miscompiled target would.
    pub fn register_raw<F>(&mut self, signature: Signature, handler: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, TargetFault> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&signature.id) {
            warn!("Replacing target function #{}", signature.id);
        }
        self.entries.insert(
            signature.id,
            TargetEntry {
                signature,
                handler: Box::new(handler),
            },
        );
        self
    }

    pub fn get(&self, id: FunctionId) -> Option<&TargetEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &Signature> {
        self.entries.values().map(|e| &e.signature)
    }

    pub fn fingerprint(&self) -> protocol::Fingerprint {
        protocol::fingerprint(self.signatures())
    }
}

/// Static description of the device the stub runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDescriptor {
    pub name: String,
    pub frequency_hz: u32,
    pub int_bits: u8,
    #[serde(skip)]
    pub capabilities: Capabilities,
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self {
            name: "atmega328".to_string(),
            frequency_hz: 16_000_000,
            int_bits: 16,
            capabilities: Capabilities::RESET | Capabilities::FLOAT32 | Capabilities::DESCRIBE,
        }
    }
}

/// Reset bookkeeping, mirroring what the MCU reset hook tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Whether the initial power-on reset has happened.
    pub powered_on: bool,
    /// Resets after power-on.
    pub reset_count: u64,
}

impl Default for Status {
    fn default() -> Status {
        Status {
            powered_on: true,
            reset_count: 0,
        }
    }
}

impl Status {
    /// Whether the target has been reset *after* it was first started.
    pub fn has_reset(&self) -> bool {
        self.reset_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StubState {
    WaitForRequest,
    Decoding,
    Executing,
    EncodingResponse,
    Sending,
}

pub struct Stub {
    table: DispatchTable,
    descriptor: TargetDescriptor,
    state: StubState,
    status: Status,
    requests_served: u64,
    trace: Vec<StubState>,
    record_trace: bool,
}

impl Stub {
    pub fn new(table: DispatchTable, descriptor: TargetDescriptor) -> Self {
        Self {
            table,
            descriptor,
            state: StubState::WaitForRequest,
            status: Status::default(),
            requests_served: 0,
            trace: Vec::new(),
            record_trace: false,
        }
    }

    pub fn state(&self) -> StubState {
        self.state
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Keeps every state transition for inspection.
    pub fn set_record_trace(&mut self, enabled: bool) {
        self.record_trace = enabled;
        self.trace.clear();
    }

    pub fn trace(&self) -> &[StubState] {
        &self.trace
    }

    /// Marks a watchdog/brown-out style reset of the device.
    pub fn hardware_reset(&mut self) {
        self.status.reset_count += 1;
        self.state = StubState::WaitForRequest;
    }

    fn transition(&mut self, next: StubState) {
        debug!("stub: {:?} -> {:?}", self.state, next);
        self.state = next;
        if self.record_trace {
            self.trace.push(next);
        }
    }

    pub fn info(&self) -> TargetInfo {
        TargetInfo {
            protocol_version: PROTOCOL_VERSION,
            name: self.descriptor.name.clone(),
            frequency_hz: self.descriptor.frequency_hz,
            int_bits: self.descriptor.int_bits,
            capabilities: self.descriptor.capabilities,
            function_count: self.table.len() as u16,
            fingerprint: self.table.fingerprint(),
            reset_count: self.status.reset_count as u32,
        }
    }

    /// Processes one request payload and produces the response payload.
    ///
    /// Leaves the stub in `Sending`; the caller moves it back to
    /// `WaitForRequest` once the response is out.
    pub fn handle(&mut self, payload: &[u8]) -> Vec<u8> {
        self.transition(StubState::Decoding);
        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("stub: rejecting malformed request: {}", e);
                let seq = protocol::peek_seq(payload);
                return self.respond(seq, ResponseBody::Fault(TargetFault::MalformedRequest));
            }
        };

        let seq = request.seq;
        let body = match request.body {
            RequestBody::Hello => ResponseBody::HelloAck(self.info()),
            RequestBody::Reset => {
                if self.descriptor.capabilities.contains(Capabilities::RESET) {
                    self.status.reset_count += 1;
                    ResponseBody::ResetAck {
                        reset_count: self.status.reset_count as u32,
                    }
                } else {
                    ResponseBody::Fault(TargetFault::Unsupported)
                }
            }
            RequestBody::Describe(id) => {
                if !self.descriptor.capabilities.contains(Capabilities::DESCRIBE) {
                    ResponseBody::Fault(TargetFault::Unsupported)
                } else {
                    match self.table.get(id) {
                        Some(entry) => ResponseBody::Signature(entry.signature.clone()),
                        None => ResponseBody::Fault(TargetFault::UnknownFunction),
                    }
                }
            }
            RequestBody::Invoke(req) => self.invoke(req),
        };
        self.respond(seq, body)
    }

    fn invoke(&mut self, req: InvocationRequest) -> ResponseBody {
        let Some(entry) = self.table.get(req.function) else {
            warn!("stub: unknown function #{}", req.function);
            return ResponseBody::Fault(TargetFault::UnknownFunction);
        };

        let arg_types: Vec<WireType> = req.args.iter().map(|a| a.wire_type()).collect();
        if arg_types != entry.signature.args {
            warn!(
                "stub: {} called with {:?}, expects {:?}",
                entry.signature.name, arg_types, entry.signature.args
            );
            return ResponseBody::Fault(TargetFault::SignatureMismatch);
        }

        let declared = entry.signature.ret;
        self.transition(StubState::Executing);
        let result = match self.table.get(req.function) {
            Some(entry) => (entry.handler)(&req.args),
            None => Err(TargetFault::UnknownFunction),
        };

        self.transition(StubState::EncodingResponse);
        match result {
            Ok(value) => ResponseBody::Result(RawValue {
                tag: declared.tag(),
                bytes: crate::codec::encode(&value),
            }),
            Err(fault) => ResponseBody::Fault(fault),
        }
    }

    fn respond(&mut self, seq: u16, body: ResponseBody) -> Vec<u8> {
        if self.state != StubState::EncodingResponse {
            self.transition(StubState::EncodingResponse);
        }
        let payload = Response { seq, body }.encode();
        self.transition(StubState::Sending);
        self.requests_served += 1;
        payload
    }

    /// Serves at most one request. Returns `Ok(false)` when nothing arrived
    /// within `idle`.
    pub fn serve_one<L: Link>(
        &mut self,
        transport: &mut FramedTransport<L>,
        idle: Duration,
    ) -> Result<bool, TransportError> {
        let payload = match transport.receive(idle) {
            Ok(payload) => payload,
            Err(TransportError::Timeout) => return Ok(false),
            Err(
                e @ (TransportError::ChecksumMismatch { .. }
                | TransportError::VersionMismatch { .. }
                | TransportError::FrameTooLarge { .. }),
            ) => {
                // The request could not be read at all; say so instead of going quiet.
                warn!("stub: bad frame: {}", e);
                let reply = self.respond(
                    NO_SEQ,
                    ResponseBody::Fault(TargetFault::MalformedRequest),
                );
                let sent = transport.send(&reply);
                // One fault per damaged frame; its tail is not a request.
                transport.discard_pending();
                self.transition(StubState::WaitForRequest);
                sent?;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let reply = self.handle(&payload);
        let sent = transport.send(&reply);
        self.transition(StubState::WaitForRequest);
        sent?;
        Ok(true)
    }
}
