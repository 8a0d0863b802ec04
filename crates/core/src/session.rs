// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Host side of the link: one request in flight, bounded waits.

use crate::codec::Value;
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::{
    FunctionId, InvocationRequest, RawValue, Request, RequestBody, Response, ResponseBody,
    Signature, TargetInfo, NO_SEQ,
};
use crate::transport::{FramedTransport, Link, TransportError, PROTOCOL_VERSION};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_payload: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_millis(2000),
            max_payload: crate::transport::frame::DEFAULT_MAX_PAYLOAD,
        }
    }
}

pub struct Session<L: Link> {
    transport: FramedTransport<L>,
    options: SessionOptions,
    next_seq: u16,
    stale_frames: u64,
}

impl<L: Link> Session<L> {
    pub fn new(link: L, options: SessionOptions) -> Self {
        Self {
            transport: FramedTransport::with_max_payload(link, options.max_payload),
            options,
            next_seq: 0,
            stale_frames: 0,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Responses that arrived for calls already abandoned.
    pub fn stale_frames(&self) -> u64 {
        self.stale_frames
    }

    fn alloc_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        if self.next_seq == NO_SEQ {
            self.next_seq = 0;
        }
        seq
    }

    fn exchange(&mut self, body: RequestBody, timeout: Duration) -> HarnessResult<ResponseBody> {
        let seq = self.alloc_seq();
        let payload = Request { seq, body }.encode();
        self.transport
            .send(&payload)
            .map_err(|e| map_transport(e, timeout))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HarnessError::Timeout(timeout));
            }
            let payload = match self.transport.receive(remaining) {
                Ok(payload) => payload,
                Err(e) => {
                    // The rest of a damaged frame must not leak into the next call.
                    if !e.is_timeout() {
                        self.transport.discard_pending();
                    }
                    return Err(map_transport(e, timeout));
                }
            };
            let response = Response::decode(&payload)?;

            if response.seq == seq {
                debug!("seq {} answered with {}", seq, response.body.kind_name());
                return Ok(response.body);
            }
            if response.seq == NO_SEQ {
                // A reply already queued for this seq wins over an unattributed fault.
                if let Some(body) = self.take_buffered(seq) {
                    return Ok(body);
                }
                debug!("seq {} answered with unsequenced {}", seq, response.body.kind_name());
                return Ok(response.body);
            }

            self.discard_stale(seq, &response);
        }
    }

    fn take_buffered(&mut self, seq: u16) -> Option<ResponseBody> {
        while let Some(payload) = self.transport.next_buffered() {
            match Response::decode(&payload) {
                Ok(response) if response.seq == seq => return Some(response.body),
                Ok(response) => self.discard_stale(seq, &response),
                Err(e) => warn!("Dropping undecodable buffered frame: {}", e),
            }
        }
        None
    }

    fn discard_stale(&mut self, seq: u16, response: &Response) {
        self.stale_frames += 1;
        warn!(
            "Discarding stale {} for seq {} while waiting for seq {}",
            response.body.kind_name(),
            response.seq,
            seq
        );
    }

    pub fn handshake(&mut self) -> HarnessResult<TargetInfo> {
        let timeout = self.options.handshake_timeout;
        match self.exchange(RequestBody::Hello, timeout)? {
            ResponseBody::HelloAck(info) => {
                if info.protocol_version != PROTOCOL_VERSION {
                    return Err(HarnessError::ProtocolMismatch {
                        host: PROTOCOL_VERSION,
                        target: info.protocol_version,
                    });
                }
                Ok(info)
            }
            other => Err(unexpected("hello", other)),
        }
    }

    pub fn invoke(&mut self, function: FunctionId, args: Vec<Value>) -> HarnessResult<RawValue> {
        let timeout = self.options.call_timeout;
        let body = RequestBody::Invoke(InvocationRequest { function, args });
        match self.exchange(body, timeout)? {
            ResponseBody::Result(raw) => Ok(raw),
            other => Err(unexpected("invoke", other)),
        }
    }

    pub fn describe(&mut self, function: FunctionId) -> HarnessResult<Signature> {
        let timeout = self.options.call_timeout;
        match self.exchange(RequestBody::Describe(function), timeout)? {
            ResponseBody::Signature(sig) => Ok(sig),
            other => Err(unexpected("describe", other)),
        }
    }

    /// Asks the stub to reset; returns the target's reset count.
    pub fn reset(&mut self) -> HarnessResult<u32> {
        let timeout = self.options.call_timeout;
        let result = match self.exchange(RequestBody::Reset, timeout)? {
            ResponseBody::ResetAck { reset_count } => Ok(reset_count),
            other => Err(unexpected("reset", other)),
        };
        self.transport.discard_pending();
        result
    }

    pub fn into_link(self) -> L {
        self.transport.into_link()
    }
}

fn unexpected(expected: &'static str, body: ResponseBody) -> HarnessError {
    match body {
        ResponseBody::Fault(fault) => HarnessError::TargetFault(fault),
        other => HarnessError::UnexpectedResponse {
            expected,
            actual: other.kind_name(),
        },
    }
}

fn map_transport(err: TransportError, timeout: Duration) -> HarnessError {
    match err {
        TransportError::Timeout => HarnessError::Timeout(timeout),
        other => HarnessError::Transport(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireType;
    use crate::stub::{DispatchTable, Stub, TargetDescriptor};
    use crate::target::SimTarget;
    use crate::transport::{ChannelLink, FaultyLink};

    fn spawn() -> (SimTarget, ChannelLink) {
        let mut table = DispatchTable::new();
        table.register(3, "neg", |(x,): (i32,)| x.wrapping_neg());
        SimTarget::spawn(Stub::new(table, TargetDescriptor::default()))
    }

    fn fast() -> SessionOptions {
        SessionOptions {
            call_timeout: Duration::from_millis(150),
            ..SessionOptions::default()
        }
    }

    #[test]
    fn test_handshake_reports_target_info() {
        let (_target, link) = spawn();
        let mut session = Session::new(link, fast());
        let info = session.handshake().unwrap();
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);
        assert_eq!(info.function_count, 1);
    }

    #[test]
    fn test_invoke_and_describe() {
        let (_target, link) = spawn();
        let mut session = Session::new(link, fast());
        let raw = session.invoke(3, vec![Value::I32(5)]).unwrap();
        assert_eq!(raw.decode(WireType::I32).unwrap(), Value::I32(-5));

        let sig = session.describe(3).unwrap();
        assert_eq!(sig.name, "neg");
        assert!(matches!(
            session.describe(4),
            Err(HarnessError::TargetFault(_))
        ));
    }

    #[test]
    fn test_dropped_response_times_out_and_late_frame_is_discarded() {
        let (_target, link) = spawn();
        let (link, faults) = FaultyLink::new(link);
        let mut session = Session::new(link, fast());

        faults.drop_next_outbound(1);
        let err = session.invoke(3, vec![Value::I32(1)]).unwrap_err();
        assert!(err.is_timeout());

        let raw = session.invoke(3, vec![Value::I32(2)]).unwrap();
        assert_eq!(raw.decode(WireType::I32).unwrap(), Value::I32(-2));
    }

    #[test]
    fn test_stale_response_is_skipped() {
        let (_target, link) = spawn();
        let (link, faults) = FaultyLink::new(link);
        let mut session = Session::new(link, fast());

        let stale = Response {
            seq: 0x4000,
            body: ResponseBody::Result(RawValue::from_value(&Value::I32(77))),
        }
        .encode();
        faults.inject_inbound(crate::transport::frame::encode_frame(&stale).unwrap());

        let raw = session.invoke(3, vec![Value::I32(9)]).unwrap();
        assert_eq!(raw.decode(WireType::I32).unwrap(), Value::I32(-9));
        assert_eq!(session.stale_frames(), 1);
    }

    fn frame(response: Response) -> Vec<u8> {
        crate::transport::frame::encode_frame(&response.encode()).unwrap()
    }

    #[test]
    fn test_handshake_rejects_other_protocol_version() {
        let (host, mut target) = ChannelLink::pair();
        let info = TargetInfo {
            protocol_version: PROTOCOL_VERSION + 1,
            name: "atmega328".to_string(),
            frequency_hz: 16_000_000,
            int_bits: 16,
            capabilities: crate::protocol::Capabilities::RESET,
            function_count: 0,
            fingerprint: [0; 8],
            reset_count: 0,
        };
        target
            .write_all(&frame(Response {
                seq: 0,
                body: ResponseBody::HelloAck(info),
            }))
            .unwrap();

        let mut session = Session::new(host, fast());
        let err = session.handshake().unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ProtocolMismatch { host: 1, target: 2 }
        ));
        assert_eq!(err.class(), crate::error::ErrorClass::Contract);
    }

    #[test]
    fn test_queued_reply_wins_over_unsequenced_fault() {
        let (host, mut target) = ChannelLink::pair();
        let mut chunk = frame(Response {
            seq: NO_SEQ,
            body: ResponseBody::Fault(crate::protocol::TargetFault::MalformedRequest),
        });
        chunk.extend(frame(Response {
            seq: 0,
            body: ResponseBody::Result(RawValue::from_value(&Value::I32(-4))),
        }));
        target.write_all(&chunk).unwrap();

        let mut session = Session::new(host, fast());
        let raw = session.invoke(3, vec![Value::I32(4)]).unwrap();
        assert_eq!(raw.decode(WireType::I32).unwrap(), Value::I32(-4));
    }
}
