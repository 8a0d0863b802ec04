// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Request/response payloads carried inside frames.
//!
//! Every payload starts with `kind: u8 | seq: u16 LE`. Responses echo the
//! sequence number of the request they answer; [`NO_SEQ`] marks a failure the
//! stub could not attribute to a request (e.g. a frame it could not parse).

use crate::codec::{self, DecodeError, Value, WireType};
use bitflags::bitflags;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

pub type FunctionId = u16;
pub type Fingerprint = [u8; 8];

pub const NO_SEQ: u16 = 0xFFFF;

const KIND_HELLO: u8 = 0x01;
const KIND_INVOKE: u8 = 0x02;
const KIND_RESET: u8 = 0x03;
const KIND_DESCRIBE: u8 = 0x04;
const KIND_HELLO_ACK: u8 = 0x81;
const KIND_RESULT: u8 = 0x82;
const KIND_RESET_ACK: u8 = 0x83;
const KIND_SIGNATURE: u8 = 0x84;
const KIND_FAULT: u8 = 0xFF;

bitflags! {
    /// Features the resident stub advertises in its hello.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        /// The stub accepts `Reset` requests.
        const RESET = 0b0000_0001;
        /// `f32` is a native IEEE-754 single.
        const FLOAT32 = 0b0000_0010;
        /// `f64` is a native IEEE-754 double (avr-gcc often maps double to 32 bits).
        const FLOAT64 = 0b0000_0100;
        /// The stub answers `Describe` requests.
        const DESCRIBE = 0b0000_1000;
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

/// Reasons a stub refuses or fails a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum TargetFault {
    #[error("unknown function id")]
    UnknownFunction,
    #[error("argument types do not match the registered signature")]
    SignatureMismatch,
    #[error("malformed request")]
    MalformedRequest,
    #[error("request not supported by this stub")]
    Unsupported,
    #[error("function faulted during execution")]
    ExecutionFault,
}

impl TargetFault {
    pub const fn code(self) -> u8 {
        match self {
            TargetFault::UnknownFunction => 0x01,
            TargetFault::SignatureMismatch => 0x02,
            TargetFault::MalformedRequest => 0x03,
            TargetFault::Unsupported => 0x04,
            TargetFault::ExecutionFault => 0x05,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0x01 => Ok(TargetFault::UnknownFunction),
            0x02 => Ok(TargetFault::SignatureMismatch),
            0x03 => Ok(TargetFault::MalformedRequest),
            0x04 => Ok(TargetFault::Unsupported),
            0x05 => Ok(TargetFault::ExecutionFault),
            other => Err(DecodeError::UnknownFault(other)),
        }
    }
}

/// The declared shape of a function known to both builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub id: FunctionId,
    pub name: String,
    pub args: Vec<WireType>,
    pub ret: WireType,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&str> = self.args.iter().map(|a| a.name()).collect();
        write!(
            f,
            "#{} {}({}) -> {}",
            self.id,
            self.name,
            args.join(", "),
            self.ret
        )
    }
}

/// Digest over a set of signatures, independent of registration order.
pub fn fingerprint<'a, I>(signatures: I) -> Fingerprint
where
    I: IntoIterator<Item = &'a Signature>,
{
    let mut sigs: Vec<&Signature> = signatures.into_iter().collect();
    sigs.sort_by_key(|s| s.id);

    let mut hasher = Sha256::new();
    hasher.update([crate::transport::PROTOCOL_VERSION]);
    for sig in sigs {
        hasher.update(sig.id.to_le_bytes());
        hasher.update([sig.name.len() as u8]);
        hasher.update(sig.name.as_bytes());
        hasher.update([sig.args.len() as u8]);
        hasher.update(sig.args.iter().map(|a| a.tag()).collect::<Vec<_>>());
        hasher.update([sig.ret.tag()]);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn fingerprint_hex(fp: &Fingerprint) -> String {
    fp.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Identity of the target as reported by its stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    pub protocol_version: u8,
    pub name: String,
    pub frequency_hz: u32,
    /// Width of the target's native `int`.
    pub int_bits: u8,
    pub capabilities: Capabilities,
    pub function_count: u16,
    #[serde(serialize_with = "serialize_fingerprint")]
    pub fingerprint: Fingerprint,
    pub reset_count: u32,
}

fn serialize_fingerprint<S: serde::Serializer>(
    fp: &Fingerprint,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&fingerprint_hex(fp))
}

/// A return value as received, before it is checked against the declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub tag: u8,
    pub bytes: Vec<u8>,
}

impl RawValue {
    pub fn from_value(value: &Value) -> Self {
        Self {
            tag: value.wire_type().tag(),
            bytes: codec::encode(value),
        }
    }

    /// Checks tag and width against `declared` and decodes.
    pub fn decode(&self, declared: WireType) -> Result<Value, DecodeError> {
        let actual = WireType::from_tag(self.tag)?;
        if actual != declared {
            return Err(DecodeError::TypeMismatch {
                expected: declared,
                actual,
            });
        }
        codec::decode(&self.bytes, declared)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub function: FunctionId,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Hello,
    Invoke(InvocationRequest),
    Reset,
    Describe(FunctionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub seq: u16,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    HelloAck(TargetInfo),
    Result(RawValue),
    ResetAck { reset_count: u32 },
    Signature(Signature),
    Fault(TargetFault),
}

impl ResponseBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResponseBody::HelloAck(_) => "hello_ack",
            ResponseBody::Result(_) => "result",
            ResponseBody::ResetAck { .. } => "reset_ack",
            ResponseBody::Signature(_) => "signature",
            ResponseBody::Fault(_) => "fault",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub seq: u16,
    pub body: ResponseBody,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.bytes.len() - self.pos;
        if available < n {
            return Err(DecodeError::Truncated {
                needed: n - available,
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn wire_type(&mut self) -> Result<WireType, DecodeError> {
        WireType::from_tag(self.u8()?)
    }

    fn finish(self) -> Result<(), DecodeError> {
        let rest = self.bytes.len() - self.pos;
        if rest > 0 {
            return Err(DecodeError::TrailingBytes(rest));
        }
        Ok(())
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(u8::MAX as usize)];
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let kind = match self.body {
            RequestBody::Hello => KIND_HELLO,
            RequestBody::Invoke(_) => KIND_INVOKE,
            RequestBody::Reset => KIND_RESET,
            RequestBody::Describe(_) => KIND_DESCRIBE,
        };
        out.push(kind);
        out.extend_from_slice(&self.seq.to_le_bytes());

        match &self.body {
            RequestBody::Hello | RequestBody::Reset => {}
            RequestBody::Describe(id) => out.extend_from_slice(&id.to_le_bytes()),
            RequestBody::Invoke(req) => {
                out.extend_from_slice(&req.function.to_le_bytes());
                out.push(req.args.len() as u8);
                for arg in &req.args {
                    out.push(arg.wire_type().tag());
                    arg.encode_into(&mut out);
                }
            }
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let kind = r.u8()?;
        let seq = r.u16()?;
        let body = match kind {
            KIND_HELLO => RequestBody::Hello,
            KIND_RESET => RequestBody::Reset,
            KIND_DESCRIBE => RequestBody::Describe(r.u16()?),
            KIND_INVOKE => {
                let function = r.u16()?;
                let argc = r.u8()? as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    let ty = r.wire_type()?;
                    args.push(codec::decode(r.take(ty.width())?, ty)?);
                }
                RequestBody::Invoke(InvocationRequest { function, args })
            }
            other => return Err(DecodeError::UnknownKind(other)),
        };
        r.finish()?;
        Ok(Request { seq, body })
    }
}

/// Best-effort sequence number of a payload that failed to decode.
pub fn peek_seq(payload: &[u8]) -> u16 {
    if payload.len() >= 3 {
        u16::from_le_bytes([payload[1], payload[2]])
    } else {
        NO_SEQ
    }
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let kind = match self.body {
            ResponseBody::HelloAck(_) => KIND_HELLO_ACK,
            ResponseBody::Result(_) => KIND_RESULT,
            ResponseBody::ResetAck { .. } => KIND_RESET_ACK,
            ResponseBody::Signature(_) => KIND_SIGNATURE,
            ResponseBody::Fault(_) => KIND_FAULT,
        };
        out.push(kind);
        out.extend_from_slice(&self.seq.to_le_bytes());

        match &self.body {
            ResponseBody::HelloAck(info) => {
                out.push(info.protocol_version);
                put_string(&mut out, &info.name);
                out.extend_from_slice(&info.frequency_hz.to_le_bytes());
                out.push(info.int_bits);
                out.push(info.capabilities.bits());
                out.extend_from_slice(&info.function_count.to_le_bytes());
                out.extend_from_slice(&info.fingerprint);
                out.extend_from_slice(&info.reset_count.to_le_bytes());
            }
            ResponseBody::Result(raw) => {
                out.push(raw.tag);
                out.push(raw.bytes.len() as u8);
                out.extend_from_slice(&raw.bytes);
            }
            ResponseBody::ResetAck { reset_count } => {
                out.extend_from_slice(&reset_count.to_le_bytes());
            }
            ResponseBody::Signature(sig) => {
                out.extend_from_slice(&sig.id.to_le_bytes());
                put_string(&mut out, &sig.name);
                out.push(sig.args.len() as u8);
                out.extend(sig.args.iter().map(|a| a.tag()));
                out.push(sig.ret.tag());
            }
            ResponseBody::Fault(fault) => out.push(fault.code()),
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let kind = r.u8()?;
        let seq = r.u16()?;
        let body = match kind {
            KIND_HELLO_ACK => {
                let protocol_version = r.u8()?;
                let name = r.string()?;
                let frequency_hz = r.u32()?;
                let int_bits = r.u8()?;
                let capabilities = Capabilities::from_bits_truncate(r.u8()?);
                let function_count = r.u16()?;
                let mut fingerprint = [0u8; 8];
                fingerprint.copy_from_slice(r.take(8)?);
                let reset_count = r.u32()?;
                ResponseBody::HelloAck(TargetInfo {
                    protocol_version,
                    name,
                    frequency_hz,
                    int_bits,
                    capabilities,
                    function_count,
                    fingerprint,
                    reset_count,
                })
            }
            KIND_RESULT => {
                let tag = r.u8()?;
                let len = r.u8()? as usize;
                let bytes = r.take(len)?.to_vec();
                ResponseBody::Result(RawValue { tag, bytes })
            }
            KIND_RESET_ACK => ResponseBody::ResetAck {
                reset_count: r.u32()?,
            },
            KIND_SIGNATURE => {
                let id = r.u16()?;
                let name = r.string()?;
                let argc = r.u8()? as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(r.wire_type()?);
                }
                let ret = r.wire_type()?;
                ResponseBody::Signature(Signature {
                    id,
                    name,
                    args,
                    ret,
                })
            }
            KIND_FAULT => ResponseBody::Fault(TargetFault::from_code(r.u8()?)?),
            other => return Err(DecodeError::UnknownKind(other)),
        };
        r.finish()?;
        Ok(Response { seq, body })
    }
}
