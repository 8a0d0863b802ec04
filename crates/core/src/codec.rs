// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Fixed-width, little-endian scalar encoding shared by host and target.
//!
//! Every scalar travels with an explicit width. A target whose native `int`
//! is 16 bits and a host whose native `int` is 32 bits still agree on the bit
//! pattern of a `u64`, because neither side ever uses its native width on the
//! wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{ty} expects {expected} bytes, got {actual}")]
    WidthMismatch {
        ty: WireType,
        expected: usize,
        actual: usize,
    },
    #[error("unknown wire type tag {0:#04x}")]
    UnknownTag(u8),
    #[error("expected a {expected} value, found {actual}")]
    TypeMismatch { expected: WireType, actual: WireType },
    #[error("invalid bool encoding {0:#04x}")]
    InvalidBool(u8),
    #[error("expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("payload truncated: {needed} more bytes needed")]
    Truncated { needed: usize },
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("unknown payload kind {0:#04x}")]
    UnknownKind(u8),
    #[error("unknown fault code {0:#04x}")]
    UnknownFault(u8),
}

/// A scalar type as declared on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl WireType {
    pub const ALL: [WireType; 11] = [
        WireType::Bool,
        WireType::U8,
        WireType::I8,
        WireType::U16,
        WireType::I16,
        WireType::U32,
        WireType::I32,
        WireType::U64,
        WireType::I64,
        WireType::F32,
        WireType::F64,
    ];

    pub const fn tag(self) -> u8 {
        match self {
            WireType::Bool => 0x01,
            WireType::U8 => 0x02,
            WireType::I8 => 0x03,
            WireType::U16 => 0x04,
            WireType::I16 => 0x05,
            WireType::U32 => 0x06,
            WireType::I32 => 0x07,
            WireType::U64 => 0x08,
            WireType::I64 => 0x09,
            WireType::F32 => 0x0A,
            WireType::F64 => 0x0B,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.tag() == tag)
            .ok_or(DecodeError::UnknownTag(tag))
    }

    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            WireType::Bool | WireType::U8 | WireType::I8 => 1,
            WireType::U16 | WireType::I16 => 2,
            WireType::U32 | WireType::I32 | WireType::F32 => 4,
            WireType::U64 | WireType::I64 | WireType::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, WireType::F32 | WireType::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            WireType::Bool => "bool",
            WireType::U8 => "u8",
            WireType::I8 => "i8",
            WireType::U16 => "u16",
            WireType::I16 => "i16",
            WireType::U32 => "u32",
            WireType::I32 => "i32",
            WireType::U64 => "u64",
            WireType::I64 => "i64",
            WireType::F32 => "f32",
            WireType::F64 => "f64",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WireType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let v = value.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == v)
            .ok_or_else(|| format!("unsupported wire type '{}'", value))
    }
}

/// A decoded scalar carrying its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Bool(_) => WireType::Bool,
            Value::U8(_) => WireType::U8,
            Value::I8(_) => WireType::I8,
            Value::U16(_) => WireType::U16,
            Value::I16(_) => WireType::I16,
            Value::U32(_) => WireType::U32,
            Value::I32(_) => WireType::I32,
            Value::U64(_) => WireType::U64,
            Value::I64(_) => WireType::I64,
            Value::F32(_) => WireType::F32,
            Value::F64(_) => WireType::F64,
        }
    }

    /// Appends the fixed-width little-endian encoding (no type tag).
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match *self {
            Value::Bool(v) => out.push(v as u8),
            Value::U8(v) => out.push(v),
            Value::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::F64(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        }
    }

    /// Two values are bit-identical when their types and encodings match.
    pub fn bits_eq(&self, other: &Value) -> bool {
        self.wire_type() == other.wire_type() && encode(self) == encode(other)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{:?}", v),
            Value::F64(v) => write!(f, "{:?}", v),
        }
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.wire_type().width());
    value.encode_into(&mut out);
    out
}

/// Decodes exactly one value of the declared type.
///
/// The byte count must equal the declared width; nothing is truncated or
/// sign-extended.
pub fn decode(bytes: &[u8], ty: WireType) -> Result<Value, DecodeError> {
    if bytes.len() != ty.width() {
        return Err(DecodeError::WidthMismatch {
            ty,
            expected: ty.width(),
            actual: bytes.len(),
        });
    }

    let value = match ty {
        WireType::Bool => match bytes[0] {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(DecodeError::InvalidBool(other)),
        },
        WireType::U8 => Value::U8(bytes[0]),
        WireType::I8 => Value::I8(i8::from_le_bytes([bytes[0]])),
        WireType::U16 => Value::U16(u16::from_le_bytes(fixed(bytes))),
        WireType::I16 => Value::I16(i16::from_le_bytes(fixed(bytes))),
        WireType::U32 => Value::U32(u32::from_le_bytes(fixed(bytes))),
        WireType::I32 => Value::I32(i32::from_le_bytes(fixed(bytes))),
        WireType::U64 => Value::U64(u64::from_le_bytes(fixed(bytes))),
        WireType::I64 => Value::I64(i64::from_le_bytes(fixed(bytes))),
        WireType::F32 => Value::F32(f32::from_bits(u32::from_le_bytes(fixed(bytes)))),
        WireType::F64 => Value::F64(f64::from_bits(u64::from_le_bytes(fixed(bytes)))),
    };
    Ok(value)
}

// Width was checked by the caller.
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// A Rust scalar with a fixed wire representation.
pub trait WireValue: Copy + fmt::Debug + Send + Sync + 'static {
    const TYPE: WireType;

    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Result<Self, DecodeError>;
}

macro_rules! wire_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl WireValue for $ty {
                const TYPE: WireType = WireType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self, DecodeError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(DecodeError::TypeMismatch {
                            expected: WireType::$variant,
                            actual: other.wire_type(),
                        }),
                    }
                }
            }
        )*
    };
}

wire_value! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// An ordered argument list, implemented for tuples of up to four scalars.
pub trait WireArgs: Copy + fmt::Debug + Send + Sync + 'static {
    fn signature() -> Vec<WireType>;
    fn into_values(self) -> Vec<Value>;
    fn from_values(values: &[Value]) -> Result<Self, DecodeError>;
}

macro_rules! wire_args {
    ($count:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: WireValue),*> WireArgs for ($($name,)*) {
            fn signature() -> Vec<WireType> {
                vec![$($name::TYPE),*]
            }

            fn into_values(self) -> Vec<Value> {
                vec![$(self.$idx.into_value()),*]
            }

            fn from_values(values: &[Value]) -> Result<Self, DecodeError> {
                if values.len() != $count {
                    return Err(DecodeError::ArityMismatch {
                        expected: $count,
                        actual: values.len(),
                    });
                }
                Ok(($($name::from_value(values[$idx])?,)*))
            }
        }
    };
}

wire_args!(0;);
wire_args!(1; A: 0);
wire_args!(2; A: 0, B: 1);
wire_args!(3; A: 0, B: 1, C: 2);
wire_args!(4; A: 0, B: 1, C: 2, D: 3);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths_are_platform_independent() {
        assert_eq!(encode(&Value::U64(1)).len(), 8);
        assert_eq!(encode(&Value::I16(-1)).len(), 2);
        assert_eq!(encode(&Value::Bool(true)).len(), 1);
        assert_eq!(encode(&Value::F32(1.5)).len(), 4);
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(encode(&Value::U32(0x1234_5678)), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(encode(&Value::I16(-2)), vec![0xFE, 0xFF]);
        assert_eq!(
            decode(&[0xB0, 0x13, 0, 0, 0, 0, 0, 0], WireType::U64).unwrap(),
            Value::U64(5040)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        let err = decode(&[0x01, 0x02, 0x03, 0x04], WireType::U64).unwrap_err();
        assert_eq!(
            err,
            DecodeError::WidthMismatch {
                ty: WireType::U64,
                expected: 8,
                actual: 4
            }
        );
    }

    #[test]
    fn test_negative_i8_is_not_sign_extended() {
        let bytes = encode(&Value::I8(-1));
        assert_eq!(bytes, vec![0xFF]);
        // The same byte read as u8 is 255, never a widened value.
        assert_eq!(decode(&bytes, WireType::U8).unwrap(), Value::U8(255));
    }

    #[test]
    fn test_bool_rejects_non_canonical_bytes() {
        assert_eq!(
            decode(&[2], WireType::Bool).unwrap_err(),
            DecodeError::InvalidBool(2)
        );
    }

    #[test]
    fn test_float_bits_are_preserved() {
        let nan = f32::from_bits(0x7FC0_0001);
        let decoded = decode(&encode(&Value::F32(nan)), WireType::F32).unwrap();
        match decoded {
            Value::F32(v) => assert_eq!(v.to_bits(), 0x7FC0_0001),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Value::F32(nan).bits_eq(&decoded));
        assert!(!Value::F64(0.0).bits_eq(&Value::F64(-0.0)));
    }

    #[test]
    fn test_tags_are_unique_and_resolvable() {
        for ty in WireType::ALL {
            assert_eq!(WireType::from_tag(ty.tag()).unwrap(), ty);
        }
        assert_eq!(
            WireType::from_tag(0x7F).unwrap_err(),
            DecodeError::UnknownTag(0x7F)
        );
    }

    #[test]
    fn test_wire_args_signature_and_arity() {
        assert_eq!(<(u64,)>::signature(), vec![WireType::U64]);
        assert_eq!(<(i16, u8)>::signature(), vec![WireType::I16, WireType::U8]);
        assert!(<()>::signature().is_empty());

        let args = <(i16, u8)>::from_values(&[Value::I16(-5), Value::U8(3)]).unwrap();
        assert_eq!(args, (-5, 3));

        let err = <(u64,)>::from_values(&[]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ArityMismatch {
                expected: 1,
                actual: 0
            }
        );

        let err = <(u64,)>::from_values(&[Value::U32(1)]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TypeMismatch {
                expected: WireType::U64,
                actual: WireType::U32
            }
        );
    }

    #[test]
    fn test_wire_type_from_str() {
        assert_eq!("U64".parse::<WireType>().unwrap(), WireType::U64);
        assert!("usize".parse::<WireType>().is_err());
    }
}
