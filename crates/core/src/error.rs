// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::codec::DecodeError;
use crate::protocol::{Signature, TargetFault};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Run-level failure classes, kept apart from value mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transport,
    Timeout,
    Decode,
    TargetFault,
    /// Host and target builds disagree about a function or the protocol.
    Contract,
}

impl ErrorClass {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Transport => "transport error",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Decode => "decode error",
            ErrorClass::TargetFault => "target fault",
            ErrorClass::Contract => "contract violation",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("transport error: {0}")]
    Transport(TransportError),
    #[error("target did not respond within {0:?}")]
    Timeout(Duration),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("target fault: {0}")]
    TargetFault(TargetFault),
    #[error("unexpected {actual} response to a {expected} request")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("signature mismatch: host declares `{host}`, target has `{target}`")]
    SignatureMismatch { host: Signature, target: Signature },
    #[error("target speaks protocol v{target}, host speaks v{host}")]
    ProtocolMismatch { host: u8, target: u8 },
    #[error("target image fingerprint {target} does not match host catalog {host}")]
    FingerprintMismatch { host: String, target: String },
}

impl HarnessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HarnessError::Transport(_) => ErrorClass::Transport,
            HarnessError::Timeout(_) => ErrorClass::Timeout,
            HarnessError::Decode(_) => ErrorClass::Decode,
            HarnessError::TargetFault(_) => ErrorClass::TargetFault,
            HarnessError::UnexpectedResponse { .. } => ErrorClass::Decode,
            HarnessError::SignatureMismatch { .. }
            | HarnessError::ProtocolMismatch { .. }
            | HarnessError::FingerprintMismatch { .. } => ErrorClass::Contract,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout(_))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
