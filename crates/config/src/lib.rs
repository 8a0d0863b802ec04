// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0";

/// Smallest frame payload a run may configure; fits any single request.
pub const MIN_FRAME_BYTES: u64 = 64;
/// The frame length field is a `u16`.
pub const MAX_FRAME_BYTES: u64 = u16::MAX as u64;

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "native".to_string()
}

fn default_call_timeout_ms() -> u64 {
    1000
}

fn default_handshake_timeout_ms() -> u64 {
    2000
}

fn default_max_frame() -> String {
    "256B".to_string()
}

/// How two floating-point results are judged equal.
///
/// Integers and `bool` are always compared bit-for-bit regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComparePolicy {
    #[default]
    Exact,
    Tolerance {
        #[serde(default)]
        abs: f64,
        #[serde(default)]
        rel: f64,
    },
}

impl ComparePolicy {
    pub fn validate(&self) -> Result<()> {
        if let ComparePolicy::Tolerance { abs, rel } = *self {
            if !abs.is_finite() || abs < 0.0 {
                anyhow::bail!("Tolerance 'abs' must be a finite, non-negative number");
            }
            if !rel.is_finite() || rel < 0.0 {
                anyhow::bail!("Tolerance 'rel' must be a finite, non-negative number");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Stub on an in-process thread.
    #[default]
    Sim,
    /// Stub reachable over TCP (`avrlit serve` or a UART bridge).
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub address: Option<String>,
    /// Arithmetic model of the simulated target image.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: TargetKind::Sim,
            address: None,
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunLimits {
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Largest frame payload, as a human size ("256B", "1KB").
    #[serde(default = "default_max_frame")]
    pub max_frame: String,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_frame: default_max_frame(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ComparisonConfig {
    /// Default policy for float-returning functions.
    #[serde(default)]
    pub float: ComparePolicy,
    /// Per-function policies keyed by function name.
    #[serde(default)]
    pub overrides: BTreeMap<String, ComparePolicy>,
}

impl ComparisonConfig {
    pub fn policy_for(&self, function: &str) -> ComparePolicy {
        self.overrides.get(function).copied().unwrap_or(self.float)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub limits: RunLimits,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    /// Send `Reset` to the target after a call times out.
    #[serde(default = "default_true")]
    pub reset_on_timeout: bool,
    /// Check each function's signature against the target before its first call.
    #[serde(default = "default_true")]
    pub verify_signatures: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            target: TargetConfig::default(),
            limits: RunLimits::default(),
            comparison: ComparisonConfig::default(),
            reset_on_timeout: true,
            verify_signatures: true,
        }
    }
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run config at {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Failed to parse Run Config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        if self.limits.call_timeout_ms == 0 {
            anyhow::bail!("Limit 'call_timeout_ms' must be greater than zero");
        }
        if self.limits.handshake_timeout_ms == 0 {
            anyhow::bail!("Limit 'handshake_timeout_ms' must be greater than zero");
        }

        self.max_frame_bytes()?;

        if self.target.kind == TargetKind::Tcp {
            match self.target.address.as_deref() {
                Some(addr) if !addr.trim().is_empty() => {}
                _ => anyhow::bail!("Target 'address' is required when kind is 'tcp'"),
            }
        }

        if self.target.model.trim().is_empty() {
            anyhow::bail!("Target 'model' cannot be empty");
        }

        self.comparison
            .float
            .validate()
            .context("Invalid comparison.float policy")?;
        for (name, policy) in &self.comparison.overrides {
            policy
                .validate()
                .with_context(|| format!("Invalid comparison override for '{}'", name))?;
        }

        Ok(())
    }

    pub fn max_frame_bytes(&self) -> Result<usize> {
        let bytes = parse_size(&self.limits.max_frame)
            .with_context(|| format!("Invalid limit 'max_frame': {}", self.limits.max_frame))?;
        if !(MIN_FRAME_BYTES..=MAX_FRAME_BYTES).contains(&bytes) {
            anyhow::bail!(
                "Limit 'max_frame' must be between {} and {} bytes, got {}",
                MIN_FRAME_BYTES,
                MAX_FRAME_BYTES,
                bytes
            );
        }
        Ok(bytes as usize)
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
