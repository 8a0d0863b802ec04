// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Comparison of host and target results, and the per-run tally.

use crate::codec::Value;
use crate::error::ErrorClass;
use avrlit_config::ComparePolicy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use tracing::{error, info, warn};

pub const EXIT_PASS: u8 = 0;
pub const EXIT_ASSERT_FAIL: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail { expected: Value, actual: Value },
    Error { class: ErrorClass, message: String },
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Outcome::Fail { .. })
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Outcome::Error { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub fn verdict(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail { .. } => "FAIL",
            Outcome::Error { .. } => "ERROR",
        }
    }
}

/// Judges a target result against the host oracle.
///
/// Integers and `bool` must match bit-for-bit. Floats follow `policy`; under
/// `Tolerance` two NaNs are equal and infinities must match exactly.
pub fn compare(expected: &Value, actual: &Value, policy: ComparePolicy) -> Outcome {
    let equal = match (expected.as_f64(), actual.as_f64()) {
        (Some(e), Some(a)) if expected.wire_type() == actual.wire_type() => match policy {
            ComparePolicy::Exact => expected.bits_eq(actual),
            ComparePolicy::Tolerance { abs, rel } => within_tolerance(e, a, abs, rel),
        },
        _ => expected.bits_eq(actual),
    };

    if equal {
        Outcome::Pass
    } else {
        Outcome::Fail {
            expected: *expected,
            actual: *actual,
        }
    }
}

fn within_tolerance(expected: f64, actual: f64, abs: f64, rel: f64) -> bool {
    if expected.is_nan() || actual.is_nan() {
        return expected.is_nan() && actual.is_nan();
    }
    if expected.is_infinite() || actual.is_infinite() {
        return expected == actual;
    }
    let diff = (expected - actual).abs();
    diff <= abs || diff <= rel * expected.abs().max(actual.abs())
}

/// One resolved `call`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRecord {
    pub function: String,
    pub input: String,
    pub expected: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub outcome: Outcome,
    pub duration_us: u64,
}

impl fmt::Display for CaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}): expected {}, actual ",
            self.function, self.input, self.expected
        )?;
        match &self.actual {
            Some(actual) => write!(f, "{}", actual)?,
            None => write!(f, "-")?,
        }
        write!(f, " ... {}", self.outcome.verdict())?;
        if let Outcome::Error { class, message } = &self.outcome {
            write!(f, " ({}: {})", class.label(), message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub errors_by_class: BTreeMap<ErrorClass, usize>,
}

impl Summary {
    pub fn from_records(records: &[CaseRecord]) -> Self {
        let mut summary = Summary::default();
        for record in records {
            summary.add(&record.outcome);
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// A value mismatch outranks run-level errors.
    pub fn exit_code(&self) -> u8 {
        if self.failed > 0 {
            EXIT_ASSERT_FAIL
        } else if self.errors > 0 {
            EXIT_RUNTIME_ERROR
        } else {
            EXIT_PASS
        }
    }

    pub fn status(&self) -> &'static str {
        if self.is_success() {
            "pass"
        } else if self.failed > 0 {
            "fail"
        } else {
            "error"
        }
    }

    fn add(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail { .. } => self.failed += 1,
            Outcome::Error { class, .. } => {
                self.errors += 1;
                *self.errors_by_class.entry(*class).or_insert(0) += 1;
            }
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cases: {} passed, {} failed, {} errors",
            self.total, self.passed, self.failed, self.errors
        )
    }
}

/// Append-only tally of every case in a run.
#[derive(Default)]
pub struct Reporter {
    records: Vec<CaseRecord>,
    summary: Summary,
    sink: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("records", &self.records.len())
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also writes each case line to `sink` (e.g. stdout or a log file).
    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    pub fn record(&mut self, record: CaseRecord) {
        match &record.outcome {
            Outcome::Pass => info!("{}", record),
            Outcome::Fail { .. } => warn!("{}", record),
            Outcome::Error { .. } => error!("{}", record),
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = writeln!(sink, "{}", record) {
                warn!("Failed to write case line: {}", e);
                self.sink = None;
            }
        }

        self.summary.add(&record.outcome);
        self.records.push(record);
    }

    pub fn records(&self) -> &[CaseRecord] {
        &self.records
    }

    pub fn summary(&self) -> Summary {
        self.summary.clone()
    }

    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn record(outcome: Outcome) -> CaseRecord {
        CaseRecord {
            function: "factorial".to_string(),
            input: "5".to_string(),
            expected: Value::U64(120),
            actual: Some(Value::U64(120)),
            outcome,
            duration_us: 0,
        }
    }

    #[test]
    fn test_integers_compare_bitwise() {
        let policy = ComparePolicy::Tolerance { abs: 10.0, rel: 1.0 };
        assert!(compare(&Value::U64(120), &Value::U64(120), policy).is_pass());
        assert!(compare(&Value::U64(120), &Value::U64(121), policy).is_fail());
        assert!(compare(&Value::I16(-1), &Value::U16(0xFFFF), policy).is_fail());
        assert!(compare(&Value::Bool(true), &Value::Bool(true), policy).is_pass());
    }

    #[test]
    fn test_exact_float_policy_uses_bits() {
        let exact = ComparePolicy::Exact;
        assert!(compare(&Value::F32(1.5), &Value::F32(1.5), exact).is_pass());
        assert!(compare(&Value::F32(0.0), &Value::F32(-0.0), exact).is_fail());
        assert!(compare(&Value::F64(f64::NAN), &Value::F64(f64::NAN), exact).is_pass());
        assert!(compare(&Value::F32(1.0), &Value::F32(1.0 + f32::EPSILON), exact).is_fail());
    }

    #[test]
    fn test_tolerance_policy() {
        let tol = ComparePolicy::Tolerance { abs: 1e-6, rel: 0.0 };
        assert!(compare(&Value::F64(1.0), &Value::F64(1.0 + 1e-7), tol).is_pass());
        assert!(compare(&Value::F64(1.0), &Value::F64(1.1), tol).is_fail());
        assert!(compare(&Value::F32(0.0), &Value::F32(-0.0), tol).is_pass());

        let rel = ComparePolicy::Tolerance { abs: 0.0, rel: 0.01 };
        assert!(compare(&Value::F64(1000.0), &Value::F64(1005.0), rel).is_pass());
        assert!(compare(&Value::F64(1000.0), &Value::F64(1020.0), rel).is_fail());
    }

    #[test]
    fn test_tolerance_special_values() {
        let tol = ComparePolicy::Tolerance { abs: 1.0, rel: 1.0 };
        let nan = Value::F32(f32::NAN);
        assert!(compare(&nan, &nan, tol).is_pass());
        assert!(compare(&nan, &Value::F32(0.0), tol).is_fail());
        assert!(compare(&Value::F32(f32::INFINITY), &Value::F32(f32::INFINITY), tol).is_pass());
        assert!(compare(&Value::F32(f32::INFINITY), &Value::F32(f32::MAX), tol).is_fail());
    }

    #[test]
    fn test_summary_exit_code_precedence() {
        let mut reporter = Reporter::new();
        reporter.record(record(Outcome::Pass));
        assert_eq!(reporter.summary().exit_code(), EXIT_PASS);

        reporter.record(record(Outcome::Error {
            class: ErrorClass::Timeout,
            message: "no response".to_string(),
        }));
        assert_eq!(reporter.summary().exit_code(), EXIT_RUNTIME_ERROR);
        assert_eq!(reporter.summary().status(), "error");

        reporter.record(record(Outcome::Fail {
            expected: Value::U64(120),
            actual: Value::U64(0),
        }));
        let summary = reporter.summary();
        assert_eq!(summary.exit_code(), EXIT_ASSERT_FAIL);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.errors_by_class.get(&ErrorClass::Timeout), Some(&1));
        assert_eq!(reporter.records().len(), 3);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reporter_writes_one_line_per_case() {
        let buf = SharedBuf::default();
        let mut reporter = Reporter::with_sink(Box::new(buf.clone()));
        reporter.record(record(Outcome::Pass));
        reporter.record(CaseRecord {
            actual: None,
            ..record(Outcome::Error {
                class: ErrorClass::Decode,
                message: "width mismatch".to_string(),
            })
        });
        reporter.flush();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "factorial(5): expected 120, actual 120 ... PASS");
        assert_eq!(
            lines[1],
            "factorial(5): expected 120, actual - ... ERROR (decode error: width mismatch)"
        );
    }

    #[test]
    fn test_outcome_serializes_with_verdict_tag() {
        let json = serde_json::to_value(Outcome::Fail {
            expected: Value::U64(1),
            actual: Value::U64(2),
        })
        .unwrap();
        assert_eq!(json["verdict"], "fail");
        assert_eq!(json["expected"]["type"], "u64");
        assert_eq!(json["actual"]["value"], 2);
    }
}
