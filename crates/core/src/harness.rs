// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The call orchestrator behind `call` and `run_test`.

use crate::codec::{Value, WireArgs, WireValue};
use crate::error::{HarnessError, HarnessResult};
use crate::host::{HostExecutor, TargetFn};
use crate::protocol::{self, Capabilities, FunctionId, Signature, TargetFault, TargetInfo};
use crate::report::{compare, CaseRecord, Outcome, Reporter, Summary};
use crate::session::{Session, SessionOptions};
use crate::stub::{DispatchTable, Stub, TargetDescriptor};
use crate::target::SimTarget;
use crate::transport::Link;
use avrlit_config::{ComparePolicy, ComparisonConfig, RunConfig};
use std::collections::BTreeMap;
use std::panic;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_payload: usize,
    /// Re-synchronise the stub with `Reset` after a call times out.
    pub reset_on_timeout: bool,
    /// `Describe` each function before its first call.
    pub verify_signatures: bool,
    /// Run the host oracle on a scoped thread during the target round-trip.
    pub overlap_host: bool,
    pub comparison: ComparisonConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        let session = SessionOptions::default();
        Self {
            call_timeout: session.call_timeout,
            handshake_timeout: session.handshake_timeout,
            max_payload: session.max_payload,
            reset_on_timeout: true,
            verify_signatures: true,
            overlap_host: true,
            comparison: ComparisonConfig::default(),
        }
    }
}

impl HarnessOptions {
    pub fn from_config(config: &RunConfig) -> anyhow::Result<Self> {
        Ok(Self {
            call_timeout: Duration::from_millis(config.limits.call_timeout_ms),
            handshake_timeout: Duration::from_millis(config.limits.handshake_timeout_ms),
            max_payload: config.max_frame_bytes()?,
            reset_on_timeout: config.reset_on_timeout,
            verify_signatures: config.verify_signatures,
            overlap_host: true,
            comparison: config.comparison.clone(),
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_float_policy(mut self, policy: ComparePolicy) -> Self {
        self.comparison.float = policy;
        self
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            call_timeout: self.call_timeout,
            handshake_timeout: self.handshake_timeout,
            max_payload: self.max_payload,
        }
    }
}

/// A client test body: a loop of `call`s.
pub trait TestCase {
    fn name(&self) -> &str;

    /// Signatures the case calls, checked against the target up front.
    fn functions(&self) -> Vec<Signature> {
        Vec::new()
    }

    fn run_test(&self, harness: &mut Harness);
}

/// Signature check result for one function, cached per session.
#[derive(Debug, Clone)]
enum Verified {
    Ok,
    Mismatch(Signature),
    Fault(TargetFault),
}

pub struct Harness {
    session: Session<Box<dyn Link>>,
    options: HarnessOptions,
    executor: HostExecutor,
    reporter: Reporter,
    target: TargetInfo,
    verified: BTreeMap<FunctionId, Verified>,
    resets: u32,
}

impl Harness {
    /// Opens a session on `link` and performs the handshake.
    pub fn connect<L: Link + 'static>(link: L, options: HarnessOptions) -> HarnessResult<Self> {
        Self::connect_with_reporter(link, options, Reporter::new())
    }

    pub fn connect_with_reporter<L: Link + 'static>(
        link: L,
        options: HarnessOptions,
        reporter: Reporter,
    ) -> HarnessResult<Self> {
        let link: Box<dyn Link> = Box::new(link);
        let mut session = Session::new(link, options.session_options());
        let target = session.handshake()?;
        info!(
            "Connected to {} ({} Hz, {}-bit int, {} functions, fingerprint {})",
            target.name,
            target.frequency_hz,
            target.int_bits,
            target.function_count,
            protocol::fingerprint_hex(&target.fingerprint)
        );

        Ok(Self {
            session,
            options,
            executor: HostExecutor::new(),
            reporter,
            target,
            verified: BTreeMap::new(),
            resets: 0,
        })
    }

    /// Starts a simulated target running `table` and connects to it.
    pub fn simulated(
        table: DispatchTable,
        descriptor: TargetDescriptor,
        options: HarnessOptions,
    ) -> HarnessResult<(Self, SimTarget)> {
        let (target, link) = SimTarget::spawn(Stub::new(table, descriptor));
        let harness = Self::connect(link, options)?;
        Ok((harness, target))
    }

    pub fn target_info(&self) -> &TargetInfo {
        &self.target
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn summary(&self) -> Summary {
        self.reporter.summary()
    }

    /// Resets sent after timeouts.
    pub fn resyncs(&self) -> u32 {
        self.resets
    }

    pub fn stale_frames(&self) -> u64 {
        self.session.stale_frames()
    }

    /// Checks the target image was built from the same function catalog.
    pub fn check_fingerprint(&self, catalog: &[Signature]) -> HarnessResult<()> {
        let host = protocol::fingerprint(catalog);
        if host != self.target.fingerprint {
            return Err(HarnessError::FingerprintMismatch {
                host: protocol::fingerprint_hex(&host),
                target: protocol::fingerprint_hex(&self.target.fingerprint),
            });
        }
        Ok(())
    }

    /// Runs `function` on host and target with `args` and records the verdict.
    pub fn call<A: WireArgs, R: WireValue>(&mut self, function: &TargetFn<A, R>, args: A) -> Outcome {
        let started = Instant::now();
        let executor = self.executor;

        let (expected, result) = if self.options.overlap_host {
            std::thread::scope(|s| {
                let oracle = executor.spawn_scoped(s, function, args);
                let result = self.round_trip(function, args);
                match oracle.join() {
                    Ok(expected) => (expected, result),
                    Err(payload) => panic::resume_unwind(payload),
                }
            })
        } else {
            let expected = executor.execute_value(function, args);
            (expected, self.round_trip(function, args))
        };

        let (actual, outcome) = match result {
            Ok(actual) => {
                let policy = self.options.comparison.policy_for(function.name);
                (Some(actual), compare(&expected, &actual, policy))
            }
            Err(e) => (
                None,
                Outcome::Error {
                    class: e.class(),
                    message: e.to_string(),
                },
            ),
        };

        self.reporter.record(CaseRecord {
            function: function.name.to_string(),
            input: format_input(&args.into_values()),
            expected,
            actual,
            outcome: outcome.clone(),
            duration_us: started.elapsed().as_micros() as u64,
        });
        outcome
    }

    /// Runs a whole test case and returns the tally of its own calls.
    pub fn run_test(&mut self, case: &dyn TestCase) -> Summary {
        info!("Running test case {}", case.name());
        let first = self.reporter.records().len();

        for sig in case.functions() {
            if let Err(e) = self.verify(&sig) {
                warn!("{}: {}", case.name(), e);
            }
        }

        case.run_test(self);

        let summary = Summary::from_records(&self.reporter.records()[first..]);
        info!("{}: {}", case.name(), summary);
        summary
    }

    pub fn into_reporter(self) -> Reporter {
        self.reporter
    }

    fn round_trip<A: WireArgs, R: WireValue>(
        &mut self,
        function: &TargetFn<A, R>,
        args: A,
    ) -> HarnessResult<Value> {
        if self.options.verify_signatures {
            self.verify(&function.signature())?;
        }

        let result = self
            .session
            .invoke(function.id, args.into_values())
            .and_then(|raw| raw.decode(R::TYPE).map_err(HarnessError::from));

        if let Err(e) = &result {
            if e.is_timeout() && self.options.reset_on_timeout {
                self.resync();
            }
        }
        result
    }

    fn verify(&mut self, host: &Signature) -> HarnessResult<()> {
        if !self.target.capabilities.contains(Capabilities::DESCRIBE) {
            return Ok(());
        }

        let verified = match self.verified.get(&host.id) {
            Some(v) => v.clone(),
            None => {
                let v = match self.session.describe(host.id) {
                    Ok(target) if target == *host => Verified::Ok,
                    Ok(target) => Verified::Mismatch(target),
                    Err(HarnessError::TargetFault(fault)) => Verified::Fault(fault),
                    Err(e) => return Err(e),
                };
                debug!("Verified {}: {:?}", host, v);
                self.verified.insert(host.id, v.clone());
                v
            }
        };

        match verified {
            Verified::Ok => Ok(()),
            Verified::Mismatch(target) => Err(HarnessError::SignatureMismatch {
                host: host.clone(),
                target,
            }),
            Verified::Fault(fault) => Err(HarnessError::TargetFault(fault)),
        }
    }

    fn resync(&mut self) {
        if !self.target.capabilities.contains(Capabilities::RESET) {
            warn!("Target {} cannot be reset; continuing", self.target.name);
            return;
        }
        match self.session.reset() {
            Ok(count) => {
                self.resets += 1;
                info!("Target {} reset after timeout (reset #{})", self.target.name, count);
            }
            Err(e) => warn!("Failed to reset target {}: {}", self.target.name, e),
        }
    }
}

fn format_input(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn add(args: (i16, i16)) -> i16 {
        args.0.wrapping_add(args.1)
    }

    const ADD: TargetFn<(i16, i16), i16> = TargetFn::new(1, "add", add);

    fn table() -> DispatchTable {
        let mut table = DispatchTable::new();
        table.register(1, "add", |(a, b): (i16, i16)| a.wrapping_add(b));
        table
    }

    fn options() -> HarnessOptions {
        HarnessOptions::default().with_call_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_call_pass_records_case() {
        let (mut harness, _target) =
            Harness::simulated(table(), TargetDescriptor::default(), options()).unwrap();

        assert!(harness.call(&ADD, (2, 3)).is_pass());
        assert!(harness.call(&ADD, (i16::MAX, 1)).is_pass());

        let records = harness.reporter().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].input, "2, 3");
        assert_eq!(records[1].actual, Some(Value::I16(i16::MIN)));
    }

    #[test]
    fn test_call_without_overlap() {
        let mut opts = options();
        opts.overlap_host = false;
        let (mut harness, _target) =
            Harness::simulated(table(), TargetDescriptor::default(), opts).unwrap();
        assert!(harness.call(&ADD, (-7, 7)).is_pass());
    }

    #[test]
    fn test_unknown_function_is_target_fault() {
        fn neg(args: (i16,)) -> i16 {
            args.0.wrapping_neg()
        }
        const NEG: TargetFn<(i16,), i16> = TargetFn::new(2, "neg", neg);

        let (mut harness, _target) =
            Harness::simulated(table(), TargetDescriptor::default(), options()).unwrap();
        let outcome = harness.call(&NEG, (1,));
        assert_eq!(outcome.error_class(), Some(ErrorClass::TargetFault));

        // Without Describe the stub itself rejects the id.
        let mut opts = options();
        opts.verify_signatures = false;
        let (mut harness, _target) =
            Harness::simulated(table(), TargetDescriptor::default(), opts).unwrap();
        let outcome = harness.call(&NEG, (1,));
        assert_eq!(outcome.error_class(), Some(ErrorClass::TargetFault));
    }

    #[test]
    fn test_fingerprint_check() {
        let (harness, _target) =
            Harness::simulated(table(), TargetDescriptor::default(), options()).unwrap();
        assert!(harness.check_fingerprint(&[ADD.signature()]).is_ok());

        let mut renamed = ADD.signature();
        renamed.name = "sum".to_string();
        let err = harness.check_fingerprint(&[renamed]).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Contract);
    }

    struct AddCase;

    impl TestCase for AddCase {
        fn name(&self) -> &str {
            "add"
        }

        fn functions(&self) -> Vec<Signature> {
            vec![ADD.signature()]
        }

        fn run_test(&self, harness: &mut Harness) {
            for n in -2..=2 {
                harness.call(&ADD, (n, n));
            }
        }
    }

    #[test]
    fn test_run_test_summarises_only_its_cases() {
        let (mut harness, _target) =
            Harness::simulated(table(), TargetDescriptor::default(), options()).unwrap();
        harness.call(&ADD, (0, 0));

        let summary = harness.run_test(&AddCase);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 5);
        assert_eq!(harness.summary().total, 6);
    }
}
