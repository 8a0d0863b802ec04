// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use avrlit_core::protocol::Signature;
use avrlit_core::{
    ComparePolicy, DispatchTable, ErrorClass, FaultyLink, Harness, HarnessOptions, McuState,
    Outcome, SimTarget, Stub, TargetDescriptor, TargetFn, TcpLink, TestCase, Value, WireType,
};
use std::net::TcpListener;
use std::time::Duration;

fn factorial(args: (u64,)) -> u64 {
    (1..=args.0).fold(1u64, |acc, k| acc.wrapping_mul(k))
}

/// `auto fac = 1` on avr-gcc: a 16-bit accumulator, sign-extended on return.
fn factorial_int16(args: (u64,)) -> u64 {
    let mut acc: i16 = 1;
    for k in 1..=args.0 as i16 {
        acc = acc.wrapping_mul(k);
    }
    acc as i64 as u64
}

fn nudge(args: (f32,)) -> f32 {
    args.0 * 0.5
}

fn div(args: (u8, u8)) -> u8 {
    args.0.checked_div(args.1).unwrap_or(0)
}

const FACTORIAL: TargetFn<(u64,), u64> = TargetFn::new(1, "factorial", factorial);
const NUDGE: TargetFn<(f32,), f32> = TargetFn::new(2, "nudge", nudge);
const DIV: TargetFn<(u8, u8), u8> = TargetFn::new(3, "div", div);

fn native_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    table
        .register(1, "factorial", factorial)
        .register(2, "nudge", nudge)
        // No divide-by-zero guard: a zero divisor crashes the target.
        .register(3, "div", |(a, b): (u8, u8)| a / b);
    table
}

fn options() -> HarnessOptions {
    HarnessOptions::default().with_call_timeout(Duration::from_millis(300))
}

fn connect(table: DispatchTable) -> (Harness, SimTarget) {
    Harness::simulated(table, TargetDescriptor::default(), options()).unwrap()
}

#[test]
fn test_factorial_zero_to_seven_passes() {
    let (mut harness, _target) = connect(native_table());

    let expected = [1u64, 1, 2, 6, 24, 120, 720, 5040];
    for n in 0..=7u64 {
        let outcome = harness.call(&FACTORIAL, (n,));
        assert_eq!(outcome, Outcome::Pass, "factorial({})", n);
    }

    let actual: Vec<Value> = harness
        .reporter()
        .records()
        .iter()
        .filter_map(|r| r.actual)
        .collect();
    let wanted: Vec<Value> = expected.iter().map(|v| Value::U64(*v)).collect();
    assert_eq!(actual, wanted);

    let summary = harness.summary();
    assert_eq!(summary.passed, 8);
    assert!(summary.is_success());
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn test_repeated_call_is_idempotent() {
    let (mut harness, _target) = connect(native_table());
    let first = harness.call(&FACTORIAL, (6,));
    let second = harness.call(&FACTORIAL, (6,));
    assert_eq!(first, second);

    let records = harness.reporter().records();
    assert_eq!(records[0].actual, records[1].actual);
}

#[test]
fn test_boundary_inputs_wrap_without_errors() {
    let (mut harness, _target) = connect(native_table());

    for n in [0u64, 20, 21] {
        assert!(harness.call(&FACTORIAL, (n,)).is_pass());
    }

    let records = harness.reporter().records();
    assert_eq!(records[0].actual, Some(Value::U64(1)));
    assert_eq!(records[1].actual, Some(Value::U64(2_432_902_008_176_640_000)));
    assert_eq!(records[2].actual, Some(Value::U64(14_197_454_024_290_336_768)));
}

#[test]
fn test_dropped_response_is_timeout_then_recovers() {
    let (target, link) = SimTarget::spawn(Stub::new(native_table(), TargetDescriptor::default()));
    let (link, faults) = FaultyLink::new(link);
    let mut harness = Harness::connect(link, options()).unwrap();

    // Warm up so the signature check is cached and only the invoke is in flight.
    assert!(harness.call(&FACTORIAL, (3,)).is_pass());

    faults.drop_next_inbound(1);
    let outcome = harness.call(&FACTORIAL, (4,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Timeout));
    assert_eq!(harness.resyncs(), 1);

    assert!(harness.call(&FACTORIAL, (5,)).is_pass());

    let summary = harness.summary();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.exit_code(), 3);

    drop(harness);
    let snapshot = target.join();
    assert_eq!(snapshot.status.reset_count, 1);
}

#[test]
fn test_corrupted_response_is_transport_error_then_recovers() {
    let (_target, link) = SimTarget::spawn(Stub::new(native_table(), TargetDescriptor::default()));
    let (link, faults) = FaultyLink::new(link);
    let mut harness = Harness::connect(link, options()).unwrap();
    assert!(harness.call(&FACTORIAL, (2,)).is_pass());

    faults.corrupt_next_inbound(1);
    let outcome = harness.call(&FACTORIAL, (3,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Transport));
    assert_eq!(faults.corrupted(), 1);

    assert!(harness.call(&FACTORIAL, (4,)).is_pass());
}

#[test]
fn test_damaged_request_does_not_leak_into_next_call() {
    let (_target, link) = SimTarget::spawn(Stub::new(native_table(), TargetDescriptor::default()));
    let (link, faults) = FaultyLink::new(link);
    let mut harness = Harness::connect(link, options()).unwrap();
    assert!(harness.call(&FACTORIAL, (2,)).is_pass());

    // 165 is 0xA5: the damaged request carries a magic byte in its payload.
    faults.corrupt_next_outbound(1);
    let outcome = harness.call(&FACTORIAL, (165,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::TargetFault));

    assert_eq!(harness.call(&FACTORIAL, (3,)), Outcome::Pass);
    assert_eq!(harness.call(&FACTORIAL, (4,)), Outcome::Pass);
    assert_eq!(harness.stale_frames(), 0);

    let summary = harness.summary();
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.errors, 1);
}

#[test]
fn test_wrong_return_width_is_decode_error() {
    let mut table = DispatchTable::new();
    // Built with a 32-bit return while the catalog declares u64.
    table.register_raw(FACTORIAL.signature(), |args: &[Value]| match args {
        [Value::U64(n)] => Ok(Value::U32(factorial((*n,)) as u32)),
        _ => Ok(Value::U32(0)),
    });
    let (mut harness, _target) = connect(table);

    let outcome = harness.call(&FACTORIAL, (5,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Decode));
    match outcome {
        Outcome::Error { message, .. } => assert!(message.contains("u64"), "{}", message),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(harness.reporter().records()[0].actual, None);
}

#[test]
fn test_int16_accumulator_mismatches_from_eight() {
    let mut table = native_table();
    table.register(1, "factorial", factorial_int16);
    let (mut harness, _target) = connect(table);

    for n in 0..=7u64 {
        assert!(harness.call(&FACTORIAL, (n,)).is_pass(), "factorial({})", n);
    }
    let outcome = harness.call(&FACTORIAL, (8,));
    assert_eq!(
        outcome,
        Outcome::Fail {
            expected: Value::U64(40320),
            actual: Value::U64((-25216i64) as u64),
        }
    );

    let summary = harness.summary();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn test_target_crash_is_timeout_and_next_case_runs() {
    let (mut harness, target) = connect(native_table());

    assert!(harness.call(&DIV, (10, 2)).is_pass());
    let outcome = harness.call(&DIV, (10, 0));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Timeout));
    assert!(harness.call(&DIV, (9, 3)).is_pass());

    let snapshot = target.snapshot();
    assert_eq!(snapshot.crashes, 1);
    assert_eq!(snapshot.state, McuState::Running);
    assert!(snapshot.status.reset_count >= 2);
}

#[test]
fn test_signature_mismatch_is_contract_error() {
    let mut table = DispatchTable::new();
    table.register(1, "factorial", |(n,): (u16,)| factorial((n as u64,)));
    let (mut harness, _target) = connect(table);

    let outcome = harness.call(&FACTORIAL, (3,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Contract));
    // Cached; the target is not asked again.
    let outcome = harness.call(&FACTORIAL, (4,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Contract));
}

#[test]
fn test_signature_mismatch_without_describe_is_target_fault() {
    let mut table = DispatchTable::new();
    table.register(1, "factorial", |(n,): (u16,)| factorial((n as u64,)));
    let mut opts = options();
    opts.verify_signatures = false;
    let (mut harness, _target) =
        Harness::simulated(table, TargetDescriptor::default(), opts).unwrap();

    let outcome = harness.call(&FACTORIAL, (3,));
    assert_eq!(outcome.error_class(), Some(ErrorClass::TargetFault));
}

#[test]
fn test_float_policy_exact_vs_tolerance() {
    let mut table = native_table();
    // One ULP off, as a soft-float library might be.
    table.register(2, "nudge", |(x,): (f32,)| f32::from_bits((x * 0.5).to_bits() + 1));

    let (mut harness, _target) = connect(table);
    assert!(harness.call(&NUDGE, (3.0,)).is_fail());

    let mut table = native_table();
    table.register(2, "nudge", |(x,): (f32,)| f32::from_bits((x * 0.5).to_bits() + 1));
    let opts = options().with_float_policy(ComparePolicy::Tolerance {
        abs: 1e-5,
        rel: 0.0,
    });
    let (mut harness, _target) =
        Harness::simulated(table, TargetDescriptor::default(), opts).unwrap();
    assert!(harness.call(&NUDGE, (3.0,)).is_pass());
}

#[test]
fn test_tcp_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let link = TcpLink::from_stream(stream).unwrap();
        SimTarget::spawn_on(Stub::new(native_table(), TargetDescriptor::default()), link)
    });

    let link = TcpLink::connect(addr).unwrap();
    let mut harness = Harness::connect(link, options()).unwrap();
    let target = server.join().unwrap();

    assert_eq!(harness.target_info().name, "atmega328");
    for n in 0..=7u64 {
        assert!(harness.call(&FACTORIAL, (n,)).is_pass());
    }

    drop(harness);
    let snapshot = target.join();
    assert_eq!(snapshot.state, McuState::Done);
}

struct FactorialCase;

impl TestCase for FactorialCase {
    fn name(&self) -> &str {
        "factorial"
    }

    fn functions(&self) -> Vec<Signature> {
        vec![FACTORIAL.signature()]
    }

    fn run_test(&self, harness: &mut Harness) {
        for n in 0..=7 {
            harness.call(&FACTORIAL, (n,));
        }
    }
}

#[test]
fn test_run_test_drives_client_loop() {
    let (mut harness, _target) = connect(native_table());
    let summary = harness.run_test(&FactorialCase);
    assert_eq!(summary.total, 8);
    assert!(summary.is_success());

    let sig = FACTORIAL.signature();
    assert_eq!(sig.args, vec![WireType::U64]);
    assert!(harness.check_fingerprint(&[
        sig,
        NUDGE.signature(),
        DIV.signature()
    ])
    .is_ok());
}
