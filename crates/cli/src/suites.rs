// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Built-in function catalog, target images and test suites.

use avrlit_core::{
    Capabilities, DispatchTable, Harness, Signature, TargetDescriptor, TargetFn, TestCase,
};
use std::ops::RangeInclusive;
use std::str::FromStr;

pub fn factorial(args: (u64,)) -> u64 {
    (1..=args.0).fold(1u64, |acc, k| acc.wrapping_mul(k))
}

pub fn add_i16(args: (i16, i16)) -> i16 {
    args.0.wrapping_add(args.1)
}

pub fn mul_u32(args: (u32, u32)) -> u32 {
    args.0.wrapping_mul(args.1)
}

pub fn lerp_f32(args: (f32, f32, f32)) -> f32 {
    let (a, b, t) = args;
    a + (b - a) * t
}

pub fn is_even(args: (u16,)) -> bool {
    args.0 % 2 == 0
}

pub const FACTORIAL: TargetFn<(u64,), u64> = TargetFn::new(1, "factorial", factorial);
pub const ADD_I16: TargetFn<(i16, i16), i16> = TargetFn::new(2, "add_i16", add_i16);
pub const MUL_U32: TargetFn<(u32, u32), u32> = TargetFn::new(3, "mul_u32", mul_u32);
pub const LERP_F32: TargetFn<(f32, f32, f32), f32> = TargetFn::new(4, "lerp_f32", lerp_f32);
pub const IS_EVEN: TargetFn<(u16,), bool> = TargetFn::new(5, "is_even", is_even);

/// Every function the host build knows about.
pub fn catalog() -> Vec<Signature> {
    vec![
        FACTORIAL.signature(),
        ADD_I16.signature(),
        MUL_U32.signature(),
        LERP_F32.signature(),
        IS_EVEN.signature(),
    ]
}

/// Arithmetic model the simulated target image is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetModel {
    /// Same semantics as the host build.
    Native,
    /// avr-gcc with `auto fac = 1`: the factorial accumulator is a 16-bit `int`.
    AvrInt16,
}

impl FromStr for TargetModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(TargetModel::Native),
            "avr-int16" | "avr_int16" => Ok(TargetModel::AvrInt16),
            _ => Err(format!(
                "Unknown target model: {}. Supported: native, avr-int16",
                s
            )),
        }
    }
}

impl TargetModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetModel::Native => "native",
            TargetModel::AvrInt16 => "avr-int16",
        }
    }

    pub fn descriptor(&self) -> TargetDescriptor {
        match self {
            TargetModel::Native => TargetDescriptor {
                name: "sim-native".to_string(),
                frequency_hz: 16_000_000,
                int_bits: 32,
                capabilities: Capabilities::all(),
            },
            TargetModel::AvrInt16 => TargetDescriptor::default(),
        }
    }

    /// The dispatch table linked into the target image.
    pub fn table(&self) -> DispatchTable {
        let mut table = DispatchTable::new();
        table
            .register(FACTORIAL.id, FACTORIAL.name, factorial)
            .register(ADD_I16.id, ADD_I16.name, |(a, b): (i16, i16)| a.wrapping_add(b))
            .register(MUL_U32.id, MUL_U32.name, |(a, b): (u32, u32)| a.wrapping_mul(b))
            .register(LERP_F32.id, LERP_F32.name, |(a, b, t): (f32, f32, f32)| {
                a + (b - a) * t
            })
            .register(IS_EVEN.id, IS_EVEN.name, |(n,): (u16,)| n & 1 == 0);

        if *self == TargetModel::AvrInt16 {
            table.register(FACTORIAL.id, FACTORIAL.name, |(n,): (u64,)| {
                let mut acc: i16 = 1;
                for k in 1..=n {
                    acc = acc.wrapping_mul(k as i16);
                }
                // Sign-extended into the declared u64 on return.
                acc as i64 as u64
            });
        }
        table
    }
}

pub struct FactorialSuite {
    name: &'static str,
    inputs: RangeInclusive<u64>,
}

impl TestCase for FactorialSuite {
    fn name(&self) -> &str {
        self.name
    }

    fn functions(&self) -> Vec<Signature> {
        vec![FACTORIAL.signature()]
    }

    fn run_test(&self, harness: &mut Harness) {
        for n in self.inputs.clone() {
            harness.call(&FACTORIAL, (n,));
        }
    }
}

pub struct ArithSuite;

impl TestCase for ArithSuite {
    fn name(&self) -> &str {
        "arith"
    }

    fn functions(&self) -> Vec<Signature> {
        vec![
            ADD_I16.signature(),
            MUL_U32.signature(),
            LERP_F32.signature(),
            IS_EVEN.signature(),
        ]
    }

    fn run_test(&self, harness: &mut Harness) {
        for (a, b) in [(0, 0), (1, -1), (i16::MAX, 1), (i16::MIN, -1), (1234, -4321)] {
            harness.call(&ADD_I16, (a, b));
        }
        for (a, b) in [(0, 7), (65_535, 65_537), (u32::MAX, 2), (40_000, 40_000)] {
            harness.call(&MUL_U32, (a, b));
        }
        for (a, b, t) in [(0.0, 1.0, 0.5), (-2.5, 7.25, 0.1), (1e6, -1e6, 0.75)] {
            harness.call(&LERP_F32, (a, b, t));
        }
        for n in [0, 1, 254, u16::MAX] {
            harness.call(&IS_EVEN, (n,));
        }
    }
}

pub const SUITES: &[(&str, &str)] = &[
    ("factorial", "factorial(n) for n in 0..=7"),
    (
        "factorial-boundary",
        "factorial(n) for n in 0..=21, across u64 wraparound",
    ),
    ("arith", "wrapping integer, bool and f32 arithmetic"),
];

pub fn suite_by_name(name: &str) -> Option<Box<dyn TestCase>> {
    match name {
        "factorial" => Some(Box::new(FactorialSuite {
            name: "factorial",
            inputs: 0..=7,
        })),
        "factorial-boundary" => Some(Box::new(FactorialSuite {
            name: "factorial-boundary",
            inputs: 0..=21,
        })),
        "arith" => Some(Box::new(ArithSuite)),
        _ => None,
    }
}
