// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The host reference executor: runs the native build of a function to get
//! the expected value.

use crate::codec::{Value, WireArgs, WireValue};
use crate::protocol::{FunctionId, Signature};
use std::fmt;
use std::thread::{Scope, ScopedJoinHandle};

/// A function built for both host and target, addressed by a stable id.
///
/// The host implementation must use wrapping arithmetic for its declared
/// types so its overflow behaviour matches the target's.
pub struct TargetFn<A, R> {
    pub id: FunctionId,
    pub name: &'static str,
    pub host: fn(A) -> R,
}

impl<A, R> Clone for TargetFn<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for TargetFn<A, R> {}

impl<A: WireArgs, R: WireValue> TargetFn<A, R> {
    pub const fn new(id: FunctionId, name: &'static str, host: fn(A) -> R) -> Self {
        Self { id, name, host }
    }

    pub fn signature(&self) -> Signature {
        Signature {
            id: self.id,
            name: self.name.to_string(),
            args: A::signature(),
            ret: R::TYPE,
        }
    }
}

impl<A, R> fmt::Debug for TargetFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetFn(#{} {})", self.id, self.name)
    }
}

/// Runs host implementations in-process. Never touches the transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        HostExecutor
    }

    pub fn execute<A: WireArgs, R: WireValue>(&self, function: &TargetFn<A, R>, args: A) -> R {
        (function.host)(args)
    }

    pub fn execute_value<A: WireArgs, R: WireValue>(
        &self,
        function: &TargetFn<A, R>,
        args: A,
    ) -> Value {
        self.execute(function, args).into_value()
    }

    /// Starts the oracle on a scoped thread so it overlaps the target round-trip.
    pub fn spawn_scoped<'scope, 'env, A: WireArgs, R: WireValue>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        function: &TargetFn<A, R>,
        args: A,
    ) -> ScopedJoinHandle<'scope, Value> {
        let host = function.host;
        scope.spawn(move || host(args).into_value())
    }
}
