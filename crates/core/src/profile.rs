//! Per-variable and per-expression tallies of observed runtime categories.
//!
//! A `ValueProfile` hangs off every variable definition and every expression
//! node that the profiling interpreter visits. Counters are plain atomics:
//! multiple threads may be profiling concurrent invocations of the same
//! function, and a slightly over- or under-counted tally is an acceptable
//! loss (see the concurrency discipline in the top-level design notes).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::lattice::{Cat, ExprType};
use crate::value::Value;

/// Thread-safe tallies of observed value categories at one program point.
#[derive(Debug, Default)]
pub struct ValueProfile {
    refs: AtomicU64,
    ints: AtomicU64,
    bools: AtomicU64,
}

impl ValueProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `v` and bump the matching counter. Relaxed ordering: these
    /// are statistics, not synchronization points.
    pub fn record(&self, v: &Value) {
        match v {
            Value::Int(_) => self.ints.fetch_add(1, Ordering::Relaxed),
            Value::Bool(_) => self.bools.fetch_add(1, Ordering::Relaxed),
            Value::Ref(_) => self.refs.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_cat(&self, cat: Cat) {
        match cat {
            Cat::Int => self.ints.fetch_add(1, Ordering::Relaxed),
            Cat::Bool => self.bools.fetch_add(1, Ordering::Relaxed),
            Cat::Ref => self.refs.fetch_add(1, Ordering::Relaxed),
            Cat::Void => 0,
        };
    }

    pub fn int_count(&self) -> u64 {
        self.ints.load(Ordering::Relaxed)
    }

    pub fn bool_count(&self) -> u64 {
        self.bools.load(Ordering::Relaxed)
    }

    pub fn ref_count(&self) -> u64 {
        self.refs.load(Ordering::Relaxed)
    }

    /// Resolve the tallies into an `ExprType`.
    ///
    /// No observations -> `Unknown`. A single non-zero category -> that
    /// category. `int` and `bool` both non-zero, or any `ref` observed at
    /// all -> `Known(Ref)`, since a slot that has ever held two different
    /// primitive shapes (or any boxed value) must be boxed to be safe.
    pub fn observed(&self) -> ExprType {
        let refs = self.ref_count();
        let ints = self.int_count();
        let bools = self.bool_count();

        if refs > 0 {
            return ExprType::Known(Cat::Ref);
        }
        match (ints > 0, bools > 0) {
            (false, false) => ExprType::Unknown,
            (true, false) => ExprType::Known(Cat::Int),
            (false, true) => ExprType::Known(Cat::Bool),
            (true, true) => ExprType::Known(Cat::Ref),
        }
    }

    pub fn is_pure_int(&self) -> bool {
        matches!(self.observed(), ExprType::Known(Cat::Int))
    }

    pub fn is_pure_bool(&self) -> bool {
        matches!(self.observed(), ExprType::Known(Cat::Bool))
    }

    /// Total observations made, across all categories.
    pub fn total(&self) -> u64 {
        self.ref_count() + self.int_count() + self.bool_count()
    }
}
