//! Error kinds shared across the adaptive-compilation subsystem.
//!
//! Hand-rolled enums with manual `Display`/`std::error::Error` impls, not
//! `anyhow`/`thiserror` — kept dependency-light on purpose, matching the
//! style used throughout this crate family's error types.
//!
//! `SquarePegException` deliberately does not live here: it is an internal
//! control-flow signal that must never cross a public API, so it stays
//! private to `kestrel-compiler`'s specialized-routine executor.

use std::fmt;

/// Codegen saw an impossible category combination. This is always a bug in
/// the compiler (or in a `Primitive` implementation's `generate` facet),
/// never a user-triggerable condition: catch it, don't route it anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    /// A bridge was asked to convert between two categories with no defined
    /// semantics (anything involving `Void`, which never holds a runtime
    /// value to convert). `Int <-> Bool` is not one of these: it routes
    /// through `Ref` (box, then unwrap-or-throw the other primitive cat).
    NoBridge { from: crate::lattice::Cat, to: crate::lattice::Cat },
    /// A primitive's `generate` facet rejected the argument categories it
    /// was asked to combine (e.g. comparing two `Bool`s).
    UnsupportedCategories { primitive: String, cats: Vec<crate::lattice::Cat> },
    /// An expression graph was malformed in a way earlier validation should
    /// have caught (e.g. a non-atomic expression in an atomic position).
    MalformedGraph(String),
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerError::NoBridge { from, to } => {
                write!(f, "no direct bridge from {from} to {to}")
            }
            CompilerError::UnsupportedCategories { primitive, cats } => {
                write!(f, "primitive `{primitive}` cannot combine categories {cats:?}")
            }
            CompilerError::MalformedGraph(msg) => write!(f, "malformed expression graph: {msg}"),
        }
    }
}

impl std::error::Error for CompilerError {}

/// A user-visible failure raised by a primitive or by ordinary evaluation
/// (e.g. an arithmetic primitive applied to a non-integer). Propagates to
/// the call site unchanged; never caught by recovery code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into() }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: {}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// The type lattice failed to converge during inference. Given that `join`
/// is associative/commutative/idempotent over a finite lattice of height 4,
/// this should be unreachable; it exists so a caller can fail loudly
/// instead of looping forever if that invariant is ever violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInferenceFailure {
    pub function: String,
    pub rounds_attempted: u32,
}

impl fmt::Display for TypeInferenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type inference did not converge for `{}` after {} rounds",
            self.function, self.rounds_attempted
        )
    }
}

impl std::error::Error for TypeInferenceFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::Cat;

    #[test]
    fn display_is_human_readable() {
        let e = CompilerError::NoBridge { from: Cat::Int, to: Cat::Bool };
        assert_eq!(e.to_string(), "no direct bridge from int to bool");
    }

    #[test]
    fn runtime_error_carries_message() {
        let e = RuntimeError::new("compare: expected two integers");
        assert!(e.to_string().contains("compare: expected two integers"));
    }
}
