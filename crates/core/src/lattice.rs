//! The four-point type lattice shared by every analysis pass.
//!
//! `Cat` is the closed set of runtime categories this subsystem ever tracks.
//! There is no general type system here: a value is either a reference to
//! something boxed, a primitive integer, a primitive boolean, or (at a
//! non-returning control point) nothing at all.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// A runtime value category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cat {
    /// A boxed/reference value: the union of everything that isn't a bare
    /// primitive. Also the category any mixed observation collapses to.
    Ref,
    /// A primitive 64-bit integer.
    Int,
    /// A primitive boolean.
    Bool,
    /// No value flows here (non-returning contexts). Incomparable with
    /// every other category, including itself under join with anything else.
    Void,
}

impl fmt::Display for Cat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cat::Ref => "ref",
            Cat::Int => "int",
            Cat::Bool => "bool",
            Cat::Void => "void",
        };
        f.write_str(s)
    }
}

/// Either "nothing observed/inferred yet" or a known category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprType {
    Unknown,
    Known(Cat),
}

impl ExprType {
    pub fn is_known(self) -> bool {
        matches!(self, ExprType::Known(_))
    }

    /// The category of a known type, or `None` for `Unknown`.
    pub fn cat_of(self) -> Option<Cat> {
        match self {
            ExprType::Known(c) => Some(c),
            ExprType::Unknown => None,
        }
    }

    /// `true` iff this is `Known(Int)` or `Known(Bool)` — a category codegen
    /// can specialize a slot to.
    pub fn is_primitive(self) -> bool {
        matches!(self, ExprType::Known(Cat::Int) | ExprType::Known(Cat::Bool))
    }

    /// Lattice join.
    ///
    /// `unknown ∨ x = x`; `known(a) ∨ known(a) = known(a)`;
    /// `known(a) ∨ known(b) = known(Ref)` for `a != b`. `Void` only ever
    /// joins with itself (it marks a dead/non-returning tail and must not
    /// silently widen to `Ref`); joining `Void` with anything else is a
    /// caller bug and we return `Known(Ref)` defensively rather than panic,
    /// since the inferencer runs over possibly-malformed external input.
    pub fn join(self, other: ExprType) -> ExprType {
        use ExprType::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => x,
            (Known(Cat::Void), Known(Cat::Void)) => Known(Cat::Void),
            (Known(Cat::Void), _) | (_, Known(Cat::Void)) => Known(Cat::Ref),
            (Known(a), Known(b)) if a == b => Known(a),
            (Known(_), Known(_)) => Known(Cat::Ref),
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Unknown => f.write_str("unknown"),
            ExprType::Known(c) => write!(f, "known({c})"),
        }
    }
}

/// An `ExprType` stored behind atomics instead of a `Cell`, so annotations
/// on shared `ExprGraph` nodes/variables stay `Sync` while multiple threads
/// concurrently profile calls to the same function.
///
/// Encoding: 0 = Unknown, 1 = Known(Ref), 2 = Known(Int), 3 = Known(Bool),
/// 4 = Known(Void).
#[derive(Debug)]
pub struct AtomicExprType(AtomicU8);

impl AtomicExprType {
    pub fn new(t: ExprType) -> Self {
        AtomicExprType(AtomicU8::new(encode(t)))
    }

    /// Acquire load: pairs with `store`'s release so a reader sees every
    /// write that happened-before the store it observes.
    pub fn load(&self) -> ExprType {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Release store: analysis passes run under a per-Nexus lock, but the
    /// store itself still publishes with release semantics so a racing
    /// reader (e.g. a profiling interpreter thread) never sees a torn
    /// update.
    pub fn store(&self, t: ExprType) {
        self.0.store(encode(t), Ordering::Release);
    }
}

impl Default for AtomicExprType {
    fn default() -> Self {
        AtomicExprType::new(ExprType::Unknown)
    }
}

impl Clone for AtomicExprType {
    fn clone(&self) -> Self {
        AtomicExprType::new(self.load())
    }
}

fn encode(t: ExprType) -> u8 {
    match t {
        ExprType::Unknown => 0,
        ExprType::Known(Cat::Ref) => 1,
        ExprType::Known(Cat::Int) => 2,
        ExprType::Known(Cat::Bool) => 3,
        ExprType::Known(Cat::Void) => 4,
    }
}

fn decode(v: u8) -> ExprType {
    match v {
        1 => ExprType::Known(Cat::Ref),
        2 => ExprType::Known(Cat::Int),
        3 => ExprType::Known(Cat::Bool),
        4 => ExprType::Known(Cat::Void),
        _ => ExprType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_identity() {
        assert_eq!(ExprType::Unknown.join(ExprType::Known(Cat::Int)), ExprType::Known(Cat::Int));
        assert_eq!(ExprType::Known(Cat::Int).join(ExprType::Unknown), ExprType::Known(Cat::Int));
    }

    #[test]
    fn same_category_joins_to_itself() {
        assert_eq!(
            ExprType::Known(Cat::Bool).join(ExprType::Known(Cat::Bool)),
            ExprType::Known(Cat::Bool)
        );
    }

    #[test]
    fn mixed_primitives_join_to_ref() {
        assert_eq!(
            ExprType::Known(Cat::Int).join(ExprType::Known(Cat::Bool)),
            ExprType::Known(Cat::Ref)
        );
        assert_eq!(
            ExprType::Known(Cat::Ref).join(ExprType::Known(Cat::Int)),
            ExprType::Known(Cat::Ref)
        );
    }

    #[test]
    fn void_only_joins_with_itself() {
        assert_eq!(
            ExprType::Known(Cat::Void).join(ExprType::Known(Cat::Void)),
            ExprType::Known(Cat::Void)
        );
        assert_eq!(
            ExprType::Known(Cat::Void).join(ExprType::Known(Cat::Int)),
            ExprType::Known(Cat::Ref)
        );
    }

    #[test]
    fn join_is_commutative_and_associative() {
        let vals = [
            ExprType::Unknown,
            ExprType::Known(Cat::Int),
            ExprType::Known(Cat::Bool),
            ExprType::Known(Cat::Ref),
        ];
        for &a in &vals {
            for &b in &vals {
                assert_eq!(a.join(b), b.join(a), "join not commutative for {a:?}/{b:?}");
                for &c in &vals {
                    assert_eq!(
                        a.join(b.join(c)),
                        a.join(b).join(c),
                        "join not associative for {a:?}/{b:?}/{c:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn atomic_expr_type_round_trips() {
        for t in [
            ExprType::Unknown,
            ExprType::Known(Cat::Ref),
            ExprType::Known(Cat::Int),
            ExprType::Known(Cat::Bool),
            ExprType::Known(Cat::Void),
        ] {
            let a = AtomicExprType::new(t);
            assert_eq!(a.load(), t);
            a.store(ExprType::Known(Cat::Ref));
            assert_eq!(a.load(), ExprType::Known(Cat::Ref));
        }
    }

    #[test]
    fn join_is_idempotent() {
        for t in [ExprType::Unknown, ExprType::Known(Cat::Int), ExprType::Known(Cat::Bool)] {
            assert_eq!(t.join(t), t);
        }
    }
}
