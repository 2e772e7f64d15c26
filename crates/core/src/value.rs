//! Runtime values.
//!
//! Only three shapes exist at the top level: bare `Int`, bare `Bool`, and
//! `Ref`, which wraps everything else (boxed primitives, strings, null, and
//! closures) behind one indirection so a `Ref`-typed slot can hold any of
//! them uniformly. This mirrors the closed category set in
//! [`crate::lattice::Cat`]: there is one runtime shape per lattice category
//! (`Void` never appears as a value — it only describes a control-flow
//! position that produces none).
//!
//! Boxing (`Int`/`Bool` -> `Ref`) preserves the primitive inside the `Ref`
//! shape as `RefValue::Int`/`RefValue::Bool`; unboxing (`Ref` -> `Int`/
//! `Bool`) succeeds only if the boxed payload matches the requested
//! category, and fails otherwise — that failure is exactly what raises a
//! square-peg signal in specialized code (see `kestrel_compiler`).

use std::fmt;
use std::sync::Arc;

use crate::lattice::Cat;

/// The opaque identity of a top-level function, assigned by the function
/// registry when a function is defined. Stable for the lifetime of the
/// process; never reused even after a Nexus is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// A materialized closure value: a function identity plus the values it
/// captured at the point its `Closure` expression node ran.
///
/// This is intentionally inert data — it carries no dispatch logic. Turning
/// a `ClosureValue` into something callable is `kestrel-runtime`'s job
/// (`Closure::invoke`, which looks the function id up in the function
/// registry to find its `Nexus`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureValue {
    pub function: FunctionId,
    pub copied_values: Arc<[Value]>,
}

/// Everything a `Ref`-categorized slot can hold: boxed primitives plus the
/// shapes that only ever exist boxed.
#[derive(Debug, Clone, PartialEq)]
pub enum RefValue {
    /// The letrec pre-initialization default, and the result of reading an
    /// as-yet-unset boxed cell. Never produced by user code directly.
    Null,
    /// A boxed integer — produced by the `Int -> Ref` bridge.
    Int(i64),
    /// A boxed boolean — produced by the `Bool -> Ref` bridge.
    Bool(bool),
    /// An immutable string constant. `Arc<str>` for cheap cloning — ref
    /// values are handed around a lot during boxing/unboxing bridges.
    Str(Arc<str>),
    Closure(Arc<ClosureValue>),
}

impl fmt::Display for RefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefValue::Null => f.write_str("null"),
            RefValue::Int(n) => write!(f, "{n}"),
            RefValue::Bool(b) => write!(f, "{b}"),
            RefValue::Str(s) => write!(f, "{s:?}"),
            RefValue::Closure(c) => write!(f, "<closure {}>", c.function),
        }
    }
}

/// A runtime value. Bare `Int`/`Bool` variants are the primitive
/// specialized shapes; `Ref` is the boxed/generic shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Ref(RefValue),
}

impl Value {
    pub fn cat(&self) -> Cat {
        match self {
            Value::Int(_) => Cat::Int,
            Value::Bool(_) => Cat::Bool,
            Value::Ref(_) => Cat::Ref,
        }
    }

    pub fn null() -> Value {
        Value::Ref(RefValue::Null)
    }

    pub fn string(s: impl Into<Arc<str>>) -> Value {
        Value::Ref(RefValue::Str(s.into()))
    }

    pub fn closure(function: FunctionId, copied_values: Vec<Value>) -> Value {
        Value::Ref(RefValue::Closure(Arc::new(ClosureValue {
            function,
            copied_values: copied_values.into(),
        })))
    }

    /// Unwrap as an int. `None` covers both "this is a bare Bool" and "this
    /// is a Ref that isn't a boxed int" — callers that need to distinguish
    /// raise their own square-peg signal either way.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Ref(RefValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Ref(RefValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Arc<ClosureValue>> {
        match self {
            Value::Ref(RefValue::Closure(c)) => Some(c),
            _ => None,
        }
    }

    /// Box a primitive into its `Ref` shape. A no-op for values already
    /// `Ref`-shaped (boxing is idempotent).
    pub fn boxed(self) -> Value {
        match self {
            Value::Int(n) => Value::Ref(RefValue::Int(n)),
            Value::Bool(b) => Value::Ref(RefValue::Bool(b)),
            other @ Value::Ref(_) => other,
        }
    }

    /// `true` if this value, once boxed, round-trips through `as_int`.
    pub fn is_int_like(&self) -> bool {
        matches!(self, Value::Int(_)) || matches!(self, Value::Ref(RefValue::Int(_)))
    }

    pub fn is_bool_like(&self) -> bool {
        matches!(self, Value::Bool(_)) || matches!(self, Value::Ref(RefValue::Bool(_)))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Ref(r) => write!(f, "{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cat_matches_shape() {
        assert_eq!(Value::Int(1).cat(), Cat::Int);
        assert_eq!(Value::Bool(true).cat(), Cat::Bool);
        assert_eq!(Value::null().cat(), Cat::Ref);
    }

    #[test]
    fn boxing_int_round_trips() {
        let boxed = Value::Int(42).boxed();
        assert_eq!(boxed.cat(), Cat::Ref);
        assert_eq!(boxed.as_int(), Some(42));
    }

    #[test]
    fn boxing_bool_round_trips() {
        let boxed = Value::Bool(true).boxed();
        assert_eq!(boxed.cat(), Cat::Ref);
        assert_eq!(boxed.as_bool(), Some(true));
    }

    #[test]
    fn boxing_is_idempotent_on_refs() {
        let already_boxed = Value::string("hi");
        assert_eq!(already_boxed.clone().boxed(), already_boxed);
    }

    #[test]
    fn mismatched_unwrap_is_none() {
        let boxed_bool = Value::Bool(true).boxed();
        assert_eq!(boxed_bool.as_int(), None);
    }

    #[test]
    fn closures_carry_copied_values() {
        let v = Value::closure(FunctionId(3), vec![Value::Int(1), Value::Bool(false)]);
        let c = v.as_closure().unwrap();
        assert_eq!(c.function, FunctionId(3));
        assert_eq!(&*c.copied_values, &[Value::Int(1), Value::Bool(false)]);
    }
}
