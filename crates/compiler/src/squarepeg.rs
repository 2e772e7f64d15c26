//! The internal control-flow signal a type-guard failure raises inside
//! specialized code.
//!
//! `SquarePegException` must never cross a public API: it is caught by the
//! executor inside the same routine it was raised in and converted into a
//! jump to the corresponding recovery continuation. It deliberately has no
//! `Display`/`Error` impl and isn't re-exported from [`crate`]'s public
//! surface.

use kestrel_core::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SquarePegException {
    pub offending_value: Value,
}

impl SquarePegException {
    pub(crate) fn new(offending_value: Value) -> Self {
        SquarePegException { offending_value }
    }
}
