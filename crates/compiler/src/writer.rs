//! The abstract instruction-emission contract codegen targets.
//!
//! This fixes the *contract*, not the encoding: a concrete backend (for
//! production use, an emitter targeting the host's class-file/bytecode
//! format; here, [`crate::reference_backend`]) implements [`Writer`] to
//! turn these calls into whatever it actually executes.

use kestrel_core::{Cat, ConstValue, FunctionId};

/// An opaque jump target, minted by [`Writer::new_label`] and fixed in
/// place by [`Writer::mark_label`]. Two-pass assembly: a label may be
/// referenced by a jump before it is marked.
pub type Label = u32;

/// Emits instructions for one routine (generic, specialized, or the
/// generic-mirror tail a specialized routine recovers into).
///
/// Every method appends to an implicit "current routine" instruction
/// stream and is object-safe (no generic parameters) so codegen can hold a
/// `&mut dyn Writer` without committing to one concrete backend.
pub trait Writer {
    /// Reserve a label, resolved to a concrete position by a later
    /// `mark_label` call.
    fn new_label(&mut self) -> Label;

    /// Fix `label` to the current emission position.
    fn mark_label(&mut self, label: Label);

    /// Push the value currently stored in local slot `slot`.
    fn load_local(&mut self, slot: u32, cat: Cat);

    /// Pop the top of stack into local slot `slot`.
    fn store_local(&mut self, slot: u32, cat: Cat);

    /// Push a literal constant.
    fn load_const(&mut self, value: ConstValue);

    /// Pop a primitive (`Int`/`Bool`) and push it boxed as `Ref`. A no-op
    /// if the backend's representation makes boxing implicit.
    fn box_value(&mut self, from: Cat);

    /// Pop a `Ref` and push it unwrapped to `to` (`Int` or `Bool`). Must
    /// raise the internal square-peg signal, not a user-visible error, on
    /// a category mismatch.
    fn unwrap_or_throw(&mut self, to: Cat);

    /// Unconditional jump.
    fn jump(&mut self, label: Label);

    /// Pop a `Bool` off the stack; jump to `label` if it is false, else
    /// fall through.
    fn jump_if_false(&mut self, label: Label);

    /// Emit a fused compare-and-branch for a two-operand comparison
    /// primitive (`op` is its name) over two already-stacked `Int`
    /// operands: falls through to `then_label`, jumps to `else_label`
    /// otherwise. Used by [`crate::primitive::IfAware`] implementations.
    fn compare_and_branch(&mut self, op: &str, then_label: Label, else_label: Label);

    /// Invoke the primitive named `name` over the top `arity` stack
    /// values (in argument order), pushing a `result_cat`-categorized
    /// result. The backend resolves `name` against whatever primitive
    /// registry it was constructed with.
    fn apply_primitive(&mut self, name: std::sync::Arc<str>, arity: u32, result_cat: Cat);

    /// Direct (non-virtual) dispatch to a known `FunctionId` — constant-
    /// function direct dispatch, bypassing closure materialization.
    fn invoke_static(&mut self, function: FunctionId, arg_cats: Vec<Cat>, ret_cat: Cat);

    /// Dispatch through a call site's inline cache. The leading operand on
    /// the stack is the closure being called; `site` identifies which
    /// call site's cache to consult/update.
    fn invoke_dynamic(&mut self, site: u32, arg_cats: Vec<Cat>, ret_cat: Cat);

    /// Materialize a closure: `copied_slots` names the local slots (in
    /// outer-frame order) to copy into the new closure's environment, then
    /// pushes the resulting closure value.
    fn make_closure(&mut self, function: FunctionId, copied_slots: Vec<u32>);

    /// Begin a recovery region: if `unwrap_or_throw` fails anywhere before
    /// the matching `end_try`, control transfers to `handler`, after
    /// re-boxing the local slots in `spill_slots` and pushing the
    /// unwrapped offending value.
    fn begin_try(&mut self, handler: Label, spill_slots: Vec<u32>);

    fn end_try(&mut self);

    /// Pop the top of stack and return it from the routine.
    fn emit_return(&mut self, cat: Cat);

    /// Discard the top of stack (used after a complex expression evaluated
    /// for effect only, e.g. a non-tail block element).
    fn pop(&mut self);
}
