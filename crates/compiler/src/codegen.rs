//! Lowers one function's [`ExprGraph`] to [`Writer`] instructions, twice:
//! once generically (every slot at `Ref`, never fails) and, when the
//! planner found anything worth specializing, once more with primitive
//! slots left unboxed.
//!
//! The two emissions share one recursive walk (`codegen_node`, parameterized
//! by [`Mode`]) rather than being separate passes, because the bridging
//! logic — what to do when a child produced one category and the context
//! needs another — is identical in shape between them; only which category
//! a `Ref`/variable/node resolves to changes.
//!
//! Four positions can observe a specialized primitive slot receiving a
//! boxed value it doesn't structurally expect (a `Let` or `letrec`
//! initializer, a `set!` value, or a function's return value) — those are
//! wrapped in a `begin_try`/`end_try` region whose handler re-boxes every
//! specialized-primitive slot and re-runs the remainder of the computation
//! in `Mode::Generic`. Every other bridge in a specialized routine is
//! assumed consistent by construction (the planner never specializes a
//! position to something its producer can't supply) and is emitted
//! unguarded.

use kestrel_core::graph::slot_cat;
use kestrel_core::{Cat, CompilerError, ConstValue, ExprGraph, ExprNode, NodeId, VarId};

use crate::planner::SpecializationPlanner;
use crate::primitive::PrimitiveRegistry;
use crate::reference_backend::{ReferenceBackend, Routine};
use crate::writer::Writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Generic,
    Specialized,
}

/// The generic routine, plus a specialized one when the planner found
/// anything worth specializing.
pub struct CompiledRoutines {
    pub generic: Routine,
    pub specialized: Option<Routine>,
}

/// Runs both analysis passes and emits both routines for one graph.
pub struct Codegen<'a> {
    primitives: &'a PrimitiveRegistry,
}

impl<'a> Codegen<'a> {
    pub fn new(primitives: &'a PrimitiveRegistry) -> Self {
        Codegen { primitives }
    }

    /// Assumes `graph`'s inferred types are already converged (see
    /// [`crate::inferencer::TypeInferencer`]).
    pub fn compile(&self, graph: &ExprGraph) -> Result<CompiledRoutines, CompilerError> {
        let planner = SpecializationPlanner::new(self.primitives);

        planner.plan_generic(graph);
        let generic = self.emit(graph, Mode::Generic, Cat::Ref)?;

        planner.plan_specialized(graph);
        let specialized = if planner.can_be_specialized(graph) {
            let return_cat = slot_cat_of_body(graph);
            tracing::debug!(function = %graph.function, ?return_cat, "emitting specialized routine");
            Some(self.emit(graph, Mode::Specialized, return_cat)?)
        } else {
            tracing::debug!(function = %graph.function, "no observations warrant specialization, generic only");
            None
        };

        Ok(CompiledRoutines { generic, specialized })
    }

    fn emit(&self, graph: &ExprGraph, mode: Mode, return_cat: Cat) -> Result<Routine, CompilerError> {
        let mut w = ReferenceBackend::new(graph.var_count() as u32);
        let result_cat = codegen_node(&mut w, graph, self.primitives, graph.body, mode, return_cat)?;
        // `graph.body` is almost always a `Return`, which already emits and
        // leaves nothing to return again; a body that falls off the end
        // without an explicit return (a bare trailing expression) still
        // needs one.
        if !matches!(graph.node(graph.body), ExprNode::Return(_)) {
            w.emit_return(result_cat);
        }
        Ok(w.finish())
    }
}

fn slot_cat_of_body(graph: &ExprGraph) -> Cat {
    graph.node_specialized(graph.body).cat_of().unwrap_or(Cat::Ref)
}

fn is_primitive_cat(c: Cat) -> bool {
    matches!(c, Cat::Int | Cat::Bool)
}

/// Every variable whose specialized category is a primitive — the set a
/// recovery handler must re-box before handing control to the generic
/// continuation, since generic code expects every slot to be `Ref`.
fn specialized_primitive_slots(graph: &ExprGraph) -> Vec<u32> {
    (0..graph.var_count() as u32)
        .filter(|&i| is_primitive_cat(slot_cat(graph.var(VarId::from_raw(i)))))
        .collect()
}

/// Emits whatever conversion takes a value from `from` to `to`, with no
/// recovery handling — correct wherever a mismatch can only mean a bug in
/// the planner or this module, never a runtime condition to recover from.
fn bridge_plain(w: &mut dyn Writer, from: Cat, to: Cat) -> Result<(), CompilerError> {
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (Cat::Int, Cat::Ref) | (Cat::Bool, Cat::Ref) => {
            w.box_value(from);
            Ok(())
        }
        (Cat::Ref, Cat::Int) | (Cat::Ref, Cat::Bool) => {
            w.unwrap_or_throw(to);
            Ok(())
        }
        (Cat::Int, Cat::Bool) | (Cat::Bool, Cat::Int) => {
            w.box_value(from);
            w.unwrap_or_throw(to);
            Ok(())
        }
        _ => Err(CompilerError::NoBridge { from, to }),
    }
}

fn target_cat(graph: &ExprGraph, id: NodeId, mode: Mode) -> Cat {
    match mode {
        Mode::Generic => Cat::Ref,
        Mode::Specialized => graph.node_specialized(id).cat_of().unwrap_or(Cat::Ref),
    }
}

fn const_native_cat(cv: &ConstValue) -> Cat {
    match cv {
        ConstValue::Int(_) => Cat::Int,
        ConstValue::Bool(_) => Cat::Bool,
        ConstValue::Str(_) | ConstValue::Null => Cat::Ref,
    }
}

pub fn codegen_node(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    id: NodeId,
    mode: Mode,
    return_cat: Cat,
) -> Result<Cat, CompilerError> {
    let target = target_cat(graph, id, mode);
    match graph.node(id) {
        ExprNode::Const(cv) => {
            w.load_const(cv.clone());
            bridge_plain(w, const_native_cat(cv), target)?;
            Ok(target)
        }
        ExprNode::GetVar(var) => {
            let var_cat = slot_of(graph, *var, mode);
            w.load_local(graph.var(*var).index(), var_cat);
            bridge_plain(w, var_cat, target)?;
            Ok(target)
        }
        ExprNode::SetVar { var, value } => {
            codegen_set(w, graph, primitives, *var, *value, mode, return_cat)?;
            Ok(Cat::Void)
        }
        ExprNode::Let { var, init, body, is_rec } => {
            codegen_let(w, graph, primitives, *var, *init, *body, *is_rec, mode, return_cat)
        }
        ExprNode::If { cond, then_branch, else_branch } => {
            codegen_if(w, graph, primitives, *cond, *then_branch, *else_branch, id, mode, return_cat)
        }
        ExprNode::Block(exprs) => codegen_block(w, graph, primitives, exprs, mode, return_cat),
        ExprNode::Return(value) => {
            codegen_return(w, graph, primitives, *value, mode, return_cat)?;
            Ok(Cat::Void)
        }
        ExprNode::Primitive1 { op, arg } => {
            let arg_cat = codegen_node(w, graph, primitives, *arg, mode, return_cat)?;
            let p = primitives
                .lookup(op)
                .ok_or_else(|| CompilerError::MalformedGraph(format!("unknown primitive `{op}`")))?;
            let result_cat = p.generate(w, &[arg_cat])?;
            bridge_plain(w, result_cat, target)?;
            Ok(target)
        }
        ExprNode::Primitive2 { op, arg1, arg2 } => {
            let a = codegen_node(w, graph, primitives, *arg1, mode, return_cat)?;
            let b = codegen_node(w, graph, primitives, *arg2, mode, return_cat)?;
            // arg1/arg2 specialize independently; a primitive call itself is
            // never the site of a recoverable type guard, so mismatched
            // operand categories are unified here rather than left for
            // `Primitive::generate` to reject.
            let b = if b == a {
                b
            } else {
                bridge_plain(w, b, a)?;
                a
            };
            let p = primitives
                .lookup(op)
                .ok_or_else(|| CompilerError::MalformedGraph(format!("unknown primitive `{op}`")))?;
            let result_cat = p.generate(w, &[a, b])?;
            bridge_plain(w, result_cat, target)?;
            Ok(target)
        }
        ExprNode::Call0 { func } => {
            codegen_call(w, graph, primitives, *func, &[], id, mode, return_cat, target)
        }
        ExprNode::Call1 { func, arg0 } => {
            codegen_call(w, graph, primitives, *func, &[*arg0], id, mode, return_cat, target)
        }
        ExprNode::Call2 { func, arg0, arg1 } => {
            codegen_call(w, graph, primitives, *func, &[*arg0, *arg1], id, mode, return_cat, target)
        }
        ExprNode::DirectFunction(function) => {
            w.make_closure(*function, vec![]);
            bridge_plain(w, Cat::Ref, target)?;
            Ok(target)
        }
        ExprNode::Closure { function, copied_outers } => {
            let slots = copied_outers.iter().map(|v| graph.var(*v).index()).collect();
            w.make_closure(*function, slots);
            bridge_plain(w, Cat::Ref, target)?;
            Ok(target)
        }
    }
}

fn slot_of(graph: &ExprGraph, var: VarId, mode: Mode) -> Cat {
    match mode {
        Mode::Generic => Cat::Ref,
        Mode::Specialized => slot_cat(graph.var(var)),
    }
}

#[allow(clippy::too_many_arguments)]
fn codegen_call(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    func: NodeId,
    args: &[NodeId],
    call_site: NodeId,
    mode: Mode,
    return_cat: Cat,
    target: Cat,
) -> Result<Cat, CompilerError> {
    if let ExprNode::DirectFunction(function) = graph.node(func) {
        let function = *function;
        let arg_cats = args
            .iter()
            .map(|a| codegen_node(w, graph, primitives, *a, mode, return_cat))
            .collect::<Result<Vec<_>, _>>()?;
        w.invoke_static(function, arg_cats, Cat::Ref);
        bridge_plain(w, Cat::Ref, target)?;
        return Ok(target);
    }

    let func_cat = codegen_node(w, graph, primitives, func, mode, return_cat)?;
    bridge_plain(w, func_cat, Cat::Ref)?;
    let arg_cats = args
        .iter()
        .map(|a| codegen_node(w, graph, primitives, *a, mode, return_cat))
        .collect::<Result<Vec<_>, _>>()?;
    w.invoke_dynamic(call_site.index(), arg_cats, Cat::Ref);
    bridge_plain(w, Cat::Ref, target)?;
    Ok(target)
}

#[allow(clippy::too_many_arguments)]
fn codegen_set(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    var: VarId,
    value: NodeId,
    mode: Mode,
    return_cat: Cat,
) -> Result<(), CompilerError> {
    let var_cat = slot_of(graph, var, mode);
    let value_cat = codegen_node(w, graph, primitives, value, mode, return_cat)?;
    if mode == Mode::Specialized && is_primitive_cat(var_cat) && value_cat == Cat::Ref {
        recover_around(w, graph, var_cat, |w| {
            w.store_local(graph.var(var).index(), var_cat);
        });
    } else {
        bridge_plain(w, value_cat, var_cat)?;
        w.store_local(graph.var(var).index(), var_cat);
    }
    Ok(())
}

/// Wraps a guarded unwrap-then-store in a recovery region whose handler
/// re-boxes every specialized-primitive slot and stores the (already
/// boxed) offending value into the same slot as `Ref` — the caller's
/// enclosing construct is responsible for continuing the computation in
/// `Mode::Generic` from that point on.
fn recover_around(w: &mut dyn Writer, graph: &ExprGraph, to: Cat, store_normally: impl FnOnce(&mut dyn Writer)) {
    let handler = w.new_label();
    w.begin_try(handler, specialized_primitive_slots(graph));
    w.unwrap_or_throw(to);
    store_normally(w);
    w.end_try();
}

#[allow(clippy::too_many_arguments)]
fn codegen_let(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    var: VarId,
    init: NodeId,
    body: NodeId,
    is_rec: bool,
    mode: Mode,
    return_cat: Cat,
) -> Result<Cat, CompilerError> {
    let var_cat = slot_of(graph, var, mode);
    let var_slot = graph.var(var).index();

    if is_rec {
        let default = match var_cat {
            Cat::Int => ConstValue::Int(0),
            Cat::Bool => ConstValue::Bool(false),
            Cat::Ref | Cat::Void => ConstValue::Null,
        };
        w.load_const(default);
        w.store_local(var_slot, var_cat);
    }

    let init_cat = codegen_node(w, graph, primitives, init, mode, return_cat)?;

    if mode == Mode::Specialized && is_primitive_cat(var_cat) && init_cat == Cat::Ref {
        let handler = w.new_label();
        w.begin_try(handler, specialized_primitive_slots(graph));
        w.unwrap_or_throw(var_cat);
        w.store_local(var_slot, var_cat);
        w.end_try();
        let normal_cat = codegen_node(w, graph, primitives, body, Mode::Specialized, return_cat)?;
        let end = w.new_label();
        w.jump(end);
        w.mark_label(handler);
        w.store_local(var_slot, Cat::Ref);
        codegen_node(w, graph, primitives, body, Mode::Generic, return_cat)?;
        w.mark_label(end);
        Ok(normal_cat)
    } else {
        bridge_plain(w, init_cat, var_cat)?;
        w.store_local(var_slot, var_cat);
        codegen_node(w, graph, primitives, body, mode, return_cat)
    }
}

fn codegen_block(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    exprs: &[NodeId],
    mode: Mode,
    return_cat: Cat,
) -> Result<Cat, CompilerError> {
    if exprs.is_empty() {
        return Ok(Cat::Void);
    }

    for (i, &e) in exprs.iter().enumerate() {
        let is_last = i + 1 == exprs.len();
        let rest = &exprs[i + 1..];

        if let (ExprNode::SetVar { var, value }, Mode::Specialized) = (graph.node(e), mode) {
            let var = *var;
            let value = *value;
            let var_cat = slot_of(graph, var, mode);
            let value_cat = codegen_node(w, graph, primitives, value, mode, return_cat)?;
            if is_primitive_cat(var_cat) && value_cat == Cat::Ref {
                let handler = w.new_label();
                w.begin_try(handler, specialized_primitive_slots(graph));
                w.unwrap_or_throw(var_cat);
                w.store_local(graph.var(var).index(), var_cat);
                w.end_try();
                let normal_cat = if rest.is_empty() {
                    Cat::Void
                } else {
                    codegen_block(w, graph, primitives, rest, Mode::Specialized, return_cat)?
                };
                let end = w.new_label();
                w.jump(end);
                w.mark_label(handler);
                w.store_local(graph.var(var).index(), Cat::Ref);
                if !rest.is_empty() {
                    codegen_block(w, graph, primitives, rest, Mode::Generic, return_cat)?;
                }
                w.mark_label(end);
                return Ok(normal_cat);
            } else {
                bridge_plain(w, value_cat, var_cat)?;
                w.store_local(graph.var(var).index(), var_cat);
                if is_last {
                    return Ok(Cat::Void);
                }
            }
        } else {
            let cat = codegen_node(w, graph, primitives, e, mode, return_cat)?;
            if is_last {
                return Ok(cat);
            }
            if cat != Cat::Void {
                w.pop();
            }
        }
    }

    Ok(Cat::Void)
}

fn codegen_return(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    value: NodeId,
    mode: Mode,
    return_cat: Cat,
) -> Result<(), CompilerError> {
    let value_cat = codegen_node(w, graph, primitives, value, mode, return_cat)?;
    if mode == Mode::Specialized && is_primitive_cat(return_cat) && value_cat == Cat::Ref {
        let handler = w.new_label();
        w.begin_try(handler, specialized_primitive_slots(graph));
        w.unwrap_or_throw(return_cat);
        w.emit_return(return_cat);
        // Unreachable after an unconditional return; the handler below is
        // the only path that still needs emitting.
        w.mark_label(handler);
        w.emit_return(Cat::Ref);
    } else {
        bridge_plain(w, value_cat, return_cat)?;
        w.emit_return(return_cat);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn codegen_if(
    w: &mut dyn Writer,
    graph: &ExprGraph,
    primitives: &PrimitiveRegistry,
    cond: NodeId,
    then_branch: NodeId,
    else_branch: NodeId,
    id: NodeId,
    mode: Mode,
    return_cat: Cat,
) -> Result<Cat, CompilerError> {
    let then_label = w.new_label();
    let else_label = w.new_label();
    let end_label = w.new_label();

    let mut handled = false;
    if mode == Mode::Specialized {
        if let ExprNode::Primitive2 { op, arg1, arg2 } = graph.node(cond) {
            if let Some(p) = primitives.lookup(op) {
                if let Some(if_aware) = p.as_if_aware() {
                    let a = codegen_node(w, graph, primitives, *arg1, mode, return_cat)?;
                    let b = codegen_node(w, graph, primitives, *arg2, mode, return_cat)?;
                    if if_aware.optimized_branch(w, &[a, b], then_label, else_label) {
                        handled = true;
                    } else {
                        let cond_cat = p.generate(w, &[a, b])?;
                        bridge_plain(w, cond_cat, Cat::Bool)?;
                        w.jump_if_false(else_label);
                        handled = true;
                    }
                }
            }
        }
    }
    if !handled {
        let cond_cat = codegen_node(w, graph, primitives, cond, mode, return_cat)?;
        bridge_plain(w, cond_cat, Cat::Bool)?;
        w.jump_if_false(else_label);
    }

    let target = target_cat(graph, id, mode);

    w.mark_label(then_label);
    let then_cat = codegen_node(w, graph, primitives, then_branch, mode, return_cat)?;
    bridge_plain(w, then_cat, target)?;
    w.jump(end_label);

    w.mark_label(else_label);
    let else_cat = codegen_node(w, graph, primitives, else_branch, mode, return_cat)?;
    bridge_plain(w, else_cat, target)?;

    w.mark_label(end_label);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{FunctionId, GraphBuilder, Value};

    fn fib_graph() -> (ExprGraph, FunctionId) {
        let mut b = GraphBuilder::new(FunctionId(7));
        let n = b.declare_param("n");
        let n_ref1 = b.get_var(n);
        let two = b.const_int(2);
        let cond = b.primitive2("<", n_ref1, two);
        let one_a = b.const_int(1);
        let n_ref2 = b.get_var(n);
        let n_ref3 = b.get_var(n);
        let one_b = b.const_int(1);
        let n_minus_1 = b.primitive2("-", n_ref2, one_b);
        let self_fn = b.direct_function(FunctionId(7));
        let recurse = b.call1(self_fn, n_minus_1);
        let _ = n_ref3;
        // `If` is not atomic, so the body is the bare trailing `if` rather
        // than wrapped in `return_` — codegen appends the implicit return.
        let body = b.if_(cond, one_a, recurse);
        (b.finish(body), FunctionId(7))
    }

    fn identity_graph() -> ExprGraph {
        let mut b = GraphBuilder::new(FunctionId(1));
        let x = b.declare_param("x");
        let v = b.get_var(x);
        let body = b.return_(v);
        b.finish(body)
    }

    #[test]
    fn generic_emission_never_fails_even_unspecialized() {
        let graph = identity_graph();
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let codegen = Codegen::new(&primitives);
        let compiled = codegen.compile(&graph).unwrap();
        assert!(!compiled.generic.instrs.is_empty());
    }

    #[test]
    fn no_specialization_without_observations() {
        let graph = identity_graph();
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let codegen = Codegen::new(&primitives);
        let compiled = codegen.compile(&graph).unwrap();
        assert!(compiled.specialized.is_none());
    }

    #[test]
    fn pure_int_profile_yields_a_specialized_routine() {
        let graph = identity_graph();
        graph.var(VarId::from_raw(0)).profile.record(&Value::Int(1));
        graph.var(VarId::from_raw(0)).profile.record(&Value::Int(2));
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let codegen = Codegen::new(&primitives);
        let compiled = codegen.compile(&graph).unwrap();
        assert!(compiled.specialized.is_some());
    }

    #[test]
    fn primitive_call_over_independently_specialized_int_and_bool_operands_compiles() {
        let mut b = GraphBuilder::new(FunctionId(43));
        let x = b.declare_param("x");
        let y = b.declare_param("y");
        let x_ref = b.get_var(x);
        let y_ref = b.get_var(y);
        let eq = b.primitive2("=", x_ref, y_ref);
        let body = b.return_(eq);
        let graph = b.finish(body);

        for _ in 0..5 {
            graph.var(VarId::from_raw(0)).profile.record(&Value::Int(1));
            graph.var(VarId::from_raw(1)).profile.record(&Value::Bool(true));
        }

        let primitives = PrimitiveRegistry::with_standard_primitives();
        let inferencer = crate::inferencer::TypeInferencer::new(&primitives);
        inferencer.infer(&graph, "mixed_eq").unwrap();

        let codegen = Codegen::new(&primitives);
        let compiled = codegen.compile(&graph).unwrap();
        assert!(compiled.specialized.is_some());
    }

    #[test]
    fn letrec_pre_init_uses_the_slot_cat_default_not_a_boxed_null() {
        let mut b = GraphBuilder::new(FunctionId(42));
        let v = b.declare_local("v");
        let one = b.const_int(1);
        let body = b.get_var(v);
        let node = b.letrec(v, one, body);
        let graph = b.finish(node);
        for _ in 0..5 {
            graph.var(VarId::from_raw(0)).profile.record(&Value::Int(1));
        }

        let primitives = PrimitiveRegistry::with_standard_primitives();
        let inferencer = crate::inferencer::TypeInferencer::new(&primitives);
        inferencer.infer(&graph, "letrec_v").unwrap();

        let codegen = Codegen::new(&primitives);
        let compiled = codegen.compile(&graph).unwrap();
        let specialized = compiled.specialized.expect("pure int profile should specialize");

        // The pre-init default must match the slot's specialized category: a
        // boxed `Null` stored into a slot every later `GetVar` trusts to
        // hold a raw `Int` would be silent type confusion.
        let first_const = specialized.instrs.iter().find_map(|i| match i {
            crate::reference_backend::Instr::LoadConst(cv) => Some(cv.clone()),
            _ => None,
        });
        assert_eq!(first_const, Some(ConstValue::Int(0)));
    }

    #[test]
    fn fib_like_graph_compiles_with_if_fusion_in_specialized_mode() {
        let (graph, _) = fib_graph();
        graph.var(VarId::from_raw(0)).profile.record(&Value::Int(5));
        graph.var(VarId::from_raw(0)).profile.record(&Value::Int(6));
        let primitives = PrimitiveRegistry::with_standard_primitives();

        let inferencer = crate::inferencer::TypeInferencer::new(&primitives);
        inferencer.infer(&graph, "fib").unwrap();

        let codegen = Codegen::new(&primitives);
        let compiled = codegen.compile(&graph).unwrap();
        let specialized = compiled.specialized.expect("pure int profile should specialize");
        let has_fused_branch = specialized
            .instrs
            .iter()
            .any(|i| matches!(i, crate::reference_backend::Instr::CompareAndBranch(op, _, _) if &**op == "<"));
        assert!(has_fused_branch);
    }
}
