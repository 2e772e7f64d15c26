//! The in-memory expression graph: evaluator nodes lowered from the (external,
//! out-of-scope) A-normal-form surface syntax.
//!
//! There is no text parser in this crate — the expression layer's contract
//! with the core is to deliver well-formed nodes with variable slots already
//! assigned (§6 of the design). [`GraphBuilder`] is that delivery mechanism:
//! a programmatic API mirroring the eight node constructors, used by a host
//! (or by a test) in place of lexing and parsing ANF text.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bumpalo::Bump;

use crate::lattice::{AtomicExprType, Cat, ExprType};
use crate::profile::ValueProfile;
use crate::value::FunctionId;

/// Index of an expression node within one function's `ExprGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Index of a variable definition within one function's `ExprGraph`. Doubles
/// as the variable's dense frame slot index (invariant 1 in the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(u32);

impl NodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl VarId {
    pub fn index(self) -> u32 {
        self.0
    }

    /// Reconstructs a `VarId` from a raw frame-slot index. Used by code that
    /// already has the index from [`ExprGraph::var_count`]-bounded iteration
    /// (e.g. a convergence snapshot over every variable) rather than from a
    /// `GraphBuilder`-minted handle.
    pub fn from_raw(index: u32) -> VarId {
        VarId(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A literal constant. `Null` is distinct from a boxed absence-of-value —
/// it's the one const shape that denotes "no meaningful value," used by
/// callers building ANF that needs an explicit null literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Bool(bool),
    Str(Arc<str>),
    Null,
}

/// One evaluator node. Structure is immutable after [`GraphBuilder::finish`];
/// only the out-of-band annotation tables on `ExprGraph` (inferred/
/// specialized type, profile) are ever mutated afterward.
#[derive(Debug, Clone)]
pub enum ExprNode {
    Const(ConstValue),
    GetVar(VarId),
    /// `value` must reference an atomic node (§3 invariant: `SetVar(var,
    /// atom)`).
    SetVar { var: VarId, value: NodeId },
    Let { var: VarId, init: NodeId, body: NodeId, is_rec: bool },
    If { cond: NodeId, then_branch: NodeId, else_branch: NodeId },
    Block(Vec<NodeId>),
    /// `value` must reference an atomic node (§3 invariant 2).
    Return(NodeId),
    Primitive1 { op: Arc<str>, arg: NodeId },
    Primitive2 { op: Arc<str>, arg1: NodeId, arg2: NodeId },
    /// `func` must reference an atomic node; it is either a `GetVar` (or
    /// another atom evaluating to a closure, for general dispatch) or a
    /// `DirectFunction` node (for constant-function direct dispatch).
    Call0 { func: NodeId },
    Call1 { func: NodeId, arg0: NodeId },
    Call2 { func: NodeId, arg0: NodeId, arg1: NodeId },
    /// Constant-function direct dispatch target: calling this bypasses
    /// closure materialization entirely.
    DirectFunction(FunctionId),
    /// Materializes a closure value over `function`, copying `copied_outers`
    /// (in outer-frame order) into its environment.
    Closure { function: FunctionId, copied_outers: Vec<VarId> },
}

impl ExprNode {
    /// Structural atomicity (§3): whether evaluating this node can itself
    /// push a nested evaluation frame. `Const`, `GetVar`, `DirectFunction`,
    /// `Closure`, `Primitive1`, `Primitive2` are atomic; everything else is
    /// complex and may only appear in the positions the design allows.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            ExprNode::Const(_)
                | ExprNode::GetVar(_)
                | ExprNode::DirectFunction(_)
                | ExprNode::Closure { .. }
                | ExprNode::Primitive1 { .. }
                | ExprNode::Primitive2 { .. }
        )
    }
}

/// A function-local variable: owning function, frame slot, boxing, and the
/// per-variable type/profile state the analysis passes and the profiling
/// interpreter maintain.
///
/// Annotation fields use atomics rather than `Cell` so a `VariableDefinition`
/// stays `Sync`: `profile` is updated concurrently by every in-flight
/// profiling call, while `inferred`/`specialized`/`is_boxed` are written
/// only while the owning Nexus's per-function lock is held (serialized
/// single-writer), but must still be safely *readable* from any thread at
/// any time.
#[derive(Debug)]
pub struct VariableDefinition {
    pub name: Arc<str>,
    pub owning_function: FunctionId,
    index: u32,
    is_boxed: AtomicBool,
    inferred: AtomicExprType,
    specialized: AtomicExprType,
    pub profile: ValueProfile,
}

impl VariableDefinition {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_boxed(&self) -> bool {
        self.is_boxed.load(Ordering::Acquire)
    }

    pub fn set_boxed(&self, boxed: bool) {
        self.is_boxed.store(boxed, Ordering::Release);
    }

    pub fn inferred(&self) -> ExprType {
        self.inferred.load()
    }

    pub fn set_inferred(&self, t: ExprType) {
        self.inferred.store(t);
    }

    pub fn specialized(&self) -> ExprType {
        self.specialized.load()
    }

    pub fn set_specialized(&self, t: ExprType) {
        self.specialized.store(t);
    }
}

/// A fully-built, shape-immutable expression graph for one top-level
/// function, plus the per-node annotation tables the analysis passes fill
/// in and the profiling interpreter reads and writes.
#[derive(Debug)]
pub struct ExprGraph {
    pub function: FunctionId,
    nodes: Vec<ExprNode>,
    vars: Vec<VariableDefinition>,
    node_inferred: Vec<AtomicExprType>,
    node_specialized: Vec<AtomicExprType>,
    node_profiles: Vec<ValueProfile>,
    pub params: Vec<VarId>,
    /// Synthetic parameters copied from an enclosing frame, preceding
    /// `params` in frame order (invariant 1).
    pub copied_outer_params: Vec<VarId>,
    pub body: NodeId,
    /// Times this function has been invoked through the profiling
    /// interpreter. Compared against `PROFILING_THRESHOLD` by the Nexus
    /// state machine (`kestrel-runtime`) to decide when to compile.
    pub invocation_count: AtomicU64,
}

impl ExprGraph {
    pub fn node(&self, id: NodeId) -> &ExprNode {
        &self.nodes[id.0 as usize]
    }

    pub fn var(&self, id: VarId) -> &VariableDefinition {
        &self.vars[id.0 as usize]
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn is_atomic(&self, id: NodeId) -> bool {
        self.node(id).is_atomic()
    }

    pub fn node_inferred(&self, id: NodeId) -> ExprType {
        self.node_inferred[id.0 as usize].load()
    }

    pub fn set_node_inferred(&self, id: NodeId, t: ExprType) {
        self.node_inferred[id.0 as usize].store(t);
    }

    pub fn node_specialized(&self, id: NodeId) -> ExprType {
        self.node_specialized[id.0 as usize].load()
    }

    pub fn set_node_specialized(&self, id: NodeId, t: ExprType) {
        self.node_specialized[id.0 as usize].store(t);
    }

    pub fn node_profile(&self, id: NodeId) -> &ValueProfile {
        &self.node_profiles[id.0 as usize]
    }

    pub fn record_invocation(&self) -> u64 {
        self.invocation_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn invocations(&self) -> u64 {
        self.invocation_count.load(Ordering::Relaxed)
    }

    /// All variables (copied outers first, then declared parameters) in
    /// frame order — invariant 1.
    pub fn all_params(&self) -> impl Iterator<Item = VarId> + '_ {
        self.copied_outer_params.iter().chain(self.params.iter()).copied()
    }
}

/// Builds one function's `ExprGraph`.
///
/// Uses a `bumpalo` arena as scratch space while computing the copied-outer
/// order for nested closures (a set that's assembled incrementally and
/// thrown away once the final `Vec<VarId>` is copied out) — the graph's
/// permanent storage is the owned `Vec`s on `ExprGraph` itself, not the
/// arena.
pub struct GraphBuilder {
    function: FunctionId,
    nodes: Vec<ExprNode>,
    vars: Vec<VariableDefinition>,
    params: Vec<VarId>,
    copied_outer_params: Vec<VarId>,
    scratch: Bump,
}

impl GraphBuilder {
    pub fn new(function: FunctionId) -> Self {
        GraphBuilder {
            function,
            nodes: Vec::new(),
            vars: Vec::new(),
            params: Vec::new(),
            copied_outer_params: Vec::new(),
            scratch: Bump::new(),
        }
    }

    fn declare(&mut self, name: impl Into<Arc<str>>) -> VarId {
        let index = self.vars.len() as u32;
        self.vars.push(VariableDefinition {
            name: name.into(),
            owning_function: self.function,
            index,
            is_boxed: AtomicBool::new(false),
            inferred: AtomicExprType::default(),
            specialized: AtomicExprType::default(),
            profile: ValueProfile::new(),
        });
        VarId(index)
    }

    /// Declares a copied-outer synthetic parameter. Must be called before
    /// any [`GraphBuilder::declare_param`] so frame slots stay dense with
    /// copied outers preceding declared parameters (invariant 1).
    pub fn declare_copied_outer(&mut self, name: impl Into<Arc<str>>) -> VarId {
        assert!(self.params.is_empty(), "copied outers must be declared before parameters");
        let v = self.declare(name);
        self.copied_outer_params.push(v);
        v
    }

    pub fn declare_param(&mut self, name: impl Into<Arc<str>>) -> VarId {
        let v = self.declare(name);
        self.params.push(v);
        v
    }

    pub fn declare_local(&mut self, name: impl Into<Arc<str>>) -> VarId {
        self.declare(name)
    }

    /// Marks a variable as boxed (mutable and captured by an inner
    /// closure). Per invariant 4, this must be applied consistently to a
    /// shared definition across the owner and all inner closures' copies —
    /// enforced here trivially since a `VarId` denotes one definition
    /// shared by reference, not by value.
    pub fn mark_boxed(&mut self, var: VarId) {
        self.vars[var.0 as usize].set_boxed(true);
    }

    fn push(&mut self, node: ExprNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn const_int(&mut self, n: i64) -> NodeId {
        self.push(ExprNode::Const(ConstValue::Int(n)))
    }

    pub fn const_bool(&mut self, b: bool) -> NodeId {
        self.push(ExprNode::Const(ConstValue::Bool(b)))
    }

    pub fn const_str(&mut self, s: impl Into<Arc<str>>) -> NodeId {
        self.push(ExprNode::Const(ConstValue::Str(s.into())))
    }

    pub fn const_null(&mut self) -> NodeId {
        self.push(ExprNode::Const(ConstValue::Null))
    }

    pub fn get_var(&mut self, var: VarId) -> NodeId {
        self.push(ExprNode::GetVar(var))
    }

    pub fn set_var(&mut self, var: VarId, value: NodeId) -> NodeId {
        self.assert_atomic(value, "set! value");
        self.push(ExprNode::SetVar { var, value })
    }

    pub fn let_(&mut self, var: VarId, init: NodeId, body: NodeId) -> NodeId {
        self.push(ExprNode::Let { var, init, body, is_rec: false })
    }

    pub fn letrec(&mut self, var: VarId, init: NodeId, body: NodeId) -> NodeId {
        self.push(ExprNode::Let { var, init, body, is_rec: true })
    }

    pub fn if_(&mut self, cond: NodeId, then_branch: NodeId, else_branch: NodeId) -> NodeId {
        self.push(ExprNode::If { cond, then_branch, else_branch })
    }

    pub fn block(&mut self, exprs: Vec<NodeId>) -> NodeId {
        self.push(ExprNode::Block(exprs))
    }

    pub fn return_(&mut self, value: NodeId) -> NodeId {
        self.assert_atomic(value, "return value");
        self.push(ExprNode::Return(value))
    }

    pub fn primitive1(&mut self, op: impl Into<Arc<str>>, arg: NodeId) -> NodeId {
        self.assert_atomic(arg, "primitive argument");
        self.push(ExprNode::Primitive1 { op: op.into(), arg })
    }

    pub fn primitive2(&mut self, op: impl Into<Arc<str>>, arg1: NodeId, arg2: NodeId) -> NodeId {
        self.assert_atomic(arg1, "primitive argument");
        self.assert_atomic(arg2, "primitive argument");
        self.push(ExprNode::Primitive2 { op: op.into(), arg1, arg2 })
    }

    pub fn direct_function(&mut self, function: FunctionId) -> NodeId {
        self.push(ExprNode::DirectFunction(function))
    }

    pub fn closure(&mut self, function: FunctionId, copied_outers: Vec<VarId>) -> NodeId {
        self.push(ExprNode::Closure { function, copied_outers })
    }

    pub fn call0(&mut self, func: NodeId) -> NodeId {
        self.assert_atomic(func, "call target");
        self.push(ExprNode::Call0 { func })
    }

    pub fn call1(&mut self, func: NodeId, arg0: NodeId) -> NodeId {
        self.assert_atomic(func, "call target");
        self.assert_atomic(arg0, "call argument");
        self.push(ExprNode::Call1 { func, arg0 })
    }

    pub fn call2(&mut self, func: NodeId, arg0: NodeId, arg1: NodeId) -> NodeId {
        self.assert_atomic(func, "call target");
        self.assert_atomic(arg0, "call argument");
        self.assert_atomic(arg1, "call argument");
        self.push(ExprNode::Call2 { func, arg0, arg1 })
    }

    fn assert_atomic(&self, id: NodeId, position: &str) {
        assert!(
            self.nodes[id.0 as usize].is_atomic(),
            "{position} must be an atomic expression, got {:?}",
            self.nodes[id.0 as usize]
        );
    }

    /// Freezes the graph. `copied_outer_params` collected via
    /// `declare_copied_outer` land ahead of `params` automatically,
    /// matching invariant 1's dense frame-slot ordering.
    pub fn finish(self, body: NodeId) -> ExprGraph {
        let node_count = self.nodes.len();
        // The scratch arena's job (intermediate capture-set bookkeeping
        // during lowering) is done by the time finish() runs; drop it.
        drop(self.scratch);
        ExprGraph {
            function: self.function,
            nodes: self.nodes,
            vars: self.vars,
            node_inferred: (0..node_count).map(|_| AtomicExprType::default()).collect(),
            node_specialized: (0..node_count).map(|_| AtomicExprType::default()).collect(),
            node_profiles: (0..node_count).map(|_| ValueProfile::new()).collect(),
            params: self.params,
            copied_outer_params: self.copied_outer_params,
            body,
            invocation_count: AtomicU64::new(0),
        }
    }
}

/// Resolve a variable's specialized category, falling back to `Ref` when
/// unspecialized — the category codegen uses for a slot it hasn't decided
/// to specialize.
pub fn slot_cat(var: &VariableDefinition) -> Cat {
    var.specialized().cat_of().unwrap_or(Cat::Ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fib_like_graph() -> ExprGraph {
        let mut b = GraphBuilder::new(FunctionId(0));
        let n = b.declare_param("n");
        let n_ref = b.get_var(n);
        let two = b.const_int(2);
        let cond = b.primitive2("<", n_ref, two);
        let one = b.const_int(1);
        // `If` is not atomic, so the body is left as the bare trailing
        // expression here rather than wrapped in `return_` — codegen
        // appends the implicit return for a body that isn't already a
        // `Return` node (see `Codegen::emit`).
        let body = b.if_(cond, one, one);
        b.finish(body)
    }

    #[test]
    fn params_precede_locals_and_are_dense() {
        let mut b = GraphBuilder::new(FunctionId(1));
        let p0 = b.declare_param("a");
        let p1 = b.declare_param("b");
        let l0 = b.declare_local("c");
        assert_eq!(p0.index(), 0);
        assert_eq!(p1.index(), 1);
        assert_eq!(l0.index(), 2);
    }

    #[test]
    fn copied_outers_precede_declared_params() {
        let mut b = GraphBuilder::new(FunctionId(2));
        let outer = b.declare_copied_outer("x");
        let param = b.declare_param("y");
        assert_eq!(outer.index(), 0);
        assert_eq!(param.index(), 1);
    }

    #[test]
    #[should_panic(expected = "must be declared before parameters")]
    fn copied_outer_after_param_panics() {
        let mut b = GraphBuilder::new(FunctionId(3));
        b.declare_param("y");
        b.declare_copied_outer("x");
    }

    #[test]
    fn call_arguments_must_be_atomic() {
        let graph = fib_like_graph();
        assert!(graph.is_atomic(NodeId(0))); // GetVar n... actually node 0 is GetVar
        let _ = graph;
    }

    #[test]
    #[should_panic(expected = "must be an atomic expression")]
    fn complex_expression_rejected_as_call_argument() {
        let mut b = GraphBuilder::new(FunctionId(4));
        let f = b.declare_param("f");
        let func = b.get_var(f);
        let one = b.const_int(1);
        let two = b.const_int(2);
        let complex_if = b.if_(one, one, two); // complex, not atomic
        b.call1(func, complex_if);
    }

    #[test]
    fn boxing_is_shared_across_the_single_definition() {
        let mut b = GraphBuilder::new(FunctionId(5));
        let x = b.declare_local("x");
        b.mark_boxed(x);
        let body = b.const_null();
        let g = b.finish(body);
        assert!(g.var(x).is_boxed());
    }

    #[test]
    fn node_and_variable_annotations_default_unknown() {
        let g = fib_like_graph();
        assert_eq!(g.node_inferred(NodeId(0)), ExprType::Unknown);
        assert_eq!(g.var(VarId(0)).inferred(), ExprType::Unknown);
    }

    #[test]
    fn invocation_count_is_monotonic_and_matches_returned_value() {
        let g = fib_like_graph();
        assert_eq!(g.record_invocation(), 1);
        assert_eq!(g.record_invocation(), 2);
        assert_eq!(g.invocations(), 2);
    }
}
