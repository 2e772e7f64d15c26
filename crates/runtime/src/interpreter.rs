//! The tree-walking interpreter (§4.4): the baseline every compiled routine
//! must agree with, and the engine every function runs under before its
//! `Nexus` decides it's hot enough to compile.
//!
//! Two modes share one walk. Simple mode is a plain evaluator, used as the
//! correctness oracle compiled code is checked against — it never touches a
//! profile. Profiling mode additionally records the observed category at
//! every variable read/write and every evaluated expression, which is what
//! feeds [`kestrel_compiler::planner::SpecializationPlanner`] once a
//! function gets hot enough to compile.
//!
//! Atomic positions (`Const`, `GetVar`, `DirectFunction`, `Closure`,
//! `Primitive1`, `Primitive2`) can never themselves produce an early
//! `Return` — the grammar only allows `Return` to appear in complex
//! positions — so [`Interpreter::eval_atomic`] returns a bare `Value` while
//! [`Interpreter::eval`] threads a [`Flow`] through the complex positions
//! that do.

use kestrel_core::{ExprGraph, ExprNode, NodeId, RuntimeError, Value, VarId};
use kestrel_compiler::PrimitiveRegistry;

use crate::nexus::Nexus;
use crate::registry::RuntimeContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterMode {
    Simple,
    Profiling,
}

/// One evaluation step's outcome: either an ordinary value flowing to its
/// caller, or an early `Return` unwinding straight to the top of the current
/// function call.
enum Flow {
    Value(Value),
    Return(Value),
}

pub struct Interpreter<'a> {
    primitives: &'a PrimitiveRegistry,
    mode: InterpreterMode,
}

impl<'a> Interpreter<'a> {
    pub fn new(primitives: &'a PrimitiveRegistry, mode: InterpreterMode) -> Self {
        Interpreter { primitives, mode }
    }

    /// Runs `nexus`'s body to completion over `locals` (already populated
    /// with copied outers and arguments in frame order).
    pub fn run(&self, nexus: &Nexus, locals: &mut [Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
        let graph = nexus.graph();
        match self.eval(graph, nexus, graph.body, locals, ctx)? {
            Flow::Return(v) => Ok(v),
            Flow::Value(v) => Ok(v),
        }
    }

    fn profiling(&self) -> bool {
        matches!(self.mode, InterpreterMode::Profiling)
    }

    fn observe_node(&self, graph: &ExprGraph, id: NodeId, v: &Value) {
        if self.profiling() {
            graph.node_profile(id).record(v);
        }
    }

    fn observe_var(&self, graph: &ExprGraph, var: VarId, v: &Value) {
        if self.profiling() {
            graph.var(var).profile.record(v);
        }
    }

    /// Evaluates a node known to be structurally atomic: it can never
    /// unwind a `Return`, so this returns a plain `Value`.
    fn eval_atomic(&self, graph: &ExprGraph, nexus: &Nexus, id: NodeId, locals: &mut [Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
        let v = match graph.node(id) {
            ExprNode::Const(cv) => const_to_value(cv),
            ExprNode::GetVar(var) => {
                let v = locals[graph.var(*var).index() as usize].clone();
                self.observe_var(graph, *var, &v);
                v
            }
            ExprNode::DirectFunction(function) => Value::closure(*function, Vec::new()),
            ExprNode::Closure { function, copied_outers } => {
                let copied: Vec<Value> = copied_outers.iter().map(|v| locals[graph.var(*v).index() as usize].clone()).collect();
                Value::closure(*function, copied)
            }
            ExprNode::Primitive1 { op, arg } => {
                let a = self.eval_atomic(graph, nexus, *arg, locals, ctx)?;
                let primitive = ctx.primitives.lookup(op).ok_or_else(|| RuntimeError::new(format!("unknown primitive `{op}`")))?;
                primitive.apply(&[a])?
            }
            ExprNode::Primitive2 { op, arg1, arg2 } => {
                let a = self.eval_atomic(graph, nexus, *arg1, locals, ctx)?;
                let b = self.eval_atomic(graph, nexus, *arg2, locals, ctx)?;
                let primitive = ctx.primitives.lookup(op).ok_or_else(|| RuntimeError::new(format!("unknown primitive `{op}`")))?;
                primitive.apply(&[a, b])?
            }
            other => unreachable!("non-atomic node {other:?} evaluated in an atomic position"),
        };
        self.observe_node(graph, id, &v);
        Ok(v)
    }

    fn eval(&self, graph: &ExprGraph, nexus: &Nexus, id: NodeId, locals: &mut [Value], ctx: &RuntimeContext) -> Result<Flow, RuntimeError> {
        match graph.node(id) {
            ExprNode::Const(_)
            | ExprNode::GetVar(_)
            | ExprNode::DirectFunction(_)
            | ExprNode::Closure { .. }
            | ExprNode::Primitive1 { .. }
            | ExprNode::Primitive2 { .. } => Ok(Flow::Value(self.eval_atomic(graph, nexus, id, locals, ctx)?)),

            ExprNode::SetVar { var, value } => {
                let v = self.eval_atomic(graph, nexus, *value, locals, ctx)?;
                self.observe_var(graph, *var, &v);
                locals[graph.var(*var).index() as usize] = v;
                Ok(Flow::Value(Value::null()))
            }

            ExprNode::Let { var, init, body, is_rec } => {
                if *is_rec {
                    locals[graph.var(*var).index() as usize] = Value::null();
                }
                match self.eval(graph, nexus, *init, locals, ctx)? {
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Value(v) => {
                        self.observe_var(graph, *var, &v);
                        locals[graph.var(*var).index() as usize] = v;
                    }
                }
                self.eval(graph, nexus, *body, locals, ctx)
            }

            ExprNode::If { cond, then_branch, else_branch } => {
                let cond_v = self.eval_atomic(graph, nexus, *cond, locals, ctx)?;
                let taken = cond_v.as_bool().ok_or_else(|| RuntimeError::new(format!("if: condition {cond_v} is not a boolean")))?;
                if taken {
                    self.eval(graph, nexus, *then_branch, locals, ctx)
                } else {
                    self.eval(graph, nexus, *else_branch, locals, ctx)
                }
            }

            ExprNode::Block(exprs) => {
                let mut last = Value::null();
                for &e in exprs {
                    match self.eval(graph, nexus, e, locals, ctx)? {
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Value(v) => last = v,
                    }
                }
                Ok(Flow::Value(last))
            }

            ExprNode::Return(value) => {
                let v = self.eval_atomic(graph, nexus, *value, locals, ctx)?;
                Ok(Flow::Return(v))
            }

            ExprNode::Call0 { func } => Ok(Flow::Value(self.eval_call(graph, nexus, *func, &[], id, locals, ctx)?)),
            ExprNode::Call1 { func, arg0 } => Ok(Flow::Value(self.eval_call(graph, nexus, *func, &[*arg0], id, locals, ctx)?)),
            ExprNode::Call2 { func, arg0, arg1 } => Ok(Flow::Value(self.eval_call(graph, nexus, *func, &[*arg0, *arg1], id, locals, ctx)?)),
        }
    }

    /// `call_id` is the call node's own id — a `DirectFunction` target skips
    /// closure materialization entirely (§4.4), while anything else must
    /// evaluate to a closure and dispatches through this call's own inline
    /// cache, keyed on `call_id`, exactly as the compiled path's
    /// `InvokeDynamic` would.
    fn eval_call(
        &self,
        graph: &ExprGraph,
        nexus: &Nexus,
        func: NodeId,
        args: &[NodeId],
        call_id: NodeId,
        locals: &mut [Value],
        ctx: &RuntimeContext,
    ) -> Result<Value, RuntimeError> {
        if let ExprNode::DirectFunction(function) = graph.node(func) {
            let function = *function;
            let arg_values = args
                .iter()
                .map(|a| self.eval_atomic(graph, nexus, *a, locals, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            return ctx.registry.invoke(function, &arg_values, ctx);
        }

        let func_v = self.eval_atomic(graph, nexus, func, locals, ctx)?;
        let closure = func_v.as_closure().ok_or_else(|| RuntimeError::new(format!("call target {func_v} is not a closure")))?;
        let arg_values = args
            .iter()
            .map(|a| self.eval_atomic(graph, nexus, *a, locals, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let call_site = nexus.call_site(call_id.index(), ctx.config.cache_limit());
        call_site.dispatch(closure, &arg_values, ctx)
    }
}

fn const_to_value(cv: &kestrel_core::ConstValue) -> Value {
    match cv {
        kestrel_core::ConstValue::Int(n) => Value::Int(*n),
        kestrel_core::ConstValue::Bool(b) => Value::Bool(*b),
        kestrel_core::ConstValue::Str(s) => Value::string(s.clone()),
        kestrel_core::ConstValue::Null => Value::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_compiler::KestrelConfig;
    use kestrel_core::{FunctionId, GraphBuilder};

    use crate::registry::FunctionRegistry;

    fn ctx<'a>(primitives: &'a PrimitiveRegistry, config: &'a KestrelConfig, registry: &'a FunctionRegistry) -> RuntimeContext<'a> {
        RuntimeContext { primitives, config, registry }
    }

    /// `n < 2 ? 1 : n` — enough branching and arithmetic to exercise `If`,
    /// `Primitive2`, and parameter reads in one function.
    fn branchy_graph() -> ExprGraph {
        let mut b = GraphBuilder::new(FunctionId(10));
        let n = b.declare_param("n");
        let n_ref = b.get_var(n);
        let two = b.const_int(2);
        let cond = b.primitive2("<", n_ref, two);
        let one = b.const_int(1);
        let n_ref2 = b.get_var(n);
        // `If` is not atomic, so the body is the bare trailing `if` rather
        // than wrapped in `return_`.
        let body = b.if_(cond, one, n_ref2);
        b.finish(body)
    }

    #[test]
    fn simple_mode_evaluates_without_touching_the_profile() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let c = ctx(&primitives, &config, &registry);

        let graph = branchy_graph();
        let nexus = Nexus::new(graph);
        let interpreter = Interpreter::new(&primitives, InterpreterMode::Simple);
        let mut locals = vec![Value::Int(5)];
        let result = interpreter.run(&nexus, &mut locals, &c).unwrap();
        assert_eq!(result, Value::Int(5));
        assert_eq!(nexus.graph().var(VarId::from_raw(0)).profile.total(), 0);
    }

    #[test]
    fn profiling_mode_records_observed_categories() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let c = ctx(&primitives, &config, &registry);

        let graph = branchy_graph();
        let nexus = Nexus::new(graph);
        let interpreter = Interpreter::new(&primitives, InterpreterMode::Profiling);
        let mut locals = vec![Value::Int(1)];
        let result = interpreter.run(&nexus, &mut locals, &c).unwrap();
        assert_eq!(result, Value::Int(1));
        assert!(nexus.graph().var(VarId::from_raw(0)).profile.total() > 0);
        assert!(nexus.graph().var(VarId::from_raw(0)).profile.is_pure_int());
    }

    #[test]
    fn letrec_initializes_to_null_before_the_initializer_runs() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let c = ctx(&primitives, &config, &registry);

        let mut b = GraphBuilder::new(FunctionId(11));
        let f = b.declare_local("f");
        let ten = b.const_int(10);
        let body_ref = b.get_var(f);
        // `Let`/`letrec` is not atomic either; same bare-trailing-expression
        // shape as the `If` case above.
        let body = b.letrec(f, ten, body_ref);
        let graph = b.finish(body);
        let nexus = Nexus::new(graph);
        let interpreter = Interpreter::new(&primitives, InterpreterMode::Simple);
        let mut locals = vec![Value::null()];
        let result = interpreter.run(&nexus, &mut locals, &c).unwrap();
        assert_eq!(result, Value::Int(10));
    }
}
