//! Combines inferred and observed types into the *specialized* types
//! codegen trusts, in the two phases codegen needs them: once before
//! generic emission (every node defaults to `Ref` unless inference already
//! proved something tighter) and once before specialized emission (the
//! profile gets a vote, and wins when it saw a single primitive category).

use kestrel_core::{Cat, ConstValue, ExprGraph, ExprNode, ExprType, NodeId, VarId};

use crate::primitive::PrimitiveRegistry;

pub struct SpecializationPlanner<'a> {
    primitives: &'a PrimitiveRegistry,
}

impl<'a> SpecializationPlanner<'a> {
    pub fn new(primitives: &'a PrimitiveRegistry) -> Self {
        SpecializationPlanner { primitives }
    }

    /// Phase one: every node's (and variable's) specialized type is its
    /// inferred type where known, `Ref` otherwise. Generic codegen consults
    /// this only to decide when a value is already safely unboxed-at-rest
    /// — never to skip a bridge.
    pub fn plan_generic(&self, graph: &ExprGraph) {
        for i in 0..graph.var_count() as u32 {
            let v = graph.var(VarId::from_raw(i));
            v.set_specialized(fallback_to_ref(v.inferred()));
        }
        self.walk_generic(graph, graph.body);
    }

    fn walk_generic(&self, graph: &ExprGraph, id: NodeId) {
        graph.set_node_specialized(id, fallback_to_ref(graph.node_inferred(id)));
        match graph.node(id) {
            ExprNode::SetVar { value, .. } => self.walk_generic(graph, *value),
            ExprNode::Let { init, body, .. } => {
                self.walk_generic(graph, *init);
                self.walk_generic(graph, *body);
            }
            ExprNode::If { cond, then_branch, else_branch } => {
                self.walk_generic(graph, *cond);
                self.walk_generic(graph, *then_branch);
                self.walk_generic(graph, *else_branch);
            }
            ExprNode::Block(exprs) => {
                for e in exprs.clone() {
                    self.walk_generic(graph, e);
                }
            }
            ExprNode::Return(value) => self.walk_generic(graph, *value),
            ExprNode::Primitive1 { arg, .. } => self.walk_generic(graph, *arg),
            ExprNode::Primitive2 { arg1, arg2, .. } => {
                self.walk_generic(graph, *arg1);
                self.walk_generic(graph, *arg2);
            }
            ExprNode::Call0 { func } => self.walk_generic(graph, *func),
            ExprNode::Call1 { func, arg0 } => {
                self.walk_generic(graph, *func);
                self.walk_generic(graph, *arg0);
            }
            ExprNode::Call2 { func, arg0, arg1 } => {
                self.walk_generic(graph, *func);
                self.walk_generic(graph, *arg0);
                self.walk_generic(graph, *arg1);
            }
            ExprNode::Const(_)
            | ExprNode::GetVar(_)
            | ExprNode::DirectFunction(_)
            | ExprNode::Closure { .. } => {}
        }
    }

    /// Phase two: the profile gets to pick a tighter type than inference
    /// proved, but only when it is unambiguous (a single primitive category
    /// with at least one observation). Mixed or absent observations fall
    /// back to the inferred bound.
    pub fn plan_specialized(&self, graph: &ExprGraph) {
        for i in 0..graph.var_count() as u32 {
            let v = graph.var(VarId::from_raw(i));
            v.set_specialized(prefer_observed(v.profile.observed(), v.inferred()));
        }
        self.specialize_node(graph, graph.body);
    }

    fn specialize_node(&self, graph: &ExprGraph, id: NodeId) -> ExprType {
        let structural = match graph.node(id) {
            ExprNode::Const(cv) => const_type(cv),
            ExprNode::GetVar(v) => graph.var(*v).specialized(),
            ExprNode::SetVar { value, .. } => {
                self.specialize_node(graph, *value);
                ExprType::Known(Cat::Void)
            }
            ExprNode::Let { init, body, .. } => {
                self.specialize_node(graph, *init);
                self.specialize_node(graph, *body)
            }
            ExprNode::If { cond, then_branch, else_branch } => {
                self.specialize_node(graph, *cond);
                let then_t = self.specialize_node(graph, *then_branch);
                let else_t = self.specialize_node(graph, *else_branch);
                then_t.join(else_t)
            }
            ExprNode::Block(exprs) => {
                let mut last = ExprType::Known(Cat::Void);
                for e in exprs.clone() {
                    last = self.specialize_node(graph, e);
                }
                last
            }
            ExprNode::Return(value) => {
                self.specialize_node(graph, *value);
                ExprType::Known(Cat::Void)
            }
            ExprNode::Primitive1 { op, arg } => {
                let arg_t = self.specialize_node(graph, *arg);
                match self.primitives.lookup(op) {
                    Some(p) => p.inferred_return(&[arg_t]),
                    None => ExprType::Unknown,
                }
            }
            ExprNode::Primitive2 { op, arg1, arg2 } => {
                let a = self.specialize_node(graph, *arg1);
                let b = self.specialize_node(graph, *arg2);
                match self.primitives.lookup(op) {
                    Some(p) => p.inferred_return(&[a, b]),
                    None => ExprType::Unknown,
                }
            }
            ExprNode::Call0 { func } => {
                self.specialize_node(graph, *func);
                ExprType::Known(Cat::Ref)
            }
            ExprNode::Call1 { func, arg0 } => {
                self.specialize_node(graph, *func);
                self.specialize_node(graph, *arg0);
                ExprType::Known(Cat::Ref)
            }
            ExprNode::Call2 { func, arg0, arg1 } => {
                self.specialize_node(graph, *func);
                self.specialize_node(graph, *arg0);
                self.specialize_node(graph, *arg1);
                ExprType::Known(Cat::Ref)
            }
            ExprNode::DirectFunction(_) => ExprType::Known(Cat::Ref),
            ExprNode::Closure { .. } => ExprType::Known(Cat::Ref),
        };
        // The profile observed at this exact expression position can
        // narrow the structural result further (e.g. a call whose results
        // were all observed as Int, even though calls are conservatively
        // Ref structurally).
        let t = prefer_observed(graph.node_profile(id).observed(), fallback_to_ref(structural));
        graph.set_node_specialized(id, t);
        t
    }

    /// True iff at least one parameter, local, or the function's return
    /// position ended up with a primitive specialized type — the signal
    /// that a specialized routine is worth generating at all.
    pub fn can_be_specialized(&self, graph: &ExprGraph) -> bool {
        for i in 0..graph.var_count() as u32 {
            if graph.var(VarId::from_raw(i)).specialized().is_primitive() {
                return true;
            }
        }
        graph.node_specialized(graph.body).is_primitive()
    }
}

fn fallback_to_ref(t: ExprType) -> ExprType {
    if t.is_known() {
        t
    } else {
        ExprType::Known(Cat::Ref)
    }
}

fn prefer_observed(observed: ExprType, inferred_or_default: ExprType) -> ExprType {
    match observed {
        ExprType::Known(Cat::Int) | ExprType::Known(Cat::Bool) => observed,
        _ => inferred_or_default,
    }
}

fn const_type(cv: &ConstValue) -> ExprType {
    match cv {
        ConstValue::Int(_) => ExprType::Known(Cat::Int),
        ConstValue::Bool(_) => ExprType::Known(Cat::Bool),
        ConstValue::Str(_) | ConstValue::Null => ExprType::Known(Cat::Ref),
    }
}
