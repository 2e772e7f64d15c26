//! Forward data-flow type inference: a conservative, sound upper bound on
//! every node's and variable's runtime category.
//!
//! The pass is a monotone join over the four-point lattice. Since the
//! lattice has height 4 (`Unknown < {Int,Bool,Ref}` each one step below
//! `Ref`... actually `Unknown` below every `Known`, and all `Known`s
//! incomparable except by collapsing to `Ref`), repeatedly re-deriving
//! every node/variable's type from the current state of its neighbors
//! converges in at most [`ROUNDS_LIMIT`] rounds; failing to converge by
//! then means monotonicity was violated somewhere and is a compiler bug.

use kestrel_core::{Cat, ConstValue, ExprGraph, ExprNode, ExprType, NodeId, TypeInferenceFailure, VarId};

use crate::primitive::PrimitiveRegistry;

const ROUNDS_LIMIT: u32 = 4;

/// Runs the inferencer to a fixed point over one function's graph.
pub struct TypeInferencer<'a> {
    primitives: &'a PrimitiveRegistry,
}

impl<'a> TypeInferencer<'a> {
    pub fn new(primitives: &'a PrimitiveRegistry) -> Self {
        TypeInferencer { primitives }
    }

    pub fn infer(&self, graph: &ExprGraph, function_name: &str) -> Result<(), TypeInferenceFailure> {
        let mut round = 0;
        loop {
            let before = snapshot(graph);
            self.infer_node(graph, graph.body);
            let after = snapshot(graph);
            round += 1;
            if before == after {
                return Ok(());
            }
            if round >= ROUNDS_LIMIT {
                tracing::warn!(function = function_name, rounds = round, "type inference did not converge");
                return Err(TypeInferenceFailure {
                    function: function_name.to_string(),
                    rounds_attempted: round,
                });
            }
        }
    }

    fn infer_node(&self, graph: &ExprGraph, id: NodeId) -> ExprType {
        let t = match graph.node(id) {
            ExprNode::Const(cv) => const_type(cv),
            ExprNode::GetVar(v) => graph.var(*v).inferred(),
            ExprNode::SetVar { var, value } => {
                let value_t = self.infer_node(graph, *value);
                join_var(graph, *var, value_t);
                ExprType::Known(Cat::Void)
            }
            ExprNode::Let { var, init, body, .. } => {
                let init_t = self.infer_node(graph, *init);
                join_var(graph, *var, init_t);
                self.infer_node(graph, *body)
            }
            ExprNode::If { cond, then_branch, else_branch } => {
                self.infer_node(graph, *cond);
                let then_t = self.infer_node(graph, *then_branch);
                let else_t = self.infer_node(graph, *else_branch);
                then_t.join(else_t)
            }
            ExprNode::Block(exprs) => {
                let mut last = ExprType::Known(Cat::Void);
                for e in exprs {
                    last = self.infer_node(graph, *e);
                }
                last
            }
            ExprNode::Return(value) => {
                self.infer_node(graph, *value);
                ExprType::Known(Cat::Void)
            }
            ExprNode::Primitive1 { op, arg } => {
                let arg_t = self.infer_node(graph, *arg);
                match self.primitives.lookup(op) {
                    Some(p) => p.inferred_return(&[arg_t]),
                    None => ExprType::Unknown,
                }
            }
            ExprNode::Primitive2 { op, arg1, arg2 } => {
                let a = self.infer_node(graph, *arg1);
                let b = self.infer_node(graph, *arg2);
                match self.primitives.lookup(op) {
                    Some(p) => p.inferred_return(&[a, b]),
                    None => ExprType::Unknown,
                }
            }
            ExprNode::Call0 { func } => {
                self.infer_node(graph, *func);
                ExprType::Known(Cat::Ref)
            }
            ExprNode::Call1 { func, arg0 } => {
                self.infer_node(graph, *func);
                self.infer_node(graph, *arg0);
                ExprType::Known(Cat::Ref)
            }
            ExprNode::Call2 { func, arg0, arg1 } => {
                self.infer_node(graph, *func);
                self.infer_node(graph, *arg0);
                self.infer_node(graph, *arg1);
                ExprType::Known(Cat::Ref)
            }
            ExprNode::DirectFunction(_) => ExprType::Known(Cat::Ref),
            ExprNode::Closure { copied_outers, .. } => {
                for v in copied_outers {
                    let _ = graph.var(*v).inferred();
                }
                ExprType::Known(Cat::Ref)
            }
        };
        graph.set_node_inferred(id, t);
        t
    }
}

fn join_var(graph: &ExprGraph, var: VarId, t: ExprType) {
    let v = graph.var(var);
    v.set_inferred(v.inferred().join(t));
}

fn const_type(cv: &ConstValue) -> ExprType {
    match cv {
        ConstValue::Int(_) => ExprType::Known(Cat::Int),
        ConstValue::Bool(_) => ExprType::Known(Cat::Bool),
        ConstValue::Str(_) | ConstValue::Null => ExprType::Known(Cat::Ref),
    }
}

fn snapshot(graph: &ExprGraph) -> Vec<ExprType> {
    (0..graph.var_count() as u32).map(|i| graph.var(VarId::from_raw(i)).inferred()).collect()
}
