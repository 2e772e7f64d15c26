//! `Closure`: the external-call facade over a [`kestrel_core::ClosureValue`]
//! (§4.9).
//!
//! A `ClosureValue` is inert data owned by `kestrel-core` — a function
//! identity plus captured values, nothing else. This module is where it
//! becomes callable: looking the function up in the [`FunctionRegistry`]
//! to find its [`Nexus`] and asking that `Nexus` to run it. There is no
//! separate `Closure` struct to construct; a closure *is* a `Value` that
//! happens to hold a `ClosureValue`, and these are free functions over that
//! shape rather than a wrapper type, mirroring how `kestrel-core` itself
//! treats values as data and leaves dispatch to this crate.

use kestrel_core::{RuntimeError, Value};

use crate::nexus::InvokerKind;
use crate::registry::RuntimeContext;

/// Calls `value` (which must hold a closure) with `args`. This is the
/// entry point an embedding host uses to invoke a first-class function
/// value it received back from the language, as opposed to a call
/// expression inside a graph, which goes through a
/// [`InlineCachingCallSite`](crate::callsite::InlineCachingCallSite)
/// instead.
pub fn invoke(value: &Value, args: &[Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
    let closure = value.as_closure().ok_or_else(|| RuntimeError::new(format!("invoke: {value} is not a closure")))?;
    let nexus = ctx
        .registry
        .get(closure.function)
        .ok_or_else(|| RuntimeError::new(format!("invoke: undefined function {}", closure.function)))?;
    nexus.invoke(&closure.copied_values, args, ctx)
}

/// Which strategy a call to `value` would currently use — exposed for
/// hosts and tests that want to assert a function has (or hasn't) been
/// specialized without reaching into `Nexus` directly.
pub fn optimal_invoker(value: &Value, ctx: &RuntimeContext) -> Result<InvokerKind, RuntimeError> {
    let closure = value.as_closure().ok_or_else(|| RuntimeError::new(format!("optimal_invoker: {value} is not a closure")))?;
    let nexus = ctx
        .registry
        .get(closure.function)
        .ok_or_else(|| RuntimeError::new(format!("optimal_invoker: undefined function {}", closure.function)))?;
    Ok(nexus.optimal_invoker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_compiler::{KestrelConfig, PrimitiveRegistry};
    use kestrel_core::{FunctionId, GraphBuilder};

    use crate::registry::FunctionRegistry;

    #[test]
    fn invoking_a_non_closure_value_is_a_runtime_error() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let ctx = RuntimeContext { primitives: &primitives, config: &config, registry: &registry };

        let err = invoke(&Value::Int(1), &[], &ctx).unwrap_err();
        assert!(err.message.contains("is not a closure"));
    }

    #[test]
    fn invoking_a_defined_closure_runs_it() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let ctx = RuntimeContext { primitives: &primitives, config: &config, registry: &registry };

        let mut b = GraphBuilder::new(FunctionId(0));
        let n = b.declare_param("n");
        let n_ref = b.get_var(n);
        let one = b.const_int(1);
        let sum = b.primitive2("+", n_ref, one);
        let body = b.return_(sum);
        let graph = b.finish(body);
        registry.define(graph);

        let closure = Value::closure(FunctionId(0), Vec::new());
        assert_eq!(invoke(&closure, &[Value::Int(41)], &ctx).unwrap(), Value::Int(42));
        assert_eq!(optimal_invoker(&closure, &ctx).unwrap(), InvokerKind::Interpreted);
    }
}
