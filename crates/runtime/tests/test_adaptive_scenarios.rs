//! End-to-end scenarios exercising the whole adaptive pipeline — profiling
//! interpreter, specialization, inline caching, and deopt recovery —
//! through the public `kestrel_runtime` surface rather than any one
//! module's internals.

use kestrel_compiler::{KestrelConfig, PrimitiveRegistry};
use kestrel_core::{ExprGraph, FunctionId, GraphBuilder, Value};
use kestrel_runtime::{closure, FunctionRegistry, InvokerKind, RuntimeContext};
use serial_test::serial;

fn ctx<'a>(primitives: &'a PrimitiveRegistry, config: &'a KestrelConfig, registry: &'a FunctionRegistry) -> RuntimeContext<'a> {
    RuntimeContext { primitives, config, registry }
}

/// `fib(n) = n < 2 ? n : fib(n-1) + fib(n-2)`, self-recursing through a
/// `DirectFunction` target (constant-function dispatch, no closure
/// materialization for the recursive calls).
fn fib_graph(id: u32) -> ExprGraph {
    let mut b = GraphBuilder::new(FunctionId(id));
    let n = b.declare_param("n");

    let n_ref = b.get_var(n);
    let two = b.const_int(2);
    let cond = b.primitive2("<", n_ref, two);

    let base = b.get_var(n);

    let self_fn_a = b.direct_function(FunctionId(id));
    let n_ref_a = b.get_var(n);
    let one_a = b.const_int(1);
    let n_minus_1 = b.primitive2("-", n_ref_a, one_a);
    let call_a = b.call1(self_fn_a, n_minus_1);

    let self_fn_b = b.direct_function(FunctionId(id));
    let n_ref_b = b.get_var(n);
    let two_b = b.const_int(2);
    let n_minus_2 = b.primitive2("-", n_ref_b, two_b);
    let call_b = b.call1(self_fn_b, n_minus_2);

    let a = b.declare_local("a");
    let bvar = b.declare_local("b");
    let a_ref = b.get_var(a);
    let b_ref = b.get_var(bvar);
    let sum = b.primitive2("+", a_ref, b_ref);
    let inner = b.let_(bvar, call_b, sum);
    let recursive_case = b.let_(a, call_a, inner);

    let body = b.if_(cond, base, recursive_case);
    b.finish(body)
}

fn expected_fib(n: i64) -> i64 {
    if n < 2 {
        n
    } else {
        expected_fib(n - 1) + expected_fib(n - 2)
    }
}

#[test]
fn s1_fibonacci_specializes_after_crossing_the_profiling_threshold() {
    let primitives = PrimitiveRegistry::with_standard_primitives();
    let config = KestrelConfig::new().with_profiling_threshold(50);
    let registry = FunctionRegistry::new();
    let c = ctx(&primitives, &config, &registry);

    registry.define(fib_graph(0));
    let fib = Value::closure(FunctionId(0), Vec::new());

    for n in [5, 8, 10] {
        let result = closure::invoke(&fib, &[Value::Int(n)], &c).unwrap();
        assert_eq!(result, Value::Int(expected_fib(n)));
    }

    // The recursive calls alone blow well past a threshold of 50 within a
    // single `fib(10)` — by now the function has specialized on its
    // pure-int parameter profile.
    assert_eq!(closure::optimal_invoker(&fib, &c).unwrap(), InvokerKind::Specialized);
    assert_eq!(closure::invoke(&fib, &[Value::Int(20)], &c).unwrap(), Value::Int(expected_fib(20)));
}

fn identity_graph(id: u32) -> ExprGraph {
    let mut b = GraphBuilder::new(FunctionId(id));
    let x = b.declare_param("x");
    let body = b.get_var(x);
    b.finish(body)
}

#[test]
fn s2_polymorphic_identity_never_specializes_but_stays_correct() {
    let primitives = PrimitiveRegistry::with_standard_primitives();
    let config = KestrelConfig::new().with_profiling_threshold(5);
    let registry = FunctionRegistry::new();
    let c = ctx(&primitives, &config, &registry);

    registry.define(identity_graph(1));
    let id_fn = Value::closure(FunctionId(1), Vec::new());

    let inputs = [Value::Int(1), Value::Bool(true), Value::string("hi"), Value::Int(2), Value::Bool(false), Value::string("bye")];
    for v in &inputs {
        assert_eq!(closure::invoke(&id_fn, std::slice::from_ref(v), &c).unwrap(), v.clone());
    }

    // Mixed observations join to `Ref` in the lattice — no specialized
    // routine is worth emitting, but the function still compiles.
    assert_ne!(closure::optimal_invoker(&id_fn, &c).unwrap(), InvokerKind::Specialized);
}

/// `f(x) = { let y = 0; set!(y, x); y }` — repeatedly called with an int
/// argument so `y`'s profile specializes, then once with a string, which
/// must deopt-recover back to the correct (unboxed) result rather than
/// crash or silently truncate.
fn set_deopt_graph(id: u32) -> ExprGraph {
    let mut b = GraphBuilder::new(FunctionId(id));
    let x = b.declare_param("x");
    let y = b.declare_local("y");
    let zero = b.const_int(0);

    let x_ref = b.get_var(x);
    let set_node = b.set_var(y, x_ref);
    let y_ref = b.get_var(y);
    let block = b.block(vec![set_node, y_ref]);
    let body = b.let_(y, zero, block);
    b.finish(body)
}

#[test]
fn s3_assigning_a_string_into_a_specialized_int_slot_deopts_and_recovers() {
    let primitives = PrimitiveRegistry::with_standard_primitives();
    let config = KestrelConfig::new().with_profiling_threshold(20);
    let registry = FunctionRegistry::new();
    let c = ctx(&primitives, &config, &registry);

    registry.define(set_deopt_graph(2));
    let f = Value::closure(FunctionId(2), Vec::new());

    for i in 0..200 {
        assert_eq!(closure::invoke(&f, &[Value::Int(i)], &c).unwrap(), Value::Int(i));
    }
    assert_eq!(closure::optimal_invoker(&f, &c).unwrap(), InvokerKind::Specialized);

    let result = closure::invoke(&f, &[Value::string("oops")], &c).unwrap();
    assert_eq!(result, Value::string("oops"));
}

/// A caller that invokes whatever closure it's handed, dispatched through
/// one call expression — its inline cache grows with each distinct callee
/// identity seen, up to the configured limit, then goes megamorphic.
fn caller_graph(id: u32) -> (ExprGraph, u32) {
    let mut b = GraphBuilder::new(FunctionId(id));
    let f = b.declare_param("f");
    let f_ref = b.get_var(f);
    let call = b.call0(f_ref);
    let node_index = call.index();
    let body = call;
    (b.finish(body), node_index)
}

fn const_callee(id: u32, n: i64) -> ExprGraph {
    let mut b = GraphBuilder::new(FunctionId(id));
    let c = b.const_int(n);
    b.finish(c)
}

#[test]
fn s4_inline_cache_grows_then_goes_megamorphic_past_the_limit() {
    let primitives = PrimitiveRegistry::with_standard_primitives();
    let config = KestrelConfig::new().with_cache_limit(3);
    let registry = FunctionRegistry::new();
    let c = ctx(&primitives, &config, &registry);

    let (caller, call_node_index) = caller_graph(10);
    registry.define(caller);
    for (i, n) in [(11, 1), (12, 2), (13, 3)] {
        registry.define(const_callee(i, n));
    }
    let caller = Value::closure(FunctionId(10), Vec::new());

    for i in 11..14 {
        let callee = Value::closure(FunctionId(i), Vec::new());
        closure::invoke(&caller, &[callee], &c).unwrap();
    }

    let nexus = registry.get(FunctionId(10)).unwrap();
    let site = nexus.call_site(call_node_index, config.cache_limit());
    assert_eq!(site.cache_count(), 3);
    assert!(!site.is_megamorphic());

    registry.define(const_callee(14, 4));
    let fourth = Value::closure(FunctionId(14), Vec::new());
    closure::invoke(&caller, &[fourth], &c).unwrap();

    assert!(site.is_megamorphic());
}

#[test]
fn recompiling_after_a_reset_still_produces_correct_results() {
    let primitives = PrimitiveRegistry::with_standard_primitives();
    let config = KestrelConfig::new().with_profiling_threshold(3);
    let registry = FunctionRegistry::new();
    let c = ctx(&primitives, &config, &registry);

    registry.define(identity_graph(20));
    let nexus = registry.get(FunctionId(20)).unwrap();

    for _ in 0..5 {
        assert_eq!(nexus.invoke(&[], &[Value::Int(9)], &c).unwrap(), Value::Int(9));
    }
    nexus.reset();
    for _ in 0..5 {
        assert_eq!(nexus.invoke(&[], &[Value::Int(9)], &c).unwrap(), Value::Int(9));
    }
}

#[test]
#[serial]
fn global_registry_round_trips_a_defined_function() {
    let registry = kestrel_runtime::global();
    let before = registry.len();
    registry.define(identity_graph(9001));
    assert_eq!(registry.len(), before + 1);
    assert!(registry.get(FunctionId(9001)).is_some());
}
