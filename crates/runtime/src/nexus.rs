//! `Nexus`: the per-function dispatch state machine (§4.9).
//!
//! Every defined function owns exactly one `Nexus`, reached through the
//! [`FunctionRegistry`](crate::registry::FunctionRegistry). It carries the
//! function's `ExprGraph`, its compiled routines once it has any, and the
//! inline-cache call sites its own call expressions have accumulated.
//! Mutations — the `Interpreted -> Compiling -> Compiled` transition, and
//! the rarer `Compiled -> Reset` one — are serialized by one `Mutex` per
//! `Nexus`, matching the "all Nexus mutations are serialized by a per-Nexus
//! lock" rule in the concurrency model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use kestrel_core::{ExprGraph, FunctionId, RuntimeError, Value};
use kestrel_compiler::{execute, Codegen, ExecutionHooks, Routine, TypeInferencer};

use crate::callsite::InlineCachingCallSite;
use crate::registry::RuntimeContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NexusStatus {
    Interpreted,
    Compiling,
    Compiled,
    /// A prior compilation was invalidated by a later recompile; behaves
    /// like `Interpreted` for dispatch purposes but keeps the distinction
    /// in logs and for tests that assert on it.
    Reset,
}

/// Which of a `Nexus`'s three execution strategies a call should use —
/// mirrors the preference order `Closure::optimal_invoker` describes:
/// specialized, then generic, then the profiling interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokerKind {
    Specialized,
    Generic,
    Interpreted,
}

struct NexusInner {
    status: NexusStatus,
    generic: Option<Arc<Routine>>,
    specialized: Option<Arc<Routine>>,
}

pub struct Nexus {
    function: FunctionId,
    graph: ExprGraph,
    inner: Mutex<NexusInner>,
    generation: AtomicU64,
    call_sites: Mutex<HashMap<u32, Arc<InlineCachingCallSite>>>,
}

impl Nexus {
    pub fn new(graph: ExprGraph) -> Self {
        Nexus {
            function: graph.function,
            graph,
            inner: Mutex::new(NexusInner { status: NexusStatus::Interpreted, generic: None, specialized: None }),
            generation: AtomicU64::new(0),
            call_sites: Mutex::new(HashMap::new()),
        }
    }

    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn graph(&self) -> &ExprGraph {
        &self.graph
    }

    /// Monotonic generation counter, bumped every time a new compiled
    /// generation replaces a prior one. Call sites compare this against
    /// the generation they cached an entry under to decide whether a hit
    /// is still valid.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The call site belonging to the call expression at `node_index`
    /// within this function's graph, created on first use.
    pub fn call_site(&self, node_index: u32, cache_limit: usize) -> Arc<InlineCachingCallSite> {
        let mut sites = self.call_sites.lock().expect("call site table lock poisoned");
        Arc::clone(sites.entry(node_index).or_insert_with(|| Arc::new(InlineCachingCallSite::new(cache_limit))))
    }

    /// Which strategy a cold call into this closure should use right now.
    pub fn optimal_invoker(&self) -> InvokerKind {
        let inner = self.inner.lock().expect("nexus lock poisoned");
        match inner.status {
            NexusStatus::Compiled if inner.specialized.is_some() => InvokerKind::Specialized,
            NexusStatus::Compiled => InvokerKind::Generic,
            NexusStatus::Interpreted | NexusStatus::Compiling | NexusStatus::Reset => InvokerKind::Interpreted,
        }
    }

    /// Invokes this function with `copied_values` (outer captures, empty for
    /// a direct/top-level call) followed by `args` bound in frame order.
    pub fn invoke(&self, copied_values: &[Value], args: &[Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
        let invocations = self.graph.record_invocation();
        let status = self.inner.lock().expect("nexus lock poisoned").status;

        match status {
            NexusStatus::Compiled => {
                let (generic, specialized) = {
                    let inner = self.inner.lock().expect("nexus lock poisoned");
                    (inner.generic.clone(), inner.specialized.clone())
                };
                let routine = specialized.or(generic).expect("Compiled status implies at least a generic routine");
                self.run_compiled(&routine, copied_values, args, ctx)
            }
            NexusStatus::Interpreted | NexusStatus::Compiling | NexusStatus::Reset => {
                let mut locals = self.fresh_locals(copied_values, args);
                let interpreter = crate::interpreter::Interpreter::new(ctx.primitives, crate::interpreter::InterpreterMode::Profiling);
                let result = interpreter.run(self, &mut locals, ctx)?;
                if matches!(status, NexusStatus::Interpreted | NexusStatus::Reset) && invocations >= ctx.config.profiling_threshold() {
                    self.maybe_compile(ctx);
                }
                Ok(result)
            }
        }
    }

    /// Invokes via a specific strategy, bypassing the automatic selection
    /// `invoke` does — used by an inline cache that already decided which
    /// routine to trust for this generation.
    pub fn invoke_as(&self, kind: InvokerKind, copied_values: &[Value], args: &[Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
        match kind {
            InvokerKind::Interpreted => {
                self.graph.record_invocation();
                let mut locals = self.fresh_locals(copied_values, args);
                let interpreter = crate::interpreter::Interpreter::new(ctx.primitives, crate::interpreter::InterpreterMode::Profiling);
                interpreter.run(self, &mut locals, ctx)
            }
            InvokerKind::Generic | InvokerKind::Specialized => {
                let routine = {
                    let inner = self.inner.lock().expect("nexus lock poisoned");
                    match kind {
                        InvokerKind::Specialized => inner.specialized.clone().or_else(|| inner.generic.clone()),
                        _ => inner.generic.clone(),
                    }
                };
                match routine {
                    Some(routine) => self.run_compiled(&routine, copied_values, args, ctx),
                    // The generation moved on since this invoker was chosen
                    // (a recompile reset the routines); fall back to the
                    // always-correct automatic path.
                    None => self.invoke(copied_values, args, ctx),
                }
            }
        }
    }

    fn run_compiled(&self, routine: &Routine, copied_values: &[Value], args: &[Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
        let locals = self.fresh_locals(copied_values, args);
        let mut hooks = RuntimeHooks { nexus: self, ctx };
        execute(routine, locals, &mut hooks)
    }

    fn fresh_locals(&self, copied_values: &[Value], args: &[Value]) -> Vec<Value> {
        let mut locals = vec![Value::null(); self.graph.var_count()];
        for (slot, v) in self.graph.all_params().zip(copied_values.iter().chain(args.iter())) {
            locals[slot.index() as usize] = v.clone();
        }
        locals
    }

    /// Triggers compilation if this function is still interpreting (or was
    /// reset) and hasn't already started. A failure here is always a
    /// compiler bug (type inference or codegen rejecting a graph the
    /// interpreter has been running fine) — it's logged and the function
    /// simply keeps interpreting rather than poisoning the call that
    /// triggered it.
    fn maybe_compile(&self, ctx: &RuntimeContext) {
        {
            let mut inner = self.inner.lock().expect("nexus lock poisoned");
            if !matches!(inner.status, NexusStatus::Interpreted | NexusStatus::Reset) {
                return;
            }
            inner.status = NexusStatus::Compiling;
        }

        let name = self.function.to_string();
        let inferencer = TypeInferencer::new(ctx.primitives);
        if let Err(e) = inferencer.infer(&self.graph, &name) {
            tracing::error!(function = %self.function, error = %e, "type inference failed; staying interpreted");
            self.inner.lock().expect("nexus lock poisoned").status = NexusStatus::Interpreted;
            return;
        }

        let codegen = Codegen::new(ctx.primitives);
        match codegen.compile(&self.graph) {
            Ok(compiled) => {
                let mut inner = self.inner.lock().expect("nexus lock poisoned");
                let has_specialized = compiled.specialized.is_some();
                inner.generic = Some(Arc::new(compiled.generic));
                inner.specialized = compiled.specialized.map(Arc::new);
                inner.status = NexusStatus::Compiled;
                self.generation.fetch_add(1, Ordering::Release);
                tracing::info!(function = %self.function, specialized = has_specialized, "compiled");
            }
            Err(e) => {
                tracing::error!(function = %self.function, error = %e, "codegen failed; staying interpreted");
                self.inner.lock().expect("nexus lock poisoned").status = NexusStatus::Interpreted;
            }
        }
    }

    /// Invalidates this function's compiled generation, forcing the next
    /// call to re-interpret (and, eventually, recompile). Every call site
    /// holding a cache entry for this function's prior generation will miss
    /// on its next dispatch and re-link.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("nexus lock poisoned");
        inner.status = NexusStatus::Reset;
        inner.generic = None;
        inner.specialized = None;
        drop(inner);
        self.generation.fetch_add(1, Ordering::Release);
        for site in self.call_sites.lock().expect("call site table lock poisoned").values() {
            site.reset();
        }
    }

    #[cfg(test)]
    fn is_compiled(&self) -> bool {
        matches!(self.inner.lock().expect("nexus lock poisoned").status, NexusStatus::Compiled)
    }
}

/// Bridges `kestrel_compiler`'s `ExecutionHooks` contract to this function's
/// own call sites and the process's function registry.
struct RuntimeHooks<'a> {
    nexus: &'a Nexus,
    ctx: &'a RuntimeContext<'a>,
}

impl ExecutionHooks for RuntimeHooks<'_> {
    fn apply_primitive(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        self.ctx
            .primitives
            .lookup(name)
            .ok_or_else(|| RuntimeError::new(format!("unknown primitive `{name}`")))?
            .apply(args)
    }

    fn invoke_static(&mut self, function: FunctionId, args: &[Value]) -> Result<Value, RuntimeError> {
        self.ctx.registry.invoke(function, args, self.ctx)
    }

    fn invoke_dynamic(&mut self, site: u32, closure: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let closure = closure.as_closure().ok_or_else(|| RuntimeError::new("call target is not a closure"))?;
        let call_site = self.nexus.call_site(site, self.ctx.config.cache_limit());
        call_site.dispatch(closure, args, self.ctx)
    }

    fn make_closure(&mut self, function: FunctionId, copied: Vec<Value>) -> Value {
        Value::closure(function, copied)
    }
}
