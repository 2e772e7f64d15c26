//! The process-wide function table: every top-level function's [`ExprGraph`]
//! and the [`Nexus`](crate::nexus::Nexus) that owns its dispatch state,
//! indexed by [`FunctionId`].
//!
//! Additions are serialized by a write lock; lookups take a read lock, which
//! under low write contention is effectively the "lock-free reads, append-
//! only after init" discipline this subsystem's concurrency model calls for
//! (§5). Unlike a fixed-capacity per-thread slot table, `FunctionId`s are
//! unbounded and minted by the host as functions are defined, so the slab
//! here grows on demand rather than claiming slots in a pre-sized array.

use std::sync::{Arc, OnceLock, RwLock};

use kestrel_core::{ExprGraph, FunctionId};

use crate::nexus::Nexus;
use kestrel_compiler::{KestrelConfig, PrimitiveRegistry};

/// Everything a dispatch decision needs: the primitive table, the tunables,
/// and the registry of sibling functions a call might target. Borrowed for
/// the duration of one external call; nothing here is specific to one
/// invocation.
pub struct RuntimeContext<'a> {
    pub primitives: &'a PrimitiveRegistry,
    pub config: &'a KestrelConfig,
    pub registry: &'a FunctionRegistry,
}

/// Maps [`FunctionId`] to the [`Nexus`] tracking that function's compiled
/// state. One registry per process in ordinary use ([`global`]); tests build
/// their own instance so process-wide state doesn't leak between cases.
#[derive(Default)]
pub struct FunctionRegistry {
    slots: RwLock<Vec<Option<Arc<Nexus>>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry { slots: RwLock::new(Vec::new()) }
    }

    /// Registers a function's graph under the `FunctionId` it already
    /// carries (ids are minted by the host that builds the graph, not by
    /// this registry). Returns the id for convenience.
    pub fn define(&self, graph: ExprGraph) -> FunctionId {
        let function = graph.function;
        let nexus = Arc::new(Nexus::new(graph));
        let index = function.0 as usize;
        let mut slots = self.slots.write().expect("function registry lock poisoned");
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        slots[index] = Some(nexus);
        function
    }

    pub fn get(&self, function: FunctionId) -> Option<Arc<Nexus>> {
        let slots = self.slots.read().expect("function registry lock poisoned");
        slots.get(function.0 as usize).and_then(|slot| slot.clone())
    }

    /// Calls a defined function directly by id, with no closure and no
    /// copied outers — the `DirectFunction` dispatch path (§3, §4.4).
    pub fn invoke(
        &self,
        function: FunctionId,
        args: &[kestrel_core::Value],
        ctx: &RuntimeContext,
    ) -> Result<kestrel_core::Value, kestrel_core::RuntimeError> {
        let nexus = self
            .get(function)
            .ok_or_else(|| kestrel_core::RuntimeError::new(format!("call to undefined function {function}")))?;
        nexus.invoke(&[], args, ctx)
    }

    pub fn len(&self) -> usize {
        self.slots.read().expect("function registry lock poisoned").iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static FUNCTION_REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

/// The process-wide registry, lazily initialized on first use. Most hosts
/// want this; tests that need isolation should build their own
/// `FunctionRegistry::new()` instead of reaching for the global.
pub fn global() -> &'static FunctionRegistry {
    FUNCTION_REGISTRY.get_or_init(FunctionRegistry::new)
}
