//! Polymorphic inline caching at a call expression (§4.8).
//!
//! Grounded on the teacher's `channel.rs` discipline for per-entity shared
//! state: hold the lock only long enough to read or mutate the small bit of
//! bookkeeping, then release it before doing anything that might itself
//! recurse back into this call site (the callee's own call, possibly
//! through this very site again). A `Mutex` per call site serializes its
//! mutations; nothing here blocks while held.

use std::sync::Mutex;

use kestrel_core::{ClosureValue, FunctionId, RuntimeError, Value};

use crate::registry::RuntimeContext;

struct CacheState {
    /// Distinct callee identities seen so far, in first-seen order. Cleared
    /// and replaced by the megamorphic flag once it would grow past the
    /// configured limit.
    entries: Vec<FunctionId>,
    megamorphic: bool,
}

/// One call expression's inline cache. Sized by [`KestrelConfig::cache_limit`](kestrel_compiler::KestrelConfig::cache_limit):
/// up to that many distinct monomorphic guards are tracked before the site
/// gives up discriminating and goes megamorphic.
pub struct InlineCachingCallSite {
    inner: Mutex<CacheState>,
    cache_limit: usize,
}

impl InlineCachingCallSite {
    pub fn new(cache_limit: usize) -> Self {
        InlineCachingCallSite { inner: Mutex::new(CacheState { entries: Vec::new(), megamorphic: false }), cache_limit }
    }

    pub fn cache_count(&self) -> usize {
        self.inner.lock().expect("call site lock poisoned").entries.len()
    }

    pub fn is_megamorphic(&self) -> bool {
        self.inner.lock().expect("call site lock poisoned").megamorphic
    }

    /// Returns this site to its pristine, pre-linking state — used after a
    /// recompile invalidates every cache entry holding a direct link to the
    /// function that was just replaced.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("call site lock poisoned");
        inner.entries.clear();
        inner.megamorphic = false;
    }

    /// Dispatches a call through this site, updating its cache-growth
    /// bookkeeping first. The actual call is resolved fresh against the
    /// callee's current `Nexus` state every time — this reference
    /// implementation's "cache hit" is cheap enough (a lock, a Vec scan, a
    /// registry lookup) that skipping it isn't worth the staleness risk a
    /// literal cached invoker would carry across a recompile.
    pub fn dispatch(&self, closure: &ClosureValue, args: &[Value], ctx: &RuntimeContext) -> Result<Value, RuntimeError> {
        // A closure that captured outer values can't be guarded on function
        // identity alone (two closures over the same function with
        // different captures are different callees in every way that
        // matters to an inline cache), so it never grows this site's cache
        // — but it's still dispatched normally.
        if closure.copied_values.is_empty() {
            self.record(closure.function);
        }

        let callee = ctx
            .registry
            .get(closure.function)
            .ok_or_else(|| RuntimeError::new(format!("call to undefined function {}", closure.function)))?;
        callee.invoke(&closure.copied_values, args, ctx)
    }

    fn record(&self, function: FunctionId) {
        let mut inner = self.inner.lock().expect("call site lock poisoned");
        if inner.megamorphic || inner.entries.contains(&function) {
            return;
        }
        inner.entries.push(function);
        if inner.entries.len() > self.cache_limit {
            inner.entries.clear();
            inner.megamorphic = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_compiler::{KestrelConfig, PrimitiveRegistry};
    use kestrel_core::GraphBuilder;

    use crate::registry::FunctionRegistry;

    fn const_closure(registry: &FunctionRegistry, id: u32, n: i64) -> ClosureValue {
        let mut b = GraphBuilder::new(FunctionId(id));
        let c = b.const_int(n);
        let body = b.return_(c);
        let graph = b.finish(body);
        registry.define(graph);
        ClosureValue { function: FunctionId(id), copied_values: Vec::new().into() }
    }

    #[test]
    fn fresh_site_is_not_megamorphic_and_empty() {
        let site = InlineCachingCallSite::new(3);
        assert_eq!(site.cache_count(), 0);
        assert!(!site.is_megamorphic());
    }

    #[test]
    fn distinct_callees_up_to_the_limit_are_cached_individually() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let ctx = RuntimeContext { primitives: &primitives, config: &config, registry: &registry };

        let site = InlineCachingCallSite::new(3);
        for (i, n) in [(0, 1), (1, 2), (2, 3)] {
            let closure = const_closure(&registry, i, n);
            site.dispatch(&closure, &[], &ctx).unwrap();
        }
        assert_eq!(site.cache_count(), 3);
        assert!(!site.is_megamorphic());
    }

    #[test]
    fn a_fourth_distinct_callee_flips_the_site_megamorphic() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let ctx = RuntimeContext { primitives: &primitives, config: &config, registry: &registry };

        let site = InlineCachingCallSite::new(3);
        for (i, n) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
            let closure = const_closure(&registry, i, n);
            site.dispatch(&closure, &[], &ctx).unwrap();
        }
        assert!(site.is_megamorphic());
        assert_eq!(site.cache_count(), 0);
    }

    #[test]
    fn megamorphic_stays_sticky_until_reset() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let ctx = RuntimeContext { primitives: &primitives, config: &config, registry: &registry };

        let site = InlineCachingCallSite::new(1);
        let a = const_closure(&registry, 0, 1);
        let b = const_closure(&registry, 1, 2);
        site.dispatch(&a, &[], &ctx).unwrap();
        site.dispatch(&b, &[], &ctx).unwrap();
        assert!(site.is_megamorphic());

        let c = const_closure(&registry, 2, 3);
        site.dispatch(&c, &[], &ctx).unwrap();
        assert_eq!(site.cache_count(), 0, "megamorphic sites never resume counting");

        site.reset();
        assert!(!site.is_megamorphic());
        site.dispatch(&c, &[], &ctx).unwrap();
        assert_eq!(site.cache_count(), 1);
    }

    #[test]
    fn same_callee_repeated_does_not_grow_the_cache() {
        let primitives = PrimitiveRegistry::with_standard_primitives();
        let config = KestrelConfig::new();
        let registry = FunctionRegistry::new();
        let ctx = RuntimeContext { primitives: &primitives, config: &config, registry: &registry };

        let site = InlineCachingCallSite::new(3);
        let a = const_closure(&registry, 0, 1);
        for _ in 0..5 {
            site.dispatch(&a, &[], &ctx).unwrap();
        }
        assert_eq!(site.cache_count(), 1);
    }
}
