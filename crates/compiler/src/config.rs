//! Tunables governing when the runtime compiles, how aggressively call
//! sites cache, and how much a call site is willing to inline.
//!
//! These numbers describe *policy*, not mechanism — the interpreter,
//! planner, and call sites all take a `&KestrelConfig` rather than reading
//! constants directly, so a host can tune or (in tests) shrink the
//! thresholds without touching the passes themselves.

/// Builder for the three thresholds the adaptive pipeline consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KestrelConfig {
    /// Invocation count at which a function's `Nexus` moves from
    /// interpreting to compiling.
    profiling_threshold: u64,
    /// Number of distinct monomorphic guards a call site's inline cache
    /// holds before falling back to a megamorphic dispatch.
    cache_limit: usize,
    /// Largest argument count a call site's fast path inlines directly;
    /// wider calls fall back to the generic argument-array path.
    max_inlined_args: usize,
}

impl Default for KestrelConfig {
    fn default() -> Self {
        KestrelConfig { profiling_threshold: 100, cache_limit: 3, max_inlined_args: 4 }
    }
}

impl KestrelConfig {
    pub fn new() -> Self {
        KestrelConfig::default()
    }

    pub fn with_profiling_threshold(mut self, threshold: u64) -> Self {
        self.profiling_threshold = threshold;
        self
    }

    pub fn with_cache_limit(mut self, limit: usize) -> Self {
        self.cache_limit = limit;
        self
    }

    pub fn with_max_inlined_args(mut self, max: usize) -> Self {
        self.max_inlined_args = max;
        self
    }

    pub fn profiling_threshold(&self) -> u64 {
        self.profiling_threshold
    }

    pub fn cache_limit(&self) -> usize {
        self.cache_limit
    }

    pub fn max_inlined_args(&self) -> usize {
        self.max_inlined_args
    }
}
