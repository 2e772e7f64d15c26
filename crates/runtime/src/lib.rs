//! Everything stateful and concurrent in the adaptive-compilation
//! subsystem: the profiling interpreter, per-call-site inline caches, and
//! the per-function `Nexus` state machine that ties them to
//! `kestrel-compiler`'s codegen.
//!
//! # Modules
//!
//! - [`interpreter`]: the tree-walking simple/profiling interpreter (C4),
//!   the baseline every compiled routine must agree with.
//! - [`callsite`]: `InlineCachingCallSite`, a call expression's polymorphic
//!   inline cache (C8).
//! - [`nexus`]: `Nexus`, the per-function `Interpreted -> Compiling ->
//!   Compiled -> Reset` dispatch state machine (C9), and the
//!   `ExecutionHooks` bridge into it.
//! - [`closure`]: the external-call facade over a `ClosureValue`.
//! - [`registry`]: `FunctionRegistry`, the process-wide `FunctionId ->
//!   Nexus` table, plus `RuntimeContext`, the bundle of borrowed state a
//!   dispatch decision needs.
//!
//! This is the only crate that drives `kestrel-compiler`: a `Nexus`
//! triggers type inference and codegen itself once its function crosses
//! the profiling threshold, rather than some outer loop polling every
//! function's invocation count.

pub mod callsite;
pub mod closure;
pub mod interpreter;
pub mod nexus;
pub mod registry;

pub use callsite::InlineCachingCallSite;
pub use interpreter::{Interpreter, InterpreterMode};
pub use nexus::{InvokerKind, Nexus};
pub use registry::{global, FunctionRegistry, RuntimeContext};
