//! Profile-guided two-tier code generation over the expression graphs
//! `kestrel-core` defines.
//!
//! # Modules
//!
//! - [`primitive`]: the `Primitive`/`IfAware` contract every built-in
//!   operation implements once for interpretation, inference, codegen, and
//!   if-fusion.
//! - [`writer`]: the object-safe instruction-emission contract codegen
//!   targets.
//! - [`reference_backend`]: a concrete `Writer` plus an in-process
//!   executor that runs the instructions it emits.
//! - [`inferencer`]: forward data-flow type inference to a fixed point.
//! - [`planner`]: combines inferred types and observed profiles into the
//!   specialized types codegen trusts.
//! - [`codegen`]: lowers one function's graph to generic and (optionally)
//!   specialized routines, with inline deopt recovery at the four
//!   positions a type guard can fail.
//! - [`config`]: tunables governing compilation and inline-cache policy.
//!
//! `squarepeg` is intentionally not listed: it is a private control-flow
//! signal internal to the specialized-routine executor and never crosses
//! this crate's public surface.

mod squarepeg;

pub mod codegen;
pub mod config;
pub mod inferencer;
pub mod planner;
pub mod primitive;
pub mod reference_backend;
pub mod writer;

pub use codegen::{Codegen, CompiledRoutines, Mode};
pub use config::KestrelConfig;
pub use inferencer::TypeInferencer;
pub use planner::SpecializationPlanner;
pub use primitive::{IfAware, Primitive, PrimitiveRegistry};
pub use reference_backend::{execute, ExecutionHooks, Instr, ReferenceBackend, Routine};
pub use writer::{Label, Writer};
