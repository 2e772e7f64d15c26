//! Shared data model for the adaptive-compilation subsystem: the type
//! lattice, value representation, expression graphs, and per-node/per-
//! variable profiling state that both the compiler and the runtime build
//! on.
//!
//! # Modules
//!
//! - [`lattice`] — the four-point type lattice (`Cat`, `ExprType`) and its
//!   `Sync`-safe atomic wrapper.
//! - [`profile`] — observed-category tallies (`ValueProfile`).
//! - [`value`] — runtime values (`Value`, `RefValue`, `ClosureValue`,
//!   `FunctionId`).
//! - [`graph`] — the expression graph (`ExprGraph`, `ExprNode`,
//!   `VariableDefinition`) and its builder.
//! - [`error`] — error kinds shared across the subsystem.

pub mod error;
pub mod graph;
pub mod lattice;
pub mod profile;
pub mod value;

pub use error::{CompilerError, RuntimeError, TypeInferenceFailure};
pub use graph::{ConstValue, ExprGraph, ExprNode, GraphBuilder, NodeId, VarId, VariableDefinition};
pub use lattice::{AtomicExprType, Cat, ExprType};
pub use profile::ValueProfile;
pub use value::{ClosureValue, FunctionId, RefValue, Value};
