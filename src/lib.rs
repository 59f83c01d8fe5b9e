//! stencilg: fusion and stream scheduling for stencil dataflow graphs
//!
//! Given a graph of elementwise and stencil operator calls, stencilg decides
//! which calls to merge into single kernels and how to spread the resulting
//! kernels over concurrent execution streams.
//!
//! # Architecture
//!
//! - **ir**: arena expression graph, builder, traversal and rewriting
//! - **graph**: fusibility patterns, indexed forward graph, post-dominator
//!   tree and call dependency closures
//! - **opt**: dominator-tree partitioning, pairwise reuse-scored fusion,
//!   one-shot stencil merge and the profile-guided search driver
//! - **schedule**: stream leveling and barrier elimination
//! - **harness**: measurement boundary and the subprocess harness
//!
//! # Example
//!
//! ```ignore
//! use stencilg::prelude::*;
//!
//! let func = Function::from_json(&std::fs::read_to_string("graph.json")?)?;
//! let fused = FuseOps::new(PatternRegistry::with_defaults(), FuseConfig::default()).run(&func);
//! let schedule = StreamLeveler::new().schedule(&fused);
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod config;
pub mod error;
pub mod graph;
pub mod harness;
pub mod ir;
pub mod opt;
pub mod schedule;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::StencilgConfig;
pub use error::{ConfigError, GraphError, HarnessError, SearchError};
pub use ir::{Function, FunctionBuilder};

// ============================================================================
// Prelude
// ============================================================================

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::config::{
        FailurePolicy, FuseConfig, HarnessConfig, SearchConfig, StencilgConfig,
    };
    pub use crate::graph::{OpPattern, PatternRegistry};
    pub use crate::harness::{CommandHarness, MeasureRequest, Measurement, MeasurementHarness};
    pub use crate::ir::{DType, ExprId, Function, FunctionBuilder, OpRef, Type};
    pub use crate::opt::{
        FuseOps, FunctionPass, PairwiseFusion, ProfileGuidedSearch, StencilMerge, Strategy,
    };
    pub use crate::schedule::{StreamLeveler, StreamSchedule};
}
