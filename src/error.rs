//! Error types.
//!
//! Structural invariant violations inside the passes (a node missing from the
//! index map, a group with two anchors) are programmer errors and abort with
//! `assert!`. The enums here cover the recoverable boundaries: malformed input
//! graphs, the external measurement harness, and the search driver.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ir::ExprId;

/// Errors raised while accepting a graph from the front end.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An operand refers to an expression that is not defined before its user.
    #[error("expression {user} refers to {operand}, which is not defined before it")]
    ForwardReference { user: ExprId, operand: ExprId },

    /// The function body or a parameter is outside the expression arena.
    #[error("{what} {id} is out of range (graph has {len} expressions)")]
    OutOfRange {
        what: &'static str,
        id: ExprId,
        len: usize,
    },

    /// A parameter slot does not hold a variable.
    #[error("parameter {0} is not a variable")]
    ParamNotVar(ExprId),

    /// A projection reads past the end of a tuple.
    #[error("projection {id} reads field {index} of a tuple with {arity} fields")]
    ProjectionOutOfRange {
        id: ExprId,
        index: usize,
        arity: usize,
    },

    /// A tuple's field list disagrees with its declared type.
    #[error("tuple {id} has {fields} fields but its type declares {declared}")]
    TupleArity {
        id: ExprId,
        fields: usize,
        declared: usize,
    },

    /// The input could not be deserialized.
    #[error("failed to parse graph: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures reported by the build/link/run harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A compile or link step exited unsuccessfully.
    #[error("{stage} step failed ({status}): {stderr}")]
    BuildFailed {
        stage: String,
        status: String,
        stderr: String,
    },

    /// The produced artifact failed while running.
    #[error("run failed ({status}): {stderr}")]
    RunFailed { status: String, stderr: String },

    /// A step did not finish within the configured limit.
    #[error("{stage} step timed out after {elapsed:?}")]
    Timeout { stage: String, elapsed: Duration },

    /// The run finished but printed no timing lines.
    #[error("no timing lines found in run output")]
    MissingTiming,

    /// The configured timing pattern is not a valid regular expression.
    #[error("invalid timing pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The harness configuration has no run command.
    #[error("no run command configured")]
    MissingRunCommand,

    /// The harness could not spawn a process or write its inputs.
    #[error("harness I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Short label used in the performance log.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::BuildFailed { .. } => "build_failed",
            HarnessError::RunFailed { .. } => "run_failed",
            HarnessError::Timeout { .. } => "timeout",
            HarnessError::MissingTiming => "missing_timing",
            HarnessError::InvalidPattern { .. } | HarnessError::MissingRunCommand => "config",
            HarnessError::Io { .. } => "io",
        }
    }
}

/// Errors surfaced by the profile-guided search driver.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The harness failed and the failure policy asked to abort.
    #[error("measurement of step {step} failed: {source}")]
    Harness {
        step: String,
        #[source]
        source: HarnessError,
    },

    /// The performance log could not be written.
    #[error("failed to write performance log {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A log record could not be serialized.
    #[error("failed to serialize performance record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
}
