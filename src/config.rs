//! Configuration for the fusion passes, the search driver and the harness.
//!
//! Every struct has sensible defaults and `with_*` builder methods; the
//! aggregate [`StencilgConfig`] is read from a JSON file and can be adjusted
//! through environment variables:
//!
//! - `STENCILG_MAX_STEPS`: overrides [`SearchConfig::max_steps`]
//! - `STENCILG_PERF_LOG`: overrides [`SearchConfig::log_path`]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::PatternRegistry;

pub const ENV_MAX_STEPS: &str = "STENCILG_MAX_STEPS";
pub const ENV_PERF_LOG: &str = "STENCILG_PERF_LOG";

/// Settings of the dominator-tree partitioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseConfig {
    /// 0 disables fusion entirely.
    pub opt_level: u8,
    /// Upper bound on the number of nodes in one group.
    pub max_fuse_depth: usize,
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            opt_level: 1,
            max_fuse_depth: 256,
        }
    }
}

impl FuseConfig {
    pub fn with_opt_level(mut self, opt_level: u8) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_max_fuse_depth(mut self, max_fuse_depth: usize) -> Self {
        self.max_fuse_depth = max_fuse_depth;
        self
    }
}

/// What the search does when a measurement fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the step as failed, reject the pair and continue from the
    /// previous graph.
    #[default]
    SkipPair,
    /// Stop the search and return the error. Earlier records stay in the log.
    Abort,
}

/// Settings of the pairwise fusion search and its driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of committed fusion steps.
    pub max_steps: usize,
    /// Weight of an input tensor read by both calls.
    pub input_reuse_weight: u64,
    /// Weight of a result passed from one call to the other.
    pub result_reuse_weight: u64,
    pub failure_policy: FailurePolicy,
    /// JSON Lines file receiving one record per measurement.
    pub log_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            input_reuse_weight: 1,
            result_reuse_weight: 2,
            failure_policy: FailurePolicy::SkipPair,
            log_path: None,
            show_progress: false,
        }
    }
}

impl SearchConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_weights(mut self, input_reuse: u64, result_reuse: u64) -> Self {
        self.input_reuse_weight = input_reuse;
        self.result_reuse_weight = result_reuse;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }
}

/// One external command. `{input}` and `{work_dir}` in arguments are
/// replaced by the request file and the working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Settings of the subprocess measurement harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub work_dir: PathBuf,
    /// Compile steps, run in order.
    pub build: Vec<CommandSpec>,
    pub link: Option<CommandSpec>,
    pub run: CommandSpec,
    /// Per-step limit; `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    /// Regex with one capture group holding a latency value.
    pub timing_pattern: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("stencilg-work"),
            build: Vec::new(),
            link: None,
            run: CommandSpec::default(),
            timeout_secs: None,
            timing_pattern: r"time.*?(\d+\.\d+)".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_build_step(mut self, step: CommandSpec) -> Self {
        self.build.push(step);
        self
    }

    pub fn with_link(mut self, link: CommandSpec) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_run(mut self, run: CommandSpec) -> Self {
        self.run = run;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Description of the measured problem, written as the log header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemInfo {
    pub mesh_size: Vec<usize>,
    pub halo_width: usize,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StencilgConfig {
    pub fuse: FuseConfig,
    pub search: SearchConfig,
    pub harness: HarnessConfig,
    /// Pattern registrations; the built-in table is used when absent.
    pub patterns: Option<PatternRegistry>,
    pub problem: Option<ProblemInfo>,
}

impl StencilgConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Apply `STENCILG_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_MAX_STEPS) {
            self.search.max_steps = value.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_MAX_STEPS,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_PERF_LOG) {
            self.search.log_path = Some(PathBuf::from(value));
        }
        Ok(self)
    }

    pub fn pattern_registry(&self) -> PatternRegistry {
        self.patterns
            .clone()
            .unwrap_or_else(PatternRegistry::with_defaults)
    }
}
