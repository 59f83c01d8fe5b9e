//! Per-step performance records and their JSON Lines log.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ProblemInfo;
use crate::error::{HarnessError, SearchError};
use crate::harness::Measurement;

/// Which evaluation a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Unfused, one stream.
    Baseline,
    /// Unfused, leveled streams.
    ParallelMax,
    /// After the n-th committed fusion.
    Fused(usize),
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepId::Baseline => write!(f, "baseline"),
            StepId::ParallelMax => write!(f, "parallel_max"),
            StepId::Fused(n) => write!(f, "fused_{}", n),
        }
    }
}

/// One measured (or failed) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepId,
    /// The pair fused by this step, as `first + second`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    /// Stream assignment, one label list per stream.
    pub streams: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<Measurement>,
    /// `<kind>: <message>` when the harness failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl StepRecord {
    pub fn measured(step: StepId, streams: Vec<Vec<String>>, measurement: Measurement) -> Self {
        Self {
            step,
            candidate: None,
            score: None,
            streams,
            measurement: Some(measurement),
            failure: None,
        }
    }

    pub fn failed(step: StepId, streams: Vec<Vec<String>>, error: &HarnessError) -> Self {
        Self {
            step,
            candidate: None,
            score: None,
            streams,
            measurement: None,
            failure: Some(format!("{}: {}", error.kind(), error)),
        }
    }

    pub fn with_candidate(mut self, candidate: impl Into<String>, score: i64) -> Self {
        self.candidate = Some(candidate.into());
        self.score = Some(score);
        self
    }

    pub fn latency(&self) -> Option<f64> {
        self.measurement.map(|m| m.avg)
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// A line of the performance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Header { problem: ProblemInfo },
    Step(StepRecord),
}

/// Append-only JSON Lines log shared by every strategy run.
///
/// A disabled log accepts and drops every record.
#[derive(Debug, Clone, Default)]
pub struct PerformanceLog {
    path: Option<PathBuf>,
}

impl PerformanceLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Open (or create) the log at `path`. A new or empty file gets a header
    /// line when `problem` is given.
    pub fn open(path: impl Into<PathBuf>, problem: Option<&ProblemInfo>) -> Result<Self, SearchError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SearchError::Log {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let log = Self { path: Some(path) };
        let empty = log
            .path()
            .map(|p| fs::metadata(p).map(|m| m.len() == 0).unwrap_or(true))
            .unwrap_or(false);
        if let (true, Some(problem)) = (empty, problem) {
            log.write_entry(&LogEntry::Header {
                problem: problem.clone(),
            })?;
        }
        Ok(log)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&self, record: &StepRecord) -> Result<(), SearchError> {
        self.write_entry(&LogEntry::Step(record.clone()))
    }

    fn write_entry(&self, entry: &LogEntry) -> Result<(), SearchError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)?;
        let io_error = |source| SearchError::Log {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;
        writeln!(file, "{}", line).map_err(io_error)
    }

    /// Every entry of the log at `path`, skipping blank lines.
    pub fn read(path: &Path) -> Result<Vec<LogEntry>, SearchError> {
        let text = fs::read_to_string(path).map_err(|source| SearchError::Log {
            path: path.to_path_buf(),
            source,
        })?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SearchError::from))
            .collect()
    }
}
