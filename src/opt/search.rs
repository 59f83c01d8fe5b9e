//! Profile-guided fusion search.
//!
//! The driver alternates between one pairwise fusion step and one measurement
//! of the rewritten graph:
//!
//! ```text
//! Searching -> Fused -> Measured -> Searching | Done
//!     |
//!     +-> Done (no pair left)
//! ```
//!
//! Every measurement is appended to the performance log. The state carried
//! between iterations is an immutable [`SearchState`] value.

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use super::history::{PerformanceLog, StepId, StepRecord};
use super::pairwise::{FusionCandidate, PairwiseFusion};
use super::progress::{CommittedStep, NoOpProgress, SearchProgress, SearchSummary};
use crate::config::{FailurePolicy, SearchConfig};
use crate::error::SearchError;
use crate::harness::{MeasureRequest, MeasurementHarness};
use crate::ir::{ExprId, Function};
use crate::schedule::{StreamLeveler, StreamSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Searching,
    Fused,
    Measured,
    Done,
}

/// How a graph is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// No fusion, every call on one stream.
    Baseline,
    /// No fusion, leveled streams.
    ParallelMax,
    /// Pairwise fusion, measured after every step.
    StepwiseFusion,
}

/// Snapshot of the search: current graph, committed steps and all records.
#[derive(Debug, Clone)]
pub struct SearchState {
    function: Arc<Function>,
    step: usize,
    phase: SearchPhase,
    records: Vec<StepRecord>,
}

impl SearchState {
    pub fn new(function: Function) -> Self {
        Self {
            function: Arc::new(function),
            step: 0,
            phase: SearchPhase::Searching,
            records: Vec::new(),
        }
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Committed fusion steps.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Fastest successful record.
    pub fn best(&self) -> Option<&StepRecord> {
        self.records
            .iter()
            .filter_map(|r| r.latency().map(|l| (r, l)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, _)| r)
    }

    pub fn with_phase(self, phase: SearchPhase) -> Self {
        Self { phase, ..self }
    }

    pub fn with_record(mut self, record: StepRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Commit a fused graph as the next step.
    pub fn advance(self, function: Arc<Function>) -> Self {
        Self {
            function,
            step: self.step + 1,
            ..self
        }
    }
}

/// A fused graph awaiting measurement.
struct Pending {
    candidate: FusionCandidate,
    description: String,
    function: Arc<Function>,
}

pub struct ProfileGuidedSearch<H, P = NoOpProgress> {
    fusion: PairwiseFusion,
    leveler: StreamLeveler,
    harness: H,
    progress: P,
    failure_policy: FailurePolicy,
    log: PerformanceLog,
}

impl<H: MeasurementHarness> ProfileGuidedSearch<H> {
    pub fn new(config: &SearchConfig, harness: H) -> Self {
        Self {
            fusion: PairwiseFusion::new(config),
            leveler: StreamLeveler::new(),
            harness,
            progress: NoOpProgress,
            failure_policy: config.failure_policy,
            log: PerformanceLog::disabled(),
        }
    }
}

impl<H: MeasurementHarness, P: SearchProgress> ProfileGuidedSearch<H, P> {
    pub fn with_progress<Q: SearchProgress>(self, progress: Q) -> ProfileGuidedSearch<H, Q> {
        ProfileGuidedSearch {
            fusion: self.fusion,
            leveler: self.leveler,
            harness: self.harness,
            progress,
            failure_policy: self.failure_policy,
            log: self.log,
        }
    }

    pub fn with_log(mut self, log: PerformanceLog) -> Self {
        self.log = log;
        self
    }

    pub fn harness(&self) -> &H {
        &self.harness
    }

    /// Measure `func` under `schedule` and log the result.
    ///
    /// A harness failure is logged and returned as a failed record under
    /// [`FailurePolicy::SkipPair`], and as an error under
    /// [`FailurePolicy::Abort`].
    pub fn measure(
        &mut self,
        step: StepId,
        func: &Function,
        schedule: &StreamSchedule,
    ) -> Result<StepRecord, SearchError> {
        let request = MeasureRequest {
            label: format!("{}_{}", func.name, step),
            function: func,
            schedule,
        };
        let streams = schedule.labels(func);
        let record = match self.harness.measure(&request) {
            Ok(m) => StepRecord::measured(step, streams, m),
            Err(e) => {
                warn!("{}: measurement failed: {}", step, e);
                let record = StepRecord::failed(step, streams, &e);
                self.log.append(&record)?;
                if self.failure_policy == FailurePolicy::Abort {
                    return Err(SearchError::Harness {
                        step: step.to_string(),
                        source: e,
                    });
                }
                return Ok(record);
            }
        };
        self.log.append(&record)?;
        Ok(record)
    }

    pub fn evaluate(&mut self, strategy: Strategy, func: &Function) -> Result<SearchState, SearchError> {
        match strategy {
            Strategy::Baseline => {
                let schedule = StreamSchedule::serial(func);
                let record = self.measure(StepId::Baseline, func, &schedule)?;
                Ok(SearchState::new(func.clone())
                    .with_record(record)
                    .with_phase(SearchPhase::Done))
            }
            Strategy::ParallelMax => {
                let schedule = self.leveler.schedule(func);
                let record = self.measure(StepId::ParallelMax, func, &schedule)?;
                Ok(SearchState::new(func.clone())
                    .with_record(record)
                    .with_phase(SearchPhase::Done))
            }
            Strategy::StepwiseFusion => self.run(func),
        }
    }

    /// Run the search loop from `func` until no pair is left or the step cap
    /// is reached.
    pub fn run(&mut self, func: &Function) -> Result<SearchState, SearchError> {
        let max_steps = self.fusion.max_steps();
        let start = Instant::now();
        self.progress.start(max_steps);

        let mut state = SearchState::new(func.clone());
        let mut pending: Option<Pending> = None;
        let mut rejected: FxHashSet<(ExprId, ExprId)> = FxHashSet::default();
        loop {
            state = match state.phase() {
                SearchPhase::Searching => {
                    if state.step() >= max_steps {
                        state.with_phase(SearchPhase::Done)
                    } else {
                        match self.fusion.step(state.function(), &rejected) {
                            Some((candidate, fused)) => {
                                let current = state.function();
                                pending = Some(Pending {
                                    candidate,
                                    description: format!(
                                        "{} + {}",
                                        current.label(candidate.first),
                                        current.label(candidate.second)
                                    ),
                                    function: Arc::new(fused),
                                });
                                state.with_phase(SearchPhase::Fused)
                            }
                            None => state.with_phase(SearchPhase::Done),
                        }
                    }
                }
                SearchPhase::Fused => {
                    let Some(p) = pending.take() else {
                        unreachable!("fused phase without a pending graph");
                    };
                    let step = StepId::Fused(state.step() + 1);
                    let schedule = self.leveler.schedule(&p.function);
                    let record = match self.measure(step, &p.function, &schedule) {
                        Ok(record) => record.with_candidate(p.description.clone(), p.candidate.score),
                        Err(e) => {
                            self.progress.abort(&p.description);
                            return Err(e);
                        }
                    };
                    if let Some(reason) = record.failure.as_deref() {
                        // Leave the graph as it was and try the next pair.
                        self.progress.skipped(&p.description, reason);
                        rejected.insert((p.candidate.first, p.candidate.second));
                        rejected.insert((p.candidate.second, p.candidate.first));
                        state.with_record(record).with_phase(SearchPhase::Searching)
                    } else {
                        rejected.clear();
                        self.report(&state, &record);
                        state
                            .with_record(record)
                            .advance(p.function)
                            .with_phase(SearchPhase::Measured)
                    }
                }
                SearchPhase::Measured => {
                    if state.step() >= max_steps {
                        state.with_phase(SearchPhase::Done)
                    } else {
                        state.with_phase(SearchPhase::Searching)
                    }
                }
                SearchPhase::Done => break,
            };
        }

        self.progress.finish(&SearchSummary {
            elapsed: start.elapsed(),
            steps: state.step(),
            skipped: state.records().iter().filter(|r| r.is_failure()).count(),
            best: state.best().and_then(StepRecord::latency),
        });
        info!(
            "search finished after {} steps; best {}",
            state.step(),
            state
                .best()
                .map(|r| format!("{} ({:.4})", r.step, r.latency().unwrap_or_default()))
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(state)
    }

    fn report(&mut self, state: &SearchState, record: &StepRecord) {
        let latency = record.latency().unwrap_or_default();
        let candidate = record.candidate.as_deref().unwrap_or_default();
        info!("{}: fused {} -> {:.4}", record.step, candidate, latency);
        let best = match state.best().and_then(StepRecord::latency) {
            Some(best) if best < latency => {
                info!("{} is slower than the best step so far ({:.4})", record.step, best);
                best
            }
            _ => latency,
        };
        self.progress.committed(&CommittedStep {
            step: state.step() + 1,
            candidate: candidate.to_string(),
            latency,
            best,
        });
    }
}
