mod common;

use stencilg::config::{FailurePolicy, ProblemInfo, SearchConfig};
use stencilg::error::{HarnessError, SearchError};
use stencilg::harness::{MeasureRequest, Measurement, MeasurementHarness};
use stencilg::ir::call_list;
use stencilg::opt::{LogEntry, PerformanceLog, ProfileGuidedSearch, SearchPhase, StepId, Strategy};

/// Replays fixed latencies and fails the requests listed in `fail_on`.
#[derive(Default)]
struct MockHarness {
    latencies: Vec<f64>,
    fail_on: Vec<usize>,
    labels: Vec<String>,
    kernels: Vec<usize>,
}

impl MeasurementHarness for MockHarness {
    fn measure(&mut self, request: &MeasureRequest<'_>) -> Result<Measurement, HarnessError> {
        let n = self.labels.len();
        self.labels.push(request.label.clone());
        self.kernels.push(request.schedule.kernels().len());
        if self.fail_on.contains(&n) {
            return Err(HarnessError::RunFailed {
                status: "exit status: 1".to_string(),
                stderr: "illegal memory access".to_string(),
            });
        }
        let avg = self.latencies.get(n).copied().unwrap_or(1.0);
        Ok(Measurement {
            avg,
            min: avg,
            max: avg,
        })
    }
}

#[test]
fn test_stepwise_search_fuses_chain_to_one_kernel() {
    common::setup();
    let g = common::chain();
    let harness = MockHarness {
        latencies: vec![3.0, 2.0],
        ..Default::default()
    };
    let mut search = ProfileGuidedSearch::new(&SearchConfig::default(), harness);
    let state = search.run(&g.func).unwrap();

    assert_eq!(state.phase(), SearchPhase::Done);
    assert_eq!(state.step(), 2);
    assert_eq!(call_list(state.function()).len(), 1);
    let steps: Vec<StepId> = state.records().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![StepId::Fused(1), StepId::Fused(2)]);
    assert_eq!(state.best().map(|r| r.step), Some(StepId::Fused(2)));
    assert_eq!(search.harness().labels, vec!["chain_fused_1", "chain_fused_2"]);
    assert_eq!(search.harness().kernels, vec![2, 1]);
}

#[test]
fn test_step_cap_stops_search() {
    let g = common::chain();
    let config = SearchConfig::default().with_max_steps(1);
    let mut search = ProfileGuidedSearch::new(&config, MockHarness::default());
    let state = search.run(&g.func).unwrap();
    assert_eq!(state.step(), 1);
    assert_eq!(call_list(state.function()).len(), 2);
    assert_eq!(state.records().len(), 1);
}

#[test]
fn test_failed_measurement_skips_the_pair() {
    let g = common::chain();
    let harness = MockHarness {
        fail_on: vec![0],
        ..Default::default()
    };
    let mut search = ProfileGuidedSearch::new(&SearchConfig::default(), harness);
    let state = search.run(&g.func).unwrap();

    // the rejected first pair is retried from the fused graph later on
    assert_eq!(state.step(), 2);
    assert_eq!(call_list(state.function()).len(), 1);
    let records = state.records();
    assert_eq!(records.len(), 3);
    assert!(records[0].is_failure());
    assert_eq!(records[0].step, StepId::Fused(1));
    assert!(records[0].failure.as_deref().unwrap().starts_with("run_failed"));
    assert_eq!(records[1].step, StepId::Fused(1));
    assert!(!records[1].is_failure());
}

#[test]
fn test_abort_policy_keeps_earlier_records() {
    let g = common::chain();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.jsonl");
    let config = SearchConfig::default().with_failure_policy(FailurePolicy::Abort);
    let harness = MockHarness {
        fail_on: vec![1],
        ..Default::default()
    };
    let log = PerformanceLog::open(&path, None).unwrap();
    let mut search = ProfileGuidedSearch::new(&config, harness).with_log(log);

    let err = search.run(&g.func).unwrap_err();
    assert!(matches!(err, SearchError::Harness { ref step, .. } if step == "fused_2"));

    let entries = PerformanceLog::read(&path).unwrap();
    assert_eq!(entries.len(), 2);
    let LogEntry::Step(first) = &entries[0] else {
        panic!("expected a step record");
    };
    assert_eq!(first.latency(), Some(1.0));
    assert!(first.candidate.is_some());
}

#[test]
fn test_all_strategies_share_one_log() {
    let g = common::parallel();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.jsonl");
    let problem = ProblemInfo {
        mesh_size: vec![64, 64],
        halo_width: 2,
    };
    let log = PerformanceLog::open(&path, Some(&problem)).unwrap();
    let mut search =
        ProfileGuidedSearch::new(&SearchConfig::default(), MockHarness::default()).with_log(log);

    let baseline = search.evaluate(Strategy::Baseline, &g.func).unwrap();
    assert_eq!(baseline.records()[0].streams.len(), 1);
    let parallel = search.evaluate(Strategy::ParallelMax, &g.func).unwrap();
    assert_eq!(parallel.records()[0].streams.len(), 2);
    let fused = search.evaluate(Strategy::StepwiseFusion, &g.func).unwrap();
    assert_eq!(fused.step(), 1);

    let entries = PerformanceLog::read(&path).unwrap();
    assert_eq!(entries[0], LogEntry::Header { problem });
    let steps: Vec<StepId> = entries[1..]
        .iter()
        .filter_map(|e| match e {
            LogEntry::Step(r) => Some(r.step),
            LogEntry::Header { .. } => None,
        })
        .collect();
    assert_eq!(steps, vec![StepId::Baseline, StepId::ParallelMax, StepId::Fused(1)]);
}
