mod common;

use rstest::rstest;
use rustc_hash::FxHashSet;
use stencilg::config::SearchConfig;
use stencilg::graph::DependencyGraph;
use stencilg::ir::{call_list, Callee};
use stencilg::opt::{FunctionPass, PairwiseFusion};

fn pairwise() -> PairwiseFusion {
    PairwiseFusion::new(&SearchConfig::default())
}

#[test]
fn test_parallel_pair_sharing_an_input_is_eligible() {
    common::setup();
    let g = common::parallel();
    let pass = pairwise();

    let best = pass.best_pair(&g.func, &FxHashSet::default()).unwrap();
    assert_eq!((best.first, best.second), (g.a, g.b));
    // one shared 64x64 input at weight 1
    assert_eq!(best.score, 4096);

    let op = pass.group_for(&g.func, g.a, g.b);
    assert_eq!(op.args(), &[g.x]);
    assert_eq!(op.outputs(), &[g.a, g.b]);

    let fused = pass.fuse_pair(&g.func, g.a, g.b);
    assert!(fused.validate().is_ok());
    let calls = call_list(&fused);
    assert_eq!(calls.len(), 1);
    let Some(Callee::Function(inner)) = fused.expr(calls[0]).callee() else {
        panic!("expected a fused call");
    };
    assert_eq!(inner.tag.as_deref(), Some("fuse_a_b"));
    assert_eq!(fused.ret_type(), g.func.ret_type());
}

#[test]
fn test_skipping_an_intermediate_call_is_excluded() {
    let g = common::exclusion();
    let pass = pairwise();
    let deps = DependencyGraph::new(&g.func);
    let (pa, pc) = (
        deps.position(g.a).unwrap(),
        deps.position(g.c).unwrap(),
    );
    assert!(deps.is_excluded(pa, pc));
    assert!(deps.is_excluded(pc, pa));

    let table = pass.score_table(&g.func, &FxHashSet::default());
    assert_eq!(table.scores[pa][pc], -1);
    assert_eq!(table.scores[pc][pa], -1);
    for i in 0..table.calls.len() {
        assert_eq!(table.scores[i][i], -1);
    }

    // b feeds c (256 * 2) and both read a (256 * 1)
    let best = table.best().unwrap();
    assert_eq!((best.first, best.second), (g.b, g.c));
    assert_eq!(best.score, 768);
}

#[test]
fn test_rejected_pairs_are_skipped() {
    let g = common::chain();
    let pass = pairwise();
    let mut rejected = FxHashSet::default();
    let first = pass.best_pair(&g.func, &rejected).unwrap();
    // (a, b) and (b, c) tie; the earlier row wins
    assert_eq!((first.first, first.second), (g.a, g.b));

    rejected.insert((g.a, g.b));
    let next = pass.best_pair(&g.func, &rejected).unwrap();
    assert_eq!(next.score, first.score);
    assert_ne!((next.first, next.second), (g.a, g.b));
}

#[rstest]
#[case(0, 3)]
#[case(1, 2)]
#[case(30, 1)]
fn test_run_respects_step_cap(#[case] max_steps: usize, #[case] expected_calls: usize) {
    let g = common::chain();
    let pass = PairwiseFusion::new(&SearchConfig::default().with_max_steps(max_steps));
    let fused = pass.run(&g.func);
    assert!(fused.validate().is_ok());
    assert_eq!(call_list(&fused).len(), expected_calls);
}

#[test]
fn test_steps_never_commit_negative_scores() {
    let g = common::exclusion();
    let pass = pairwise();
    let mut current = g.func.clone();
    let mut steps = 0;
    while let Some((candidate, fused)) = pass.step(&current, &FxHashSet::default()) {
        assert!(candidate.score >= 0);
        assert!(call_list(&fused).len() < call_list(&current).len());
        current = fused;
        steps += 1;
        assert!(steps <= 3, "search did not terminate");
    }
    assert_eq!(call_list(&current).len(), 1);
}

#[test]
fn test_tuple_argument_counts_as_result_reuse() {
    let g = common::tuple_arg();
    let pass = pairwise();
    // a passed to d inside the tuple (4096 * 2)
    assert_eq!(pass.score(&g.func, g.a, g.d), 8192);
    assert_eq!(pass.score(&g.func, g.a, g.c), 4096);

    let best = pass.best_pair(&g.func, &FxHashSet::default()).unwrap();
    assert_eq!((best.first, best.second), (g.a, g.d));
    let op = pass.group_for(&g.func, g.a, g.d);
    // the tuple joins the group; c stays outside as an argument
    assert!(op.contains(g.t));
    assert_eq!(op.args(), &[g.x, g.c]);
    assert_eq!(op.outputs(), &[g.d]);
}

#[test]
fn test_tuple_argument_fuses_to_one_valid_call() {
    common::setup();
    let g = common::tuple_arg();
    let pass = pairwise();
    let mut current = g.func.clone();
    let mut steps = 0;
    while let Some((_, fused)) = pass.step(&current, &FxHashSet::default()) {
        assert!(fused.validate().is_ok());
        let deps = DependencyGraph::new(&fused);
        let identity: Vec<usize> = (0..deps.len()).collect();
        assert!(deps.contracted_is_acyclic(&identity));
        current = fused;
        steps += 1;
        assert!(steps <= 2, "search did not terminate");
    }
    assert_eq!(call_list(&current).len(), 1);
    assert_eq!(current.ret_type(), g.func.ret_type());
}
