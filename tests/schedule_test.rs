mod common;

use stencilg::config::SearchConfig;
use stencilg::ir::call_list;
use stencilg::opt::{FunctionPass, PairwiseFusion};
use stencilg::schedule::{StreamEntry, StreamLeveler, StreamSchedule};

#[test]
fn test_chain_has_three_levels_and_no_barriers() {
    common::setup();
    let g = common::chain();
    let schedule = StreamLeveler::new().schedule(&g.func);
    assert_eq!(schedule.levels, vec![vec![g.a], vec![g.b], vec![g.c]]);
    assert_eq!(schedule.num_streams(), 1);
    assert_eq!(schedule.sync_count(), 0);
    assert_eq!(
        schedule.streams[0],
        vec![
            StreamEntry::Kernel(g.a),
            StreamEntry::Kernel(g.b),
            StreamEntry::Kernel(g.c)
        ]
    );
}

#[test]
fn test_chain_keeps_barriers_when_asked() {
    let g = common::chain();
    let schedule = StreamLeveler::new()
        .without_barrier_elimination()
        .schedule(&g.func);
    assert_eq!(schedule.sync_count(), 2);
    assert_eq!(schedule.labels(&g.func)[0], vec!["stencil_a", "sync_1", "stencil_b", "sync_2", "stencil_c"]);
}

#[test]
fn test_diamond_levels() {
    let g = common::diamond();
    let schedule = StreamLeveler::new().schedule(&g.func);
    assert_eq!(schedule.levels, vec![vec![g.a], vec![g.b, g.c], vec![g.d]]);
    assert_eq!(schedule.num_streams(), 2);
    // c on stream 1 reads a from stream 0, and d reads c back
    assert_eq!(schedule.sync_count(), 4);
}

#[test]
fn test_parallel_calls_share_one_level() {
    let g = common::parallel();
    let schedule = StreamLeveler::new().schedule(&g.func);
    assert_eq!(schedule.levels, vec![vec![g.a, g.b]]);
    assert_eq!(schedule.num_streams(), 2);
    assert_eq!(schedule.sync_count(), 0);
}

#[test]
fn test_fused_graph_schedules_fused_calls() {
    let g = common::parallel();
    let fused = PairwiseFusion::new(&SearchConfig::default()).run(&g.func);
    let schedule = StreamLeveler::new().schedule(&fused);
    assert_eq!(schedule.kernels(), call_list(&fused));
    assert_eq!(schedule.kernels().len(), 1);
}

#[test]
fn test_serial_schedule_roundtrips_through_json() {
    let g = common::diamond();
    let schedule = StreamSchedule::serial(&g.func);
    let json = serde_json::to_string(&schedule).unwrap();
    let back: StreamSchedule = serde_json::from_str(&json).unwrap();
    assert_eq!(back, schedule);
    assert_eq!(back.kernels(), vec![g.a, g.b, g.c, g.d]);
}

#[test]
fn test_tuple_argument_consumer_waits_for_producers() {
    let g = common::tuple_arg();
    let schedule = StreamLeveler::new().schedule(&g.func);
    assert_eq!(schedule.levels, vec![vec![g.a, g.c], vec![g.d]]);
    // d on stream 0 reads c from stream 1
    assert_eq!(schedule.sync_count(), 2);
    assert_eq!(
        schedule.streams[0],
        vec![StreamEntry::Kernel(g.a), StreamEntry::Sync(1), StreamEntry::Kernel(g.d)]
    );
}
