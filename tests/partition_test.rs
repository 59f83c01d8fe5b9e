mod common;

use rstest::rstest;
use stencilg::config::FuseConfig;
use stencilg::graph::{IndexedForwardGraph, PatternRegistry};
use stencilg::ir::{call_list, Callee};
use stencilg::opt::{FuseOps, FunctionPass};

fn fuse_ops(opt_level: u8) -> FuseOps {
    FuseOps::new(
        PatternRegistry::with_defaults(),
        FuseConfig::default().with_opt_level(opt_level),
    )
}

#[test]
fn test_diamond_fuses_into_one_group_rooted_at_d() {
    common::setup();
    let g = common::diamond();
    let pass = fuse_ops(1);

    let (graph, partition) = pass.partition(&g.func);
    let groups = partition.multi_node_groups();
    assert_eq!(groups.len(), 1);
    let (root, members) = &groups[0];
    assert_eq!(partition.group(*root).root_ref, g.d);
    let member_exprs: Vec<_> = members.iter().map(|&m| partition.expr(m)).collect();
    for id in [g.a, g.b, g.c, g.d] {
        assert!(member_exprs.contains(&id), "{} missing from the group", id);
    }
    assert!(!member_exprs.contains(&g.x));
    assert_eq!(graph.index_of(g.d), Some(*root));

    let ops = pass.group_ops(&g.func, &partition);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].args(), &[g.x]);
    assert_eq!(ops[0].outputs(), &[g.d]);
}

#[test]
fn test_diamond_rewrite_leaves_one_call() {
    let g = common::diamond();
    let fused = fuse_ops(1).run(&g.func);
    assert!(fused.validate().is_ok());
    let calls = call_list(&fused);
    assert_eq!(calls.len(), 1);
    let body = fused.expr(calls[0]);
    let Some(Callee::Function(inner)) = body.callee() else {
        panic!("expected a fused call, got {:?}", body);
    };
    assert_eq!(inner.params().len(), 1);
    assert_eq!(call_list(inner).len(), 4);
}

#[rstest]
#[case(0, 4)]
#[case(1, 1)]
#[case(3, 1)]
fn test_opt_level(#[case] opt_level: u8, #[case] expected_calls: usize) {
    let g = common::diamond();
    let fused = fuse_ops(opt_level).run(&g.func);
    assert_eq!(call_list(&fused).len(), expected_calls);
}

#[test]
fn test_find_root_is_idempotent() {
    let g = common::diamond();
    let (_, mut partition) = fuse_ops(1).partition(&g.func);
    for i in 0..partition.len() {
        let before = partition.root_of(i);
        let first = partition.find_root(i);
        let second = partition.find_root(i);
        assert_eq!(first, second);
        assert_eq!(first, before);
        // compression points the node straight at its root
        if i != first {
            assert_eq!(partition.group(i).parent(), Some(first));
        }
    }
}

#[test]
fn test_parallel_stencils_are_not_fused_by_dominator_pass() {
    let g = common::parallel();
    let (_, partition) = fuse_ops(1).partition(&g.func);
    assert!(partition.multi_node_groups().is_empty());
    assert_eq!(call_list(&fuse_ops(1).run(&g.func)).len(), 2);
}

#[test]
fn test_chain_of_stencils_stays_unfused() {
    let g = common::chain();
    let fused = fuse_ops(1).run(&g.func);
    assert_eq!(call_list(&fused), vec![g.a, g.b, g.c]);
}

#[test]
fn test_debug_dump_lists_every_node() {
    let g = common::diamond();
    let graph = IndexedForwardGraph::build(&g.func, &PatternRegistry::with_defaults());
    let dump = graph.debug_dump(&g.func);
    assert_eq!(dump.lines().count(), graph.len());
    assert!(dump.lines().all(|l| l.starts_with("node[")));
}
