mod common;

use proptest::prelude::*;
use rustc_hash::FxHashMap;
use stencilg::config::{FuseConfig, SearchConfig};
use stencilg::graph::{DependencyGraph, PatternRegistry};
use stencilg::ir::{call_list, ExprId, ExprKind, Function};
use stencilg::opt::{FuseOps, FunctionPass, PairwiseFusion, StencilMerge};
use stencilg::schedule::StreamLeveler;

fn edges() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(0usize..16, 0..3), 1..12)
}

/// Compacts arbitrary group keys into ids below `keys.len()`.
fn compact(keys: &[usize]) -> Vec<usize> {
    let mut ids: FxHashMap<usize, usize> = FxHashMap::default();
    keys.iter()
        .map(|&k| {
            let next = ids.len();
            *ids.entry(k).or_insert(next)
        })
        .collect()
}

/// Calls whose results flow into the arguments of `call` without passing
/// through another call.
fn reachable_calls(func: &Function, call: ExprId) -> Vec<ExprId> {
    let mut found = Vec::new();
    let mut work: Vec<ExprId> = func.expr(call).operands();
    while let Some(id) = work.pop() {
        match &func.expr(id).kind {
            ExprKind::Call { .. } => found.push(id),
            ExprKind::Tuple { fields } => work.extend(fields.iter().copied()),
            ExprKind::TupleGetItem { tuple, .. } => work.push(*tuple),
            _ => {}
        }
    }
    found
}

proptest! {
    #[test]
    fn prop_schedule_covers_every_call_once(edges in edges()) {
        let func = common::random_dag(&edges);
        let calls = call_list(&func);
        let deps = DependencyGraph::new(&func);

        let mut leveled: Vec<usize> = StreamLeveler::new().levels(&deps).concat();
        leveled.sort_unstable();
        prop_assert_eq!(leveled, (0..calls.len()).collect::<Vec<_>>());

        for leveler in [StreamLeveler::new(), StreamLeveler::new().without_barrier_elimination()] {
            let mut kernels = leveler.schedule(&func).kernels();
            kernels.sort();
            let mut expected = calls.clone();
            expected.sort();
            prop_assert_eq!(kernels, expected);
        }
    }

    #[test]
    fn prop_levels_follow_dependencies(edges in edges(), max_steps in 0usize..3) {
        let func = common::random_dag(&edges);
        let fused = PairwiseFusion::new(&SearchConfig::default().with_max_steps(max_steps)).run(&func);
        let merged = StencilMerge::new(PatternRegistry::with_defaults()).run(&func);
        for graph in [&func, &fused, &merged] {
            let schedule = StreamLeveler::new().schedule(graph);
            let level_of: FxHashMap<ExprId, usize> = schedule
                .levels
                .iter()
                .enumerate()
                .flat_map(|(l, level)| level.iter().map(move |&call| (call, l)))
                .collect();
            for call in call_list(graph) {
                for producer in reachable_calls(graph, call) {
                    prop_assert!(
                        level_of[&producer] < level_of[&call],
                        "{} is not leveled after its producer {}",
                        call,
                        producer
                    );
                }
            }
        }
    }

    #[test]
    fn prop_dominator_groups_do_not_create_cycles(edges in edges(), opt_level in 0u8..4) {
        let func = common::random_dag(&edges);
        let pass = FuseOps::new(
            PatternRegistry::with_defaults(),
            FuseConfig::default().with_opt_level(opt_level),
        );
        let (graph, partition) = pass.partition(&func);
        let deps = DependencyGraph::new(&func);
        let roots: Vec<usize> = deps
            .calls()
            .iter()
            .map(|&call| graph.index_of(call).map_or(usize::MAX, |n| partition.root_of(n)))
            .collect();
        prop_assert!(deps.contracted_is_acyclic(&compact(&roots)));

        let fused = pass.run(&func);
        prop_assert!(fused.validate().is_ok());
        prop_assert!(call_list(&fused).len() <= call_list(&func).len());
    }

    #[test]
    fn prop_stencil_merge_plan_is_acyclic(edges in edges()) {
        let func = common::random_dag(&edges);
        let deps = DependencyGraph::new(&func);
        let plan = StencilMerge::new(PatternRegistry::with_defaults()).plan(&func);

        let mut keys: Vec<usize> = (0..deps.len()).collect();
        for (g, op) in plan.iter().enumerate() {
            // tuples and projections pulled into a group are not calls
            let calls = op.members().iter().filter(|&&m| func.expr(m).is_call());
            for &member in calls {
                let pos = deps.position(member);
                prop_assert!(pos.is_some());
                if let Some(pos) = pos {
                    // each call joins at most one group
                    prop_assert!(keys[pos] < deps.len());
                    keys[pos] = deps.len() + g;
                }
            }
        }
        prop_assert!(deps.contracted_is_acyclic(&compact(&keys)));
    }

    #[test]
    fn prop_pairwise_fusion_keeps_graph_valid(edges in edges(), max_steps in 0usize..4) {
        let func = common::random_dag(&edges);
        let before = call_list(&func).len();
        let pass = PairwiseFusion::new(&SearchConfig::default().with_max_steps(max_steps));
        let fused = pass.run(&func);
        prop_assert!(fused.validate().is_ok());
        let after = call_list(&fused).len();
        prop_assert!(after <= before);
        prop_assert!(before - after <= max_steps);
        prop_assert_eq!(fused.ret_type(), func.ret_type());
    }

    #[test]
    fn prop_find_root_is_idempotent(edges in edges()) {
        let func = common::random_dag(&edges);
        let pass = FuseOps::new(PatternRegistry::with_defaults(), FuseConfig::default());
        let (_, mut partition) = pass.partition(&func);
        for i in 0..partition.len() {
            let root = partition.find_root(i);
            prop_assert_eq!(partition.find_root(i), root);
            prop_assert_eq!(partition.find_root(root), root);
        }
    }
}
