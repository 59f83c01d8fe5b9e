use log::{debug, info};
use rustc_hash::FxHashMap;

use super::group_op::FusedOperation;
use super::partition::{GraphPartitioner, Partition};
use super::FunctionPass;
use crate::config::FuseConfig;
use crate::graph::{IndexedForwardGraph, PatternRegistry};
use crate::ir::{rewrite, users, Function, FusedCall};

/// Dominator-tree fusion: partition the graph and replace every multi-node
/// group containing a call by one fused call.
#[derive(Debug, Clone)]
pub struct FuseOps {
    registry: PatternRegistry,
    config: FuseConfig,
}

impl FuseOps {
    pub fn new(registry: PatternRegistry, config: FuseConfig) -> Self {
        Self { registry, config }
    }

    /// Partition `func` without rewriting it.
    pub fn partition(&self, func: &Function) -> (IndexedForwardGraph, Partition) {
        let graph = IndexedForwardGraph::build(func, &self.registry);
        let partition = GraphPartitioner::new(&self.config).partition(&graph);
        (graph, partition)
    }

    /// The fused operations a partition induces, in root order.
    pub fn group_ops(&self, func: &Function, partition: &Partition) -> Vec<FusedOperation> {
        let users = users(func);
        partition
            .multi_node_groups()
            .into_iter()
            .filter_map(|(_, members)| {
                let members: Vec<_> = members.into_iter().map(|m| partition.expr(m)).collect();
                if !members.iter().any(|&m| func.expr(m).is_call()) {
                    return None;
                }
                let mut op = FusedOperation::new(func, members);
                op.infer_outputs(func, &users);
                Some(op)
            })
            .collect()
    }
}

impl FunctionPass for FuseOps {
    fn name(&self) -> &'static str {
        "fuse_ops"
    }

    fn run(&self, func: &Function) -> Function {
        let (_, partition) = self.partition(func);
        let ops = self.group_ops(func, &partition);
        info!("fuse_ops: {} fused groups in `{}`", ops.len(), func.name);
        apply_group_ops(func, &ops)
    }
}

/// Rewrite `func` with every group replaced by its fused call.
pub fn apply_group_ops(func: &Function, ops: &[FusedOperation]) -> Function {
    let mut calls: Vec<FusedCall> = Vec::with_capacity(ops.len());
    let mut substitutions = FxHashMap::default();
    for (index, op) in ops.iter().enumerate() {
        let call = op.fuse(func);
        debug!(
            "group {}: {} members, {} args, {} outputs -> {}",
            index,
            op.members().len(),
            op.args().len(),
            op.outputs().len(),
            call.function.name
        );
        calls.push(call);
        substitutions.extend(op.substitutions(func, index));
    }
    rewrite(func, &calls, &substitutions)
}
