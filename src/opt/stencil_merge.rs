//! One-shot stencil merge.
//!
//! Pairs independent stencil sweeps into parallel groups, then pairs
//! one-to-one calls with their direct consumer. Every call joins at most one
//! pair and a pair is only taken if the contracted graph stays acyclic. All
//! pairs are applied in a single rewrite.

use log::{debug, info};

use super::fuse_ops::apply_group_ops;
use super::group_op::FusedOperation;
use super::FunctionPass;
use crate::graph::{DependencyGraph, OpPattern, PatternRegistry};
use crate::ir::{users, Callee, Function};

#[derive(Debug, Clone)]
pub struct StencilMerge {
    registry: PatternRegistry,
}

impl StencilMerge {
    pub fn new(registry: PatternRegistry) -> Self {
        Self { registry }
    }

    /// The groups this pass would apply.
    pub fn plan(&self, func: &Function) -> Vec<FusedOperation> {
        let deps = DependencyGraph::new(func);
        let calls = deps.calls();
        let patterns: Vec<OpPattern> = calls
            .iter()
            .map(|&c| match func.expr(c).callee() {
                Some(Callee::Op(op)) => self.registry.lookup(op),
                _ => OpPattern::Opaque,
            })
            .collect();

        let mut pairing = Pairing::new(&deps);
        let parallel: Vec<usize> = (0..calls.len())
            .filter(|&i| patterns[i] == OpPattern::Parallel)
            .collect();
        for &i in &parallel {
            for &j in &parallel {
                if !deps.connected(i, j) {
                    pairing.try_pair(i, j);
                }
            }
        }
        let parallel_pairs = pairing.pairs.len();

        let one_to_one: Vec<usize> = (0..calls.len())
            .filter(|&i| patterns[i].is_one_to_one())
            .collect();
        for &i in &one_to_one {
            for &j in &one_to_one {
                if deps.is_direct_input(j, i) {
                    pairing.try_pair(i, j);
                }
            }
        }
        debug!(
            "stencil merge: {} parallel pairs, {} serial pairs",
            parallel_pairs,
            pairing.pairs.len() - parallel_pairs
        );

        let users = users(func);
        pairing
            .pairs
            .into_iter()
            .map(|(i, j)| {
                let mut op = FusedOperation::new(func, vec![calls[i], calls[j]]);
                op.infer_outputs(func, &users);
                op
            })
            .collect()
    }
}

/// Pairs taken so far and the contraction they induce.
struct Pairing<'a> {
    deps: &'a DependencyGraph,
    group_of: Vec<usize>,
    merged: Vec<bool>,
    pairs: Vec<(usize, usize)>,
}

impl<'a> Pairing<'a> {
    fn new(deps: &'a DependencyGraph) -> Self {
        Self {
            deps,
            group_of: (0..deps.len()).collect(),
            merged: vec![false; deps.len()],
            pairs: Vec::new(),
        }
    }

    fn try_pair(&mut self, i: usize, j: usize) {
        if i == j || self.merged[i] || self.merged[j] {
            return;
        }
        self.group_of[j] = i;
        if self.deps.contracted_is_acyclic(&self.group_of) {
            self.merged[i] = true;
            self.merged[j] = true;
            self.pairs.push((i, j));
        } else {
            self.group_of[j] = j;
        }
    }
}

impl FunctionPass for StencilMerge {
    fn name(&self) -> &'static str {
        "stencil_merge"
    }

    fn run(&self, func: &Function) -> Function {
        let ops = self.plan(func);
        info!("stencil merge: {} groups in `{}`", ops.len(), func.name);
        apply_group_ops(func, &ops)
    }
}
