//! Reuse-scored pairwise fusion.
//!
//! Each step scores every ordered pair of calls by the data the two calls
//! share, fuses the best pair and rewrites the graph. Pairs whose fusion would
//! have to skip over a third call on a dependency path are excluded, as are
//! calls whose kernels branch.

use log::{debug, info, trace};
use rustc_hash::FxHashSet;

use super::fuse_ops::apply_group_ops;
use super::group_op::FusedOperation;
use super::FunctionPass;
use crate::config::SearchConfig;
use crate::graph::DependencyGraph;
use crate::ir::{users, Callee, ExprId, ExprKind, Function};

/// The pair chosen by one search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionCandidate {
    pub first: ExprId,
    pub second: ExprId,
    pub score: i64,
}

/// Scores of every ordered call pair, indexed by call position.
#[derive(Debug, Clone)]
pub struct ScoreTable {
    pub calls: Vec<ExprId>,
    pub scores: Vec<Vec<i64>>,
}

impl ScoreTable {
    /// Highest non-negative score; ties go to the first pair in row-major
    /// order over the topological call list.
    pub fn best(&self) -> Option<FusionCandidate> {
        let mut best: Option<FusionCandidate> = None;
        let mut max = -1;
        for (i, row) in self.scores.iter().enumerate() {
            for (j, &score) in row.iter().enumerate() {
                if score > max {
                    max = score;
                    best = Some(FusionCandidate {
                        first: self.calls[i],
                        second: self.calls[j],
                        score,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone)]
pub struct PairwiseFusion {
    input_reuse_weight: u64,
    result_reuse_weight: u64,
    max_steps: usize,
}

impl PairwiseFusion {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            input_reuse_weight: config.input_reuse_weight,
            result_reuse_weight: config.result_reuse_weight,
            max_steps: config.max_steps,
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Call positions whose kernels branch; they are never fused.
    pub fn branching_calls(&self, func: &Function, deps: &DependencyGraph) -> Vec<bool> {
        deps.calls()
            .iter()
            .map(|&call| {
                let branches = has_branch(func, call);
                if branches {
                    debug!("{} contains a branch; excluded from pairwise fusion", func.label(call));
                }
                branches
            })
            .collect()
    }

    /// Reuse score of fusing `call` with `other`.
    ///
    /// Shared arguments count their element count times the input weight. A
    /// result passed from one call to the other, directly, through a
    /// projection or inside an explicit tuple, counts its element count times
    /// the result weight.
    pub fn score(&self, func: &Function, call: ExprId, other: ExprId) -> i64 {
        let call_args: FxHashSet<ExprId> = args_of(func, call).into_iter().collect();
        let other_args: FxHashSet<ExprId> = args_of(func, other).into_iter().collect();

        let shared_inputs = call_args.intersection(&other_args).copied();
        let mut reused_results: FxHashSet<ExprId> = FxHashSet::default();
        for &arg in &other_args {
            reused_results.extend(result_reads(func, arg, call));
        }
        for &arg in &call_args {
            reused_results.extend(result_reads(func, arg, other));
        }

        let elements = |id: ExprId| func.expr(id).ty.num_elements();
        let input: u64 = shared_inputs.map(elements).sum::<u64>() * self.input_reuse_weight;
        let result: u64 = reused_results.into_iter().map(elements).sum::<u64>() * self.result_reuse_weight;
        i64::try_from(input + result).unwrap_or(i64::MAX)
    }

    /// Scores of every ordered pair; excluded pairs and `rejected` pairs
    /// score -1.
    pub fn score_table(&self, func: &Function, rejected: &FxHashSet<(ExprId, ExprId)>) -> ScoreTable {
        let deps = DependencyGraph::new(func);
        let branching = self.branching_calls(func, &deps);
        let calls = deps.calls().to_vec();
        let scores = (0..calls.len())
            .map(|i| {
                (0..calls.len())
                    .map(|j| {
                        if branching[i]
                            || branching[j]
                            || deps.is_excluded(i, j)
                            || rejected.contains(&(calls[i], calls[j]))
                        {
                            -1
                        } else {
                            self.score(func, calls[i], calls[j])
                        }
                    })
                    .collect()
            })
            .collect();
        let table = ScoreTable { calls, scores };
        if log::log_enabled!(log::Level::Trace) {
            for (i, row) in table.scores.iter().enumerate() {
                trace!("score[{}] {:?}", func.label(table.calls[i]), row);
            }
        }
        table
    }

    pub fn best_pair(
        &self,
        func: &Function,
        rejected: &FxHashSet<(ExprId, ExprId)>,
    ) -> Option<FusionCandidate> {
        self.score_table(func, rejected).best()
    }

    /// The group fusing `first` and `second`.
    ///
    /// A consumer is composed after its producer; otherwise the two calls form
    /// a parallel group. Members read elsewhere, and the consumer, are exposed.
    pub fn group_for(&self, func: &Function, first: ExprId, second: ExprId) -> FusedOperation {
        let deps = DependencyGraph::new(func);
        let pos = |id: ExprId| match deps.position(id) {
            Some(p) => p,
            None => panic!("{} is not a reachable call of `{}`", id, func.name),
        };
        let (p1, p2) = (pos(first), pos(second));
        let members = if deps.is_direct_input(p1, p2) {
            vec![second, first]
        } else {
            vec![first, second]
        };
        let mut op = FusedOperation::new(func, members);
        op.infer_outputs(func, &users(func));
        op
    }

    /// Rewrite `func` with the pair fused.
    pub fn fuse_pair(&self, func: &Function, first: ExprId, second: ExprId) -> Function {
        let op = self.group_for(func, first, second);
        info!(
            "fuse {} + {} ({} outputs)",
            func.label(first),
            func.label(second),
            op.outputs().len()
        );
        apply_group_ops(func, &[op])
    }

    /// One search step: `None` when no pair has a non-negative score.
    pub fn step(
        &self,
        func: &Function,
        rejected: &FxHashSet<(ExprId, ExprId)>,
    ) -> Option<(FusionCandidate, Function)> {
        let candidate = self.best_pair(func, rejected)?;
        let fused = self.fuse_pair(func, candidate.first, candidate.second);
        Some((candidate, fused))
    }
}

impl FunctionPass for PairwiseFusion {
    fn name(&self) -> &'static str {
        "pairwise_fusion"
    }

    /// Fuse until no pair is left or the step cap is reached.
    fn run(&self, func: &Function) -> Function {
        let mut current = func.clone();
        let none = FxHashSet::default();
        for step in 1..=self.max_steps {
            match self.step(&current, &none) {
                Some((candidate, fused)) => {
                    debug!("step {}: score {}", step, candidate.score);
                    current = fused;
                }
                None => break,
            }
        }
        current
    }
}

fn args_of(func: &Function, call: ExprId) -> Vec<ExprId> {
    func.expr(call).call_args().map(<[ExprId]>::to_vec).unwrap_or_default()
}

/// Values inside `arg` that are `producer` itself or a projection of it,
/// looking through explicit tuples.
fn result_reads(func: &Function, arg: ExprId, producer: ExprId) -> Vec<ExprId> {
    let mut reads = Vec::new();
    let mut work = vec![arg];
    while let Some(id) = work.pop() {
        match &func.expr(id).kind {
            _ if id == producer => reads.push(id),
            ExprKind::TupleGetItem { tuple, .. } if *tuple == producer => reads.push(id),
            ExprKind::Tuple { fields } => work.extend(fields.iter().copied()),
            _ => {}
        }
    }
    reads
}

fn has_branch(func: &Function, call: ExprId) -> bool {
    match func.expr(call).callee() {
        Some(Callee::Op(op)) => op.has_branch,
        Some(Callee::Function(inner)) => inner.contains_branch(),
        None => false,
    }
}
