//! Fusion passes and the profile-guided search driver.

mod fuse_ops;
mod group_op;
pub mod history;
mod pairwise;
mod partition;
pub mod progress;
mod search;
mod stencil_merge;

pub use fuse_ops::{apply_group_ops, FuseOps};
pub use group_op::FusedOperation;
pub use history::{LogEntry, PerformanceLog, StepId, StepRecord};
pub use pairwise::{FusionCandidate, PairwiseFusion, ScoreTable};
pub use partition::{GraphPartitioner, Group, GroupSummary, Partition};
pub use progress::{CommittedStep, IndicatifProgress, NoOpProgress, SearchProgress, SearchSummary};
pub use search::{ProfileGuidedSearch, SearchPhase, SearchState, Strategy};
pub use stencil_merge::StencilMerge;

use log::debug;

use crate::ir::Function;

/// A pass that rewrites a function into a new one.
pub trait FunctionPass {
    fn name(&self) -> &'static str;

    fn run(&self, func: &Function) -> Function;

    /// Run `self`, then `next` on its result.
    fn then<Q: FunctionPass>(self, next: Q) -> Chain<Self, Q>
    where
        Self: Sized,
    {
        Chain {
            first: self,
            second: next,
        }
    }
}

/// Two passes run back to back.
#[derive(Debug, Clone)]
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A: FunctionPass, B: FunctionPass> FunctionPass for Chain<A, B> {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn run(&self, func: &Function) -> Function {
        debug!("running {} then {}", self.first.name(), self.second.name());
        let mid = self.first.run(func);
        self.second.run(&mid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::graph::PatternRegistry;
    use crate::ir::{call_list, DType, FunctionBuilder, OpRef, Type};

    #[test]
    fn test_merge_then_pairwise() {
        let ty = Type::tensor(vec![16, 16], DType::F64);
        let mut b = FunctionBuilder::new("f");
        let x = b.param("x", ty.clone());
        let s1 = b.call(OpRef::new("stencil.apply").with_tag("stencil_1"), vec![x], ty.clone());
        let s2 = b.call(OpRef::new("stencil.apply").with_tag("stencil_2"), vec![x], ty.clone());
        let s3 = b.call(OpRef::new("stencil.apply").with_tag("stencil_3"), vec![s1, s2], ty);
        let func = b.finish(s3);

        let pass = StencilMerge::new(PatternRegistry::with_defaults())
            .then(PairwiseFusion::new(&SearchConfig::default()));
        let fused = pass.run(&func);
        assert_eq!(call_list(&fused).len(), 1);
        assert!(fused.validate().is_ok());
    }
}
