//! Fusibility lattice.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

/// Coarse classification of how an operator constrains fusion.
///
/// The variants are totally ordered; combining two patterns takes the larger
/// one. The discriminants leave gaps so the ordering matches the categories
/// the front end registers tags with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OpPattern {
    /// One output element per input element at the same position.
    Elementwise = 0,
    /// Inputs are read with broadcasting onto the output shape.
    Broadcast = 1,
    /// Any one-to-one index mapping (reshape, transpose, concatenation).
    Injective = 2,
    /// Commutative reduction over one or more axes.
    CommReduce = 3,
    /// Complex operator whose output can absorb elementwise consumers.
    OutElemwiseFusable = 4,
    /// Tuple construction.
    Tuple = 7,
    /// Never fused.
    Opaque = 8,
    /// Independent stencil sweep, only fused pairwise.
    Parallel = 9,
}

impl OpPattern {
    /// Least upper bound of two patterns.
    ///
    /// Combining two complex categories has no meaningful result; it is
    /// reported and the larger pattern is kept.
    pub fn combine(self, other: OpPattern) -> OpPattern {
        if self.is_complex() && other.is_complex() && self != other {
            warn!(
                "combining two complex fusion patterns ({} and {}), keeping {}",
                self,
                other,
                self.max(other)
            );
        }
        self.max(other)
    }

    /// Reductions, anchors and stencil sweeps.
    pub fn is_complex(self) -> bool {
        matches!(
            self,
            OpPattern::CommReduce | OpPattern::OutElemwiseFusable | OpPattern::Parallel
        )
    }

    /// Output index maps one-to-one onto input indices.
    pub fn is_one_to_one(self) -> bool {
        matches!(self, OpPattern::Elementwise | OpPattern::Injective)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpPattern::Elementwise => "elementwise",
            OpPattern::Broadcast => "broadcast",
            OpPattern::Injective => "injective",
            OpPattern::CommReduce => "comm_reduce",
            OpPattern::OutElemwiseFusable => "out_elemwise_fusable",
            OpPattern::Tuple => "tuple",
            OpPattern::Opaque => "opaque",
            OpPattern::Parallel => "parallel",
        }
    }
}

impl fmt::Display for OpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
