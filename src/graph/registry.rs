//! Tag and operator name to [`OpPattern`] lookup.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::pattern::OpPattern;
use crate::ir::OpRef;

/// Registry resolving a call's fusibility category.
///
/// Lookup order: exact tag, longest tag prefix, exact operator name, longest
/// operator prefix. Anything unregistered is [`OpPattern::Opaque`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternRegistry {
    tags: FxHashMap<String, OpPattern>,
    tag_prefixes: Vec<(String, OpPattern)>,
    ops: FxHashMap<String, OpPattern>,
    op_prefixes: Vec<(String, OpPattern)>,
}

impl PatternRegistry {
    /// Empty registry: every call is opaque.
    pub fn new() -> Self {
        Self::default()
    }

    /// Common tensor operators plus the stencil dialect.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for op in ["add", "subtract", "multiply", "divide", "maximum", "minimum", "power"] {
            registry.register_op(op, OpPattern::Broadcast);
        }
        for op in [
            "negative", "neg", "exp", "log", "sqrt", "abs", "tanh", "sigmoid", "relu", "copy",
            "cast",
        ] {
            registry.register_op(op, OpPattern::Elementwise);
        }
        for op in ["reshape", "transpose", "concatenate", "split", "squeeze", "expand_dims"] {
            registry.register_op(op, OpPattern::Injective);
        }
        for op in ["sum", "max", "min", "mean", "prod"] {
            registry.register_op(op, OpPattern::CommReduce);
        }
        for op in ["nn.conv2d", "nn.dense", "nn.batch_matmul"] {
            registry.register_op(op, OpPattern::OutElemwiseFusable);
        }
        registry.register_tag_prefix("stencil", OpPattern::Parallel);
        registry
    }

    pub fn register_tag(&mut self, tag: impl Into<String>, pattern: OpPattern) -> &mut Self {
        self.tags.insert(tag.into(), pattern);
        self
    }

    pub fn register_tag_prefix(&mut self, prefix: impl Into<String>, pattern: OpPattern) -> &mut Self {
        insert_prefix(&mut self.tag_prefixes, prefix.into(), pattern);
        self
    }

    pub fn register_op(&mut self, name: impl Into<String>, pattern: OpPattern) -> &mut Self {
        self.ops.insert(name.into(), pattern);
        self
    }

    pub fn register_op_prefix(&mut self, prefix: impl Into<String>, pattern: OpPattern) -> &mut Self {
        insert_prefix(&mut self.op_prefixes, prefix.into(), pattern);
        self
    }

    /// Builder-style variant of [`register_tag`](Self::register_tag).
    pub fn with_tag(mut self, tag: impl Into<String>, pattern: OpPattern) -> Self {
        self.register_tag(tag, pattern);
        self
    }

    /// Builder-style variant of [`register_op`](Self::register_op).
    pub fn with_op(mut self, name: impl Into<String>, pattern: OpPattern) -> Self {
        self.register_op(name, pattern);
        self
    }

    pub fn lookup(&self, op: &OpRef) -> OpPattern {
        if let Some(tag) = op.tag.as_deref() {
            if let Some(&pattern) = self.tags.get(tag) {
                return pattern;
            }
            if let Some(pattern) = longest_prefix(&self.tag_prefixes, tag) {
                return pattern;
            }
        }
        if let Some(&pattern) = self.ops.get(&op.name) {
            return pattern;
        }
        longest_prefix(&self.op_prefixes, &op.name).unwrap_or(OpPattern::Opaque)
    }
}

fn insert_prefix(prefixes: &mut Vec<(String, OpPattern)>, prefix: String, pattern: OpPattern) {
    match prefixes.iter_mut().find(|(p, _)| *p == prefix) {
        Some(entry) => entry.1 = pattern,
        None => prefixes.push((prefix, pattern)),
    }
}

fn longest_prefix(prefixes: &[(String, OpPattern)], key: &str) -> Option<OpPattern> {
    prefixes
        .iter()
        .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|&(_, pattern)| pattern)
}
