//! Post-dominator tree over an [`IndexedForwardGraph`].

use super::indexed::{Edge, IndexedForwardGraph};
use super::pattern::OpPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomNode {
    /// Nearest common post-dominator of all consumers.
    pub parent: Option<usize>,
    pub depth: usize,
    /// Combined pattern of every edge on the way to `parent`.
    pub pattern: OpPattern,
}

#[derive(Debug, Clone)]
pub struct DominatorTree {
    nodes: Vec<DomNode>,
}

impl DominatorTree {
    /// Compute post-dominators, visiting consumers before producers.
    pub fn post_dom(graph: &IndexedForwardGraph) -> Self {
        let mut nodes = vec![
            DomNode {
                parent: None,
                depth: 0,
                pattern: OpPattern::Opaque,
            };
            graph.len()
        ];
        for index in (0..graph.len()).rev() {
            let gnode = graph.node(index);
            nodes[index] = if gnode.extern_ref {
                DomNode {
                    parent: None,
                    depth: 1,
                    pattern: OpPattern::Opaque,
                }
            } else {
                let mut pattern = OpPattern::Elementwise;
                let parent = lca_of_outputs(&nodes, &gnode.outputs, &mut pattern);
                DomNode {
                    parent,
                    depth: parent.map_or(1, |p| nodes[p].depth + 1),
                    pattern,
                }
            };
        }
        Self { nodes }
    }

    pub fn node(&self, index: usize) -> &DomNode {
        &self.nodes[index]
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.nodes[index].parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn lca_of_outputs(nodes: &[DomNode], outputs: &[Edge], pattern: &mut OpPattern) -> Option<usize> {
    let (first, rest) = outputs.split_first()?;
    let mut parent = Some(first.node);
    *pattern = (*pattern).max(first.pattern);
    for edge in rest {
        parent = match parent {
            Some(p) => lca(nodes, p, edge.node, pattern),
            None => None,
        };
        *pattern = (*pattern).max(edge.pattern);
    }
    parent
}

fn lca(nodes: &[DomNode], lhs: usize, rhs: usize, pattern: &mut OpPattern) -> Option<usize> {
    let (mut lhs, mut rhs) = (Some(lhs), Some(rhs));
    while lhs != rhs {
        let (l, r) = (lhs?, rhs?);
        let (ln, rn) = (&nodes[l], &nodes[r]);
        if ln.depth < rn.depth {
            *pattern = (*pattern).max(rn.pattern);
            rhs = rn.parent;
        } else if rn.depth < ln.depth {
            *pattern = (*pattern).max(ln.pattern);
            lhs = ln.parent;
        } else {
            *pattern = (*pattern).max(ln.pattern).max(rn.pattern);
            lhs = ln.parent;
            rhs = rn.parent;
        }
    }
    lhs
}
