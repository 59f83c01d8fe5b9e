//! Dominator-tree based graph partitioning.
//!
//! Every node starts in its own group. Three phases then walk the nodes in
//! post-DFS order and try to merge each node into the group of its immediate
//! post-dominator, subject to pattern rules checked on every path between the
//! two:
//!
//! - phase 0: anchor-fusable nodes absorb an elementwise dominator
//! - phase 1: injective and tuple nodes join their dominator
//! - phase 2: injective nodes join a tuple that was already merged into an
//!   injective group
//!
//! Elementwise and broadcast nodes are tried in every phase.

use log::{debug, info};
use serde::Serialize;

use crate::config::FuseConfig;
use crate::graph::{DominatorTree, IndexedForwardGraph, OpPattern};
use crate::ir::{ExprId, Function};

/// A union-find record. Only roots carry meaningful aggregate data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    parent: Option<usize>,
    pub pattern: OpPattern,
    /// Representative expression, the single value leaving the group.
    pub root_ref: ExprId,
    /// The anchor-fusable member, if any. A group has at most one.
    pub anchor_ref: Option<ExprId>,
    pub num_nodes: usize,
}

impl Group {
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }
}

/// Group assignment for every node of an [`IndexedForwardGraph`].
///
/// Groups live in an arena indexed like the graph nodes; `parent` links point
/// towards the group root.
#[derive(Debug, Clone)]
pub struct Partition {
    exprs: Vec<ExprId>,
    groups: Vec<Group>,
}

/// Serializable description of one multi-node group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub root: String,
    pub members: Vec<String>,
    pub pattern: OpPattern,
    pub anchor: Option<String>,
}

impl Partition {
    fn new(graph: &IndexedForwardGraph) -> Self {
        let mut exprs = Vec::with_capacity(graph.len());
        let mut groups = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            exprs.push(node.expr);
            groups.push(Group {
                parent: None,
                pattern: node.pattern,
                root_ref: node.expr,
                anchor_ref: (node.pattern == OpPattern::OutElemwiseFusable).then_some(node.expr),
                num_nodes: 1,
            });
        }
        Self { exprs, groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, index: usize) -> &Group {
        &self.groups[index]
    }

    pub fn expr(&self, index: usize) -> ExprId {
        self.exprs[index]
    }

    /// Root of the group containing `index`, compressing the path walked.
    pub fn find_root(&mut self, index: usize) -> usize {
        let mut root = index;
        let mut path = Vec::new();
        while let Some(parent) = self.groups[root].parent {
            path.push(root);
            root = parent;
        }
        for node in path {
            self.groups[node].parent = Some(root);
        }
        root
    }

    /// Root of the group containing `index`, without modifying the arena.
    pub fn root_of(&self, index: usize) -> usize {
        let mut root = index;
        while let Some(parent) = self.groups[root].parent {
            root = parent;
        }
        root
    }

    /// Merge the group of `child` into the group of `parent`.
    fn merge_from_to(&mut self, child: usize, parent: usize) {
        let child = self.find_root(child);
        let parent = self.find_root(parent);
        if child == parent {
            return;
        }
        self.groups[parent].num_nodes += self.groups[child].num_nodes;
        self.groups[child].parent = Some(parent);
        if let Some(anchor) = self.groups[child].anchor_ref {
            assert!(
                self.groups[parent].anchor_ref.is_none(),
                "group {} ({}) would get a second anchor {}",
                parent,
                self.groups[parent].root_ref,
                anchor
            );
            self.groups[parent].anchor_ref = Some(anchor);
            self.groups[parent].pattern = self.groups[child].pattern.combine(self.groups[parent].pattern);
        }
    }

    /// Node indices of every group with more than one member, keyed by root,
    /// members in post-DFS order.
    pub fn multi_node_groups(&self) -> Vec<(usize, Vec<usize>)> {
        let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); self.len()];
        for index in 0..self.len() {
            by_root[self.root_of(index)].push(index);
        }
        by_root
            .into_iter()
            .enumerate()
            .filter(|(_, members)| members.len() > 1)
            .collect()
    }

    /// Human readable description of every multi-node group.
    pub fn groups_summary(&self, func: &Function) -> Vec<GroupSummary> {
        self.multi_node_groups()
            .into_iter()
            .map(|(root, members)| {
                let group = &self.groups[root];
                GroupSummary {
                    root: func.label(group.root_ref),
                    members: members.iter().map(|&m| func.label(self.exprs[m])).collect(),
                    pattern: group.pattern,
                    anchor: group.anchor_ref.map(|a| func.label(a)),
                }
            })
            .collect()
    }
}

/// Dominator-tree partitioner.
#[derive(Debug, Clone)]
pub struct GraphPartitioner {
    opt_level: u8,
    max_fuse_depth: usize,
}

impl GraphPartitioner {
    pub fn new(config: &FuseConfig) -> Self {
        Self {
            opt_level: config.opt_level,
            max_fuse_depth: config.max_fuse_depth,
        }
    }

    pub fn partition(&self, graph: &IndexedForwardGraph) -> Partition {
        let mut partition = Partition::new(graph);
        if self.opt_level == 0 {
            return partition;
        }
        let tree = DominatorTree::post_dom(graph);
        for phase in 0..3 {
            self.run_fuse(graph, &tree, &mut partition, phase);
        }
        info!(
            "partitioned {} nodes into {} groups",
            graph.len(),
            (0..partition.len())
                .filter(|&i| partition.group(i).parent.is_none())
                .count()
        );
        partition
    }

    fn run_fuse(
        &self,
        graph: &IndexedForwardGraph,
        tree: &DominatorTree,
        partition: &mut Partition,
        phase: u8,
    ) {
        for nid in 0..graph.len() {
            let pattern = partition.groups[nid].pattern;
            if pattern == OpPattern::Opaque {
                continue;
            }
            let dom = *tree.node(nid);
            let Some(dom_parent) = dom.parent else {
                continue;
            };
            assert!(
                !graph.node(nid).extern_ref,
                "external node {} has a post-dominator",
                nid
            );
            if count_fused_nodes_with_new_child(graph, partition, nid, dom_parent)
                > self.max_fuse_depth
            {
                continue;
            }

            if phase == 2 {
                if pattern > OpPattern::Injective {
                    continue;
                }
                let parent_pattern = partition.groups[dom_parent].pattern;
                let dom_root = partition.find_root(dom_parent);
                let root_pattern = partition.groups[dom_root].pattern;
                if root_pattern == OpPattern::Tuple {
                    continue;
                }
                if parent_pattern == OpPattern::Tuple && root_pattern <= OpPattern::Injective {
                    let fcond = |kind: OpPattern, _is_sink: bool| kind <= OpPattern::Injective;
                    self.try_fuse(graph, partition, nid, dom_parent, phase, fcond);
                }
                continue;
            }

            if partition.find_root(nid) == partition.find_root(dom_parent) {
                continue;
            }
            if partition.groups[dom_parent].pattern == OpPattern::Tuple {
                continue;
            }
            match pattern {
                OpPattern::OutElemwiseFusable => {
                    if phase != 0 || dom.pattern != OpPattern::Elementwise {
                        continue;
                    }
                    let fcond = |kind: OpPattern, _is_sink: bool| kind <= OpPattern::Broadcast;
                    self.try_fuse(graph, partition, nid, dom_parent, phase, fcond);
                }
                OpPattern::Elementwise | OpPattern::Broadcast => {
                    if dom.pattern <= OpPattern::Injective || dom.pattern == OpPattern::CommReduce {
                        let fcond = |kind: OpPattern, is_sink: bool| {
                            if is_sink {
                                kind <= OpPattern::Broadcast
                                    || matches!(
                                        kind,
                                        OpPattern::CommReduce
                                            | OpPattern::Injective
                                            | OpPattern::OutElemwiseFusable
                                    )
                            } else {
                                kind <= OpPattern::Injective
                            }
                        };
                        self.try_fuse(graph, partition, nid, dom_parent, phase, fcond);
                    }
                }
                OpPattern::Injective | OpPattern::Tuple => {
                    if phase != 1 {
                        continue;
                    }
                    let fcond = |kind: OpPattern, _is_sink: bool| kind <= OpPattern::Injective;
                    self.try_fuse(graph, partition, nid, dom_parent, phase, fcond);
                }
                // Reductions only absorb producers. Stencil sweeps are never
                // merged with each other here; they fuse pairwise.
                OpPattern::CommReduce | OpPattern::Parallel | OpPattern::Opaque => {}
            }
        }
    }

    fn try_fuse(
        &self,
        graph: &IndexedForwardGraph,
        partition: &mut Partition,
        src: usize,
        sink: usize,
        phase: u8,
        fcond: impl Fn(OpPattern, bool) -> bool,
    ) {
        if check_path(graph, partition, src, sink, fcond) {
            debug!("phase {}: fuse node {} into the group of node {}", phase, src, sink);
            commit_fuse(graph, partition, src, sink);
        }
    }
}

/// Every node on a path from `src` (exclusive) to `sink` satisfies `fcond`,
/// judged on its group's root pattern.
fn check_path(
    graph: &IndexedForwardGraph,
    partition: &mut Partition,
    src: usize,
    sink: usize,
    fcond: impl Fn(OpPattern, bool) -> bool,
) -> bool {
    assert!(src != sink, "cannot check a path from node {} to itself", src);
    let mut visited = vec![false; graph.len()];
    let mut stack: Vec<usize> = graph.node(src).outputs.iter().map(|e| e.node).collect();
    while let Some(node) = stack.pop() {
        if std::mem::replace(&mut visited[node], true) {
            continue;
        }
        let root = partition.find_root(node);
        let is_sink = node == sink;
        if !fcond(partition.groups[root].pattern, is_sink) {
            return false;
        }
        if !is_sink {
            stack.extend(graph.node(node).outputs.iter().map(|e| e.node));
        }
    }
    true
}

/// Merge every node between `src` and `sink` into the sink's group.
fn commit_fuse(graph: &IndexedForwardGraph, partition: &mut Partition, src: usize, sink: usize) {
    let mut visited = vec![false; graph.len()];
    let mut stack = vec![src];
    while let Some(node) = stack.pop() {
        if node == sink || std::mem::replace(&mut visited[node], true) {
            continue;
        }
        partition.merge_from_to(node, sink);
        stack.extend(graph.node(node).outputs.iter().map(|e| e.node));
    }
}

/// Size of the sink's group after adding everything between `child` and it.
fn count_fused_nodes_with_new_child(
    graph: &IndexedForwardGraph,
    partition: &mut Partition,
    child: usize,
    dom_parent: usize,
) -> usize {
    let root = partition.find_root(dom_parent);
    let mut total = partition.groups[root].num_nodes;
    let mut visited = vec![false; graph.len()];
    let mut stack = vec![child];
    while let Some(node) = stack.pop() {
        if node == dom_parent || std::mem::replace(&mut visited[node], true) {
            continue;
        }
        total += partition.groups[node].num_nodes;
        stack.extend(graph.node(node).outputs.iter().map(|e| e.node));
    }
    total
}
