//! Indexed forward dataflow graph.
//!
//! One node per reachable expression, numbered in post-DFS order, with edges
//! from each producer to every consumer. Every edge carries the pattern the
//! consumer imposes on that operand.

use std::fmt::Write as _;

use log::trace;
use rustc_hash::FxHashMap;

use super::pattern::OpPattern;
use super::registry::PatternRegistry;
use crate::ir::{post_order, Callee, ExprId, ExprKind, Function, Type};

/// Forward edge to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Index of the consuming node.
    pub node: usize,
    pub pattern: OpPattern,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub expr: ExprId,
    /// Position in post-DFS order. Every producer has a smaller index.
    pub index: usize,
    /// Referenced from outside the dataflow (graph result, parameter, or an
    /// operand of a construct the partitioner does not look into).
    pub extern_ref: bool,
    pub pattern: OpPattern,
    pub outputs: Vec<Edge>,
}

#[derive(Debug, Default)]
struct Pending {
    extern_ref: bool,
    pattern: Option<OpPattern>,
    outputs: Vec<(ExprId, OpPattern)>,
}

#[derive(Debug, Clone)]
pub struct IndexedForwardGraph {
    nodes: Vec<Node>,
    node_map: FxHashMap<ExprId, usize>,
}

impl IndexedForwardGraph {
    /// Build the graph of `func`, resolving call patterns through `registry`.
    ///
    /// Panics if a reachable expression was never registered by a consumer,
    /// which means the arena is malformed.
    pub fn build(func: &Function, registry: &PatternRegistry) -> Self {
        let order = post_order(func);
        let mut creator = Creator {
            func,
            registry,
            pending: FxHashMap::default(),
        };
        for &param in func.params() {
            creator.update(param, None, OpPattern::Opaque);
        }
        creator.update(func.body(), None, OpPattern::Opaque);
        // Consumers register their operands; visit parents first so every
        // node is known before it is numbered.
        for &id in order.iter().rev() {
            creator.visit(id);
        }

        let node_map: FxHashMap<ExprId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let mut pending = creator.pending;
        let nodes = order
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                let entry = match pending.remove(&id) {
                    Some(entry) => entry,
                    None => panic!("cannot find node {} ({})", id, func.label(id)),
                };
                let outputs = entry
                    .outputs
                    .into_iter()
                    .map(|(consumer, pattern)| Edge {
                        node: node_map[&consumer],
                        pattern,
                    })
                    .collect();
                Node {
                    expr: id,
                    index,
                    extern_ref: entry.extern_ref,
                    pattern: entry.pattern.unwrap_or(OpPattern::Opaque),
                    outputs,
                }
            })
            .collect();
        let graph = Self { nodes, node_map };
        trace!("indexed forward graph of `{}`:\n{}", func.name, graph.debug_dump(func));
        graph
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: ExprId) -> Option<usize> {
        self.node_map.get(&id).copied()
    }

    /// One line per node: `node[i], <label> outputs=[j, k]`.
    pub fn debug_dump(&self, func: &Function) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let outputs: Vec<String> = node.outputs.iter().map(|e| e.node.to_string()).collect();
            let _ = writeln!(
                out,
                "node[{}], {} {} outputs=[{}]",
                node.index,
                func.label(node.expr),
                node.pattern,
                outputs.join(", ")
            );
        }
        out
    }
}

struct Creator<'a> {
    func: &'a Function,
    registry: &'a PatternRegistry,
    pending: FxHashMap<ExprId, Pending>,
}

impl Creator<'_> {
    /// Record that `consumer` reads `id`; `None` marks it external.
    fn update(&mut self, id: ExprId, consumer: Option<ExprId>, pattern: OpPattern) {
        let entry = self.pending.entry(id).or_default();
        match consumer {
            Some(consumer) => entry.outputs.push((consumer, pattern)),
            None => entry.extern_ref = true,
        }
    }

    fn set_pattern(&mut self, id: ExprId, pattern: OpPattern) {
        self.pending.entry(id).or_default().pattern = Some(pattern);
    }

    fn visit(&mut self, id: ExprId) {
        let func = self.func;
        let expr = func.expr(id);
        match &expr.kind {
            ExprKind::Var { .. } => {}
            ExprKind::Constant => {
                let pattern = if expr.is_scalar_constant() {
                    OpPattern::Elementwise
                } else {
                    OpPattern::Opaque
                };
                self.set_pattern(id, pattern);
            }
            ExprKind::Call { callee, args } => {
                let op_pattern = match callee {
                    Callee::Op(op) => self.registry.lookup(op),
                    Callee::Function(_) => OpPattern::Opaque,
                };
                self.set_pattern(id, op_pattern);
                for &arg in args {
                    let mut edge_pattern = op_pattern;
                    if edge_pattern == OpPattern::Broadcast
                        && same_tensor_shape(&func.expr(arg).ty, &expr.ty)
                    {
                        edge_pattern = OpPattern::Elementwise;
                    }
                    self.update(arg, Some(id), edge_pattern);
                }
            }
            ExprKind::Tuple { fields } => {
                self.set_pattern(id, OpPattern::Tuple);
                for &field in fields {
                    if func.expr(field).ty.is_tensor() {
                        self.update(field, Some(id), OpPattern::Injective);
                    } else {
                        self.update(field, None, OpPattern::Opaque);
                    }
                }
            }
            ExprKind::TupleGetItem { tuple, .. } => {
                let all_tensor = func
                    .expr(*tuple)
                    .ty
                    .fields()
                    .is_some_and(|fields| fields.iter().all(Type::is_tensor));
                if all_tensor {
                    self.set_pattern(id, OpPattern::Injective);
                    self.update(*tuple, Some(id), OpPattern::Injective);
                } else {
                    self.update(*tuple, None, OpPattern::Opaque);
                }
            }
            ExprKind::Let { .. }
            | ExprKind::If { .. }
            | ExprKind::RefCreate { .. }
            | ExprKind::RefRead { .. }
            | ExprKind::RefWrite { .. } => {
                for operand in expr.operands() {
                    self.update(operand, None, OpPattern::Opaque);
                }
            }
        }
    }
}

fn same_tensor_shape(a: &Type, b: &Type) -> bool {
    match (a.as_tensor(), b.as_tensor()) {
        (Some(a), Some(b)) => a.shape == b.shape,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, FunctionBuilder, OpRef};

    #[test]
    fn test_broadcast_edge_downgrades_on_equal_shape() {
        let full = Type::tensor(vec![4, 4], DType::F32);
        let row = Type::tensor(vec![4], DType::F32);
        let mut b = FunctionBuilder::new("f");
        let x = b.param("x", full.clone());
        let y = b.param("y", row);
        let add = b.call(OpRef::new("add"), vec![x, y], full);
        let func = b.finish(add);

        let graph = IndexedForwardGraph::build(&func, &PatternRegistry::with_defaults());
        let nx = graph.node(graph.index_of(x).unwrap());
        let ny = graph.node(graph.index_of(y).unwrap());
        assert_eq!(nx.outputs[0].pattern, OpPattern::Elementwise);
        assert_eq!(ny.outputs[0].pattern, OpPattern::Broadcast);
        assert!(nx.extern_ref);
        assert!(graph.node(graph.index_of(add).unwrap()).extern_ref);
    }

    #[test]
    fn test_projection_of_non_tensor_tuple_makes_tuple_extern() {
        let ty = Type::tensor(vec![4], DType::F32);
        let mut b = FunctionBuilder::new("f");
        let x = b.param("x", ty.clone());
        let mixed = b.call(
            OpRef::new("pack"),
            vec![x],
            Type::Tuple(vec![ty.clone(), Type::Opaque]),
        );
        let first = b.tuple_get_item(mixed, 0);
        let out = b.call(OpRef::new("neg"), vec![first], ty);
        let func = b.finish(out);

        let graph = IndexedForwardGraph::build(&func, &PatternRegistry::with_defaults());
        let packed = graph.node(graph.index_of(mixed).unwrap());
        assert!(packed.extern_ref);
        assert!(packed.outputs.is_empty());
        let proj = graph.node(graph.index_of(first).unwrap());
        assert_eq!(proj.pattern, OpPattern::Opaque);
    }

    #[test]
    fn test_indices_respect_dependencies() {
        let ty = Type::tensor(vec![4], DType::F32);
        let mut b = FunctionBuilder::new("f");
        let x = b.param("x", ty.clone());
        let a = b.call(OpRef::new("neg"), vec![x], ty.clone());
        let c = b.scalar(DType::F32);
        let d = b.call(OpRef::new("multiply"), vec![a, c], ty.clone());
        let func = b.finish(d);

        let graph = IndexedForwardGraph::build(&func, &PatternRegistry::with_defaults());
        for node in graph.nodes() {
            for edge in &node.outputs {
                assert!(edge.node > node.index);
            }
        }
        assert_eq!(
            graph.node(graph.index_of(c).unwrap()).pattern,
            OpPattern::Elementwise
        );
        let dump = graph.debug_dump(&func);
        assert!(dump.starts_with("node[0], x opaque outputs=[1]"));
    }

    #[test]
    fn test_deep_chain_builds_without_recursion() {
        let ty = Type::tensor(vec![2], DType::F32);
        let mut b = FunctionBuilder::new("deep");
        let mut last = b.param("x", ty.clone());
        for _ in 0..50_000 {
            last = b.call(OpRef::new("neg"), vec![last], ty.clone());
        }
        let func = b.finish(last);
        let graph = IndexedForwardGraph::build(&func, &PatternRegistry::with_defaults());
        assert_eq!(graph.len(), 50_001);
        assert_eq!(graph.index_of(last), Some(50_000));
        assert!(graph.node(50_000).extern_ref);
    }
}
