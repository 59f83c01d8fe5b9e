//! Traversal helpers over a [`Function`].

use rustc_hash::{FxHashMap, FxHashSet};

use super::expr::{ExprId, Function};

/// Expressions reachable from the body, children before parents.
///
/// Operands are visited in order, so the result is deterministic for a given
/// function. The walk keeps its own stack and handles arbitrarily deep graphs.
pub fn post_order(func: &Function) -> Vec<ExprId> {
    let mut visited = FxHashSet::default();
    let mut out = Vec::new();
    let roots = func.params().iter().copied().chain(std::iter::once(func.body()));
    for root in roots {
        let mut stack = vec![Visit::Enter(root)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    if !visited.insert(id) {
                        continue;
                    }
                    stack.push(Visit::Exit(id));
                    let operands = func.expr(id).operands();
                    stack.extend(operands.into_iter().rev().map(Visit::Enter));
                }
                Visit::Exit(id) => out.push(id),
            }
        }
    }
    out
}

/// One frame of an explicit depth-first walk.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Visit {
    Enter(ExprId),
    Exit(ExprId),
}

/// Reachable call expressions in topological order.
///
/// Inline sub-functions are not entered: a fused call is one node.
pub fn call_list(func: &Function) -> Vec<ExprId> {
    post_order(func)
        .into_iter()
        .filter(|&id| func.expr(id).is_call())
        .collect()
}

/// The calls whose results reach `arg`, looking through tuples, projections
/// and every other non-call expression, in first-seen order.
pub fn producer_calls(func: &Function, arg: ExprId) -> Vec<ExprId> {
    let mut producers = Vec::new();
    let mut seen = FxHashSet::default();
    let mut work = vec![arg];
    while let Some(id) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        let expr = func.expr(id);
        if expr.is_call() {
            producers.push(id);
        } else {
            work.extend(expr.operands().into_iter().rev());
        }
    }
    producers
}

/// Calls an expression depends on directly, deduplicated, in argument order.
pub fn call_inputs(func: &Function, call: ExprId) -> Vec<ExprId> {
    let mut inputs = Vec::new();
    for &arg in func.expr(call).call_args().unwrap_or_default() {
        for producer in producer_calls(func, arg) {
            if !inputs.contains(&producer) {
                inputs.push(producer);
            }
        }
    }
    inputs
}

/// Reachable consumers of every reachable expression, in post order.
pub fn users(func: &Function) -> FxHashMap<ExprId, Vec<ExprId>> {
    let mut users: FxHashMap<ExprId, Vec<ExprId>> = FxHashMap::default();
    for id in post_order(func) {
        for operand in func.expr(id).operands() {
            let entry = users.entry(operand).or_default();
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
    }
    users
}
