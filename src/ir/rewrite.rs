//! Rebuild a function with some expressions replaced by fused calls.
//!
//! The source function is never modified. The rewrite walks from the body,
//! memoizing every visited expression, so the new arena is again in
//! topological order and unreachable expressions are dropped.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::builder::FunctionBuilder;
use super::expr::{ExprId, ExprKind, Function};
use super::traversal::Visit;

/// A synthesized call to be emitted in place of a group of expressions.
#[derive(Debug, Clone)]
pub struct FusedCall {
    pub function: Arc<Function>,
    /// Arguments, as ids of the source function.
    pub args: Vec<ExprId>,
}

/// How a replaced expression is read from its fused call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The call result itself (single-output group).
    Whole,
    /// One field of the call's result tuple.
    Field(usize),
    /// A tuple-typed member flattened into `len` consecutive fields.
    Fields { offset: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Substitution {
    /// Index into the `FusedCall` list.
    pub call: usize,
    pub slot: Slot,
}

/// Rebuild `source`, replacing every expression in `substitutions`.
pub fn rewrite(
    source: &Function,
    calls: &[FusedCall],
    substitutions: &FxHashMap<ExprId, Substitution>,
) -> Function {
    let mut builder = FunctionBuilder::new(source.name.clone());
    if let Some(tag) = &source.tag {
        builder = builder.with_tag(tag.clone());
    }
    let mut rewriter = Rewriter {
        source,
        builder,
        memo: FxHashMap::default(),
        calls,
        emitted: vec![None; calls.len()],
        substitutions,
    };
    for &param in source.params() {
        let ExprKind::Var { name } = &source.expr(param).kind else {
            panic!("parameter {} of `{}` is not a variable", param, source.name);
        };
        let new = rewriter
            .builder
            .param(name.clone(), source.expr(param).ty.clone());
        rewriter.memo.insert(param, new);
    }
    let body = rewriter.visit(source.body());
    rewriter.builder.finish(body)
}

struct Rewriter<'a> {
    source: &'a Function,
    builder: FunctionBuilder,
    memo: FxHashMap<ExprId, ExprId>,
    calls: &'a [FusedCall],
    emitted: Vec<Option<ExprId>>,
    substitutions: &'a FxHashMap<ExprId, Substitution>,
}

impl Rewriter<'_> {
    /// Rebuild `root` and everything it needs, depth first on an explicit
    /// stack.
    ///
    /// Panics if a fused call's arguments depend on one of the expressions it
    /// replaces.
    fn visit(&mut self, root: ExprId) -> ExprId {
        let mut open: FxHashSet<ExprId> = FxHashSet::default();
        let mut stack = vec![Visit::Enter(root)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    if self.memo.contains_key(&id) {
                        continue;
                    }
                    assert!(
                        open.insert(id),
                        "{} of `{}` depends on its own replacement",
                        id,
                        self.source.name
                    );
                    stack.push(Visit::Exit(id));
                    let needs = self.needs(id);
                    stack.extend(needs.into_iter().rev().map(Visit::Enter));
                }
                Visit::Exit(id) => {
                    open.remove(&id);
                    let new = match self.substitutions.get(&id) {
                        Some(&sub) => self.substitute(sub),
                        None => self.rebuild(id),
                    };
                    self.memo.insert(id, new);
                }
            }
        }
        self.mapped(root)
    }

    /// Source expressions that must be rebuilt before `id`.
    fn needs(&self, id: ExprId) -> Vec<ExprId> {
        if let Some(sub) = self.substitutions.get(&id) {
            return self.calls[sub.call].args.clone();
        }
        let expr = self.source.expr(id);
        if let ExprKind::TupleGetItem { tuple, .. } = expr.kind {
            if let Some(&Substitution {
                call,
                slot: Slot::Fields { .. },
            }) = self.substitutions.get(&tuple)
            {
                return self.calls[call].args.clone();
            }
        }
        expr.operands()
    }

    fn mapped(&self, id: ExprId) -> ExprId {
        match self.memo.get(&id) {
            Some(&new) => new,
            None => panic!("{} of `{}` was not rebuilt before its user", id, self.source.name),
        }
    }

    fn emit_call(&mut self, index: usize) -> ExprId {
        if let Some(id) = self.emitted[index] {
            return id;
        }
        let calls = self.calls;
        let call = &calls[index];
        let args: Vec<ExprId> = call.args.iter().map(|&a| self.mapped(a)).collect();
        let id = self.builder.call_function(Arc::clone(&call.function), args);
        self.emitted[index] = Some(id);
        id
    }

    fn substitute(&mut self, sub: Substitution) -> ExprId {
        let call = self.emit_call(sub.call);
        match sub.slot {
            Slot::Whole => call,
            Slot::Field(index) => self.builder.tuple_get_item(call, index),
            Slot::Fields { offset, len } => {
                let fields: Vec<ExprId> = (offset..offset + len)
                    .map(|i| self.builder.tuple_get_item(call, i))
                    .collect();
                self.builder.tuple(fields)
            }
        }
    }

    fn rebuild(&mut self, id: ExprId) -> ExprId {
        let source = self.source;
        let expr = source.expr(id);
        let ty = expr.ty.clone();
        // Projections of a flattened member read the fused call directly.
        if let ExprKind::TupleGetItem { tuple, index } = expr.kind {
            if let Some(&Substitution {
                call,
                slot: Slot::Fields { offset, .. },
            }) = self.substitutions.get(&tuple)
            {
                let call = self.emit_call(call);
                return self.builder.tuple_get_item(call, offset + index);
            }
        }
        let kind = expr.kind.map_operands(|operand| self.mapped(operand));
        match kind {
            // Projection of an explicit tuple folds to the field.
            ExprKind::TupleGetItem { tuple, index } => {
                if let ExprKind::Tuple { fields } = &self.builder.expr(tuple).kind {
                    return fields[index];
                }
                self.builder.tuple_get_item(tuple, index)
            }
            ExprKind::Tuple { fields } => self.builder.tuple(fields),
            kind => self.builder.push(kind, ty),
        }
    }
}
