//! A group of expressions collapsed into one synthesized call.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{
    Callee, ExprId, ExprKind, Function, FunctionBuilder, FusedCall, Slot, Substitution,
};

/// Ordered group members, their free arguments and exposed outputs.
///
/// Members are given in fusion order (a producer before its consumer); the
/// order only affects the generated tag. Free arguments are the operands of
/// members that are neither members nor scalar constants, deduplicated in
/// first-use order.
#[derive(Debug, Clone)]
pub struct FusedOperation {
    members: Vec<ExprId>,
    args: Vec<ExprId>,
    outputs: Vec<ExprId>,
}

impl FusedOperation {
    /// Group `members`. Tuples and projections that carry a member's value to
    /// another member are pulled into the group, so no free argument depends
    /// on the group itself.
    pub fn new(func: &Function, mut members: Vec<ExprId>) -> Self {
        assert!(!members.is_empty(), "a fused operation needs members");
        let mut member_set: FxHashSet<ExprId> = members.iter().copied().collect();
        let mut args = Vec::new();
        let mut i = 0;
        while i < members.len() {
            for operand in func.expr(members[i]).operands() {
                if member_set.contains(&operand) || args.contains(&operand) {
                    continue;
                }
                if reaches_member(func, operand, &member_set) {
                    member_set.insert(operand);
                    members.push(operand);
                    continue;
                }
                if !func.expr(operand).is_scalar_constant() {
                    args.push(operand);
                }
            }
            i += 1;
        }
        Self {
            members,
            args,
            outputs: Vec::new(),
        }
    }

    /// Expose a member as a result of the fused call.
    pub fn add_output(&mut self, member: ExprId) {
        assert!(
            self.members.contains(&member),
            "output {} is not a member of the group",
            member
        );
        if !self.outputs.contains(&member) {
            self.outputs.push(member);
        }
    }

    /// Expose every member read from outside the group, plus graph results.
    ///
    /// `users` must come from [`crate::ir::users`] on the same function.
    pub fn infer_outputs(&mut self, func: &Function, users: &FxHashMap<ExprId, Vec<ExprId>>) {
        let body = func.body();
        for member in self.members.clone() {
            let used_outside = users
                .get(&member)
                .is_some_and(|us| us.iter().any(|u| !self.members.contains(u)));
            if used_outside || member == body {
                self.add_output(member);
            }
        }
    }

    pub fn members(&self) -> &[ExprId] {
        &self.members
    }

    pub fn args(&self) -> &[ExprId] {
        &self.args
    }

    pub fn outputs(&self) -> &[ExprId] {
        &self.outputs
    }

    pub fn contains(&self, id: ExprId) -> bool {
        self.members.contains(&id)
    }

    /// `fuse_` followed by the stencil names of every member call.
    pub fn tag(&self, func: &Function) -> String {
        let names: Vec<String> = self
            .members
            .iter()
            .flat_map(|&m| member_names(func, m))
            .collect();
        format!("fuse_{}", names.join("_"))
    }

    /// Synthesize the sub-function and its call arguments.
    ///
    /// Parameters `p0, p1, ..` stand for the free arguments. A single output
    /// is returned as is; several outputs are returned as a flat tuple in
    /// which a tuple-typed output occupies one slot per field.
    pub fn fuse(&self, func: &Function) -> FusedCall {
        assert!(
            !self.outputs.is_empty(),
            "fused operation over {:?} has no outputs",
            self.members
        );
        let tag = self.tag(func);
        let mut builder = FunctionBuilder::new(tag.clone()).with_tag(tag);
        let mut map: FxHashMap<ExprId, ExprId> = FxHashMap::default();
        for (i, &arg) in self.args.iter().enumerate() {
            let param = builder.param(format!("p{}", i), func.expr(arg).ty.clone());
            map.insert(arg, param);
        }

        let mut ordered = self.members.clone();
        ordered.sort();
        for member in ordered {
            let expr = func.expr(member);
            for operand in expr.operands() {
                if !map.contains_key(&operand) {
                    // Only scalar constants are neither members nor arguments.
                    let constant = builder.constant(func.expr(operand).ty.clone());
                    map.insert(operand, constant);
                }
            }
            let kind = expr.kind.map_operands(|operand| map[&operand]);
            let new = match kind {
                ExprKind::Tuple { fields } => builder.tuple(fields),
                kind => builder.push(kind, expr.ty.clone()),
            };
            map.insert(member, new);
        }

        let body = if let [single] = self.outputs[..] {
            map[&single]
        } else {
            let mut fields = Vec::new();
            for &out in &self.outputs {
                let value = map[&out];
                match func.expr(out).ty.fields() {
                    Some(tys) => {
                        for i in 0..tys.len() {
                            fields.push(builder.tuple_get_item(value, i));
                        }
                    }
                    None => fields.push(value),
                }
            }
            builder.tuple(fields)
        };

        FusedCall {
            function: Arc::new(builder.finish(body)),
            args: self.args.clone(),
        }
    }

    /// Where each output is read from the call at position `call`.
    pub fn substitutions(&self, func: &Function, call: usize) -> Vec<(ExprId, Substitution)> {
        if let [single] = self.outputs[..] {
            return vec![(
                single,
                Substitution {
                    call,
                    slot: Slot::Whole,
                },
            )];
        }
        let mut offset = 0;
        let mut subs = Vec::with_capacity(self.outputs.len());
        for &out in &self.outputs {
            let slot = match func.expr(out).ty.fields() {
                Some(tys) => {
                    let slot = Slot::Fields {
                        offset,
                        len: tys.len(),
                    };
                    offset += tys.len();
                    slot
                }
                None => {
                    offset += 1;
                    Slot::Field(offset - 1)
                }
            };
            subs.push((out, Substitution { call, slot }));
        }
        subs
    }
}

/// `id` is a tuple, projection or other non-call expression whose value is
/// built from a member without passing through another call.
fn reaches_member(func: &Function, id: ExprId, members: &FxHashSet<ExprId>) -> bool {
    if func.expr(id).is_call() {
        return false;
    }
    let mut seen = FxHashSet::default();
    let mut work = func.expr(id).operands();
    while let Some(current) = work.pop() {
        if members.contains(&current) {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        let expr = func.expr(current);
        if !expr.is_call() {
            work.extend(expr.operands());
        }
    }
    false
}

/// Stencil names contributed by a member.
///
/// Untagged operator calls fall back to the last `_` piece of the operator
/// name; non-call members contribute nothing.
fn member_names(func: &Function, id: ExprId) -> Vec<String> {
    let expr = func.expr(id);
    let names = expr.stencil_names();
    if !names.is_empty() {
        return names;
    }
    match expr.callee() {
        Some(Callee::Op(op)) => op
            .name
            .rsplit('_')
            .next()
            .map(|name| vec![name.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
