//! Arena-backed expression graph.
//!
//! A [`Function`] owns every expression in a single vector. An expression may
//! only refer to expressions stored before it, so arena order is always a valid
//! topological order and shared sub-expressions are shared by id.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::Type;
use crate::error::GraphError;

/// Identity of an expression inside one [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An operator reference as produced by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpRef {
    /// Operator identifier, e.g. `stencil.grid2stencil` or `add`.
    pub name: String,
    /// Optional tag used to look up the fusibility category.
    #[serde(default)]
    pub tag: Option<String>,
    /// Whether the kernel body behind this operator contains a conditional.
    #[serde(default)]
    pub has_branch: bool,
}

impl OpRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            has_branch: false,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_branch(mut self) -> Self {
        self.has_branch = true;
        self
    }
}

/// What a call invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callee {
    Op(OpRef),
    /// An inline sub-function, produced by an earlier fusion.
    Function(Arc<Function>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExprKind {
    Var {
        name: String,
    },
    Constant,
    Call {
        callee: Callee,
        args: Vec<ExprId>,
    },
    Tuple {
        fields: Vec<ExprId>,
    },
    TupleGetItem {
        tuple: ExprId,
        index: usize,
    },
    Let {
        var: ExprId,
        value: ExprId,
        body: ExprId,
    },
    If {
        cond: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },
    RefCreate {
        value: ExprId,
    },
    RefRead {
        reference: ExprId,
    },
    RefWrite {
        reference: ExprId,
        value: ExprId,
    },
}

impl ExprKind {
    /// The same expression with every operand replaced through `f`.
    pub fn map_operands(&self, mut f: impl FnMut(ExprId) -> ExprId) -> ExprKind {
        match self {
            ExprKind::Var { .. } | ExprKind::Constant => self.clone(),
            ExprKind::Call { callee, args } => ExprKind::Call {
                callee: callee.clone(),
                args: args.iter().map(|&a| f(a)).collect(),
            },
            ExprKind::Tuple { fields } => ExprKind::Tuple {
                fields: fields.iter().map(|&a| f(a)).collect(),
            },
            ExprKind::TupleGetItem { tuple, index } => ExprKind::TupleGetItem {
                tuple: f(*tuple),
                index: *index,
            },
            ExprKind::Let { var, value, body } => ExprKind::Let {
                var: f(*var),
                value: f(*value),
                body: f(*body),
            },
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => ExprKind::If {
                cond: f(*cond),
                then_branch: f(*then_branch),
                else_branch: f(*else_branch),
            },
            ExprKind::RefCreate { value } => ExprKind::RefCreate { value: f(*value) },
            ExprKind::RefRead { reference } => ExprKind::RefRead {
                reference: f(*reference),
            },
            ExprKind::RefWrite { reference, value } => ExprKind::RefWrite {
                reference: f(*reference),
                value: f(*value),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    pub ty: Type,
}

impl Expr {
    /// Direct operands in evaluation order.
    pub fn operands(&self) -> Vec<ExprId> {
        match &self.kind {
            ExprKind::Var { .. } | ExprKind::Constant => Vec::new(),
            ExprKind::Call { args, .. } => args.clone(),
            ExprKind::Tuple { fields } => fields.clone(),
            ExprKind::TupleGetItem { tuple, .. } => vec![*tuple],
            ExprKind::Let { var, value, body } => vec![*var, *value, *body],
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => vec![*cond, *then_branch, *else_branch],
            ExprKind::RefCreate { value } => vec![*value],
            ExprKind::RefRead { reference } => vec![*reference],
            ExprKind::RefWrite { reference, value } => vec![*reference, *value],
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. })
    }

    pub fn call_args(&self) -> Option<&[ExprId]> {
        match &self.kind {
            ExprKind::Call { args, .. } => Some(args),
            _ => None,
        }
    }

    pub fn callee(&self) -> Option<&Callee> {
        match &self.kind {
            ExprKind::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    /// 0-d constant of a simple dtype. These are inlined into fused kernels.
    pub fn is_scalar_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant)
            && self
                .ty
                .as_tensor()
                .is_some_and(|t| t.is_scalar() && t.dtype.is_simple())
    }

    /// Names of the stencils this call computes.
    ///
    /// An operator call contributes the last `_`-separated piece of its tag;
    /// a fused call contributes every name recorded in its function tag.
    pub fn stencil_names(&self) -> Vec<String> {
        match self.callee() {
            Some(Callee::Op(op)) => op
                .tag
                .as_deref()
                .and_then(|tag| tag.rsplit('_').next())
                .map(|name| vec![name.to_string()])
                .unwrap_or_default(),
            Some(Callee::Function(func)) => func.stencil_names(),
            None => Vec::new(),
        }
    }
}

/// A function over an expression arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// `fuse_<names>` for synthesized sub-functions.
    #[serde(default)]
    pub tag: Option<String>,
    exprs: Vec<Expr>,
    params: Vec<ExprId>,
    body: ExprId,
}

impl Function {
    pub(crate) fn from_parts(
        name: String,
        tag: Option<String>,
        exprs: Vec<Expr>,
        params: Vec<ExprId>,
        body: ExprId,
    ) -> Self {
        Self {
            name,
            tag,
            exprs,
            params,
            body,
        }
    }

    /// Parse and validate a function serialized by the front end.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let func: Function = serde_json::from_str(json)?;
        func.validate()?;
        Ok(func)
    }

    /// Check the arena invariants of a deserialized function.
    pub fn validate(&self) -> Result<(), GraphError> {
        let len = self.exprs.len();
        if self.body.index() >= len {
            return Err(GraphError::OutOfRange {
                what: "body",
                id: self.body,
                len,
            });
        }
        for &param in &self.params {
            if param.index() >= len {
                return Err(GraphError::OutOfRange {
                    what: "parameter",
                    id: param,
                    len,
                });
            }
            if !matches!(self.exprs[param.index()].kind, ExprKind::Var { .. }) {
                return Err(GraphError::ParamNotVar(param));
            }
        }
        for (id, expr) in self.iter() {
            for operand in expr.operands() {
                if operand >= id {
                    return Err(GraphError::ForwardReference { user: id, operand });
                }
            }
            match &expr.kind {
                ExprKind::Tuple { fields } => {
                    let declared = expr.ty.fields().map(<[Type]>::len);
                    if declared != Some(fields.len()) {
                        return Err(GraphError::TupleArity {
                            id,
                            fields: fields.len(),
                            declared: declared.unwrap_or(0),
                        });
                    }
                }
                &ExprKind::TupleGetItem { tuple, index } => {
                    let source = self.expr(tuple);
                    // Opaque values (let, if, refs) may hold a tuple of unknown arity.
                    let arity = match (&source.kind, &source.ty) {
                        (ExprKind::Tuple { fields }, _) => Some(fields.len()),
                        (_, Type::Tuple(fields)) => Some(fields.len()),
                        (_, Type::Tensor(_)) => Some(0),
                        (_, Type::Opaque) => None,
                    };
                    if let Some(arity) = arity.filter(|&arity| index >= arity) {
                        return Err(GraphError::ProjectionOutOfRange { id, index, arity });
                    }
                }
                _ => {}
            }
            if let Some(Callee::Function(inner)) = expr.callee() {
                inner.validate()?;
            }
        }
        Ok(())
    }

    /// Access an expression. Panics on an id from another function.
    pub fn expr(&self, id: ExprId) -> &Expr {
        match self.exprs.get(id.index()) {
            Some(expr) => expr,
            None => panic!(
                "expression {} is not part of function `{}` ({} expressions)",
                id,
                self.name,
                self.exprs.len()
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExprId, &Expr)> {
        self.exprs
            .iter()
            .enumerate()
            .map(|(i, e)| (ExprId(i as u32), e))
    }

    pub fn params(&self) -> &[ExprId] {
        &self.params
    }

    pub fn body(&self) -> ExprId {
        self.body
    }

    pub fn ret_type(&self) -> &Type {
        &self.expr(self.body).ty
    }

    /// Graph-level results: the fields of a tuple body, or the body itself.
    pub fn outputs(&self) -> Vec<ExprId> {
        match &self.expr(self.body).kind {
            ExprKind::Tuple { fields } => fields.clone(),
            _ => vec![self.body],
        }
    }

    /// Whether any expression evaluates a conditional, including inside
    /// operator kernels and nested fused functions.
    pub fn contains_branch(&self) -> bool {
        self.exprs.iter().any(|expr| match &expr.kind {
            ExprKind::If { .. } => true,
            ExprKind::Call {
                callee: Callee::Op(op),
                ..
            } => op.has_branch,
            ExprKind::Call {
                callee: Callee::Function(inner),
                ..
            } => inner.contains_branch(),
            _ => false,
        })
    }

    /// Stencil names recorded in a `fuse_` tag, or collected from members.
    pub fn stencil_names(&self) -> Vec<String> {
        if let Some(names) = self
            .tag
            .as_deref()
            .and_then(|tag| tag.strip_prefix("fuse_"))
        {
            return names.split('_').map(str::to_string).collect();
        }
        self.exprs.iter().flat_map(Expr::stencil_names).collect()
    }

    /// Human readable label for an expression, used in logs and dumps.
    pub fn label(&self, id: ExprId) -> String {
        let expr = self.expr(id);
        match &expr.kind {
            ExprKind::Var { name } => name.clone(),
            ExprKind::Constant => format!("const{}", id),
            ExprKind::Call {
                callee: Callee::Op(op),
                ..
            } => op.tag.clone().unwrap_or_else(|| op.name.clone()),
            ExprKind::Call {
                callee: Callee::Function(func),
                ..
            } => func.tag.clone().unwrap_or_else(|| func.name.clone()),
            ExprKind::Tuple { .. } => format!("tuple{}", id),
            ExprKind::TupleGetItem { tuple, index } => format!("{}.{}", self.label(*tuple), index),
            ExprKind::Let { .. } => format!("let{}", id),
            ExprKind::If { .. } => format!("if{}", id),
            ExprKind::RefCreate { .. } | ExprKind::RefRead { .. } | ExprKind::RefWrite { .. } => {
                format!("ref{}", id)
            }
        }
    }
}
