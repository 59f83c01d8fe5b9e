use std::sync::Arc;

use super::expr::{Callee, Expr, ExprId, ExprKind, Function, OpRef};
use super::types::{DType, Type};

/// Incrementally builds a [`Function`].
///
/// Every constructor only accepts ids returned earlier by the same builder,
/// which keeps the arena in topological order.
///
/// # Example
///
/// ```
/// use stencilg::ir::{DType, FunctionBuilder, OpRef, Type};
///
/// let ty = Type::tensor(vec![64, 64, 64], DType::F64);
/// let mut b = FunctionBuilder::new("main");
/// let x = b.param("x", ty.clone());
/// let lap = b.call(OpRef::new("stencil.grid1stencil").with_tag("stencil_lap"), vec![x], ty);
/// let func = b.finish(lap);
/// assert_eq!(func.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    name: String,
    tag: Option<String>,
    exprs: Vec<Expr>,
    params: Vec<ExprId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            exprs: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Append an expression. Operands must already exist.
    pub fn push(&mut self, kind: ExprKind, ty: Type) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        let expr = Expr { kind, ty };
        for operand in expr.operands() {
            assert!(
                operand < id,
                "operand {} of {} is not defined yet",
                operand,
                id
            );
        }
        self.exprs.push(expr);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn param(&mut self, name: impl Into<String>, ty: Type) -> ExprId {
        let id = self.var(name, ty);
        self.params.push(id);
        id
    }

    /// A variable that is not a parameter, e.g. a `let` binder.
    pub fn var(&mut self, name: impl Into<String>, ty: Type) -> ExprId {
        self.push(ExprKind::Var { name: name.into() }, ty)
    }

    pub fn constant(&mut self, ty: Type) -> ExprId {
        self.push(ExprKind::Constant, ty)
    }

    pub fn scalar(&mut self, dtype: DType) -> ExprId {
        self.constant(Type::tensor(Vec::new(), dtype))
    }

    pub fn call(&mut self, op: OpRef, args: Vec<ExprId>, ty: Type) -> ExprId {
        self.push(
            ExprKind::Call {
                callee: Callee::Op(op),
                args,
            },
            ty,
        )
    }

    /// Call an inline sub-function; the result type is the function's.
    pub fn call_function(&mut self, func: Arc<Function>, args: Vec<ExprId>) -> ExprId {
        assert_eq!(
            func.params().len(),
            args.len(),
            "fused function `{}` expects {} arguments",
            func.name,
            func.params().len()
        );
        let ty = func.ret_type().clone();
        self.push(
            ExprKind::Call {
                callee: Callee::Function(func),
                args,
            },
            ty,
        )
    }

    pub fn tuple(&mut self, fields: Vec<ExprId>) -> ExprId {
        let ty = Type::Tuple(fields.iter().map(|&f| self.expr(f).ty.clone()).collect());
        self.push(ExprKind::Tuple { fields }, ty)
    }

    pub fn tuple_get_item(&mut self, tuple: ExprId, index: usize) -> ExprId {
        let ty = match self.expr(tuple).ty.fields() {
            Some(fields) => match fields.get(index) {
                Some(ty) => ty.clone(),
                None => panic!(
                    "projection {} out of range for tuple {} with {} fields",
                    index,
                    tuple,
                    fields.len()
                ),
            },
            None => Type::Opaque,
        };
        self.push(ExprKind::TupleGetItem { tuple, index }, ty)
    }

    pub fn let_binding(&mut self, var: ExprId, value: ExprId, body: ExprId) -> ExprId {
        let ty = self.expr(body).ty.clone();
        self.push(ExprKind::Let { var, value, body }, ty)
    }

    pub fn if_then_else(&mut self, cond: ExprId, then_branch: ExprId, else_branch: ExprId) -> ExprId {
        let ty = self.expr(then_branch).ty.clone();
        self.push(
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            },
            ty,
        )
    }

    pub fn ref_create(&mut self, value: ExprId) -> ExprId {
        self.push(ExprKind::RefCreate { value }, Type::Opaque)
    }

    pub fn ref_read(&mut self, reference: ExprId, ty: Type) -> ExprId {
        self.push(ExprKind::RefRead { reference }, ty)
    }

    pub fn ref_write(&mut self, reference: ExprId, value: ExprId) -> ExprId {
        self.push(ExprKind::RefWrite { reference, value }, Type::Opaque)
    }

    pub fn finish(self, body: ExprId) -> Function {
        assert!(
            body.index() < self.exprs.len(),
            "body {} is not defined in `{}`",
            body,
            self.name
        );
        Function::from_parts(self.name, self.tag, self.exprs, self.params, body)
    }
}
