//! Typed expression graph handed over by the front end.

mod builder;
mod expr;
pub mod rewrite;
pub mod traversal;
mod types;

pub use builder::FunctionBuilder;
pub use expr::{Callee, Expr, ExprId, ExprKind, Function, OpRef};
pub use rewrite::{rewrite, FusedCall, Slot, Substitution};
pub use traversal::{call_inputs, call_list, post_order, producer_calls, users};
pub use types::{DType, TensorType, Type};
