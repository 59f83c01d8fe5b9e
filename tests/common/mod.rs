#![allow(dead_code)]

use stencilg::ir::{DType, ExprId, Function, FunctionBuilder, OpRef, Type};

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn tensor(shape: &[usize]) -> Type {
    Type::tensor(shape.to_vec(), DType::F64)
}

pub fn stencil(name: &str) -> OpRef {
    OpRef::new("stencil.apply").with_tag(format!("stencil_{}", name))
}

/// `A -> B, A -> C, B -> D, C -> D`, all elementwise.
pub struct Diamond {
    pub func: Function,
    pub x: ExprId,
    pub a: ExprId,
    pub b: ExprId,
    pub c: ExprId,
    pub d: ExprId,
}

pub fn diamond() -> Diamond {
    let ty = tensor(&[32, 32]);
    let mut fb = FunctionBuilder::new("diamond");
    let x = fb.param("x", ty.clone());
    let a = fb.call(OpRef::new("negative"), vec![x], ty.clone());
    let b = fb.call(OpRef::new("exp"), vec![a], ty.clone());
    let c = fb.call(OpRef::new("sqrt"), vec![a], ty.clone());
    let d = fb.call(OpRef::new("add"), vec![b, c], ty);
    Diamond {
        func: fb.finish(d),
        x,
        a,
        b,
        c,
        d,
    }
}

/// `A -> B -> C` stencils.
pub struct Chain {
    pub func: Function,
    pub a: ExprId,
    pub b: ExprId,
    pub c: ExprId,
}

pub fn chain() -> Chain {
    let ty = tensor(&[64, 64]);
    let mut fb = FunctionBuilder::new("chain");
    let x = fb.param("x", ty.clone());
    let a = fb.call(stencil("a"), vec![x], ty.clone());
    let b = fb.call(stencil("b"), vec![a], ty.clone());
    let c = fb.call(stencil("c"), vec![b], ty);
    Chain {
        func: fb.finish(c),
        a,
        b,
        c,
    }
}

/// Two independent stencils reading the same input.
pub struct Parallel {
    pub func: Function,
    pub x: ExprId,
    pub a: ExprId,
    pub b: ExprId,
}

pub fn parallel() -> Parallel {
    let ty = tensor(&[64, 64]);
    let mut fb = FunctionBuilder::new("parallel");
    let x = fb.param("x", ty.clone());
    let a = fb.call(stencil("a"), vec![x], ty.clone());
    let b = fb.call(stencil("b"), vec![x], ty);
    let out = fb.tuple(vec![a, b]);
    Parallel {
        func: fb.finish(out),
        x,
        a,
        b,
    }
}

/// `A -> B -> C` where `C` also reads `A` directly.
pub struct Exclusion {
    pub func: Function,
    pub a: ExprId,
    pub b: ExprId,
    pub c: ExprId,
}

pub fn exclusion() -> Exclusion {
    let ty = tensor(&[16, 16]);
    let mut fb = FunctionBuilder::new("exclusion");
    let x = fb.param("x", ty.clone());
    let a = fb.call(stencil("a"), vec![x], ty.clone());
    let b = fb.call(stencil("b"), vec![a], ty.clone());
    let c = fb.call(stencil("c"), vec![b, a], ty);
    Exclusion {
        func: fb.finish(c),
        a,
        b,
        c,
    }
}

/// `d` reads `a` and `c` packed into one explicit tuple argument.
pub struct TupleArg {
    pub func: Function,
    pub x: ExprId,
    pub a: ExprId,
    pub c: ExprId,
    pub t: ExprId,
    pub d: ExprId,
}

pub fn tuple_arg() -> TupleArg {
    let ty = tensor(&[64, 64]);
    let mut fb = FunctionBuilder::new("tuple_arg");
    let x = fb.param("x", ty.clone());
    let a = fb.call(stencil("a"), vec![x], ty.clone());
    let c = fb.call(stencil("c"), vec![x], ty);
    let t = fb.tuple(vec![a, c]);
    let d = fb.call(OpRef::new("concatenate"), vec![t], tensor(&[128, 64]));
    TupleArg {
        func: fb.finish(d),
        x,
        a,
        c,
        t,
        d,
    }
}

/// A random DAG of calls. `edges[i]` picks the producers of call `i` among
/// earlier calls (indices taken modulo `i`); call 0 and calls without
/// producers read the parameter. Operators cycle through a stencil, two
/// elementwise ops, a two-output `split` whose consumers read one field
/// through a projection, and a `concatenate` that takes its inputs packed
/// into one explicit tuple.
pub fn random_dag(edges: &[Vec<usize>]) -> Function {
    let ty = tensor(&[8, 8]);
    let pair = Type::Tuple(vec![ty.clone(), ty.clone()]);
    let mut fb = FunctionBuilder::new("random");
    let x = fb.param("x", ty.clone());
    let mut calls: Vec<ExprId> = Vec::new();
    let mut used = vec![false; edges.len()];
    for (i, producers) in edges.iter().enumerate() {
        let mut picked: Vec<usize> = Vec::new();
        if i > 0 {
            for &p in producers {
                let p = p % i;
                if !picked.contains(&p) {
                    picked.push(p);
                    used[p] = true;
                }
            }
        }
        let mut args: Vec<ExprId> = picked
            .iter()
            .map(|&p| {
                if p % 5 == 3 {
                    fb.tuple_get_item(calls[p], (i + p) % 2)
                } else {
                    calls[p]
                }
            })
            .collect();
        if args.is_empty() {
            args.push(x);
        }
        let call = match i % 5 {
            0 => fb.call(stencil(&format!("n{}", i)), args, ty.clone()),
            1 => fb.call(OpRef::new("exp"), args, ty.clone()),
            2 => fb.call(OpRef::new("add"), args, ty.clone()),
            3 => fb.call(OpRef::new("split"), args, pair.clone()),
            _ => {
                let packed = fb.tuple(args);
                fb.call(OpRef::new("concatenate"), vec![packed], ty.clone())
            }
        };
        calls.push(call);
    }
    let sinks: Vec<ExprId> = calls
        .iter()
        .zip(&used)
        .filter(|(_, &u)| !u)
        .map(|(&c, _)| c)
        .collect();
    let body = if let [single] = sinks[..] {
        single
    } else {
        fb.tuple(sinks)
    };
    fb.finish(body)
}
