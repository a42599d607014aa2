//! # Operation Dispatch Layer
//!
//! Tensor kernels are expressed as three primitives over tagged scalar
//! operators:
//!
//! - `map(op, a)` — elementwise unary
//! - `zip(op, a, b)` — elementwise binary with broadcasting
//! - `reduce(op, a, dim)` — fold one dimension, keeping it with size 1
//!
//! plus a batched `matmul`. Each primitive is implemented by every backend:
//!
//! - [`simple`] — direct strided index loops
//! - [`fast`] — parallel CPU kernels using `rayon`
//! - [`gpu`] *(opt-in)* — WGSL compute kernels using `wgpu`
//! - [`dispatch`] — selects the implementation from the tensor's [`Backend`](crate::backend::Backend)
//!
//! Operators are enums rather than closures so that the GPU backend can
//! lower them into shader source.
//!
//! ## Extending the Backend
//!
//! To add a new scalar operator:
//!
//! 1. Add a variant to [`UnaryOp`], [`BinaryOp`] or [`ReduceOp`]
//! 2. Give it a scalar definition in `apply`
//! 3. Give it a WGSL expression in the GPU backend (or let it fall back)

use crate::operators;

pub mod dispatch;
pub mod fast;
pub mod simple;

#[cfg(feature = "wgpu")]
pub mod gpu;

/// Elementwise unary operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Id,
    Neg,
    Inv,
    Sigmoid,
    Relu,
    Log,
    Exp,
    Tanh,
    /// `x + c`
    AddScalar(f64),
    /// `x * c`
    MulScalar(f64),
    /// `x ^ c`
    PowScalar(f64),
}

impl UnaryOp {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Id => operators::id(x),
            Self::Neg => operators::neg(x),
            Self::Inv => operators::inv(x),
            Self::Sigmoid => operators::sigmoid(x),
            Self::Relu => operators::relu(x),
            Self::Log => operators::log(x),
            Self::Exp => operators::exp(x),
            Self::Tanh => operators::tanh(x),
            Self::AddScalar(c) => x + c,
            Self::MulScalar(c) => x * c,
            Self::PowScalar(c) => x.powf(c),
        }
    }
}

/// Elementwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Lt,
    Eq,
    IsClose,
    /// `relu'(a) * b`
    ReluBack,
    /// `b / a` guarded like `log`
    LogBack,
    /// `-b / a^2`
    InvBack,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            Self::Add => operators::add(x, y),
            Self::Sub => x - y,
            Self::Mul => operators::mul(x, y),
            Self::Div => x / y,
            Self::Max => operators::max(x, y),
            Self::Lt => operators::lt(x, y),
            Self::Eq => operators::eq(x, y),
            Self::IsClose => operators::is_close(x, y),
            Self::ReluBack => operators::relu_back(x, y),
            Self::LogBack => operators::log_back(x, y),
            Self::InvBack => operators::inv_back(x, y),
        }
    }
}

/// Associative reduction operators together with their identity element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mul,
    Max,
}

impl ReduceOp {
    /// Starting value of the fold.
    #[inline]
    pub fn identity(self) -> f64 {
        match self {
            Self::Sum => 0.0,
            Self::Mul => 1.0,
            Self::Max => f64::NEG_INFINITY,
        }
    }

    #[inline]
    pub fn apply(self, acc: f64, x: f64) -> f64 {
        match self {
            Self::Sum => operators::add(acc, x),
            Self::Mul => operators::mul(acc, x),
            Self::Max => operators::max(acc, x),
        }
    }
}

/// Output shape of reducing `dim` of `shape`.
pub(crate) fn reduced_shape(shape: &[usize], dim: usize) -> Vec<usize> {
    let mut out = shape.to_vec();
    out[dim] = 1;
    out
}

/// Output shape of a batched matrix product, with the batch dims broadcast.
pub(crate) fn matmul_shape(a: &[usize], b: &[usize]) -> crate::error::Result<Vec<usize>> {
    use crate::error::Error;

    if a.len() < 2 || b.len() < 2 {
        return Err(Error::InvalidArgument {
            arg: "matmul",
            reason: format!("operands must be at least 2-D, got {a:?} and {b:?}"),
        });
    }
    let (m, k) = (a[a.len() - 2], a[a.len() - 1]);
    let (k2, n) = (b[b.len() - 2], b[b.len() - 1]);
    if k != k2 {
        return Err(Error::ShapeMismatch {
            expected: vec![k, n],
            got: vec![k2, n],
        });
    }
    let mut shape = crate::layout::shape_broadcast(&a[..a.len() - 2], &b[..b.len() - 2])?;
    shape.push(m);
    shape.push(n);
    Ok(shape)
}
