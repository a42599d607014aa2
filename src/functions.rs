//! Differentiable functions.
//!
//! A [`Function`] is the operator tag stored in a graph node. `forward`
//! computes the output from the input data and saves what `backward` needs;
//! `backward` receives the upstream gradient and returns one gradient per
//! forward input, in argument order. `None` marks an input with no gradient
//! contribution (comparisons, masks).

use crate::autodiff::Context;
use crate::backend::Backend;
use crate::data::TensorData;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::ops::{BinaryOp, ReduceOp, UnaryOp, dispatch};

/// Operator tags of the autodiff graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Neg,
    Inv,
    Add,
    Sub,
    Mul,
    Div,
    Sigmoid,
    Relu,
    Log,
    Exp,
    Tanh,
    AddScalar(f64),
    MulScalar(f64),
    PowScalar(f64),
    Sum { dim: usize },
    All,
    Lt,
    Eq,
    IsClose,
    Permute { order: Vec<usize> },
    View { shape: Vec<usize> },
    Copy,
    MatMul,
    Max { dim: usize },
}

fn expect_arity(function: &Function, inputs: &[&TensorData], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(Error::InvalidArgument {
            arg: "inputs",
            reason: format!("{function:?} takes {n} inputs, got {}", inputs.len()),
        });
    }
    Ok(())
}

fn saved(ctx: &Context, i: usize) -> Result<&TensorData> {
    ctx.saved_values().get(i).ok_or_else(|| Error::InvalidArgument {
        arg: "ctx",
        reason: format!("backward needs saved value {i}, context holds {}", ctx.saved_values().len()),
    })
}

/// Swaps the two trailing dimensions.
fn transpose(a: &TensorData) -> Result<TensorData> {
    let n = a.dims();
    let mut order: Vec<usize> = (0..n).collect();
    order.swap(n - 2, n - 1);
    a.permute(&order)
}

impl Function {
    /// Number of tensor inputs the function takes.
    pub fn arity(&self) -> usize {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Lt | Self::Eq | Self::IsClose | Self::MatMul => 2,
            _ => 1,
        }
    }

    /// Whether backward produces any gradient at all.
    pub fn is_differentiable(&self) -> bool {
        !matches!(self, Self::All | Self::Lt | Self::Eq | Self::IsClose)
    }

    /// Computes the output and fills `ctx` with what backward needs.
    ///
    /// # Errors
    /// Shape, broadcast, dimension and permutation errors of the operation.
    pub fn forward(&self, ctx: &mut Context, backend: Backend, inputs: &[&TensorData]) -> Result<TensorData> {
        expect_arity(self, inputs, self.arity())?;
        let a = inputs[0];
        let unary = |op| dispatch::map(backend, op, a);
        let binary = |op| dispatch::zip(backend, op, a, inputs[1]);

        Ok(match self {
            Self::Neg => unary(UnaryOp::Neg),
            Self::Inv => {
                ctx.save_for_backward([a.clone()]);
                unary(UnaryOp::Inv)
            }
            Self::Add => binary(BinaryOp::Add)?,
            Self::Sub => binary(BinaryOp::Sub)?,
            Self::Mul | Self::Div | Self::MatMul => {
                ctx.save_for_backward([a.clone(), inputs[1].clone()]);
                match self {
                    Self::Mul => binary(BinaryOp::Mul)?,
                    Self::Div => binary(BinaryOp::Div)?,
                    _ => dispatch::matmul(backend, a, inputs[1])?,
                }
            }
            Self::Sigmoid | Self::Exp | Self::Tanh => {
                let op = match self {
                    Self::Sigmoid => UnaryOp::Sigmoid,
                    Self::Exp => UnaryOp::Exp,
                    _ => UnaryOp::Tanh,
                };
                let out = unary(op);
                ctx.save_for_backward([out.clone()]);
                out
            }
            Self::Relu | Self::Log => {
                ctx.save_for_backward([a.clone()]);
                unary(if *self == Self::Relu { UnaryOp::Relu } else { UnaryOp::Log })
            }
            Self::AddScalar(c) => unary(UnaryOp::AddScalar(*c)),
            Self::MulScalar(c) => unary(UnaryOp::MulScalar(*c)),
            Self::PowScalar(c) => {
                ctx.save_for_backward([a.clone()]);
                unary(UnaryOp::PowScalar(*c))
            }
            Self::Sum { dim } => {
                ctx.save_for_backward([a.clone()]);
                dispatch::reduce(backend, ReduceOp::Sum, a, *dim)?
            }
            Self::All => {
                let flat = a.contiguous().view(&[a.size()])?;
                dispatch::reduce(backend, ReduceOp::Mul, &flat, 0)?
            }
            Self::Lt => binary(BinaryOp::Lt)?,
            Self::Eq => binary(BinaryOp::Eq)?,
            Self::IsClose => binary(BinaryOp::IsClose)?,
            Self::Permute { order } => a.permute(order)?,
            Self::View { shape } => {
                ctx.save_for_backward([a.clone()]);
                a.view(shape)?
            }
            Self::Copy => a.contiguous(),
            Self::Max { dim } => {
                let out = dispatch::reduce(backend, ReduceOp::Max, a, *dim)?;
                ctx.save_for_backward([a.clone(), out.clone()]);
                out
            }
        })
    }

    /// Gradients with respect to each input, given the output gradient `d`.
    ///
    /// Returned gradients may still carry broadcast dimensions; the caller
    /// sums them back to each input's shape.
    ///
    /// # Errors
    /// Shape errors, or [`Error::InvalidArgument`] if `ctx` lacks saved values.
    pub fn backward(&self, ctx: &Context, backend: Backend, d: &TensorData) -> Result<Vec<Option<TensorData>>> {
        let map = |op, x: &TensorData| dispatch::map(backend, op, x);
        let zip = |op, x: &TensorData, y: &TensorData| dispatch::zip(backend, op, x, y);

        Ok(match self {
            Self::Neg => vec![Some(map(UnaryOp::Neg, d))],
            Self::Inv => vec![Some(zip(BinaryOp::InvBack, saved(ctx, 0)?, d)?)],
            Self::Add => vec![Some(d.clone()), Some(d.clone())],
            Self::Sub => vec![Some(d.clone()), Some(map(UnaryOp::Neg, d))],
            Self::Mul => {
                let (a, b) = (saved(ctx, 0)?, saved(ctx, 1)?);
                vec![Some(zip(BinaryOp::Mul, d, b)?), Some(zip(BinaryOp::Mul, d, a)?)]
            }
            Self::Div => {
                let (a, b) = (saved(ctx, 0)?, saved(ctx, 1)?);
                let da = zip(BinaryOp::Div, d, b)?;
                let num = zip(BinaryOp::Mul, d, a)?;
                let den = zip(BinaryOp::Mul, b, b)?;
                let db = map(UnaryOp::Neg, &zip(BinaryOp::Div, &num, &den)?);
                vec![Some(da), Some(db)]
            }
            Self::Sigmoid => {
                let s = saved(ctx, 0)?;
                let one_minus = map(UnaryOp::AddScalar(1.0), &map(UnaryOp::Neg, s));
                vec![Some(zip(BinaryOp::Mul, &zip(BinaryOp::Mul, s, &one_minus)?, d)?)]
            }
            Self::Relu => vec![Some(zip(BinaryOp::ReluBack, saved(ctx, 0)?, d)?)],
            Self::Log => vec![Some(zip(BinaryOp::LogBack, saved(ctx, 0)?, d)?)],
            Self::Exp => vec![Some(zip(BinaryOp::Mul, saved(ctx, 0)?, d)?)],
            Self::Tanh => {
                let t = saved(ctx, 0)?;
                let sq = zip(BinaryOp::Mul, t, t)?;
                let one_minus = map(UnaryOp::AddScalar(1.0), &map(UnaryOp::Neg, &sq));
                vec![Some(zip(BinaryOp::Mul, &one_minus, d)?)]
            }
            Self::AddScalar(_) | Self::Copy => vec![Some(d.clone())],
            Self::MulScalar(c) => vec![Some(map(UnaryOp::MulScalar(*c), d))],
            Self::PowScalar(c) => {
                let slope = map(UnaryOp::MulScalar(*c), &map(UnaryOp::PowScalar(c - 1.0), saved(ctx, 0)?));
                vec![Some(zip(BinaryOp::Mul, &slope, d)?)]
            }
            Self::Sum { .. } => {
                let ones = TensorData::filled(saved(ctx, 0)?.shape().to_vec(), 1.0);
                vec![Some(zip(BinaryOp::Mul, &ones, d)?)]
            }
            Self::All => vec![None],
            Self::Lt | Self::Eq | Self::IsClose => vec![None, None],
            Self::Permute { order } => vec![Some(d.permute(&Layout::inverse_order(order))?)],
            Self::View { .. } => vec![Some(d.contiguous().view(saved(ctx, 0)?.shape())?)],
            Self::MatMul => {
                let (a, b) = (saved(ctx, 0)?, saved(ctx, 1)?);
                let da = dispatch::matmul(backend, d, &transpose(b)?)?;
                let db = dispatch::matmul(backend, &transpose(a)?, d)?;
                vec![Some(da), Some(db)]
            }
            Self::Max { .. } => {
                let (input, out) = (saved(ctx, 0)?, saved(ctx, 1)?);
                let mask = zip(BinaryOp::Eq, out, input)?;
                vec![Some(zip(BinaryOp::Mul, &mask, d)?)]
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(shape: &[usize], values: &[f64]) -> TensorData {
        TensorData::new(shape.to_vec(), values.to_vec()).unwrap()
    }

    #[test]
    fn max_backward_routes_gradient_to_every_tied_maximum() {
        let input = data(&[1, 4], &[3.0, 1.0, 3.0, 2.0]);
        let mut ctx = Context::new(false);
        let out = Function::Max { dim: 1 }
            .forward(&mut ctx, Backend::Simple, &[&input])
            .unwrap();
        assert_eq!(out.to_vec(), vec![3.0]);

        let grads = Function::Max { dim: 1 }
            .backward(&ctx, Backend::Simple, &data(&[1, 1], &[5.0]))
            .unwrap();
        let g = grads[0].as_ref().unwrap();
        assert_eq!(g.to_vec(), vec![5.0, 0.0, 5.0, 0.0]);
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let a = data(&[1], &[1.0]);
        let mut ctx = Context::new(false);
        assert!(Function::Add.forward(&mut ctx, Backend::Simple, &[&a]).is_err());
    }

    #[test]
    fn backward_without_saved_values_is_an_error() {
        let ctx = Context::new(true);
        let d = data(&[1], &[1.0]);
        assert!(Function::Mul.backward(&ctx, Backend::Simple, &d).is_err());
    }

    #[test]
    fn comparisons_have_no_gradient() {
        assert!(!Function::Eq.is_differentiable());
        let ctx = Context::new(false);
        let grads = Function::Lt.backward(&ctx, Backend::Simple, &data(&[1], &[1.0])).unwrap();
        assert!(grads.iter().all(Option::is_none));
    }
}
