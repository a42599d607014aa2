//! Operation Dispatch Layer
//!
//! Selects the kernel implementation for each primitive from the
//! [`Backend`] tag carried by the tensor, after backend-agnostic shape checks.
//!
//! `Gpu` kernels are attempted first when requested; whenever they decline
//! (see [`gpu`](super::gpu)) the call falls back to the `Fast` CPU kernels.
//!
//! # Example
//! ```rust
//! use minitorch::backend::Backend;
//! use minitorch::data::TensorData;
//! use minitorch::ops::{ReduceOp, dispatch};
//!
//! let max_reduce = dispatch::reduce_fn(Backend::Fast, ReduceOp::Max);
//! let a = TensorData::new(vec![2, 2], vec![1.0, 4.0, 3.0, 2.0]).unwrap();
//! assert_eq!(max_reduce(&a, 1).unwrap().to_vec(), vec![4.0, 3.0]);
//! ```

use super::{BinaryOp, ReduceOp, UnaryOp, fast, simple};
use crate::backend::Backend;
use crate::data::TensorData;
use crate::error::{Error, Result};
use crate::layout::shape_broadcast;

#[cfg(feature = "wgpu")]
fn gpu_fallback(op: &str) {
    tracing::debug!(op, "gpu kernel declined, running on fast backend");
}

/// Elementwise unary `op` over `a`.
pub fn map(backend: Backend, op: UnaryOp, a: &TensorData) -> TensorData {
    match backend {
        Backend::Simple => simple::map(op, a),
        Backend::Gpu => {
            #[cfg(feature = "wgpu")]
            {
                if let Some(out) = super::gpu::map(op, a) {
                    return out;
                }
                gpu_fallback("map");
            }
            fast::map(op, a)
        }
        Backend::Fast => fast::map(op, a),
    }
}

/// Elementwise binary `op` with broadcasting.
///
/// # Errors
/// [`Error::BroadcastError`] if the shapes cannot be broadcast.
pub fn zip(backend: Backend, op: BinaryOp, a: &TensorData, b: &TensorData) -> Result<TensorData> {
    let out_shape = shape_broadcast(a.shape(), b.shape())?;
    Ok(match backend {
        Backend::Simple => simple::zip(op, a, b, &out_shape),
        Backend::Gpu => {
            #[cfg(feature = "wgpu")]
            {
                if let Some(out) = super::gpu::zip(op, a, b, &out_shape) {
                    return Ok(out);
                }
                gpu_fallback("zip");
            }
            fast::zip(op, a, b, &out_shape)
        }
        Backend::Fast => fast::zip(op, a, b, &out_shape),
    })
}

fn check_dim(a: &TensorData, dim: usize) -> Result<()> {
    if dim >= a.dims() {
        return Err(Error::InvalidDimension {
            dim,
            ndim: a.dims(),
        });
    }
    Ok(())
}

/// Folds dimension `dim` with `op`, keeping it with size 1.
///
/// # Errors
/// [`Error::InvalidDimension`] if `dim` is out of range.
pub fn reduce(backend: Backend, op: ReduceOp, a: &TensorData, dim: usize) -> Result<TensorData> {
    check_dim(a, dim)?;
    Ok(match backend {
        Backend::Simple => simple::reduce(op, a, dim),
        Backend::Gpu => {
            #[cfg(feature = "wgpu")]
            {
                if let Some(out) = super::gpu::reduce(op, a, dim) {
                    return Ok(out);
                }
                gpu_fallback("reduce");
            }
            fast::reduce(op, a, dim)
        }
        Backend::Fast => fast::reduce(op, a, dim),
    })
}

/// Builds a reducer for an associative operator and its identity element.
///
/// The returned closure reduces any tensor along the dimension it is given.
pub fn reduce_fn(
    backend: Backend,
    op: ReduceOp,
) -> impl Fn(&TensorData, usize) -> Result<TensorData> {
    move |a, dim| reduce(backend, op, a, dim)
}

/// Batched matrix product.
///
/// # Errors
/// [`Error::InvalidArgument`] for operands below 2-D,
/// [`Error::ShapeMismatch`] when inner dimensions differ and
/// [`Error::BroadcastError`] when batch dimensions are incompatible.
pub fn matmul(backend: Backend, a: &TensorData, b: &TensorData) -> Result<TensorData> {
    let out_shape = super::matmul_shape(a.shape(), b.shape())?;
    Ok(match backend {
        Backend::Simple => simple::matmul(a, b, &out_shape),
        Backend::Fast | Backend::Gpu => fast::matmul(a, b, &out_shape),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_dim() {
        let a = TensorData::filled(vec![2, 2], 1.0);
        assert!(matches!(
            reduce(Backend::Fast, ReduceOp::Sum, &a, 2),
            Err(Error::InvalidDimension { dim: 2, ndim: 2 })
        ));
    }

    #[test]
    fn every_backend_agrees() {
        let a = TensorData::new(vec![2, 3], vec![1.0, -2.0, 3.0, 0.5, 5.0, -6.0]).unwrap();
        let b = TensorData::new(vec![1, 3], vec![2.0, 2.0, 2.0]).unwrap();
        let expected = zip(Backend::Simple, BinaryOp::Mul, &a, &b).unwrap().to_vec();
        for backend in [Backend::Fast, Backend::Gpu] {
            let got = zip(backend, BinaryOp::Mul, &a, &b).unwrap().to_vec();
            for (x, y) in got.iter().zip(&expected) {
                assert!((x - y).abs() < f64::from(crate::approx::F32_AVG_ERROR));
            }
            let m = reduce(backend, ReduceOp::Max, &a, 1).unwrap().to_vec();
            assert_eq!(m, vec![3.0, 5.0]);
        }
    }
}
