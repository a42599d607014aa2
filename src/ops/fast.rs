//! Parallel CPU backend.
//!
//! Same kernels as [`simple`](super::simple), parallelised over output
//! elements with [`rayon`](https://docs.rs/rayon). When operands are packed
//! row-major buffers of the output shape, the index arithmetic is skipped
//! entirely and storage is walked directly.
//!
//! ## Design Goals
//!
//! - Deterministic results: every output element is computed by exactly one
//!   task, and reductions fold in index order
//! - Zero dependencies beyond `rayon`

use rayon::prelude::*;

use super::simple::matmul_operand_index;
use super::{BinaryOp, ReduceOp, UnaryOp};
use crate::data::TensorData;
use crate::layout::{Layout, broadcast_index, to_index};

/// Minimum number of output elements per rayon task.
const MIN_CHUNK: usize = 1024;

fn packed(shape: &[usize], out: Vec<f64>) -> TensorData {
    TensorData::from_parts(out.into(), Layout::contiguous(shape.to_vec()))
}

/// Applies `op` to every element of `a`.
pub fn map(op: UnaryOp, a: &TensorData) -> TensorData {
    let shape = a.shape();
    let out: Vec<f64> = if a.is_packed() {
        a.storage()
            .par_iter()
            .with_min_len(MIN_CHUNK)
            .map(|&x| op.apply(x))
            .collect()
    } else {
        (0..a.size())
            .into_par_iter()
            .with_min_len(MIN_CHUNK)
            .map_init(
                || vec![0; shape.len()],
                |index, ordinal| {
                    to_index(ordinal, shape, index);
                    op.apply(a.storage()[a.layout().position(index)])
                },
            )
            .collect()
    };
    packed(shape, out)
}

/// Applies `op` pairwise, broadcasting `a` and `b` to `out_shape`.
pub fn zip(op: BinaryOp, a: &TensorData, b: &TensorData, out_shape: &[usize]) -> TensorData {
    let aligned = a.is_packed() && b.is_packed() && a.shape() == out_shape && b.shape() == out_shape;
    let out: Vec<f64> = if aligned {
        a.storage()
            .par_iter()
            .with_min_len(MIN_CHUNK)
            .zip(b.storage().par_iter())
            .map(|(&x, &y)| op.apply(x, y))
            .collect()
    } else {
        let size: usize = out_shape.iter().product();
        (0..size)
            .into_par_iter()
            .with_min_len(MIN_CHUNK)
            .map_init(
                || {
                    (
                        vec![0; out_shape.len()],
                        vec![0; a.dims()],
                        vec![0; b.dims()],
                    )
                },
                |(out_index, a_index, b_index), ordinal| {
                    to_index(ordinal, out_shape, out_index);
                    broadcast_index(out_index, out_shape, a.shape(), a_index);
                    broadcast_index(out_index, out_shape, b.shape(), b_index);
                    op.apply(
                        a.storage()[a.layout().position(a_index)],
                        b.storage()[b.layout().position(b_index)],
                    )
                },
            )
            .collect()
    };
    packed(out_shape, out)
}

/// Folds dimension `dim` of `a` with `op`; the output keeps `dim` with size 1.
pub fn reduce(op: ReduceOp, a: &TensorData, dim: usize) -> TensorData {
    let out_shape = super::reduced_shape(a.shape(), dim);
    let size: usize = out_shape.iter().product();
    let reduce_len = a.shape()[dim];
    let step = a.strides()[dim];
    let out: Vec<f64> = (0..size)
        .into_par_iter()
        .map_init(
            || vec![0; out_shape.len()],
            |index, ordinal| {
                to_index(ordinal, &out_shape, index);
                let start = a.layout().position(index);
                (0..reduce_len).fold(op.identity(), |acc, j| {
                    op.apply(acc, a.storage()[start + j * step])
                })
            },
        )
        .collect();
    packed(&out_shape, out)
}

/// Batched matrix product `a @ b` with output shape `out_shape`.
///
/// Parallel over output rows; each row walks `a`'s row and `b`'s columns
/// through their strides.
pub fn matmul(a: &TensorData, b: &TensorData, out_shape: &[usize]) -> TensorData {
    let rank = out_shape.len();
    let n = out_shape[rank - 1];
    let k = a.shape()[a.dims() - 1];
    let a_col = a.strides()[a.dims() - 1];
    let b_row = b.strides()[b.dims() - 2];
    let size: usize = out_shape.iter().product();
    let mut out = vec![0.0; size];

    if n > 0 {
        out.par_chunks_mut(n).enumerate().for_each_init(
            || {
                (
                    vec![0; rank],
                    vec![0; a.dims()],
                    vec![0; b.dims()],
                )
            },
            |(out_index, a_index, b_index), (row, chunk)| {
                to_index(row * n, out_shape, out_index);
                let i = out_index[rank - 2];
                matmul_operand_index(out_index, out_shape, a.shape(), i, 0, a_index);
                let a_start = a.layout().position(a_index);
                for (j, slot) in chunk.iter_mut().enumerate() {
                    matmul_operand_index(out_index, out_shape, b.shape(), 0, j, b_index);
                    let b_start = b.layout().position(b_index);
                    *slot = (0..k)
                        .map(|l| a.storage()[a_start + l * a_col] * b.storage()[b_start + l * b_row])
                        .sum();
                }
            },
        );
    }
    packed(out_shape, out)
}
