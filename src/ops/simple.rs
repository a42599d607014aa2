//! Reference backend: direct strided loops, one element at a time.
//!
//! Every kernel walks the output in row-major order, converts the ordinal to
//! a multi-index and maps it back onto each input through its strides. This
//! is the slowest backend and the one the others are tested against.

use super::{BinaryOp, ReduceOp, UnaryOp};
use crate::data::TensorData;
use crate::layout::{Layout, broadcast_index, to_index};

fn packed(shape: &[usize], out: Vec<f64>) -> TensorData {
    TensorData::from_parts(out.into(), Layout::contiguous(shape.to_vec()))
}

/// Applies `op` to every element of `a`.
pub fn map(op: UnaryOp, a: &TensorData) -> TensorData {
    let shape = a.shape();
    let storage = a.storage();
    let mut index = vec![0; shape.len()];
    let mut out = vec![0.0; a.size()];
    for (ordinal, slot) in out.iter_mut().enumerate() {
        to_index(ordinal, shape, &mut index);
        *slot = op.apply(storage[a.layout().position(&index)]);
    }
    packed(shape, out)
}

/// Applies `op` pairwise, broadcasting `a` and `b` to `out_shape`.
pub fn zip(op: BinaryOp, a: &TensorData, b: &TensorData, out_shape: &[usize]) -> TensorData {
    let size: usize = out_shape.iter().product();
    let mut out_index = vec![0; out_shape.len()];
    let mut a_index = vec![0; a.dims()];
    let mut b_index = vec![0; b.dims()];
    let mut out = vec![0.0; size];
    for (ordinal, slot) in out.iter_mut().enumerate() {
        to_index(ordinal, out_shape, &mut out_index);
        broadcast_index(&out_index, out_shape, a.shape(), &mut a_index);
        broadcast_index(&out_index, out_shape, b.shape(), &mut b_index);
        let x = a.storage()[a.layout().position(&a_index)];
        let y = b.storage()[b.layout().position(&b_index)];
        *slot = op.apply(x, y);
    }
    packed(out_shape, out)
}

/// Folds dimension `dim` of `a` with `op`; the output keeps `dim` with size 1.
pub fn reduce(op: ReduceOp, a: &TensorData, dim: usize) -> TensorData {
    let out_shape = super::reduced_shape(a.shape(), dim);
    let size: usize = out_shape.iter().product();
    let reduce_len = a.shape()[dim];
    let mut index = vec![0; out_shape.len()];
    let mut out = vec![0.0; size];
    for (ordinal, slot) in out.iter_mut().enumerate() {
        to_index(ordinal, &out_shape, &mut index);
        let mut acc = op.identity();
        for j in 0..reduce_len {
            index[dim] = j;
            acc = op.apply(acc, a.storage()[a.layout().position(&index)]);
        }
        *slot = acc;
    }
    packed(&out_shape, out)
}

/// Maps an output index of a batched product onto an operand index.
///
/// Batch dims are broadcast; the trailing pair is set to `(row, col)`.
pub(crate) fn matmul_operand_index(
    out_index: &[usize],
    out_shape: &[usize],
    shape: &[usize],
    row: usize,
    col: usize,
    operand_index: &mut [usize],
) {
    let batch = out_shape.len() - 2;
    let own_batch = shape.len() - 2;
    broadcast_index(
        &out_index[..batch],
        &out_shape[..batch],
        &shape[..own_batch],
        &mut operand_index[..own_batch],
    );
    operand_index[own_batch] = row;
    operand_index[own_batch + 1] = col;
}

/// Batched matrix product `a @ b` with output shape `out_shape`.
pub fn matmul(a: &TensorData, b: &TensorData, out_shape: &[usize]) -> TensorData {
    let size: usize = out_shape.iter().product();
    let k = a.shape()[a.dims() - 1];
    let mut out_index = vec![0; out_shape.len()];
    let mut a_index = vec![0; a.dims()];
    let mut b_index = vec![0; b.dims()];
    let mut out = vec![0.0; size];
    let rank = out_shape.len();
    for (ordinal, slot) in out.iter_mut().enumerate() {
        to_index(ordinal, out_shape, &mut out_index);
        let (i, j) = (out_index[rank - 2], out_index[rank - 1]);
        let mut acc = 0.0;
        for l in 0..k {
            matmul_operand_index(&out_index, out_shape, a.shape(), i, l, &mut a_index);
            matmul_operand_index(&out_index, out_shape, b.shape(), l, j, &mut b_index);
            acc += a.storage()[a.layout().position(&a_index)]
                * b.storage()[b.layout().position(&b_index)];
        }
        *slot = acc;
    }
    packed(out_shape, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(shape: &[usize], values: &[f64]) -> TensorData {
        TensorData::new(shape.to_vec(), values.to_vec()).unwrap()
    }

    #[test]
    fn zip_broadcasts_rows() {
        let a = data(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = data(&[3], &[10.0, 20.0, 30.0]);
        let out = zip(BinaryOp::Add, &a, &b, &[2, 3]);
        assert_eq!(out.to_vec(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn reduce_keeps_dim() {
        let a = data(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rows = reduce(ReduceOp::Sum, &a, 1);
        assert_eq!(rows.shape(), &[2, 1]);
        assert_eq!(rows.to_vec(), vec![6.0, 15.0]);
        let cols = reduce(ReduceOp::Max, &a, 0);
        assert_eq!(cols.shape(), &[1, 3]);
        assert_eq!(cols.to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn map_reads_through_strides() {
        let a = data(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).permute(&[1, 0]).unwrap();
        assert_eq!(map(UnaryOp::Neg, &a).to_vec(), vec![-1.0, -3.0, -2.0, -4.0]);
    }

    #[test]
    fn matmul_batches() {
        let a = data(&[2, 1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = data(&[2, 1], &[1.0, 1.0]);
        let out = matmul(&a, &b, &[2, 1, 1]);
        assert_eq!(out.to_vec(), vec![3.0, 7.0]);
    }
}
