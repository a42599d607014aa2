//! Shapes, strides and index arithmetic.
//!
//! A [`Layout`] maps a multi-dimensional index onto a position in flat
//! storage. Storage is never reordered by `permute`; only the strides move.
//! Broadcasting follows numpy rules: shapes are right-aligned and a dimension
//! of size 1 stretches to match the other side.

use crate::error::{Error, Result};

/// Row-major strides for `shape`.
pub fn strides_from_shape(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Storage position of a multi-dimensional `index`.
#[inline]
pub fn index_to_position(index: &[usize], strides: &[usize]) -> usize {
    index.iter().zip(strides).map(|(i, s)| i * s).sum()
}

/// Converts an `ordinal` in `0..size` into a row-major index over `shape`.
#[inline]
pub fn to_index(mut ordinal: usize, shape: &[usize], out_index: &mut [usize]) {
    for i in (0..shape.len()).rev() {
        let dim = shape[i];
        out_index[i] = ordinal % dim;
        ordinal /= dim;
    }
}

/// Maps an index of the broadcast (`big`) shape onto an index of `shape`.
///
/// Dimensions of size 1 in `shape` are pinned to 0; leading dimensions of
/// `big_shape` that `shape` lacks are dropped.
#[inline]
pub fn broadcast_index(
    big_index: &[usize],
    big_shape: &[usize],
    shape: &[usize],
    out_index: &mut [usize],
) {
    let offset = big_shape.len() - shape.len();
    for (i, &dim) in shape.iter().enumerate() {
        out_index[i] = if dim > 1 { big_index[i + offset] } else { 0 };
    }
}

/// Broadcasts two shapes together.
///
/// # Errors
/// [`Error::BroadcastError`] when a pair of aligned dimensions differ and
/// neither is 1.
pub fn shape_broadcast(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = vec![0; n];
    for i in 0..n {
        let da = if i < n - a.len() { 1 } else { a[i - (n - a.len())] };
        let db = if i < n - b.len() { 1 } else { b[i - (n - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::BroadcastError {
                    lhs: a.to_vec(),
                    rhs: b.to_vec(),
                });
            }
        };
    }
    Ok(out)
}

/// Shape and strides of a tensor view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl Layout {
    /// Row-major layout for `shape`.
    pub fn contiguous(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let strides = strides_from_shape(&shape);
        Self { shape, strides }
    }

    /// Layout with explicit strides.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] if `shape` and `strides` differ in length.
    pub fn with_strides(shape: Vec<usize>, strides: Vec<usize>) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(Error::InvalidArgument {
                arg: "strides",
                reason: format!("{} strides for {} dimensions", strides.len(), shape.len()),
            });
        }
        Ok(Self { shape, strides })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of dimensions.
    #[inline]
    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when the strides are the row-major strides of the shape.
    ///
    /// Dimensions of size 1 may carry any stride.
    pub fn is_contiguous(&self) -> bool {
        let expected = strides_from_shape(&self.shape);
        self.shape
            .iter()
            .zip(self.strides.iter().zip(&expected))
            .all(|(&dim, (s, e))| dim == 1 || s == e)
    }

    /// Storage position of `index`.
    #[inline]
    pub fn position(&self, index: &[usize]) -> usize {
        index_to_position(index, &self.strides)
    }

    /// Reorders dimensions: output dim `i` is input dim `order[i]`.
    ///
    /// # Errors
    /// [`Error::InvalidPermutation`] unless `order` is a permutation of
    /// `0..dims()`.
    pub fn permute(&self, order: &[usize]) -> Result<Self> {
        let n = self.dims();
        let mut seen = vec![false; n];
        let valid = order.len() == n
            && order.iter().all(|&d| d < n && !std::mem::replace(&mut seen[d], true));
        if !valid {
            return Err(Error::InvalidPermutation {
                order: order.to_vec(),
                ndim: n,
            });
        }
        Ok(Self {
            shape: order.iter().map(|&d| self.shape[d]).collect(),
            strides: order.iter().map(|&d| self.strides[d]).collect(),
        })
    }

    /// Inverse of a permutation order.
    pub fn inverse_order(order: &[usize]) -> Vec<usize> {
        let mut inv = vec![0; order.len()];
        for (i, &d) in order.iter().enumerate() {
            inv[d] = i;
        }
        inv
    }
}
