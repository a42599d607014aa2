//! Strided tensor storage.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::layout::{Layout, to_index};

/// Immutable shared storage plus the layout used to read it.
///
/// Cloning is cheap: views, permutes and clones share the same buffer.
#[derive(Debug, Clone)]
pub struct TensorData {
    storage: Arc<[f64]>,
    layout: Layout,
}

impl TensorData {
    /// Wraps row-major `data` with the given `shape`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `data.len()` is not the product of `shape`.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f64>) -> Result<Self> {
        let layout = Layout::contiguous(shape);
        if layout.size() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: layout.shape().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            storage: data.into(),
            layout,
        })
    }

    /// A tensor filled with `value`.
    pub fn filled(shape: impl Into<Vec<usize>>, value: f64) -> Self {
        let layout = Layout::contiguous(shape);
        let storage = vec![value; layout.size()].into();
        Self { storage, layout }
    }

    /// Re-wraps existing storage with a different layout.
    pub(crate) fn from_parts(storage: Arc<[f64]>, layout: Layout) -> Self {
        Self { storage, layout }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        self.layout.strides()
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.layout.dims()
    }

    /// Raw storage, in storage order (not necessarily row-major).
    #[inline]
    pub fn storage(&self) -> &[f64] {
        &self.storage
    }

    /// True if the layout is row-major and covers the whole buffer.
    pub fn is_packed(&self) -> bool {
        self.layout.is_contiguous() && self.storage.len() == self.size()
    }

    /// Element at a multi-dimensional index.
    ///
    /// # Errors
    /// [`Error::IndexOutOfBounds`] or [`Error::ShapeMismatch`] on a bad index.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        if index.len() != self.dims() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                got: index.to_vec(),
            });
        }
        for (&i, &dim) in index.iter().zip(self.shape()) {
            if i >= dim {
                return Err(Error::IndexOutOfBounds {
                    index: i as i64,
                    size: dim,
                });
            }
        }
        Ok(self.storage[self.layout.position(index)])
    }

    /// Values in row-major order of the logical shape.
    pub fn to_vec(&self) -> Vec<f64> {
        if self.is_packed() {
            return self.storage.to_vec();
        }
        let shape = self.shape();
        let mut index = vec![0; shape.len()];
        (0..self.size())
            .map(|ordinal| {
                to_index(ordinal, shape, &mut index);
                self.storage[self.layout.position(&index)]
            })
            .collect()
    }

    /// A row-major copy with its own buffer.
    pub fn contiguous(&self) -> Self {
        if self.is_packed() {
            return self.clone();
        }
        Self {
            storage: self.to_vec().into(),
            layout: Layout::contiguous(self.shape().to_vec()),
        }
    }

    /// Reorders dimensions without copying.
    ///
    /// # Errors
    /// See [`Layout::permute`].
    pub fn permute(&self, order: &[usize]) -> Result<Self> {
        Ok(Self {
            storage: Arc::clone(&self.storage),
            layout: self.layout.permute(order)?,
        })
    }

    /// Reinterprets row-major storage with a new shape of equal size.
    ///
    /// # Errors
    /// [`Error::NotContiguous`] for strided views and
    /// [`Error::ShapeMismatch`] if the sizes differ.
    pub fn view(&self, shape: &[usize]) -> Result<Self> {
        if !self.layout.is_contiguous() {
            return Err(Error::NotContiguous);
        }
        let layout = Layout::contiguous(shape.to_vec());
        if layout.size() != self.size() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                got: shape.to_vec(),
            });
        }
        Ok(Self {
            storage: Arc::clone(&self.storage),
            layout,
        })
    }
}
