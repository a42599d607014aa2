//! Error types for minitorch.

use thiserror::Error;

/// Result type alias using minitorch's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tensor, autodiff and network operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Shape mismatch in an operation.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Shapes cannot be broadcast together.
    #[error("cannot broadcast shapes {lhs:?} and {rhs:?}")]
    BroadcastError {
        /// Left-hand side shape.
        lhs: Vec<usize>,
        /// Right-hand side shape.
        rhs: Vec<usize>,
    },

    /// Dimension index out of range for the tensor.
    #[error("invalid dimension {dim} for tensor with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid dimension.
        dim: usize,
        /// Number of dimensions.
        ndim: usize,
    },

    /// A permutation that is not a reordering of `0..ndim`.
    #[error("invalid permutation {order:?} for tensor with {ndim} dimensions")]
    InvalidPermutation {
        /// The requested order.
        order: Vec<usize>,
        /// Number of dimensions.
        ndim: usize,
    },

    /// `view` on a tensor whose storage is not row-major contiguous.
    #[error("operation requires a contiguous tensor")]
    NotContiguous,

    /// Pooling kernel does not evenly divide the spatial dimensions.
    #[error("kernel {kernel:?} does not divide input height/width {input:?}")]
    IndivisibleKernel {
        /// Kernel height and width.
        kernel: (usize, usize),
        /// Input height and width.
        input: (usize, usize),
    },

    /// Index out of bounds.
    #[error("index {index} out of bounds for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index.
        index: i64,
        /// Size of the dimension.
        size: usize,
    },

    /// Invalid argument provided to an operation.
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name.
        arg: &'static str,
        /// Reason for invalidity.
        reason: String,
    },

    /// Functionality that is declared but not available yet.
    #[error("not implemented: {feature}")]
    NotImplemented {
        /// Name of the missing feature.
        feature: &'static str,
    },

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// File I/O failure while persisting tensors.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted tensor data failed validation.
    #[error("corrupt tensor file: {0}")]
    Corrupt(&'static str),
}
