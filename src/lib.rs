//! minitorch: a minimal tensor and autodiff engine in Rust.
//!
//! Strided N-dimensional tensors run on a per-tensor backend (a naive
//! reference loop, a rayon-parallel CPU backend, or optional wgpu compute
//! kernels) and record a computation graph that reverse-mode autodiff
//! replays to compute gradients. Neural-network primitives such as pooling,
//! softmax, normalization and dropout are built on top.
//!
//! # Features
//!
//! - Broadcasting elementwise math, reductions and batched matmul
//! - Reverse-mode gradients with [`Tensor::backward`]
//! - Backend chosen per tensor, defaulting from `MINITORCH_BACKEND`
//! - Saving and loading tensors in the `.mtt` format
//!
//! # Modules
//!
//! - [`tensors`] — The tensor handle and its operations.
//! - [`autodiff`] / [`functions`] — The graph, its operator tags and backward rules.
//! - [`ops`] — Kernels for each backend and the dispatch layer.
//! - [`nn`] — Pooling, softmax, dropout, layer norm, GELU and one-hot.
//! - [`modelio`] — Host arrays and tensor files.
//! - [`approx`] — Approximate equality and gradient checking.
//!
//! # Example
//!
//! ```rust
//! use minitorch::{nn, Backend, Tensor};
//!
//! let logits = Tensor::new(vec![1, 3], vec![1.0, 2.0, 3.0], Backend::Fast).requires_grad_(true);
//! let probs = nn::softmax(&logits, 1)?;
//! probs.sum_all()?.backward()?;
//! assert!(logits.grad().is_some());
//! # Ok::<(), minitorch::Error>(())
//! ```

pub mod approx;
pub mod autodiff;
pub mod backend;
pub mod data;
pub mod error;
pub mod functions;
pub mod layout;
pub mod modelio;
pub mod nn;
pub mod operators;
pub mod ops;
pub mod tensors;

pub use backend::Backend;
pub use error::{Error, Result};
pub use tensors::Tensor;
