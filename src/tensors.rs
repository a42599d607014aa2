//! Core tensor handle and operations.
//!
//! # Core Tensor Utilities
//!
//! A [`Tensor`] is a reference-counted handle to immutable strided data, the
//! [`Backend`] its kernels run on, and (when it takes part in a gradient
//! computation) the [`History`] that produced it.
//!
//! It supports:
//! - Construction from flat row-major data, constants, and uniform noise
//! - Shape manipulation: `view`, `permute`, `contiguous`
//! - Differentiable elementwise math with numpy broadcasting
//! - Reductions along one dimension, keeping the reduced dimension as size 1
//! - Reverse-mode gradients through [`Tensor::backward`]
//! - Compile-time tensor literals through the [`tensor!`](crate::tensor) macro
//!
//! ## Design Highlights
//! - Cloning a handle shares identity: gradients of a clone land on the
//!   same leaf
//! - Every graph-building operation returns `Result`; nothing is mutated
//!   in place apart from the gradient slot
//! - The backend of a result is the backend of its first operand
//!
//! ## Example
//!
//! ```rust
//! use minitorch::backend::Backend;
//! use minitorch::tensors::Tensor;
//!
//! let x = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Backend::Fast)
//!     .requires_grad_(true);
//! let loss = x.mul(&x)?.sum_all()?;
//! loss.backward()?;
//! assert_eq!(x.grad().unwrap().to_vec(), vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
//! # Ok::<(), minitorch::Error>(())
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::autodiff::{self, Context, History};
use crate::backend::Backend;
use crate::data::TensorData;
use crate::error::{Error, Result};
use crate::functions::Function;
use crate::layout::Layout;
use crate::ops::{BinaryOp, dispatch};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

struct Inner {
    id: usize,
    data: TensorData,
    backend: Backend,
    history: Option<History>,
    requires_grad: Cell<bool>,
    grad: RefCell<Option<Tensor>>,
}

/// An N-dimensional array of `f64` bound to an execution backend.
#[derive(Clone)]
pub struct Tensor {
    inner: Rc<Inner>,
}

impl Tensor {
    fn from_parts(data: TensorData, backend: Backend, history: Option<History>) -> Self {
        Self {
            inner: Rc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                data,
                backend,
                history,
                requires_grad: Cell::new(false),
                grad: RefCell::new(None),
            }),
        }
    }

    /// Creates a constant tensor with the given shape and flat row-major data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f64>, backend: Backend) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self::from_data(TensorData::from_parts(data.into(), Layout::contiguous(shape)), backend)
    }

    /// Fallible form of [`Tensor::new`].
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `data` does not fill `shape`.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<f64>, backend: Backend) -> Result<Self> {
        Ok(Self::from_data(TensorData::new(shape, data)?, backend))
    }

    /// Wraps existing tensor data as a constant.
    pub fn from_data(data: TensorData, backend: Backend) -> Self {
        Self::from_parts(data, backend, None)
    }

    /// A tensor filled with `value`.
    pub fn full(shape: impl Into<Vec<usize>>, value: f64, backend: Backend) -> Self {
        Self::from_data(TensorData::filled(shape, value), backend)
    }

    /// A tensor filled with zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>, backend: Backend) -> Self {
        Self::full(shape, 0.0, backend)
    }

    /// A tensor filled with ones.
    pub fn ones(shape: impl Into<Vec<usize>>, backend: Backend) -> Self {
        Self::full(shape, 1.0, backend)
    }

    /// A one-element tensor of shape `[1]`.
    pub fn scalar(value: f64, backend: Backend) -> Self {
        Self::full(vec![1], value, backend)
    }

    /// Uniform noise in `[0, 1)` from the thread-local generator.
    pub fn rand(shape: impl Into<Vec<usize>>, backend: Backend) -> Self {
        Self::rand_with(shape, backend, &mut rand::rng())
    }

    /// Uniform noise in `[0, 1)` from `rng`.
    pub fn rand_with<R: Rng + ?Sized>(shape: impl Into<Vec<usize>>, backend: Backend, rng: &mut R) -> Self {
        let shape = shape.into();
        let size = shape.iter().product();
        let data = (0..size).map(|_| rng.random::<f64>()).collect();
        Self::new(shape, data, backend)
    }

    /// Records `function` applied to `inputs`.
    ///
    /// The graph edge is kept only if some input requires a gradient.
    ///
    /// # Errors
    /// Whatever the function's forward pass reports.
    pub fn apply(function: Function, inputs: &[&Tensor]) -> Result<Tensor> {
        let first = inputs.first().ok_or_else(|| Error::InvalidArgument {
            arg: "inputs",
            reason: "a function needs at least one input".into(),
        })?;
        let backend = first.backend();
        let need_grad = function.is_differentiable() && inputs.iter().any(|t| t.requires_grad());
        let mut ctx = Context::new(!need_grad);
        let data: Vec<&TensorData> = inputs.iter().map(|t| t.data()).collect();
        let out = function.forward(&mut ctx, backend, &data)?;
        let history = need_grad.then(|| History {
            function,
            ctx,
            inputs: inputs.iter().map(|&t| t.clone()).collect(),
        });
        Ok(Self::from_parts(out, backend, history))
    }

    // ----- accessors -----

    /// Unique id of this tensor (shared by clones of the handle).
    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// The underlying strided data.
    pub fn data(&self) -> &TensorData {
        &self.inner.data
    }

    /// Logical shape.
    pub fn shape(&self) -> &[usize] {
        self.inner.data.shape()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.inner.data.size()
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.inner.data.dims()
    }

    /// Backend the tensor's kernels run on.
    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    /// Values in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.inner.data.to_vec()
    }

    /// Element at `index`.
    ///
    /// # Errors
    /// See [`TensorData::get`].
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        self.inner.data.get(index)
    }

    /// The value of a one-element tensor.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the tensor holds more than one element.
    pub fn item(&self) -> Result<f64> {
        if self.size() != 1 {
            return Err(Error::ShapeMismatch {
                expected: vec![1],
                got: self.shape().to_vec(),
            });
        }
        Ok(self.to_vec()[0])
    }

    // ----- autograd -----

    /// Marks a leaf as requiring a gradient. Returns the handle for chaining.
    pub fn requires_grad_(self, flag: bool) -> Self {
        self.inner.requires_grad.set(flag);
        self
    }

    /// True for leaves marked with [`Tensor::requires_grad_`] and for every
    /// tensor computed from one.
    pub fn requires_grad(&self) -> bool {
        self.inner.history.is_some() || self.inner.requires_grad.get()
    }

    /// True if the tensor was not produced by a recorded function.
    pub fn is_leaf(&self) -> bool {
        self.inner.history.is_none()
    }

    pub(crate) fn history(&self) -> Option<&History> {
        self.inner.history.as_ref()
    }

    /// Accumulated gradient of a leaf, if any has been computed.
    pub fn grad(&self) -> Option<Tensor> {
        self.inner.grad.borrow().clone()
    }

    /// Clears the accumulated gradient.
    pub fn zero_grad(&self) {
        self.inner.grad.replace(None);
    }

    /// A constant sharing this tensor's data, detached from the graph.
    pub fn detach(&self) -> Tensor {
        Self::from_data(self.inner.data.clone(), self.backend())
    }

    pub(crate) fn accumulate_grad(&self, d: TensorData) -> Result<()> {
        let d = autodiff::expand(d, self.shape(), self.backend())?;
        let mut slot = self.inner.grad.borrow_mut();
        let total = match slot.take() {
            Some(prev) => dispatch::zip(self.backend(), BinaryOp::Add, prev.data(), &d)?,
            None => d,
        };
        *slot = Some(Self::from_data(total, self.backend()));
        Ok(())
    }

    /// Back-propagates from a one-element tensor, seeding with 1.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] for tensors with more than one element and
    /// [`Error::InvalidArgument`] if the tensor does not require a gradient.
    pub fn backward(&self) -> Result<()> {
        if self.size() != 1 {
            return Err(Error::ShapeMismatch {
                expected: vec![1],
                got: self.shape().to_vec(),
            });
        }
        self.backward_with(&Self::full(self.shape().to_vec(), 1.0, self.backend()))
    }

    /// Back-propagates an explicit output gradient.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `grad` does not match this tensor's shape.
    pub fn backward_with(&self, grad: &Tensor) -> Result<()> {
        if !self.requires_grad() {
            return Err(Error::InvalidArgument {
                arg: "self",
                reason: "backward on a tensor that does not require grad".into(),
            });
        }
        if grad.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                got: grad.shape().to_vec(),
            });
        }
        autodiff::backpropagate(self, grad.data().clone())
    }

    // ----- elementwise -----

    /// Elementwise `self + other` with broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Add, &[self, other])
    }

    /// Elementwise `self - other` with broadcasting.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Sub, &[self, other])
    }

    /// Elementwise `self * other` with broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Mul, &[self, other])
    }

    /// Elementwise `self / other` with broadcasting.
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Div, &[self, other])
    }

    /// 1.0 where `self < other`, else 0.0.
    pub fn lt(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Lt, &[self, other])
    }

    /// 1.0 where `self > other`, else 0.0.
    pub fn gt(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Lt, &[other, self])
    }

    /// 1.0 where `self == other`, else 0.0.
    pub fn eq(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::Eq, &[self, other])
    }

    /// 1.0 where the elements differ by less than `1e-2`.
    pub fn is_close(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::IsClose, &[self, other])
    }

    /// Elementwise negation.
    pub fn neg(&self) -> Result<Tensor> {
        Self::apply(Function::Neg, &[self])
    }

    /// Elementwise reciprocal.
    pub fn inv(&self) -> Result<Tensor> {
        Self::apply(Function::Inv, &[self])
    }

    /// Elementwise logistic sigmoid.
    pub fn sigmoid(&self) -> Result<Tensor> {
        Self::apply(Function::Sigmoid, &[self])
    }

    /// Elementwise `max(x, 0)`.
    pub fn relu(&self) -> Result<Tensor> {
        Self::apply(Function::Relu, &[self])
    }

    /// Elementwise natural log of `x + 1e-6`.
    pub fn log(&self) -> Result<Tensor> {
        Self::apply(Function::Log, &[self])
    }

    /// Elementwise exponential.
    pub fn exp(&self) -> Result<Tensor> {
        Self::apply(Function::Exp, &[self])
    }

    /// Elementwise hyperbolic tangent.
    pub fn tanh(&self) -> Result<Tensor> {
        Self::apply(Function::Tanh, &[self])
    }

    /// Adds `c` to every element.
    pub fn add_scalar(&self, c: f64) -> Result<Tensor> {
        Self::apply(Function::AddScalar(c), &[self])
    }

    /// Multiplies every element by `c`.
    pub fn mul_scalar(&self, c: f64) -> Result<Tensor> {
        Self::apply(Function::MulScalar(c), &[self])
    }

    /// Raises every element to the power `c`.
    pub fn pow_scalar(&self, c: f64) -> Result<Tensor> {
        Self::apply(Function::PowScalar(c), &[self])
    }

    // ----- reductions -----

    /// Sum over `dim`; the result keeps `dim` with size 1.
    pub fn sum(&self, dim: usize) -> Result<Tensor> {
        Self::apply(Function::Sum { dim }, &[self])
    }

    /// Sum of all elements, shape `[1]`.
    pub fn sum_all(&self) -> Result<Tensor> {
        self.flatten()?.sum(0)
    }

    /// Mean over `dim`; the result keeps `dim` with size 1.
    pub fn mean(&self, dim: usize) -> Result<Tensor> {
        let n = self.dim_len(dim)?;
        self.sum(dim)?.mul_scalar(1.0 / n as f64)
    }

    /// Mean of all elements, shape `[1]`.
    pub fn mean_all(&self) -> Result<Tensor> {
        self.sum_all()?.mul_scalar(1.0 / self.size() as f64)
    }

    /// Population variance over `dim` (divides by the length of `dim`).
    pub fn var(&self, dim: usize) -> Result<Tensor> {
        let centered = self.sub(&self.mean(dim)?)?;
        centered.mul(&centered)?.mean(dim)
    }

    /// Product of all elements, shape `[1]`. Not differentiable.
    pub fn all(&self) -> Result<Tensor> {
        Self::apply(Function::All, &[self])
    }

    fn dim_len(&self, dim: usize) -> Result<usize> {
        self.shape().get(dim).copied().ok_or(Error::InvalidDimension {
            dim,
            ndim: self.dims(),
        })
    }

    // ----- shape -----

    /// Reorders dimensions; output dim `i` is input dim `order[i]`.
    pub fn permute(&self, order: &[usize]) -> Result<Tensor> {
        Self::apply(Function::Permute { order: order.to_vec() }, &[self])
    }

    /// Reinterprets a contiguous tensor with a new shape of equal size.
    ///
    /// # Errors
    /// [`Error::NotContiguous`] for permuted tensors; call
    /// [`Tensor::contiguous`] first.
    pub fn view(&self, shape: &[usize]) -> Result<Tensor> {
        Self::apply(Function::View { shape: shape.to_vec() }, &[self])
    }

    /// A row-major copy (differentiable).
    pub fn contiguous(&self) -> Result<Tensor> {
        Self::apply(Function::Copy, &[self])
    }

    /// A contiguous one-dimensional view of all elements.
    pub fn flatten(&self) -> Result<Tensor> {
        self.contiguous()?.view(&[self.size()])
    }

    /// Swaps the two trailing dimensions.
    pub fn transpose(&self) -> Result<Tensor> {
        let n = self.dims();
        if n < 2 {
            return Err(Error::InvalidDimension { dim: 1, ndim: n });
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.swap(n - 2, n - 1);
        self.permute(&order)
    }

    /// Batched matrix product.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        Self::apply(Function::MatMul, &[self, other])
    }

    /// True if shapes match and every pair of elements is within `tol`.
    pub fn allclose(&self, other: &Tensor, tol: f64) -> bool {
        self.shape() == other.shape()
            && self
                .to_vec()
                .iter()
                .zip(other.to_vec())
                .all(|(a, b)| (a - b).abs() <= tol || (a.is_nan() && b.is_nan()))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id())
            .field("shape", &self.shape())
            .field("backend", &self.backend())
            .field("requires_grad", &self.requires_grad())
            .field("data", &self.to_vec())
            .finish()
    }
}

/// Defines a tensor from nested literal arrays on [`Backend::from_env`].
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use minitorch::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit as f64], $crate::backend::Backend::from_env())
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = children[0].shape().to_vec();
        assert!(children.iter().all(|c| c.shape() == first_shape.as_slice()),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let data: Vec<f64> = children.iter().flat_map(|c| c.to_vec()).collect();
        $crate::tensors::Tensor::new(shape, data, $crate::backend::Backend::from_env())
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], values: &[f64]) -> Tensor {
        Tensor::new(shape.to_vec(), values.to_vec(), Backend::Simple)
    }

    #[test]
    #[should_panic(expected = "incompatible")]
    fn new_panics_on_shape_mismatch() {
        let _ = t(&[2, 2], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn macro_builds_nested_literals() {
        let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.backend(), Backend::from_env());
    }

    #[test]
    fn broadcast_gradients_are_summed_back() {
        let a = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).requires_grad_(true);
        let b = t(&[3], &[1.0, 1.0, 1.0]).requires_grad_(true);
        let out = a.mul(&b).unwrap().sum_all().unwrap();
        out.backward().unwrap();
        assert_eq!(b.grad().unwrap().to_vec(), vec![5.0, 7.0, 9.0]);
        assert_eq!(a.grad().unwrap().to_vec(), vec![1.0; 6]);
    }

    #[test]
    fn gradients_accumulate_across_backward_calls() {
        let x = t(&[1], &[3.0]).requires_grad_(true);
        for _ in 0..2 {
            x.mul_scalar(2.0).unwrap().backward().unwrap();
        }
        assert_eq!(x.grad().unwrap().to_vec(), vec![4.0]);
        x.zero_grad();
        assert!(x.grad().is_none());
    }

    #[test]
    fn shared_subexpression_gets_both_contributions() {
        let x = t(&[1], &[2.0]).requires_grad_(true);
        let y = x.mul(&x).unwrap().add(&x).unwrap();
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().to_vec(), vec![5.0]);
    }

    #[test]
    fn constants_build_no_graph() {
        let a = t(&[2], &[1.0, 2.0]);
        let b = a.exp().unwrap();
        assert!(b.is_leaf());
        assert!(!b.requires_grad());
        assert!(b.backward_with(&t(&[2], &[1.0, 1.0])).is_err());
    }

    #[test]
    fn view_requires_contiguous_input() {
        let a = t(&[2, 3], &[0.0; 6]);
        let p = a.permute(&[1, 0]).unwrap();
        assert!(matches!(p.view(&[6]), Err(Error::NotContiguous)));
        assert_eq!(p.contiguous().unwrap().view(&[6]).unwrap().shape(), &[6]);
    }

    #[test]
    fn permute_and_view_pass_gradients_through() {
        let a = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).requires_grad_(true);
        let w = t(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = a
            .permute(&[1, 0])
            .unwrap()
            .mul(&w)
            .unwrap()
            .contiguous()
            .unwrap()
            .view(&[6])
            .unwrap()
            .sum(0)
            .unwrap();
        out.backward().unwrap();
        // a^T * w: grad of a[i][j] is w[j][i]
        assert_eq!(a.grad().unwrap().to_vec(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn matmul_gradients() {
        let a = t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).requires_grad_(true);
        let b = t(&[2, 2], &[5.0, 6.0, 7.0, 8.0]).requires_grad_(true);
        let out = a.matmul(&b).unwrap();
        assert_eq!(out.to_vec(), vec![19.0, 22.0, 43.0, 50.0]);
        out.sum_all().unwrap().backward().unwrap();
        assert_eq!(a.grad().unwrap().to_vec(), vec![11.0, 15.0, 11.0, 15.0]);
        assert_eq!(b.grad().unwrap().to_vec(), vec![4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn mean_and_var_reduce_one_dim() {
        let a = t(&[2, 2], &[1.0, 3.0, 2.0, 6.0]);
        assert_eq!(a.mean(1).unwrap().to_vec(), vec![2.0, 4.0]);
        assert_eq!(a.var(1).unwrap().to_vec(), vec![1.0, 4.0]);
        assert!(matches!(a.mean(2), Err(Error::InvalidDimension { .. })));
        assert_eq!(a.all().unwrap().item().unwrap(), 36.0);
    }

    #[test]
    fn item_requires_one_element() {
        assert_eq!(t(&[1, 1], &[7.0]).item().unwrap(), 7.0);
        assert!(t(&[2], &[1.0, 2.0]).item().is_err());
    }

    #[test]
    fn rand_is_in_unit_interval() {
        let r = Tensor::rand(vec![100], Backend::Fast);
        assert!(r.to_vec().iter().all(|&v| (0.0..1.0).contains(&v)));
    }
}
