//! Neural-network primitives.
//!
//! Pooling, softmax, normalization, dropout, activation and encoding helpers
//! composed from differentiable [`Tensor`] operations. Everything here except
//! [`argmax`] and [`one_hot`] records a graph and can be back-propagated.
//!
//! Pooling inputs are `batch x channel x height x width`.
//!
//! ```rust
//! use minitorch::backend::Backend;
//! use minitorch::nn;
//! use minitorch::tensors::Tensor;
//!
//! let img = Tensor::ones(vec![1, 1, 4, 4], Backend::Fast);
//! let (tiled, h, w) = nn::tile(&img, (2, 2))?;
//! assert_eq!(tiled.shape(), &[1, 1, 2, 2, 4]);
//! assert_eq!((h, w), (2, 2));
//! # Ok::<(), minitorch::Error>(())
//! ```

use rand::Rng;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::functions::Function;
use crate::tensors::Tensor;

/// Default `eps` of [`layer_norm`].
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// `sqrt(2 / pi)`, the GELU tanh-approximation scale.
const GELU_SCALE: f64 = 0.797_884_560_802_865_4;
const GELU_CUBIC: f64 = 0.044_715;

fn image_shape(input: &Tensor) -> Result<[usize; 4]> {
    <[usize; 4]>::try_from(input.shape()).map_err(|_| Error::InvalidArgument {
        arg: "input",
        reason: format!("expected batch x channel x height x width, got shape {:?}", input.shape()),
    })
}

/// Reshapes an image for 2D pooling.
///
/// Splits height and width into `kernel`-sized blocks and moves each block
/// into a trailing axis of length `kh * kw`. Returns the tiled tensor of shape
/// `batch x channel x new_height x new_width x (kh * kw)` along with
/// `new_height` and `new_width`.
///
/// # Errors
/// [`Error::IndivisibleKernel`] if the kernel does not divide the input and
/// [`Error::InvalidArgument`] if the input is not 4-D.
pub fn tile(input: &Tensor, kernel: (usize, usize)) -> Result<(Tensor, usize, usize)> {
    let [batch, channel, height, width] = image_shape(input)?;
    let (kh, kw) = kernel;
    if kh == 0 || kw == 0 || height % kh != 0 || width % kw != 0 {
        return Err(Error::IndivisibleKernel {
            kernel,
            input: (height, width),
        });
    }
    let (new_height, new_width) = (height / kh, width / kw);

    let x = input
        .contiguous()?
        .view(&[batch, channel, new_height, kh, new_width, kw])?
        .permute(&[0, 1, 2, 4, 3, 5])?
        .contiguous()?
        .view(&[batch, channel, new_height, new_width, kh * kw])?;
    Ok((x, new_height, new_width))
}

/// Tiled average pooling.
///
/// # Errors
/// As [`tile`].
#[instrument(skip(input), fields(shape = ?input.shape()))]
pub fn avgpool2d(input: &Tensor, kernel: (usize, usize)) -> Result<Tensor> {
    let [batch, channel, ..] = image_shape(input)?;
    let (x, new_height, new_width) = tile(input, kernel)?;
    x.mean(4)?.view(&[batch, channel, new_height, new_width])
}

/// Tiled max pooling.
///
/// # Errors
/// As [`tile`].
#[instrument(skip(input), fields(shape = ?input.shape()))]
pub fn maxpool2d(input: &Tensor, kernel: (usize, usize)) -> Result<Tensor> {
    let [batch, channel, ..] = image_shape(input)?;
    let (x, new_height, new_width) = tile(input, kernel)?;
    max(&x, 4)?.view(&[batch, channel, new_height, new_width])
}

/// Differentiable max over `dim`, keeping `dim` with size 1.
///
/// The gradient flows to every position equal to the maximum, so tied
/// maxima each receive the full upstream gradient.
///
/// # Errors
/// [`Error::InvalidDimension`] if `dim` is out of range.
pub fn max(input: &Tensor, dim: usize) -> Result<Tensor> {
    Tensor::apply(Function::Max { dim }, &[input])
}

/// 1.0 where an element equals the maximum of its slice along `dim`.
///
/// Ties produce several ones per slice. The result carries no gradient.
///
/// # Errors
/// [`Error::InvalidDimension`] if `dim` is out of range.
pub fn argmax(input: &Tensor, dim: usize) -> Result<Tensor> {
    let input = input.detach();
    max(&input, dim)?.eq(&input)
}

/// Softmax along `dim`, shifted by the slice maximum so large inputs
/// cannot overflow.
///
/// # Errors
/// [`Error::InvalidDimension`] if `dim` is out of range.
pub fn softmax(input: &Tensor, dim: usize) -> Result<Tensor> {
    let e = input.sub(&max(input, dim)?)?.exp()?;
    let partition = e.sum(dim)?;
    e.div(&partition)
}

/// Log of [`softmax`], computed as `x - logsumexp(x)`.
///
/// # Errors
/// [`Error::InvalidDimension`] if `dim` is out of range.
pub fn logsoftmax(input: &Tensor, dim: usize) -> Result<Tensor> {
    input.sub(&stable_logsumexp(input, dim)?)
}

/// `log(sum(exp(x)))` over `dim` with the max-shift trick.
fn stable_logsumexp(input: &Tensor, dim: usize) -> Result<Tensor> {
    let mx = max(input, dim)?;
    input.sub(&mx)?.exp()?.sum(dim)?.log()?.add(&mx)
}

/// Zeroes positions whose uniform noise does not exceed `rate`.
///
/// With `ignore` set the input is returned unchanged, in training too. Kept
/// values are not rescaled by `1 / (1 - rate)`.
///
/// # Errors
/// Propagates tensor errors; none occur for well-formed input.
pub fn dropout(input: &Tensor, rate: f64, ignore: bool) -> Result<Tensor> {
    dropout_with_rng(input, rate, ignore, &mut rand::rng())
}

/// [`dropout`] drawing its noise from `rng`.
///
/// # Errors
/// Propagates tensor errors; none occur for well-formed input.
pub fn dropout_with_rng<R: Rng + ?Sized>(input: &Tensor, rate: f64, ignore: bool, rng: &mut R) -> Result<Tensor> {
    if ignore {
        return Ok(input.clone());
    }
    let noise = Tensor::rand_with(input.shape().to_vec(), input.backend(), rng);
    // same rank as the input so broadcasting keeps 0-d shapes intact
    let threshold = Tensor::full(vec![1; input.dims()], rate, input.backend());
    let keep = threshold.lt(&noise)?;
    input.mul(&keep)
}

/// Denominator used by [`layer_norm_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Denominator {
    /// `variance + eps`
    #[default]
    Variance,
    /// `sqrt(variance + eps)`
    StdDev,
}

/// Normalizes over the last axis as `(x - mean) / (variance + eps)`.
///
/// The denominator is the variance itself, not the standard deviation; use
/// [`layer_norm_with`] with [`Denominator::StdDev`] for the usual scaling.
///
/// # Errors
/// [`Error::InvalidArgument`] for zero-dimensional input.
pub fn layer_norm(input: &Tensor, eps: f64) -> Result<Tensor> {
    layer_norm_with(input, eps, Denominator::Variance)
}

/// Normalizes over the last axis with the chosen denominator.
///
/// # Errors
/// [`Error::InvalidArgument`] for zero-dimensional input.
pub fn layer_norm_with(input: &Tensor, eps: f64, denominator: Denominator) -> Result<Tensor> {
    let last = input.dims().checked_sub(1).ok_or(Error::InvalidArgument {
        arg: "input",
        reason: "layer_norm needs at least one dimension".into(),
    })?;
    let mean = input.mean(last)?;
    let variance = input.var(last)?.add_scalar(eps)?;
    let denom = match denominator {
        Denominator::Variance => variance,
        Denominator::StdDev => variance.pow_scalar(0.5)?,
    };
    input.sub(&mean)?.div(&denom)
}

/// GELU with the tanh approximation,
/// `0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))`.
///
/// # Errors
/// Propagates tensor errors; none occur for well-formed input.
pub fn gelu(input: &Tensor) -> Result<Tensor> {
    let cube = input.mul(input)?.mul(input)?;
    let inner = input.add(&cube.mul_scalar(GELU_CUBIC)?)?.mul_scalar(GELU_SCALE)?;
    let gate = inner.tanh()?.add_scalar(1.0)?;
    input.mul(&gate)?.mul_scalar(0.5)
}

/// Expands an index tensor of shape `(*)` into `(*, num_classes)`, with a
/// single 1.0 at each index. Indices are truncated toward zero.
///
/// # Errors
/// [`Error::IndexOutOfBounds`] if a truncated index is negative or at least
/// `num_classes`, and [`Error::InvalidArgument`] for NaN indices or an output
/// too large to address.
pub fn one_hot(input: &Tensor, num_classes: usize) -> Result<Tensor> {
    let indices = input.to_vec();
    let len = indices.len().checked_mul(num_classes).ok_or_else(|| Error::InvalidArgument {
        arg: "num_classes",
        reason: format!("{} indices x {num_classes} classes overflows", indices.len()),
    })?;
    let mut data = vec![0.0; len];
    for (row, value) in indices.into_iter().enumerate() {
        if value.is_nan() {
            return Err(Error::InvalidArgument {
                arg: "input",
                reason: "one_hot index is NaN".into(),
            });
        }
        let k = value.trunc();
        if !(0.0..num_classes as f64).contains(&k) {
            return Err(Error::IndexOutOfBounds {
                index: k as i64,
                size: num_classes,
            });
        }
        data[row * num_classes + k as usize] = 1.0;
    }
    let mut shape = input.shape().to_vec();
    shape.push(num_classes);
    Tensor::try_new(shape, data, input.backend())
}

/// Log-sum-exp over `dim`, keeping `dim` with size 1.
///
/// # Errors
/// Always [`Error::NotImplemented`].
pub fn logsumexp(_input: &Tensor, _dim: usize) -> Result<Tensor> {
    Err(Error::NotImplemented { feature: "logsumexp" })
}

/// Softmax cross-entropy per example, without reduction.
///
/// `logits` is `minibatch x classes` and `target` holds `minibatch` class
/// labels; the loss would have shape `minibatch`.
///
/// # Errors
/// Always [`Error::NotImplemented`].
pub fn softmax_loss(_logits: &Tensor, _target: &Tensor) -> Result<Tensor> {
    Err(Error::NotImplemented { feature: "softmax_loss" })
}
