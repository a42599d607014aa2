//! Utilities to approximate equality of floating point values, plus
//! numerical gradient checking for the autodiff engine.

use crate::error::Result;
use crate::tensors::Tensor;

/// The expected epsilon accepted on `f32`s (GPU kernels compute in `f32`).
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// Step used by [`grad_check`].
pub const GRAD_CHECK_STEP: f64 = 1e-6;

/// Checks the relative distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self`
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs() / rhs.abs().max(1.0);

        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl<T: RelativeEq<U>, U> RelativeEq<[U]> for [T] {
    /// The worst rating over all pairs; slices of different length are `Scarce`.
    fn approx_eq(&self, rhs: &[U]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(t, u)| t.approx_eq(u))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

/// Approximates equality based off the relative difference.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) <= ApproxEquality::Partial
}

/// Panics unless `a` and `b` agree to [`F64_AVG_ERROR`] (relative for
/// magnitudes above one).
#[track_caller]
pub fn assert_close(a: f64, b: f64) {
    assert!(approx_eq(&a, &b), "assert_close failed: {a} != {b}");
}

/// Central-difference estimate of `d f(args).sum() / d args[arg][index]`.
///
/// # Errors
/// Whatever `f` reports.
pub fn central_difference<F>(f: F, args: &[Tensor], arg: usize, index: usize, eps: f64) -> Result<f64>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    let shifted = |delta: f64| -> Result<f64> {
        let moved: Vec<Tensor> = args
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut values = t.to_vec();
                if i == arg {
                    values[index] += delta;
                }
                Tensor::new(t.shape().to_vec(), values, t.backend())
            })
            .collect();
        Ok(f(&moved)?.to_vec().iter().sum())
    };
    Ok((shifted(eps)? - shifted(-eps)?) / (2.0 * eps))
}

/// Compares autodiff gradients of `f(args).sum()` against central
/// differences at every element of every argument.
///
/// # Panics
/// On the first gradient that disagrees by more than [`F64_MAX_ERROR`]
/// (relative), or if `f` fails.
#[track_caller]
pub fn grad_check<F>(f: F, args: &[Tensor])
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    let leaves: Vec<Tensor> = args
        .iter()
        .map(|t| t.detach().requires_grad_(true))
        .collect();
    let out = f(&leaves).and_then(|out| out.sum_all());
    let out = match out {
        Ok(out) => out,
        Err(e) => panic!("grad_check: forward failed: {e}"),
    };
    if let Err(e) = out.backward() {
        panic!("grad_check: backward failed: {e}");
    }

    for (arg, leaf) in leaves.iter().enumerate() {
        let grad = leaf
            .grad()
            .map(|g| g.to_vec())
            .unwrap_or_else(|| vec![0.0; leaf.size()]);
        for (index, &analytic) in grad.iter().enumerate() {
            let numeric = match central_difference(&f, args, arg, index, GRAD_CHECK_STEP) {
                Ok(v) => v,
                Err(e) => panic!("grad_check: central difference failed: {e}"),
            };
            assert!(
                analytic.approx_eq(&numeric) != ApproxEquality::Scarce,
                "grad_check failed for arg {arg} index {index}: autodiff {analytic}, numeric {numeric}"
            );
        }
    }
}
