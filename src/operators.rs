//! Scalar math shared by every backend.

/// Guard added inside `log` and its derivative.
pub const EPS: f64 = 1e-6;

/// Tolerance used by [`is_close`].
pub const CLOSE_TOL: f64 = 1e-2;

#[inline]
pub fn mul(x: f64, y: f64) -> f64 {
    x * y
}

#[inline]
pub fn id(x: f64) -> f64 {
    x
}

#[inline]
pub fn add(x: f64, y: f64) -> f64 {
    x + y
}

#[inline]
pub fn neg(x: f64) -> f64 {
    -x
}

/// 1.0 if `x < y`, else 0.0.
#[inline]
pub fn lt(x: f64, y: f64) -> f64 {
    if x < y { 1.0 } else { 0.0 }
}

/// 1.0 if `x == y`, else 0.0.
#[inline]
pub fn eq(x: f64, y: f64) -> f64 {
    if x == y { 1.0 } else { 0.0 }
}

#[inline]
pub fn max(x: f64, y: f64) -> f64 {
    if x > y { x } else { y }
}

/// 1.0 if `|x - y| < 1e-2`, else 0.0.
#[inline]
pub fn is_close(x: f64, y: f64) -> f64 {
    if (x - y).abs() < CLOSE_TOL { 1.0 } else { 0.0 }
}

/// Logistic sigmoid, evaluated on the branch that cannot overflow.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[inline]
pub fn relu(x: f64) -> f64 {
    if x > 0.0 { x } else { 0.0 }
}

#[inline]
pub fn log(x: f64) -> f64 {
    (x + EPS).ln()
}

#[inline]
pub fn exp(x: f64) -> f64 {
    x.exp()
}

#[inline]
pub fn tanh(x: f64) -> f64 {
    x.tanh()
}

#[inline]
pub fn inv(x: f64) -> f64 {
    1.0 / x
}

/// `d * d/dx log(x)`.
#[inline]
pub fn log_back(x: f64, d: f64) -> f64 {
    d / (x + EPS)
}

/// `d * d/dx (1/x)`.
#[inline]
pub fn inv_back(x: f64, d: f64) -> f64 {
    -d / (x * x)
}

/// `d * d/dx relu(x)`.
#[inline]
pub fn relu_back(x: f64, d: f64) -> f64 {
    if x > 0.0 { d } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(1000.0).is_finite());
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn comparisons_return_indicator_values() {
        assert_eq!(lt(1.0, 2.0), 1.0);
        assert_eq!(lt(2.0, 2.0), 0.0);
        assert_eq!(eq(3.0, 3.0), 1.0);
        assert_eq!(is_close(1.0, 1.001), 1.0);
        assert_eq!(is_close(1.0, 1.1), 0.0);
        assert_eq!(max(-1.0, -2.0), -1.0);
    }

    #[test]
    fn backward_helpers() {
        assert_eq!(relu_back(-1.0, 5.0), 0.0);
        assert_eq!(relu_back(1.0, 5.0), 5.0);
        assert!((inv_back(2.0, 1.0) + 0.25).abs() < 1e-12);
        assert!((log_back(1.0, 2.0) - 2.0).abs() < 1e-5);
    }
}
