//! Numerical cross-checking of analytic gradients by central differences.

use thiserror::Error;

/// Step size for the central-difference estimate. A harness constant, not
/// part of the engine contract.
pub const EPSILON: f64 = 1e-6;

/// Error type for gradient checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("analytic gradient {analytic} deviates from numerical estimate {numeric} by {difference} (tolerance {tolerance})")]
    GradientMismatch {
        analytic: f64,
        numeric: f64,
        difference: f64,
        tolerance: f64,
    },
    #[error("central difference at x = {x} is not finite (estimate {estimate})")]
    NumericalGradNotFinite { x: f64, estimate: f64 },
}

/// Central-difference estimate of `df/dx` at `x`.
pub fn central_diff(f: impl Fn(f64) -> f64, x: f64, eps: f64) -> f64 {
    (f(x + eps) - f(x - eps)) / (2. * eps)
}

/// Check an analytic gradient of `f` at `x` against the central-difference
/// estimate with step [`EPSILON`].
pub fn check_gradient(
    f: impl Fn(f64) -> f64,
    x: f64,
    analytic: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    let numeric = central_diff(&f, x, EPSILON);
    if !numeric.is_finite() {
        return Err(GradCheckError::NumericalGradNotFinite {
            x,
            estimate: numeric,
        });
    }
    let difference = (analytic - numeric).abs();
    if difference > tolerance {
        return Err(GradCheckError::GradientMismatch {
            analytic,
            numeric,
            difference,
            tolerance,
        });
    }
    log::debug!("gradient check passed: analytic {analytic}, numerical {numeric}, err {difference}");
    Ok(())
}
