use mission_core::linalg::{LinearSettings, gmres_dense};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::SplineError;

/// Least-squares control points: solves `AᵀA cp = Aᵀb` with GMRES.
pub fn fit_control_points(
    operator: &DMatrix<f64>,
    target: &DVector<f64>,
    settings: &LinearSettings,
) -> Result<DVector<f64>, SplineError> {
    if operator.nrows() != target.len() {
        return Err(SplineError::TargetLength {
            expected: operator.nrows(),
            found: target.len(),
        });
    }
    let normal = operator.tr_mul(operator);
    let rhs = operator.tr_mul(target);
    let solution = gmres_dense(&normal, &rhs, settings);
    if !solution.converged {
        warn!(
            residual = solution.residual_norm,
            iterations = solution.iterations,
            "control-point fit stopped before tolerance"
        );
    }
    Ok(solution.x)
}
