//! Control-point parameterisation of the flight profile.

use thiserror::Error;

pub mod fit;
pub mod operator;
pub mod systems;

pub use fit::fit_control_points;
pub use operator::{SLOPE_SCALE, SplineOperators};
pub use systems::{MachSpline, SplineEval};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplineError {
    #[error("a spline needs at least one element")]
    NoElements,
    #[error("a spline needs at least two control points, got {0}")]
    TooFewControlPoints(usize),
    #[error("control-point locations must increase strictly (index {0})")]
    NotIncreasing(usize),
    #[error("fit target has {found} entries, expected {expected}")]
    TargetLength { expected: usize, found: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mission_core::linalg::LinearSettings;
    use nalgebra::DVector;

    #[test]
    fn fit_recovers_control_points_of_a_spline_profile() {
        let x_pts = [0.0, 1.0, 2.5, 4.0, 5.0];
        let ops = SplineOperators::new(40, &x_pts).unwrap();
        let cp = DVector::from_vec(vec![0.0, 3.0, 9.5, 4.0, 0.0]);
        let target = ops.value().as_ref() * &cp;
        let fitted = fit_control_points(ops.value(), &target, &LinearSettings::default()).unwrap();
        for i in 0..cp.len() {
            assert_relative_eq!(fitted[i], cp[i], epsilon = 1e-7);
        }
    }
}
