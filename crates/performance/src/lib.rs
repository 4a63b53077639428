//! Point-mass performance of a mission segment: the lift and thrust
//! coefficients that hold the aircraft in equilibrium, fuel integrated
//! backwards from landing, and block time.
//!
//! Weights are in 1e6 N except the empty weight `ac_w`, which arrives in kN.

use mission_core::constants::PASSENGER_WEIGHT_N;
use mission_graph::{SystemError, Vars};
use nalgebra::{DMatrix, DVector};

pub mod equilibrium;
pub mod fuel;
pub mod time;

pub use equilibrium::{ALPHA_LIMIT_DEG, CLTarget, CTTarget};
pub use fuel::{FuelBurn, FuelWeight};
pub use time::BlockTime;

/// Empty weight in kN to 1e6 N.
pub(crate) const AC_W_SCALE: f64 = 1e-3;
/// One passenger in 1e6 N.
pub(crate) const PAX_SCALE: f64 = PASSENGER_WEIGHT_N * 1e-6;

/// Per-station loads shared by the equilibrium systems.
pub(crate) struct Loads {
    /// Total weight (1e6 N).
    pub weight: DVector<f64>,
    /// Dynamic pressure times reference area (1e6 N).
    pub qs: DVector<f64>,
}

impl Loads {
    pub fn from_inputs(inputs: &Vars) -> Result<Self, SystemError> {
        let s = inputs.scalar("S")?;
        let ac_w = inputs.scalar("ac_w")?;
        let pax = inputs.scalar("pax_flt")?;
        let fuel_w = inputs.get("fuel_w")?;
        let rho = inputs.get("rho")?;
        let v = inputs.get("v")?;

        let weight = fuel_w.map(|f| ac_w * AC_W_SCALE + f + pax * PAX_SCALE);
        let qs = DVector::from_iterator(
            v.len(),
            rho.iter().zip(v.iter()).map(|(r, v)| 0.5 * r * v * v * s),
        );
        if let Some(i) = qs.iter().position(|q| *q <= 0.0) {
            return Err(SystemError::domain(format!(
                "non-positive dynamic pressure at station {i}"
            )));
        }
        Ok(Self { weight, qs })
    }
}

/// Column block for a scalar input.
pub(crate) fn column(values: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(values.len(), 1, values.as_slice())
}

/// Trapezoid weights: `∫y dx ≈ Σ w_j y_j`.
pub(crate) fn trapezoid_weights(x: &DVector<f64>) -> DVector<f64> {
    let n = x.len();
    let mut w = DVector::zeros(n);
    for k in 0..n.saturating_sub(1) {
        let dx = x[k + 1] - x[k];
        w[k] += 0.5 * dx;
        w[k + 1] += 0.5 * dx;
    }
    w
}

/// Gradient of the trapezoid integral of `y` with respect to the abscissas.
pub(crate) fn trapezoid_x_gradient(y: &DVector<f64>) -> DVector<f64> {
    let n = y.len();
    let mut g = DVector::zeros(n);
    for k in 0..n.saturating_sub(1) {
        let mean = 0.5 * (y[k] + y[k + 1]);
        g[k] -= mean;
        g[k + 1] += mean;
    }
    g
}
