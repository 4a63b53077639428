//! Engine model and the propulsion systems of a mission segment.
//!
//! Thrust is in 1e6 N, altitude in km and specific fuel consumption in 1e-6 1/s.

pub mod systems;

pub use systems::{Sfc, Tau, ThrustBound, ThrustMargin};

/// KS aggregation parameter for the throttle margins.
pub const KS_RHO: f64 = 30.0;
/// Lower throttle limit enforced by the `Tmin` margin.
pub const TAU_MIN: f64 = 0.01;
/// Upper throttle limit enforced by the `Tmax` margin.
pub const TAU_MAX: f64 = 1.0;

/// Altitude dependence of available thrust and fuel consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineModel {
    /// Loss of maximum thrust per km of altitude (1e6 N/km).
    pub thrust_lapse_per_km: f64,
    /// Growth of specific fuel consumption per km of altitude (1e-6 1/s per km).
    pub sfc_per_km: f64,
}

impl Default for EngineModel {
    fn default() -> Self {
        Self {
            thrust_lapse_per_km: 0.072,
            sfc_per_km: 0.00627,
        }
    }
}

impl EngineModel {
    /// Maximum available thrust at altitude.
    pub fn max_thrust(&self, thrust_sl: f64, h_km: f64) -> f64 {
        thrust_sl - self.thrust_lapse_per_km * h_km
    }

    pub fn sfc(&self, sfc_sl: f64, h_km: f64) -> f64 {
        sfc_sl + self.sfc_per_km * h_km
    }
}

/// Smooth maximum and its gradient.
pub fn ks_with_gradient(values: &[f64], rho: f64) -> (f64, Vec<f64>) {
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = values.iter().map(|v| (rho * (v - peak)).exp()).collect();
    let sum: f64 = weights.iter().sum();
    let ks = mission_core::linalg::ks_max(values, rho);
    (ks, weights.into_iter().map(|w| w / sum).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ks_gradient_sums_to_one() {
        let (ks, grad) = ks_with_gradient(&[0.2, -0.1, 0.19], KS_RHO);
        assert!(ks >= 0.2);
        assert_relative_eq!(grad.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(grad[0] > grad[2] && grad[2] > grad[1]);
    }

    #[test]
    fn thrust_lapses_with_altitude() {
        let engine = EngineModel::default();
        assert_relative_eq!(engine.max_thrust(1.02, 0.0), 1.02);
        assert!(engine.max_thrust(1.02, 10.0) < 0.5);
    }
}
