use mission_graph::{Partials, PortSpec, System, SystemError, Vars};
use nalgebra::{DMatrix, DVector};

use crate::{EngineModel, KS_RHO, TAU_MAX, TAU_MIN, ks_with_gradient};

fn column(values: DVector<f64>) -> DMatrix<f64> {
    let n = values.len();
    DMatrix::from_column_slice(n, 1, values.as_slice())
}

/// Specific fuel consumption along the profile.
#[derive(Debug, Clone)]
pub struct Sfc {
    n: usize,
    engine: EngineModel,
}

impl Sfc {
    pub fn new(num_stations: usize, engine: EngineModel) -> Self {
        Self {
            n: num_stations,
            engine,
        }
    }
}

impl System for Sfc {
    fn name(&self) -> &str {
        "sfc"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("h", self.n), PortSpec::scalar("SFCSL", 87.85)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("SFC", self.n, 87.85)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let sfc_sl = inputs.scalar("SFCSL")?;
        let h = inputs.get("h")?;
        outputs.set("SFC", h.map(|h| self.engine.sfc(sfc_sl, h)));
        Ok(())
    }

    fn compute_derivatives(&self, _inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let mut partials = Partials::new();
        partials.insert_diagonal(
            "SFC",
            "h",
            &DVector::from_element(self.n, self.engine.sfc_per_km),
        );
        partials.insert("SFC", "SFCSL", DMatrix::from_element(self.n, 1, 1.0));
        Ok(partials)
    }
}

/// Throttle setting: required thrust over the maximum available at altitude.
#[derive(Debug, Clone)]
pub struct Tau {
    n: usize,
    engine: EngineModel,
}

impl Tau {
    pub fn new(num_stations: usize, engine: EngineModel) -> Self {
        Self {
            n: num_stations,
            engine,
        }
    }

    fn available(&self, thrust_sl: f64, h: &DVector<f64>) -> Result<DVector<f64>, SystemError> {
        let available = h.map(|h| self.engine.max_thrust(thrust_sl, h));
        if let Some(i) = available.iter().position(|t| *t <= 0.0) {
            return Err(SystemError::domain(format!(
                "no thrust available at station {i} (h = {:.3} km)",
                h[i]
            )));
        }
        Ok(available)
    }
}

impl System for Tau {
    fn name(&self) -> &str {
        "tau"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("CT_tar", self.n),
            PortSpec::filled("rho", self.n, 1.225),
            PortSpec::filled("v", self.n, 1.0),
            PortSpec::new("h", self.n),
            PortSpec::scalar("S", 4.278),
            PortSpec::scalar("thrust_sl", 1.02),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("tau", self.n)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let ct = inputs.get("CT_tar")?;
        let rho = inputs.get("rho")?;
        let v = inputs.get("v")?;
        let s = inputs.scalar("S")?;
        let available = self.available(inputs.scalar("thrust_sl")?, inputs.get("h")?)?;
        let mut tau = DVector::zeros(self.n);
        for i in 0..self.n {
            let thrust = ct[i] * 0.5 * rho[i] * v[i] * v[i] * s;
            tau[i] = thrust / available[i];
        }
        outputs.set("tau", tau);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let ct = inputs.get("CT_tar")?;
        let rho = inputs.get("rho")?;
        let v = inputs.get("v")?;
        let s = inputs.scalar("S")?;
        let available = self.available(inputs.scalar("thrust_sl")?, inputs.get("h")?)?;

        let n = self.n;
        let mut d_ct = DVector::zeros(n);
        let mut d_rho = DVector::zeros(n);
        let mut d_v = DVector::zeros(n);
        let mut d_h = DVector::zeros(n);
        let mut d_s = DVector::zeros(n);
        let mut d_thrust = DVector::zeros(n);
        for i in 0..n {
            let qs = 0.5 * rho[i] * v[i] * v[i] * s;
            let tau = ct[i] * qs / available[i];
            d_ct[i] = qs / available[i];
            d_rho[i] = tau / rho[i];
            d_v[i] = 2.0 * tau / v[i];
            d_s[i] = tau / s;
            d_h[i] = tau * self.engine.thrust_lapse_per_km / available[i];
            d_thrust[i] = -tau / available[i];
        }
        let mut partials = Partials::new();
        partials.insert_diagonal("tau", "CT_tar", &d_ct);
        partials.insert_diagonal("tau", "rho", &d_rho);
        partials.insert_diagonal("tau", "v", &d_v);
        partials.insert_diagonal("tau", "h", &d_h);
        partials.insert("tau", "S", column(d_s));
        partials.insert("tau", "thrust_sl", column(d_thrust));
        Ok(partials)
    }
}

/// Which throttle limit a margin aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrustBound {
    /// `KS(TAU_MIN - τ)`, output `Tmin`.
    Min,
    /// `KS(τ - TAU_MAX)`, output `Tmax`.
    Max,
}

/// KS-aggregated throttle margin; non-positive when the limit holds everywhere.
#[derive(Debug, Clone)]
pub struct ThrustMargin {
    n: usize,
    bound: ThrustBound,
}

impl ThrustMargin {
    pub fn new(num_stations: usize, bound: ThrustBound) -> Self {
        Self {
            n: num_stations,
            bound,
        }
    }

    fn port(&self) -> &'static str {
        match self.bound {
            ThrustBound::Min => "Tmin",
            ThrustBound::Max => "Tmax",
        }
    }

    fn violations(&self, tau: &DVector<f64>) -> (Vec<f64>, f64) {
        match self.bound {
            ThrustBound::Min => (tau.iter().map(|t| TAU_MIN - t).collect(), -1.0),
            ThrustBound::Max => (tau.iter().map(|t| t - TAU_MAX).collect(), 1.0),
        }
    }
}

impl System for ThrustMargin {
    fn name(&self) -> &str {
        match self.bound {
            ThrustBound::Min => "tmin",
            ThrustBound::Max => "tmax",
        }
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("tau", self.n)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::scalar(self.port(), 0.0)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let (values, _) = self.violations(inputs.get("tau")?);
        let (ks, _) = ks_with_gradient(&values, KS_RHO);
        outputs.set_scalar(self.port(), ks);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let (values, sign) = self.violations(inputs.get("tau")?);
        let (_, gradient) = ks_with_gradient(&values, KS_RHO);
        let row = DMatrix::from_iterator(1, self.n, gradient.into_iter().map(|g| g * sign));
        let mut partials = Partials::new();
        partials.insert(self.port(), "tau", row);
        Ok(partials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_graph::{check_partials, initial_vars};

    #[test]
    fn tau_and_margin_partials_match_finite_differences() {
        let n = 3;
        let tau = Tau::new(n, EngineModel::default());
        let (mut inputs, mut outputs) = initial_vars(&tau);
        inputs.set("CT_tar", DVector::from_vec(vec![0.03, 0.035, 0.04]));
        inputs.set("rho", DVector::from_vec(vec![1.2, 0.6, 0.4]));
        inputs.set("v", DVector::from_vec(vec![2.4, 2.5, 2.45]));
        inputs.set("h", DVector::from_vec(vec![0.1, 6.0, 10.0]));
        tau.compute(&inputs, &mut outputs).unwrap();
        for check in check_partials(&tau, &inputs, &outputs).unwrap() {
            assert!(check.max_rel_error < 1e-6, "{check:?}");
        }

        let values = outputs.get("tau").unwrap().clone();
        for bound in [ThrustBound::Min, ThrustBound::Max] {
            let margin = ThrustMargin::new(n, bound);
            let (mut inputs, mut outputs) = initial_vars(&margin);
            inputs.set("tau", values.clone());
            margin.compute(&inputs, &mut outputs).unwrap();
            for check in check_partials(&margin, &inputs, &outputs).unwrap() {
                assert!(check.max_rel_error < 1e-6, "{check:?}");
            }
        }
    }

    #[test]
    fn tau_rejects_altitudes_without_thrust() {
        let tau = Tau::new(1, EngineModel::default());
        let (mut inputs, mut outputs) = initial_vars(&tau);
        inputs.set("h", DVector::from_element(1, 15.0));
        assert!(matches!(
            tau.compute(&inputs, &mut outputs),
            Err(SystemError::Domain(_))
        ));
    }
}
