//! Fuel consumption along the profile.
//!
//! The burn rate per unit distance is `SFC · CT · qS / (v cos γ)`. Integrating
//! it backwards from the last station, where no fuel remains, gives the fuel
//! weight carried at every station; the value at the first station is the
//! fuel burned over the segment.

use mission_core::linalg::linspace;
use mission_graph::{Partials, PortSpec, System, SystemError, Vars};
use nalgebra::{DMatrix, DVector};

use crate::{column, trapezoid_x_gradient};

/// `SFC [1e-6/s] · T [1e6 N] / (v [1e2 m/s])` to 1e6 N per 1e6 m.
const RATE_SCALE: f64 = 1e-2;

struct BurnRate {
    rate: DVector<f64>,
    d_sfc: DVector<f64>,
    d_ct: DVector<f64>,
    d_rho: DVector<f64>,
    d_v: DVector<f64>,
    d_gamma: DVector<f64>,
    d_s: DVector<f64>,
}

impl BurnRate {
    fn evaluate(inputs: &Vars) -> Result<Self, SystemError> {
        let v = inputs.get("v")?;
        let gamma = inputs.get("gamma")?;
        let ct = inputs.get("CT_tar")?;
        let sfc = inputs.get("SFC")?;
        let rho = inputs.get("rho")?;
        let s = inputs.scalar("S")?;
        let n = v.len();

        let mut out = Self {
            rate: DVector::zeros(n),
            d_sfc: DVector::zeros(n),
            d_ct: DVector::zeros(n),
            d_rho: DVector::zeros(n),
            d_v: DVector::zeros(n),
            d_gamma: DVector::zeros(n),
            d_s: DVector::zeros(n),
        };
        for i in 0..n {
            let cos_gamma = gamma[i].cos();
            if v[i] <= 0.0 || cos_gamma <= 0.0 {
                return Err(SystemError::domain(format!(
                    "aircraft makes no forward progress at station {i}"
                )));
            }
            // qS / (v cos γ) reduces to 0.5 ρ v S / cos γ
            let c = 0.5 * RATE_SCALE / cos_gamma;
            let rate = c * sfc[i] * ct[i] * rho[i] * v[i] * s;
            out.rate[i] = rate;
            out.d_sfc[i] = c * ct[i] * rho[i] * v[i] * s;
            out.d_ct[i] = c * sfc[i] * rho[i] * v[i] * s;
            out.d_rho[i] = c * sfc[i] * ct[i] * v[i] * s;
            out.d_v[i] = c * sfc[i] * ct[i] * rho[i] * s;
            out.d_gamma[i] = rate * gamma[i].tan();
            out.d_s[i] = c * sfc[i] * ct[i] * rho[i] * v[i];
        }
        Ok(out)
    }
}

/// `fuel_w[i] = ∫_{x_i}^{x_n} rate dx` by the trapezoid rule.
fn integrate_backwards(x: &DVector<f64>, rate: &DVector<f64>) -> DVector<f64> {
    let n = x.len();
    let mut fuel = DVector::zeros(n);
    for k in (0..n.saturating_sub(1)).rev() {
        fuel[k] = fuel[k + 1] + 0.5 * (rate[k] + rate[k + 1]) * (x[k + 1] - x[k]);
    }
    fuel
}

/// Jacobians of the backward integral with respect to the rate and the stations.
fn integral_jacobians(x: &DVector<f64>, rate: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = x.len();
    let mut d_rate = DMatrix::zeros(n, n);
    let mut d_x = DMatrix::zeros(n, n);
    for i in 0..n {
        for k in i..n.saturating_sub(1) {
            let dx = x[k + 1] - x[k];
            d_rate[(i, k)] += 0.5 * dx;
            d_rate[(i, k + 1)] += 0.5 * dx;
        }
        if i + 1 < n {
            let tail = trapezoid_x_gradient(&rate.rows(i, n - i).into_owned());
            d_x.view_mut((i, i), (1, n - i)).copy_from(&tail.transpose());
        }
    }
    (d_rate, d_x)
}

/// Fuel weight carried at each station, solved alongside the equilibrium.
#[derive(Debug, Clone)]
pub struct FuelWeight {
    n: usize,
}

impl FuelWeight {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }
}

impl System for FuelWeight {
    fn name(&self) -> &str {
        "fuel_weight"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("x", self.n),
            PortSpec::filled("v", self.n, 2.4),
            PortSpec::new("gamma", self.n),
            PortSpec::filled("CT_tar", self.n, 0.02),
            PortSpec::filled("SFC", self.n, 87.85),
            PortSpec::filled("rho", self.n, 1.225),
            PortSpec::scalar("S", 4.278),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::with_value("fuel_w", DVector::from_vec(linspace(1.0, 0.0, self.n))),
            PortSpec::new("fuel_rate", self.n),
        ]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let burn = BurnRate::evaluate(inputs)?;
        let fuel = integrate_backwards(inputs.get("x")?, &burn.rate);
        outputs.set("fuel_w", fuel);
        outputs.set("fuel_rate", burn.rate);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let burn = BurnRate::evaluate(inputs)?;
        let (d_rate, d_x) = integral_jacobians(inputs.get("x")?, &burn.rate);

        let mut partials = Partials::new();
        partials.insert("fuel_w", "x", d_x);
        for (port, d) in [
            ("v", &burn.d_v),
            ("gamma", &burn.d_gamma),
            ("CT_tar", &burn.d_ct),
            ("SFC", &burn.d_sfc),
            ("rho", &burn.d_rho),
        ] {
            partials.insert("fuel_w", port, &d_rate * DMatrix::from_diagonal(d));
            partials.insert_diagonal("fuel_rate", port, d);
        }
        partials.insert("fuel_w", "S", &d_rate * column(&burn.d_s));
        partials.insert("fuel_rate", "S", column(&burn.d_s));
        Ok(partials)
    }
}

/// Fuel burned over the segment: the fuel carried at the first station.
#[derive(Debug, Clone)]
pub struct FuelBurn {
    n: usize,
}

impl FuelBurn {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }
}

impl System for FuelBurn {
    fn name(&self) -> &str {
        "fuel_burn"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("fuel_w", self.n)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::scalar("fuelburn", 0.0)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let fuel = inputs.get("fuel_w")?;
        let first = fuel
            .iter()
            .next()
            .copied()
            .ok_or_else(|| SystemError::domain("fuel profile is empty"))?;
        outputs.set_scalar("fuelburn", first);
        Ok(())
    }

    fn compute_derivatives(&self, _inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let mut row = DMatrix::zeros(1, self.n);
        if self.n > 0 {
            row[(0, 0)] = 1.0;
        }
        let mut partials = Partials::new();
        partials.insert("fuelburn", "fuel_w", row);
        Ok(partials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mission_core::linalg::trapezoid;
    use mission_graph::{check_partials, initial_vars};

    fn cruise(system: &FuelWeight) -> (Vars, Vars) {
        let (mut inputs, mut outputs) = initial_vars(system);
        inputs.set("x", DVector::from_vec(vec![0.0, 0.4, 2.1, 5.0]));
        inputs.set("v", DVector::from_vec(vec![2.2, 2.45, 2.43, 2.1]));
        inputs.set("gamma", DVector::from_vec(vec![0.02, 0.001, -0.002, -0.03]));
        inputs.set("CT_tar", DVector::from_vec(vec![0.04, 0.028, 0.026, 0.012]));
        inputs.set("SFC", DVector::from_vec(vec![88.0, 88.07, 88.08, 87.9]));
        inputs.set("rho", DVector::from_vec(vec![0.9, 0.4, 0.38, 1.0]));
        system.compute(&inputs, &mut outputs).unwrap();
        (inputs, outputs)
    }

    #[test]
    fn fuel_weight_partials_match_finite_differences() {
        let system = FuelWeight::new(4);
        let (inputs, outputs) = cruise(&system);
        for check in check_partials(&system, &inputs, &outputs).unwrap() {
            assert!(check.max_rel_error < 1e-6, "{check:?}");
        }
    }

    #[test]
    fn fuel_runs_out_at_the_last_station() {
        let system = FuelWeight::new(4);
        let (inputs, outputs) = cruise(&system);
        let fuel = outputs.get("fuel_w").unwrap();
        let rate = outputs.get("fuel_rate").unwrap();
        assert_eq!(fuel[3], 0.0);
        assert!(fuel.as_slice().windows(2).all(|w| w[0] > w[1]));
        let x = inputs.get("x").unwrap();
        assert_relative_eq!(fuel[0], trapezoid(x.as_slice(), rate.as_slice()), epsilon = 1e-12);
    }

    #[test]
    fn fuel_burn_reads_the_first_station() {
        let system = FuelBurn::new(3);
        let (mut inputs, mut outputs) = initial_vars(&system);
        inputs.set("fuel_w", DVector::from_vec(vec![0.7, 0.2, 0.0]));
        system.compute(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs.scalar("fuelburn").unwrap(), 0.7);
    }
}
