//! Target lift and thrust coefficients from vertical and horizontal force balance.
//!
//! Angle of attack arrives in degrees; flight-path angle in radians.

use mission_graph::{Partials, PortSpec, System, SystemError, Vars};
use nalgebra::DVector;

use crate::{AC_W_SCALE, Loads, PAX_SCALE, column};

fn weight_ports(n: usize) -> Vec<PortSpec> {
    vec![
        PortSpec::scalar("S", 4.278),
        PortSpec::scalar("ac_w", 2060.1),
        PortSpec::scalar("pax_flt", 0.0),
        PortSpec::new("fuel_w", n),
        PortSpec::filled("rho", n, 1.225),
        PortSpec::filled("v", n, 2.4),
        PortSpec::new("gamma", n),
        PortSpec::new("alpha", n),
    ]
}

/// Largest angle of attack (deg) the thrust balance accepts; `1/cos α` blows up past it.
pub const ALPHA_LIMIT_DEG: f64 = 60.0;

/// `cos α` per station, or a domain error when any station is past [`ALPHA_LIMIT_DEG`].
fn alpha_cosines(alpha: &DVector<f64>) -> Result<DVector<f64>, SystemError> {
    if let Some(&a) = alpha.iter().find(|a| !(a.abs() < ALPHA_LIMIT_DEG)) {
        return Err(SystemError::domain(format!(
            "angle of attack {a} deg is outside ±{ALPHA_LIMIT_DEG} deg"
        )));
    }
    Ok(alpha.map(|a| a.to_radians().cos()))
}

/// Weight partials shared by both balances: `∂f/∂W` scattered to the weight inputs,
/// plus the `qS` chain of the `W/qS` term.
fn insert_load_partials(
    partials: &mut Partials,
    of: &str,
    inputs: &Vars,
    d_weight: &DVector<f64>,
    load_term: &DVector<f64>,
) -> Result<(), SystemError> {
    let s = inputs.scalar("S")?;
    let rho = inputs.get("rho")?;
    let v = inputs.get("v")?;
    partials.insert_diagonal(of, "fuel_w", d_weight);
    partials.insert(of, "ac_w", column(&(d_weight * AC_W_SCALE)));
    partials.insert(of, "pax_flt", column(&(d_weight * PAX_SCALE)));
    partials.insert_diagonal(of, "rho", &(load_term.component_div(rho) * -1.0));
    partials.insert_diagonal(of, "v", &(load_term.component_div(v) * -2.0));
    partials.insert(of, "S", column(&(load_term * (-1.0 / s))));
    Ok(())
}

/// Lift coefficient that balances weight: `CL = W cos γ / qS - CT sin α`.
#[derive(Debug, Clone)]
pub struct CLTarget {
    n: usize,
}

impl CLTarget {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }
}

impl System for CLTarget {
    fn name(&self) -> &str {
        "cl_target"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        let mut ports = weight_ports(self.n);
        ports.push(PortSpec::new("CT_tar", self.n));
        ports
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("CL", self.n, 0.5)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let loads = Loads::from_inputs(inputs)?;
        let gamma = inputs.get("gamma")?;
        let alpha = inputs.get("alpha")?;
        let ct = inputs.get("CT_tar")?;
        let cl = DVector::from_fn(self.n, |i, _| {
            loads.weight[i] * gamma[i].cos() / loads.qs[i] - ct[i] * alpha[i].to_radians().sin()
        });
        outputs.set("CL", cl);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let loads = Loads::from_inputs(inputs)?;
        let gamma = inputs.get("gamma")?;
        let alpha = inputs.get("alpha")?;
        let ct = inputs.get("CT_tar")?;
        let n = self.n;

        let d_weight = DVector::from_fn(n, |i, _| gamma[i].cos() / loads.qs[i]);
        let lift_term = loads.weight.component_mul(&d_weight);
        let d_gamma = DVector::from_fn(n, |i, _| -loads.weight[i] * gamma[i].sin() / loads.qs[i]);
        let d_alpha = DVector::from_fn(n, |i, _| {
            -ct[i] * alpha[i].to_radians().cos() * 1f64.to_radians()
        });
        let d_ct = alpha.map(|a| -a.to_radians().sin());

        let mut partials = Partials::new();
        insert_load_partials(&mut partials, "CL", inputs, &d_weight, &lift_term)?;
        partials.insert_diagonal("CL", "gamma", &d_gamma);
        partials.insert_diagonal("CL", "alpha", &d_alpha);
        partials.insert_diagonal("CL", "CT_tar", &d_ct);
        Ok(partials)
    }
}

/// Thrust coefficient that balances drag and the weight component along the path:
/// `CT = (CD + W sin γ / qS) / cos α`.
#[derive(Debug, Clone)]
pub struct CTTarget {
    n: usize,
}

impl CTTarget {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }
}

impl System for CTTarget {
    fn name(&self) -> &str {
        "ct_target"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        let mut ports = weight_ports(self.n);
        ports.push(PortSpec::filled("CD", self.n, 0.02));
        ports
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("CT_tar", self.n, 0.02)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let loads = Loads::from_inputs(inputs)?;
        let gamma = inputs.get("gamma")?;
        let alpha = inputs.get("alpha")?;
        let cd = inputs.get("CD")?;
        let cos_alpha = alpha_cosines(alpha)?;
        let ct = DVector::from_fn(self.n, |i, _| {
            (cd[i] + loads.weight[i] * gamma[i].sin() / loads.qs[i]) / cos_alpha[i]
        });
        outputs.set("CT_tar", ct);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let loads = Loads::from_inputs(inputs)?;
        let gamma = inputs.get("gamma")?;
        let alpha = inputs.get("alpha")?;
        let cd = inputs.get("CD")?;
        let n = self.n;
        let cos_alpha = alpha_cosines(alpha)?;

        let d_weight = DVector::from_fn(n, |i, _| gamma[i].sin() / (loads.qs[i] * cos_alpha[i]));
        let climb_term = loads.weight.component_mul(&d_weight);
        let d_gamma = DVector::from_fn(n, |i, _| {
            loads.weight[i] * gamma[i].cos() / (loads.qs[i] * cos_alpha[i])
        });
        let d_alpha = DVector::from_fn(n, |i, _| {
            let numerator = cd[i] + loads.weight[i] * gamma[i].sin() / loads.qs[i];
            let a = alpha[i].to_radians();
            numerator * a.sin() / (cos_alpha[i] * cos_alpha[i]) * 1f64.to_radians()
        });

        let mut partials = Partials::new();
        insert_load_partials(&mut partials, "CT_tar", inputs, &d_weight, &climb_term)?;
        partials.insert_diagonal("CT_tar", "gamma", &d_gamma);
        partials.insert_diagonal("CT_tar", "alpha", &d_alpha);
        partials.insert_diagonal("CT_tar", "CD", &cos_alpha.map(|c| 1.0 / c));
        Ok(partials)
    }
}
