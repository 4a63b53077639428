use mission_core::constants::SECONDS_PER_HOUR;
use mission_graph::{Partials, PortSpec, System, SystemError, Vars};
use nalgebra::{DMatrix, DVector};

use crate::{trapezoid_weights, trapezoid_x_gradient};

/// `x [1e6 m] / v [1e2 m/s]` in hours.
const HOURS_SCALE: f64 = 1e4 / SECONDS_PER_HOUR;

/// Block time in hours: `∫ dx / (v cos γ)`.
#[derive(Debug, Clone)]
pub struct BlockTime {
    n: usize,
}

impl BlockTime {
    pub fn new(num_stations: usize) -> Self {
        Self { n: num_stations }
    }

    fn pace(inputs: &Vars) -> Result<DVector<f64>, SystemError> {
        let v = inputs.get("v")?;
        let gamma = inputs.get("gamma")?;
        let ground_speed = v.zip_map(gamma, |v, g| v * g.cos());
        if let Some(i) = ground_speed.iter().position(|s| *s <= 0.0) {
            return Err(SystemError::domain(format!(
                "non-positive ground speed at station {i}"
            )));
        }
        Ok(ground_speed.map(|s| 1.0 / s))
    }
}

impl System for BlockTime {
    fn name(&self) -> &str {
        "block_time"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("x", self.n),
            PortSpec::filled("v", self.n, 2.4),
            PortSpec::new("gamma", self.n),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::scalar("time", 0.0)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let pace = Self::pace(inputs)?;
        let weights = trapezoid_weights(inputs.get("x")?);
        outputs.set_scalar("time", weights.dot(&pace) * HOURS_SCALE);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let pace = Self::pace(inputs)?;
        let gamma = inputs.get("gamma")?;
        let v = inputs.get("v")?;
        let weights = trapezoid_weights(inputs.get("x")?) * HOURS_SCALE;

        let d_v = DVector::from_fn(self.n, |i, _| -weights[i] * pace[i] / v[i]);
        let d_gamma = DVector::from_fn(self.n, |i, _| weights[i] * pace[i] * gamma[i].tan());
        let d_x = trapezoid_x_gradient(&pace) * HOURS_SCALE;

        let row = |d: DVector<f64>| DMatrix::from_row_slice(1, d.len(), d.as_slice());
        let mut partials = Partials::new();
        partials.insert("time", "x", row(d_x));
        partials.insert("time", "v", row(d_v));
        partials.insert("time", "gamma", row(d_gamma));
        Ok(partials)
    }
}
