//! Lift, pitching-moment and drag systems backed by a shared surrogate table.
//!
//! Lift and moment are implicit: the lift system owns the angle of attack
//! (deg) and drives `CL(α) - CL_tar` to zero; the moment system owns the trim
//! incidence η (deg) and drives `CM` to zero.

use std::f64::consts::PI;
use std::sync::Arc;

use mission_graph::{Partials, PortSpec, StateSpec, System, SystemError, Vars};
use nalgebra::{DMatrix, DVector};

use crate::table::{Coefficient, Sample, SurrogateTable};

/// Initial angle of attack guess (deg).
pub const ALPHA_INIT_DEG: f64 = 2.0;

struct Profile<'a> {
    mach: &'a DVector<f64>,
    h: &'a DVector<f64>,
    alpha: &'a DVector<f64>,
    eta: &'a DVector<f64>,
}

impl Profile<'_> {
    fn samples(
        &self,
        table: &SurrogateTable,
        coefficient: Coefficient,
    ) -> Result<Vec<Sample>, SystemError> {
        (0..self.mach.len())
            .map(|i| {
                table
                    .sample(coefficient, self.mach[i], self.h[i], self.alpha[i], self.eta[i])
                    .map_err(SystemError::from)
            })
            .collect()
    }
}

fn gradient(samples: &[Sample], axis: usize) -> DVector<f64> {
    DVector::from_iterator(samples.len(), samples.iter().map(|s| s.gradient[axis]))
}

fn values(samples: &[Sample]) -> DVector<f64> {
    DVector::from_iterator(samples.len(), samples.iter().map(|s| s.value))
}

/// Angle of attack from lift equilibrium.
#[derive(Debug, Clone)]
pub struct Lift {
    n: usize,
    table: Arc<SurrogateTable>,
}

impl Lift {
    pub fn new(num_stations: usize, table: Arc<SurrogateTable>) -> Self {
        Self {
            n: num_stations,
            table,
        }
    }
}

impl System for Lift {
    fn name(&self) -> &str {
        "lift"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::filled("M", self.n, 0.8),
            PortSpec::new("h", self.n),
            PortSpec::new("eta", self.n),
            PortSpec::new("CL_tar", self.n),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::filled("alpha", self.n, ALPHA_INIT_DEG),
            PortSpec::new("alpha_res", self.n),
        ]
    }

    fn states(&self) -> Vec<StateSpec> {
        vec![StateSpec::new("alpha", "alpha_res")]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let profile = Profile {
            mach: inputs.get("M")?,
            h: inputs.get("h")?,
            alpha: outputs.get("alpha")?,
            eta: inputs.get("eta")?,
        };
        let cl = values(&profile.samples(&self.table, Coefficient::Lift)?);
        let residual = cl - inputs.get("CL_tar")?;
        outputs.set("alpha_res", residual);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, outputs: &Vars) -> Result<Partials, SystemError> {
        let profile = Profile {
            mach: inputs.get("M")?,
            h: inputs.get("h")?,
            alpha: outputs.get("alpha")?,
            eta: inputs.get("eta")?,
        };
        let samples = profile.samples(&self.table, Coefficient::Lift)?;
        let mut partials = Partials::new();
        partials.insert_diagonal("alpha_res", "M", &gradient(&samples, 0));
        partials.insert_diagonal("alpha_res", "h", &gradient(&samples, 1));
        partials.insert_diagonal("alpha_res", "alpha", &gradient(&samples, 2));
        partials.insert_diagonal("alpha_res", "eta", &gradient(&samples, 3));
        partials.insert_diagonal("alpha_res", "CL_tar", &DVector::from_element(self.n, -1.0));
        Ok(partials)
    }
}

/// Trim incidence from pitching-moment equilibrium.
#[derive(Debug, Clone)]
pub struct Moment {
    n: usize,
    table: Arc<SurrogateTable>,
}

impl Moment {
    pub fn new(num_stations: usize, table: Arc<SurrogateTable>) -> Self {
        Self {
            n: num_stations,
            table,
        }
    }
}

impl System for Moment {
    fn name(&self) -> &str {
        "moment"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::filled("M", self.n, 0.8),
            PortSpec::new("h", self.n),
            PortSpec::filled("alpha", self.n, ALPHA_INIT_DEG),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("eta", self.n), PortSpec::new("CM", self.n)]
    }

    fn states(&self) -> Vec<StateSpec> {
        vec![StateSpec::new("eta", "CM")]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let profile = Profile {
            mach: inputs.get("M")?,
            h: inputs.get("h")?,
            alpha: inputs.get("alpha")?,
            eta: outputs.get("eta")?,
        };
        let cm = values(&profile.samples(&self.table, Coefficient::Moment)?);
        outputs.set("CM", cm);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, outputs: &Vars) -> Result<Partials, SystemError> {
        let profile = Profile {
            mach: inputs.get("M")?,
            h: inputs.get("h")?,
            alpha: inputs.get("alpha")?,
            eta: outputs.get("eta")?,
        };
        let samples = profile.samples(&self.table, Coefficient::Moment)?;
        let mut partials = Partials::new();
        partials.insert_diagonal("CM", "M", &gradient(&samples, 0));
        partials.insert_diagonal("CM", "h", &gradient(&samples, 1));
        partials.insert_diagonal("CM", "alpha", &gradient(&samples, 2));
        partials.insert_diagonal("CM", "eta", &gradient(&samples, 3));
        Ok(partials)
    }
}

/// Total drag: tabulated parasite, wave and trim drag plus induced drag `CL²/(π·AR·e)`.
#[derive(Debug, Clone)]
pub struct Drag {
    n: usize,
    table: Arc<SurrogateTable>,
}

impl Drag {
    pub fn new(num_stations: usize, table: Arc<SurrogateTable>) -> Self {
        Self {
            n: num_stations,
            table,
        }
    }
}

impl System for Drag {
    fn name(&self) -> &str {
        "drag"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::filled("M", self.n, 0.8),
            PortSpec::new("h", self.n),
            PortSpec::filled("alpha", self.n, ALPHA_INIT_DEG),
            PortSpec::new("eta", self.n),
            PortSpec::scalar("AR", 8.68),
            PortSpec::scalar("e", 0.8),
        ]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::filled("CD", self.n, 0.02)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let profile = Profile {
            mach: inputs.get("M")?,
            h: inputs.get("h")?,
            alpha: inputs.get("alpha")?,
            eta: inputs.get("eta")?,
        };
        let k = induced_factor(inputs)?;
        let cl = values(&profile.samples(&self.table, Coefficient::Lift)?);
        let cd = values(&profile.samples(&self.table, Coefficient::Drag)?);
        outputs.set("CD", cd + cl.map(|c| c * c) * k);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let profile = Profile {
            mach: inputs.get("M")?,
            h: inputs.get("h")?,
            alpha: inputs.get("alpha")?,
            eta: inputs.get("eta")?,
        };
        let aspect = inputs.scalar("AR")?;
        let oswald = inputs.scalar("e")?;
        let k = induced_factor(inputs)?;
        let lift = profile.samples(&self.table, Coefficient::Lift)?;
        let drag = profile.samples(&self.table, Coefficient::Drag)?;
        let cl = values(&lift);

        let mut partials = Partials::new();
        for (axis, port) in ["M", "h", "alpha", "eta"].into_iter().enumerate() {
            let d = gradient(&drag, axis) + cl.component_mul(&gradient(&lift, axis)) * (2.0 * k);
            partials.insert_diagonal("CD", port, &d);
        }
        let cl2 = cl.map(|c| c * c);
        let d_aspect = &cl2 * (-k / aspect);
        let d_oswald = &cl2 * (-k / oswald);
        partials.insert("CD", "AR", DMatrix::from_column_slice(self.n, 1, d_aspect.as_slice()));
        partials.insert("CD", "e", DMatrix::from_column_slice(self.n, 1, d_oswald.as_slice()));
        Ok(partials)
    }
}

fn induced_factor(inputs: &Vars) -> Result<f64, SystemError> {
    let aspect = inputs.scalar("AR")?;
    let oswald = inputs.scalar("e")?;
    if aspect <= 0.0 || oswald <= 0.0 {
        return Err(SystemError::domain(format!(
            "induced drag needs positive AR and e (AR = {aspect}, e = {oswald})"
        )));
    }
    Ok(1.0 / (PI * aspect * oswald))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_graph::{check_partials, initial_vars};

    #[test]
    fn drag_partials_match_finite_differences() {
        let table = Arc::new(SurrogateTable::standard().unwrap());
        let drag = Drag::new(3, table);
        let (mut inputs, mut outputs) = initial_vars(&drag);
        inputs.set("M", DVector::from_vec(vec![0.53, 0.82, 0.91]));
        inputs.set("h", DVector::from_vec(vec![0.3, 10.2, 12.7]));
        inputs.set("alpha", DVector::from_vec(vec![1.1, 3.3, -0.6]));
        inputs.set("eta", DVector::from_vec(vec![-0.4, 1.3, 0.7]));
        drag.compute(&inputs, &mut outputs).unwrap();
        for check in check_partials(&drag, &inputs, &outputs).unwrap() {
            assert!(check.max_rel_error < 1e-5, "{check:?}");
        }
    }
}
