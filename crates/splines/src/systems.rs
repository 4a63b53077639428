//! Spline evaluation systems: `output = operator · control points`.

use std::sync::Arc;

use mission_graph::{Partials, PortSpec, System, SystemError, Vars};
use nalgebra::DMatrix;

use crate::operator::SplineOperators;

/// Maps one control-point port to one station port through a fixed operator.
/// An angle output is `atan` of the operator result.
#[derive(Debug, Clone)]
pub struct SplineEval {
    name: String,
    input: String,
    output: String,
    operator: Arc<DMatrix<f64>>,
    angle: bool,
}

impl SplineEval {
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        operator: Arc<DMatrix<f64>>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            output: output.into(),
            operator,
            angle: false,
        }
    }

    /// Station positions from control-point abscissas.
    pub fn position(ops: &SplineOperators) -> Self {
        Self::new("x_spline", "x_pt", "x", Arc::clone(ops.value()))
    }

    /// Altitude profile from altitude control points.
    pub fn altitude(ops: &SplineOperators) -> Self {
        Self::new("h_spline", "h_pt", "h", Arc::clone(ops.value()))
    }

    /// Flight-path angle (rad) from the slope of the altitude spline.
    pub fn flight_path_angle(ops: &SplineOperators) -> Self {
        Self {
            angle: true,
            ..Self::new("gamma_spline", "h_pt", "gamma", Arc::clone(ops.slope()))
        }
    }
}

impl System for SplineEval {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new(self.input.as_str(), self.operator.ncols())]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new(self.output.as_str(), self.operator.nrows())]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let linear = self.operator.as_ref() * inputs.get(&self.input)?;
        let value = if self.angle { linear.map(f64::atan) } else { linear };
        outputs.set(self.output.as_str(), value);
        Ok(())
    }

    fn compute_derivatives(&self, inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let mut jacobian = self.operator.as_ref().clone();
        if self.angle {
            let slope = self.operator.as_ref() * inputs.get(&self.input)?;
            for (mut row, s) in jacobian.row_iter_mut().zip(slope.iter()) {
                row /= 1.0 + s * s;
            }
        }
        let mut partials = Partials::new();
        partials.insert(&self.output, &self.input, jacobian);
        Ok(partials)
    }
}

/// Mach and true-airspeed profiles from their control points.
#[derive(Debug, Clone)]
pub struct MachSpline {
    operator: Arc<DMatrix<f64>>,
}

impl MachSpline {
    pub fn new(ops: &SplineOperators) -> Self {
        Self {
            operator: Arc::clone(ops.value()),
        }
    }
}

impl System for MachSpline {
    fn name(&self) -> &str {
        "mach_spline"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        let n = self.operator.ncols();
        vec![PortSpec::new("M_pt", n), PortSpec::new("v_pt", n)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        let n = self.operator.nrows();
        vec![PortSpec::new("M", n), PortSpec::new("v_spline", n)]
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
        let op = self.operator.as_ref();
        outputs.set("M", op * inputs.get("M_pt")?);
        outputs.set("v_spline", op * inputs.get("v_pt")?);
        Ok(())
    }

    fn compute_derivatives(&self, _inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        let mut partials = Partials::new();
        partials.insert("M", "M_pt", self.operator.as_ref().clone());
        partials.insert("v_spline", "v_pt", self.operator.as_ref().clone());
        Ok(partials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_graph::{check_partials, initial_vars};
    use nalgebra::DVector;

    #[test]
    fn flight_path_angle_is_the_arctangent_of_the_slope() {
        let ops = SplineOperators::new(8, &[0.0, 1.0, 2.5, 4.0]).unwrap();
        let system = SplineEval::flight_path_angle(&ops);
        let (mut inputs, mut outputs) = initial_vars(&system);
        // Steep enough that `atan(s)` and `s` differ visibly.
        let h_pt = DVector::from_vec(vec![0.0, 900.0, 1500.0, 0.0]);
        inputs.set("h_pt", h_pt.clone());
        system.compute(&inputs, &mut outputs).unwrap();

        let slope = ops.slope().as_ref() * &h_pt;
        let gamma = outputs.get("gamma").unwrap();
        assert!(slope.amax() > 0.5);
        for (g, s) in gamma.iter().zip(slope.iter()) {
            assert!((g - s.atan()).abs() < 1e-14);
            assert!(g.abs() < std::f64::consts::FRAC_PI_2);
        }
        for check in check_partials(&system, &inputs, &outputs).unwrap() {
            assert!(check.max_rel_error < 1e-6 || check.max_abs_error < 1e-9, "{check:?}");
        }
    }

    #[test]
    fn altitude_spline_stays_linear() {
        let ops = SplineOperators::new(4, &[0.0, 1.0, 2.0]).unwrap();
        let system = SplineEval::altitude(&ops);
        let (mut inputs, mut outputs) = initial_vars(&system);
        inputs.set("h_pt", DVector::from_vec(vec![0.0, 10.0, 0.0]));
        system.compute(&inputs, &mut outputs).unwrap();
        let expected = ops.value().as_ref() * inputs.get("h_pt").unwrap();
        assert_eq!(outputs.get("h").unwrap(), &expected);
    }
}
