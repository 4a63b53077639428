use nalgebra::DVector;

use crate::system::{Partials, PortSpec, System, SystemError};
use crate::vars::Vars;

/// Source of boundary values: outputs set by the caller, never recomputed.
#[derive(Debug, Clone)]
pub struct IndependentVars {
    name: String,
    ports: Vec<PortSpec>,
}

impl IndependentVars {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: DVector<f64>) -> Self {
        self.ports.push(PortSpec::with_value(name, value));
        self
    }

    pub fn with_scalar(self, name: impl Into<String>, value: f64) -> Self {
        self.with(name, DVector::from_element(1, value))
    }
}

impl System for IndependentVars {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn compute(&self, _inputs: &Vars, _outputs: &mut Vars) -> Result<(), SystemError> {
        Ok(())
    }

    fn compute_derivatives(&self, _inputs: &Vars, _outputs: &Vars) -> Result<Partials, SystemError> {
        Ok(Partials::new())
    }
}
