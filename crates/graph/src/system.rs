//! The unit of computation: ports, residual declarations and partial derivatives.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::vars::Vars;

/// Relative step used by the finite-difference partials.
pub const FD_STEP: f64 = 1.0e-6;

/// Failures raised by a system while evaluating.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SystemError {
    /// Inputs fall outside the physically valid range of the model.
    #[error("numerical domain error: {0}")]
    Domain(String),
    #[error("port `{0}` is not available")]
    MissingPort(String),
    #[error("port `{port}` expects {expected} entries, found {found}")]
    Length {
        port: String,
        expected: usize,
        found: usize,
    },
}

impl SystemError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }
}

/// Declaration of a port together with its initial value; the value fixes the length.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub name: String,
    pub value: DVector<f64>,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self::filled(name, len, 0.0)
    }

    pub fn filled(name: impl Into<String>, len: usize, value: f64) -> Self {
        Self {
            name: name.into(),
            value: DVector::from_element(len, value),
        }
    }

    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self::filled(name, 1, value)
    }

    pub fn with_value(name: impl Into<String>, value: DVector<f64>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// An implicit unknown: the output port holding the state and the output port
/// holding its residual. Both have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSpec {
    pub state: String,
    pub residual: String,
}

impl StateSpec {
    pub fn new(state: impl Into<String>, residual: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            residual: residual.into(),
        }
    }
}

/// Jacobian blocks `d(of)/d(wrt)` keyed by port names. Missing blocks are zero.
#[derive(Debug, Clone, Default)]
pub struct Partials {
    blocks: BTreeMap<(String, String), DMatrix<f64>>,
}

impl Partials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, of: &str, wrt: &str, block: DMatrix<f64>) {
        self.blocks.insert((of.to_string(), wrt.to_string()), block);
    }

    /// Store a block whose only non-zeros sit on the diagonal.
    pub fn insert_diagonal(&mut self, of: &str, wrt: &str, diagonal: &DVector<f64>) {
        self.insert(of, wrt, DMatrix::from_diagonal(diagonal));
    }

    pub fn get(&self, of: &str, wrt: &str) -> Option<&DMatrix<f64>> {
        self.blocks.get(&(of.to_string(), wrt.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &DMatrix<f64>)> {
        self.blocks
            .iter()
            .map(|((of, wrt), block)| (of.as_str(), wrt.as_str(), block))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A computational unit with declared ports.
///
/// Explicit systems write every output from their inputs. Implicit systems
/// additionally declare [`StateSpec`]s: the state port is an output whose value
/// is owned by the enclosing solver and is already present in `outputs` when
/// [`System::compute`] runs, and the system writes the matching residual port.
pub trait System: Send + Sync {
    fn name(&self) -> &str;

    fn inputs(&self) -> Vec<PortSpec>;

    fn outputs(&self) -> Vec<PortSpec>;

    fn states(&self) -> Vec<StateSpec> {
        Vec::new()
    }

    fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError>;

    /// Partials of every computed output (residuals included) with respect to
    /// inputs and state ports. Defaults to central finite differences.
    fn compute_derivatives(&self, inputs: &Vars, outputs: &Vars) -> Result<Partials, SystemError> {
        finite_difference(self, inputs, outputs, FD_STEP)
    }

    fn is_implicit(&self) -> bool {
        !self.states().is_empty()
    }
}

/// Outputs the system computes, i.e. all outputs except state ports.
pub fn computed_outputs<S: System + ?Sized>(system: &S) -> Vec<PortSpec> {
    let states = system.states();
    system
        .outputs()
        .into_iter()
        .filter(|port| !states.iter().any(|s| s.state == port.name))
        .collect()
}

/// Central finite-difference partials around the given point.
pub fn finite_difference<S: System + ?Sized>(
    system: &S,
    inputs: &Vars,
    outputs: &Vars,
    step: f64,
) -> Result<Partials, SystemError> {
    let rows = computed_outputs(system);
    let mut partials = Partials::new();

    let mut columns: Vec<(String, bool)> = system
        .inputs()
        .into_iter()
        .map(|port| (port.name, true))
        .collect();
    columns.extend(system.states().into_iter().map(|s| (s.state, false)));

    for (column, is_input) in columns {
        let base = if is_input {
            inputs.get(&column)?.clone()
        } else {
            outputs.get(&column)?.clone()
        };
        let mut blocks: Vec<DMatrix<f64>> = rows
            .iter()
            .map(|row| DMatrix::zeros(row.len(), base.len()))
            .collect();

        for j in 0..base.len() {
            let h = step * base[j].abs().max(1.0);
            let mut plus = base.clone();
            plus[j] += h;
            let mut minus = base.clone();
            minus[j] -= h;
            let forward = perturbed(system, inputs, outputs, &column, is_input, plus)?;
            let backward = perturbed(system, inputs, outputs, &column, is_input, minus)?;
            for (block, row) in blocks.iter_mut().zip(&rows) {
                let diff = (forward.get(&row.name)? - backward.get(&row.name)?) / (2.0 * h);
                block.set_column(j, &diff);
            }
        }

        for (block, row) in blocks.into_iter().zip(&rows) {
            if block.iter().any(|v| *v != 0.0) {
                partials.insert(&row.name, &column, block);
            }
        }
    }
    Ok(partials)
}

fn perturbed<S: System + ?Sized>(
    system: &S,
    inputs: &Vars,
    outputs: &Vars,
    column: &str,
    is_input: bool,
    value: DVector<f64>,
) -> Result<Vars, SystemError> {
    let mut inputs = inputs.clone();
    let mut outputs = outputs.clone();
    if is_input {
        inputs.set(column, value);
    } else {
        outputs.set(column, value);
    }
    system.compute(&inputs, &mut outputs)?;
    Ok(outputs)
}

/// Comparison of one analytic block against finite differences.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCheck {
    pub of: String,
    pub wrt: String,
    pub max_abs_error: f64,
    pub max_rel_error: f64,
}

/// Compare `compute_derivatives` against central finite differences at the given point.
pub fn check_partials<S: System + ?Sized>(
    system: &S,
    inputs: &Vars,
    outputs: &Vars,
) -> Result<Vec<PartialCheck>, SystemError> {
    let analytic = system.compute_derivatives(inputs, outputs)?;
    let numeric = finite_difference(system, inputs, outputs, FD_STEP)?;

    let mut keys: Vec<(String, String)> = analytic
        .iter()
        .chain(numeric.iter())
        .map(|(of, wrt, _)| (of.to_string(), wrt.to_string()))
        .collect();
    keys.sort();
    keys.dedup();

    let mut checks = Vec::with_capacity(keys.len());
    for (of, wrt) in keys {
        let (a, n) = match (analytic.get(&of, &wrt), numeric.get(&of, &wrt)) {
            (Some(a), Some(n)) => (a.clone(), n.clone()),
            (Some(a), None) => (a.clone(), DMatrix::zeros(a.nrows(), a.ncols())),
            (None, Some(n)) => (DMatrix::zeros(n.nrows(), n.ncols()), n.clone()),
            (None, None) => continue,
        };
        let diff = &a - &n;
        let max_abs_error = diff.amax();
        let scale = n.amax().max(a.amax());
        let max_rel_error = if scale > 0.0 { max_abs_error / scale } else { 0.0 };
        checks.push(PartialCheck {
            of,
            wrt,
            max_abs_error,
            max_rel_error,
        });
    }
    Ok(checks)
}

/// Current values of the system's declared ports, useful to evaluate a system in isolation.
pub fn initial_vars<S: System + ?Sized>(system: &S) -> (Vars, Vars) {
    let inputs = system
        .inputs()
        .into_iter()
        .map(|port| (port.name, port.value))
        .collect();
    let outputs = system
        .outputs()
        .into_iter()
        .map(|port| (port.name, port.value))
        .collect();
    (inputs, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Square;

    impl System for Square {
        fn name(&self) -> &str {
            "square"
        }
        fn inputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::filled("x", 3, 2.0)]
        }
        fn outputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::new("y", 3)]
        }
        fn compute(&self, inputs: &Vars, outputs: &mut Vars) -> Result<(), SystemError> {
            let x = inputs.get("x")?;
            outputs.set("y", x.component_mul(x));
            Ok(())
        }
    }

    #[test]
    fn finite_difference_matches_analytic_square() {
        let (inputs, mut outputs) = initial_vars(&Square);
        Square.compute(&inputs, &mut outputs).unwrap();
        let partials = Square.compute_derivatives(&inputs, &outputs).unwrap();
        let block = partials.get("y", "x").unwrap();
        for i in 0..3 {
            assert_relative_eq!(block[(i, i)], 4.0, epsilon = 1e-6);
        }
        assert_relative_eq!(block[(0, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn check_partials_reports_small_error_for_default_derivatives() {
        let (inputs, mut outputs) = initial_vars(&Square);
        Square.compute(&inputs, &mut outputs).unwrap();
        let checks = check_partials(&Square, &inputs, &outputs).unwrap();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].max_rel_error < 1e-12);
    }
}
