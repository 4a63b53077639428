//! Ordered execution of systems and coupled groups.

use crate::coupled::{ConvergenceWarning, CoupledGroup, NewtonReport};
use crate::graph::{Graph, GraphError};

/// One entry of a workflow.
#[derive(Debug, Clone)]
pub enum Step {
    System(usize),
    /// Opaque to the caller: iterates internally until converged or out of budget.
    Coupled(CoupledGroup),
}

/// Steps executed once each, in the order they were pushed. The assembler is
/// responsible for a valid order; cycles must already live inside a
/// [`CoupledGroup`].
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    steps: Vec<Step>,
}

/// What happened during one workflow pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub newton: Vec<NewtonReport>,
}

impl RunReport {
    pub fn converged(&self) -> bool {
        self.newton.iter().all(|report| report.converged)
    }

    pub fn warnings(&self) -> Vec<ConvergenceWarning> {
        self.newton.iter().filter_map(NewtonReport::warning).collect()
    }

    /// Largest final residual norm over all coupled groups; NaN if any group ended on NaN.
    pub fn residual_norm(&self) -> f64 {
        self.newton
            .iter()
            .map(|report| report.residual_norm)
            .fold(0.0, |worst, norm| {
                if worst.is_nan() || norm.is_nan() {
                    f64::NAN
                } else {
                    worst.max(norm)
                }
            })
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, node: usize) {
        self.steps.push(Step::System(node));
    }

    pub fn push_group(&mut self, group: CoupledGroup) {
        self.steps.push(Step::Coupled(group));
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn groups(&self) -> impl Iterator<Item = &CoupledGroup> {
        self.steps.iter().filter_map(|step| match step {
            Step::Coupled(group) => Some(group),
            Step::System(_) => None,
        })
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut CoupledGroup> {
        self.steps.iter_mut().filter_map(|step| match step {
            Step::Coupled(group) => Some(group),
            Step::System(_) => None,
        })
    }

    /// One full forward pass. A system failure aborts the pass.
    pub fn run(&self, graph: &mut Graph) -> Result<RunReport, GraphError> {
        let mut report = RunReport::default();
        for step in &self.steps {
            match step {
                Step::System(node) => graph.run_node(*node)?,
                Step::Coupled(group) => report.newton.push(group.solve(graph)?),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, residual_norm: f64, converged: bool) -> NewtonReport {
        NewtonReport {
            group: name.into(),
            iterations: 3,
            initial_norm: 1.0,
            residual_norm,
            linear_iterations: 12,
            converged,
        }
    }

    #[test]
    fn residual_norm_is_the_worst_group() {
        let report = RunReport {
            newton: vec![group("a", 1e-12, true), group("b", 3e-4, false)],
        };
        assert_eq!(report.residual_norm(), 3e-4);
        assert!(!report.converged());
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(RunReport::default().residual_norm(), 0.0);
    }

    #[test]
    fn nan_residual_is_never_hidden() {
        for newton in [
            vec![group("a", f64::NAN, false), group("b", 1e-12, true)],
            vec![group("a", 1e-12, true), group("b", f64::NAN, false)],
        ] {
            let report = RunReport { newton };
            assert!(report.residual_norm().is_nan());
            assert!(!report.converged());
        }
    }
}
