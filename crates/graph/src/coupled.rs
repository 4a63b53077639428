//! Coupled groups: the cyclic part of a graph solved as one implicit unit by Newton's method.
//!
//! The Newton unknowns are the state ports of the implicit members followed by
//! one tear block per feedback source. A connection is a feedback connection
//! when its source runs at or after its target in group order; the target
//! input then holds a guessed value during a pass, and the tear residual is
//! `guess - source output`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;

use mission_core::linalg::{LinearSettings, LinearSolution, gmres};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::graph::{Graph, GraphError, PortKind, Slot};
use crate::system::Partials;

/// Controls for the outer Newton loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonSettings {
    pub atol: f64,
    pub rtol: f64,
    pub max_iteration: usize,
    /// Fraction of the Newton step applied each iteration.
    pub damping: f64,
    pub linear: LinearSettings,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            atol: 1.0e-9,
            rtol: 1.0e-9,
            max_iteration: 15,
            damping: 1.0,
            linear: LinearSettings {
                atol: 1.0e-20,
                rtol: 1.0e-10,
                max_iter: 600,
                restart: 200,
            },
        }
    }
}

/// Result of one coupled solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonReport {
    pub group: String,
    pub iterations: usize,
    pub initial_norm: f64,
    pub residual_norm: f64,
    pub linear_iterations: usize,
    pub converged: bool,
}

impl NewtonReport {
    pub fn warning(&self) -> Option<ConvergenceWarning> {
        (!self.converged).then(|| ConvergenceWarning {
            group: self.group.clone(),
            iterations: self.iterations,
            residual_norm: self.residual_norm,
        })
    }
}

/// A coupled group that ran out of iterations. Never an error: the graph keeps
/// the best state reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceWarning {
    pub group: String,
    pub iterations: usize,
    pub residual_norm: f64,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group `{}` did not converge after {} iterations (residual norm {:.3e})",
            self.group, self.iterations, self.residual_norm
        )
    }
}

#[derive(Debug, Clone)]
struct StateBlock {
    state: Slot,
    residual: Slot,
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone)]
struct TearBlock {
    source: Slot,
    targets: Vec<Slot>,
    offset: usize,
    len: usize,
}

/// Partial derivatives of every member, in member order, at one point.
#[derive(Debug, Clone)]
pub struct Linearization {
    partials: Vec<Partials>,
}

#[derive(Debug, Clone)]
pub struct CoupledGroup {
    name: String,
    members: Vec<usize>,
    settings: NewtonSettings,
    states: Vec<StateBlock>,
    tears: Vec<TearBlock>,
    /// Torn input -> index into `tears`.
    torn: HashMap<Slot, usize>,
    /// Member input -> its source, for connected inputs.
    sources: HashMap<Slot, Slot>,
    held: BTreeSet<Slot>,
    size: usize,
}

impl CoupledGroup {
    /// Build a group over `members` (executed in the given order) after the
    /// graph is fully connected. Feedback inputs are seeded from their
    /// source's current value.
    pub fn new(
        name: impl Into<String>,
        graph: &mut Graph,
        members: Vec<usize>,
        settings: NewtonSettings,
    ) -> Result<Self, GraphError> {
        let name = name.into();
        if members.is_empty() {
            return Err(GraphError::InvalidGroup(name, "no members".into()));
        }
        let mut position = HashMap::new();
        for (pos, &node) in members.iter().enumerate() {
            if node >= graph.len() {
                return Err(GraphError::InvalidGroup(name, format!("unknown node {node}")));
            }
            if position.insert(node, pos).is_some() {
                return Err(GraphError::InvalidGroup(
                    name,
                    format!("`{}` listed twice", graph.system_name(node)),
                ));
            }
        }

        let mut offset = 0;
        let mut states = Vec::new();
        for &node in &members {
            for spec in graph.states(node) {
                let state = Slot::new(node, spec.state.as_str());
                let len = graph.slot_value(&state, PortKind::Output)?.len();
                states.push(StateBlock {
                    state,
                    residual: Slot::new(node, spec.residual.as_str()),
                    offset,
                    len,
                });
                offset += len;
            }
        }

        let mut sources = HashMap::new();
        let mut feedback: BTreeMap<Slot, Vec<Slot>> = BTreeMap::new();
        for (pos, &node) in members.iter().enumerate() {
            for (port, source) in graph.incoming(node) {
                let target = Slot::new(node, port.as_str());
                sources.insert(target.clone(), source.clone());
                let Some(&source_pos) = position.get(&source.node) else {
                    continue;
                };
                if source_pos >= pos && !graph.is_state_port(source) {
                    feedback.entry(source.clone()).or_default().push(target);
                }
            }
        }

        let mut tears = Vec::new();
        let mut torn = HashMap::new();
        let mut held = BTreeSet::new();
        for (source, targets) in feedback {
            let value = graph.slot_value(&source, PortKind::Output)?.clone();
            for target in &targets {
                graph.set_slot(target, PortKind::Input, &value)?;
                torn.insert(target.clone(), tears.len());
                held.insert(target.clone());
            }
            debug!(
                group = %name,
                source = %graph.path(&source),
                targets = targets.len(),
                "feedback connection torn"
            );
            tears.push(TearBlock {
                source,
                targets,
                offset,
                len: value.len(),
            });
            offset += value.len();
        }

        Ok(Self {
            name,
            members,
            settings,
            states,
            tears,
            torn,
            sources,
            held,
            size: offset,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: NewtonSettings) {
        self.settings = settings;
    }

    /// Length of the Newton unknown vector.
    pub fn size(&self) -> usize {
        self.size
    }

    /// `system.port` paths of the feedback sources chosen as tear variables.
    pub fn tear_sources(&self, graph: &Graph) -> Vec<String> {
        self.tears.iter().map(|t| graph.path(&t.source)).collect()
    }

    pub fn contains(&self, node: usize) -> bool {
        self.members.contains(&node)
    }

    /// Current Newton unknowns as held by the graph.
    pub fn gather(&self, graph: &Graph) -> Result<DVector<f64>, GraphError> {
        let mut x = DVector::zeros(self.size);
        for block in &self.states {
            let value = graph.slot_value(&block.state, PortKind::Output)?;
            x.rows_mut(block.offset, block.len).copy_from(value);
        }
        for block in &self.tears {
            if let Some(target) = block.targets.first() {
                let value = graph.slot_value(target, PortKind::Input)?;
                x.rows_mut(block.offset, block.len).copy_from(value);
            }
        }
        Ok(x)
    }

    fn scatter(&self, graph: &mut Graph, x: &DVector<f64>) -> Result<(), GraphError> {
        for block in &self.states {
            let value = x.rows(block.offset, block.len).into_owned();
            graph.set_slot(&block.state, PortKind::Output, &value)?;
        }
        for block in &self.tears {
            let value = x.rows(block.offset, block.len).into_owned();
            for target in &block.targets {
                graph.set_slot(target, PortKind::Input, &value)?;
            }
        }
        Ok(())
    }

    /// Residual vector for the values currently held by the graph.
    pub fn residual(&self, graph: &Graph) -> Result<DVector<f64>, GraphError> {
        let mut r = DVector::zeros(self.size);
        for block in &self.states {
            let value = graph.slot_value(&block.residual, PortKind::Output)?;
            r.rows_mut(block.offset, block.len).copy_from(value);
        }
        for block in &self.tears {
            let source = graph.slot_value(&block.source, PortKind::Output)?;
            if let Some(target) = block.targets.first() {
                let guess = graph.slot_value(target, PortKind::Input)?;
                r.rows_mut(block.offset, block.len)
                    .copy_from(&(guess - source));
            }
        }
        Ok(r)
    }

    /// Inject `x`, run every member once in order and return `R(x)`.
    pub fn evaluate(&self, graph: &mut Graph, x: &DVector<f64>) -> Result<DVector<f64>, GraphError> {
        self.scatter(graph, x)?;
        for &node in &self.members {
            graph.run_node_holding(node, &self.held)?;
        }
        self.residual(graph)
    }

    pub fn linearize(&self, graph: &Graph) -> Result<Linearization, GraphError> {
        let partials = self
            .members
            .iter()
            .map(|&node| graph.partials(node))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Linearization { partials })
    }

    fn is_converged(&self, norm: f64, initial: f64) -> bool {
        norm <= self.settings.atol || norm <= self.settings.rtol * initial
    }

    /// Newton iteration from the state currently held by the graph.
    pub fn solve(&self, graph: &mut Graph) -> Result<NewtonReport, GraphError> {
        let settings = self.settings;
        let mut x = self.gather(graph)?;
        let mut r = self.evaluate(graph, &x)?;
        let initial_norm = r.norm();
        let mut norm = initial_norm;
        let mut iterations = 0;
        let mut linear_iterations = 0;

        while !self.is_converged(norm, initial_norm) && iterations < settings.max_iteration {
            let lin = self.linearize(graph)?;
            let step = self.solve_linear(graph, &lin, &(-&r));
            linear_iterations += step.iterations;
            if !step.converged {
                debug!(
                    group = %self.name,
                    linear_residual = step.residual_norm,
                    "linear solve stopped before tolerance, applying best step"
                );
            }
            x.axpy(settings.damping, &step.x, 1.0);
            r = self.evaluate(graph, &x)?;
            norm = r.norm();
            iterations += 1;
            debug!(
                group = %self.name,
                iteration = iterations,
                residual = norm,
                linear_iterations = step.iterations,
                "newton iteration"
            );
        }

        let converged = self.is_converged(norm, initial_norm);
        if !converged {
            warn!(
                group = %self.name,
                iterations,
                residual = norm,
                "newton solver did not converge"
            );
        }
        Ok(NewtonReport {
            group: self.name.clone(),
            iterations,
            initial_norm,
            residual_norm: norm,
            linear_iterations,
            converged,
        })
    }

    /// Solve `J x = rhs` with the group's linear settings.
    pub fn solve_linear(
        &self,
        graph: &Graph,
        lin: &Linearization,
        rhs: &DVector<f64>,
    ) -> LinearSolution {
        let Ok(solution) = gmres(rhs, None, &self.settings.linear, |v| {
            Ok::<_, Infallible>(self.forward(graph, lin, v, &|_| None).0)
        });
        if !solution.converged {
            warn!(
                group = %self.name,
                residual = solution.residual_norm,
                iterations = solution.iterations,
                "linear solve did not converge"
            );
        }
        solution
    }

    /// Solve `Jᵀ x = rhs` with the group's linear settings.
    pub fn solve_linear_transpose(
        &self,
        graph: &Graph,
        lin: &Linearization,
        rhs: &DVector<f64>,
    ) -> LinearSolution {
        let empty = HashMap::new();
        let Ok(solution) = gmres(rhs, None, &self.settings.linear, |w| {
            Ok::<_, Infallible>(self.reverse(graph, lin, w, &empty).0)
        });
        if !solution.converged {
            warn!(
                group = %self.name,
                residual = solution.residual_norm,
                "transpose linear solve did not converge"
            );
        }
        solution
    }

    fn tear_value(&self, v: &DVector<f64>, tear: usize) -> DVector<f64> {
        let block = &self.tears[tear];
        v.rows(block.offset, block.len).into_owned()
    }

    /// Forward linear pass. `v` perturbs the Newton unknowns and `external`
    /// supplies perturbations of member inputs fed from outside the group.
    /// Returns the residual perturbation and the perturbation of every member
    /// output that received one.
    pub fn forward(
        &self,
        graph: &Graph,
        lin: &Linearization,
        v: &DVector<f64>,
        external: &dyn Fn(&Slot) -> Option<DVector<f64>>,
    ) -> (DVector<f64>, HashMap<Slot, DVector<f64>>) {
        let mut d: HashMap<Slot, DVector<f64>> = HashMap::new();
        for block in &self.states {
            d.insert(block.state.clone(), v.rows(block.offset, block.len).into_owned());
        }

        for (&node, partials) in self.members.iter().zip(&lin.partials) {
            let mut inputs: HashMap<&str, DVector<f64>> = HashMap::new();
            for spec in graph.input_specs(node) {
                let slot = Slot::new(node, spec.name.as_str());
                let value = if let Some(&tear) = self.torn.get(&slot) {
                    Some(self.tear_value(v, tear))
                } else {
                    match self.sources.get(&slot) {
                        Some(source) if self.contains(source.node) => d.get(source).cloned(),
                        _ => external(&slot),
                    }
                };
                if let Some(value) = value {
                    inputs.insert(spec.name.as_str(), value);
                }
            }

            for (of, wrt, block) in partials.iter() {
                let column = Slot::new(node, wrt);
                let delta = if graph.is_state_port(&column) {
                    d.get(&column)
                } else {
                    inputs.get(wrt)
                };
                let Some(delta) = delta else {
                    continue;
                };
                let contribution = block * delta;
                accumulate(&mut d, Slot::new(node, of), contribution);
            }
        }

        let mut r = DVector::zeros(self.size);
        for block in &self.states {
            if let Some(delta) = d.get(&block.residual) {
                r.rows_mut(block.offset, block.len).copy_from(delta);
            }
        }
        for (tear, block) in self.tears.iter().enumerate() {
            let mut delta = self.tear_value(v, tear);
            if let Some(source) = d.get(&block.source) {
                delta -= source;
            }
            r.rows_mut(block.offset, block.len).copy_from(&delta);
        }
        (r, d)
    }

    /// Reverse linear pass. `w` weights the residuals and `seeds` weights
    /// member outputs. Returns the adjoint on the Newton unknowns and the
    /// adjoint on member inputs fed from outside the group.
    pub fn reverse(
        &self,
        graph: &Graph,
        lin: &Linearization,
        w: &DVector<f64>,
        seeds: &HashMap<Slot, DVector<f64>>,
    ) -> (DVector<f64>, HashMap<Slot, DVector<f64>>) {
        let mut adj: HashMap<Slot, DVector<f64>> = seeds
            .iter()
            .filter(|(slot, _)| self.contains(slot.node))
            .map(|(slot, value)| (slot.clone(), value.clone()))
            .collect();
        let mut out = DVector::zeros(self.size);
        for block in &self.states {
            let weight = w.rows(block.offset, block.len).into_owned();
            accumulate(&mut adj, block.residual.clone(), weight);
        }
        for block in &self.tears {
            let weight = w.rows(block.offset, block.len).into_owned();
            accumulate(&mut adj, block.source.clone(), -&weight);
            let mut rows = out.rows_mut(block.offset, block.len);
            rows += &weight;
        }

        let mut external = HashMap::new();
        for (&node, partials) in self.members.iter().zip(&lin.partials).rev() {
            let mut inputs: HashMap<String, DVector<f64>> = HashMap::new();
            for (of, wrt, block) in partials.iter() {
                let Some(seed) = adj.get(&Slot::new(node, of)) else {
                    continue;
                };
                let contribution = block.tr_mul(seed);
                let column = Slot::new(node, wrt);
                if graph.is_state_port(&column) {
                    accumulate(&mut adj, column, contribution);
                } else {
                    match inputs.get_mut(wrt) {
                        Some(acc) => *acc += contribution,
                        None => {
                            inputs.insert(wrt.to_string(), contribution);
                        }
                    }
                }
            }

            for (port, value) in inputs {
                let slot = Slot::new(node, port);
                if let Some(&tear) = self.torn.get(&slot) {
                    let block = &self.tears[tear];
                    let mut rows = out.rows_mut(block.offset, block.len);
                    rows += &value;
                    continue;
                }
                match self.sources.get(&slot) {
                    Some(source) if self.contains(source.node) => {
                        accumulate(&mut adj, source.clone(), value);
                    }
                    _ => accumulate(&mut external, slot, value),
                }
            }
        }

        for block in &self.states {
            if let Some(value) = adj.get(&block.state) {
                let mut rows = out.rows_mut(block.offset, block.len);
                rows += value;
            }
        }
        (out, external)
    }

    /// Dense `∂R/∂x`, assembled column by column from the forward pass.
    pub fn jacobian(&self, graph: &Graph, lin: &Linearization) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.size, self.size);
        for j in 0..self.size {
            let mut e = DVector::zeros(self.size);
            e[j] = 1.0;
            let (column, _) = self.forward(graph, lin, &e, &|_| None);
            jac.set_column(j, &column);
        }
        jac
    }
}

pub(crate) fn accumulate(map: &mut HashMap<Slot, DVector<f64>>, slot: Slot, value: DVector<f64>) {
    match map.get_mut(&slot) {
        Some(acc) => *acc += value,
        None => {
            map.insert(slot, value);
        }
    }
}
