//! Total derivatives of workflow outputs by forward or adjoint propagation of
//! the linearized systems.
//!
//! For a coupled group with unknowns `s`, external perturbation `e`, residual
//! linearization `A s + B e` and output linearization `C s + D e`:
//! forward mode solves `A s = -B e` then forms `C s + D e`; adjoint mode solves
//! `Aᵀ λ = -Cᵀ ȳ` then forms `ē = Dᵀ ȳ + Bᵀ λ`.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::coupled::{CoupledGroup, Linearization, accumulate};
use crate::graph::{Graph, GraphError, PortKind, Slot};
use crate::system::Partials;
use crate::workflow::{Step, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeMode {
    Forward,
    Adjoint,
}

enum Linearized<'a> {
    System(usize, Partials),
    Coupled(&'a CoupledGroup, Linearization),
}

struct Port {
    slot: Slot,
    kind: PortKind,
    offset: usize,
    len: usize,
}

fn resolve_ports(graph: &Graph, paths: &[&str]) -> Result<(Vec<Port>, usize), GraphError> {
    let mut ports = Vec::with_capacity(paths.len());
    let mut offset = 0;
    for path in paths {
        let (slot, kind) = graph.resolve(path)?;
        let len = graph.slot_value(&slot, kind)?.len();
        ports.push(Port {
            slot,
            kind,
            offset,
            len,
        });
        offset += len;
    }
    Ok((ports, offset))
}

/// Jacobian `d(of)/d(wrt)` at the point currently held by the graph, which
/// should be the result of a converged [`Workflow::run`].
///
/// `of` must name output ports. `wrt` may name outputs (typically boundary
/// parameters, whose upstream dependencies are then ignored) or unconnected
/// inputs.
pub fn total_derivatives(
    graph: &Graph,
    workflow: &Workflow,
    of: &[&str],
    wrt: &[&str],
    mode: DerivativeMode,
) -> Result<DMatrix<f64>, GraphError> {
    let (of_ports, rows) = resolve_ports(graph, of)?;
    let (wrt_ports, cols) = resolve_ports(graph, wrt)?;
    for (port, path) in of_ports.iter().zip(of) {
        if port.kind != PortKind::Output {
            return Err(GraphError::SourceNotOutput(path.to_string()));
        }
    }

    let mut linearized = Vec::with_capacity(workflow.steps().len());
    for step in workflow.steps() {
        linearized.push(match step {
            Step::System(node) => Linearized::System(*node, graph.partials(*node)?),
            Step::Coupled(group) => Linearized::Coupled(group, group.linearize(graph)?),
        });
    }

    let mut jac = DMatrix::zeros(rows, cols);
    match mode {
        DerivativeMode::Forward => {
            for port in &wrt_ports {
                for k in 0..port.len {
                    let mut seed = DVector::zeros(port.len);
                    seed[k] = 1.0;
                    let dvals = forward_pass(graph, &linearized, port, &seed);
                    for target in &of_ports {
                        if let Some(value) = dvals.get(&target.slot) {
                            jac.view_mut((target.offset, port.offset + k), (target.len, 1))
                                .copy_from(value);
                        }
                    }
                }
            }
        }
        DerivativeMode::Adjoint => {
            for target in &of_ports {
                for k in 0..target.len {
                    let mut seed = DVector::zeros(target.len);
                    seed[k] = 1.0;
                    let row = reverse_pass(graph, &linearized, &wrt_ports, target, seed);
                    for port in &wrt_ports {
                        if let Some(value) = row.get(&port.slot) {
                            jac.view_mut((target.offset + k, port.offset), (1, port.len))
                                .copy_from(&value.transpose());
                        }
                    }
                }
            }
        }
    }
    Ok(jac)
}

fn input_delta(
    graph: &Graph,
    dvals: &HashMap<Slot, DVector<f64>>,
    seed_port: &Port,
    seed: &DVector<f64>,
    slot: &Slot,
) -> Option<DVector<f64>> {
    if seed_port.kind == PortKind::Input && seed_port.slot == *slot {
        return Some(seed.clone());
    }
    graph
        .incoming(slot.node)
        .iter()
        .find(|(port, _)| *port == slot.port)
        .and_then(|(_, source)| dvals.get(source).cloned())
}

fn forward_pass(
    graph: &Graph,
    linearized: &[Linearized<'_>],
    seed_port: &Port,
    seed: &DVector<f64>,
) -> HashMap<Slot, DVector<f64>> {
    let mut dvals: HashMap<Slot, DVector<f64>> = HashMap::new();
    if seed_port.kind == PortKind::Output {
        dvals.insert(seed_port.slot.clone(), seed.clone());
    }
    for step in linearized {
        match step {
            Linearized::System(node, partials) => {
                let mut produced: HashMap<Slot, DVector<f64>> = HashMap::new();
                for (of, wrt, block) in partials.iter() {
                    let slot = Slot::new(*node, wrt);
                    if let Some(delta) = input_delta(graph, &dvals, seed_port, seed, &slot) {
                        accumulate(&mut produced, Slot::new(*node, of), block * delta);
                    }
                }
                dvals.extend(produced);
            }
            Linearized::Coupled(group, lin) => {
                let external = |slot: &Slot| input_delta(graph, &dvals, seed_port, seed, slot);
                let zero = DVector::zeros(group.size());
                let (rhs, _) = group.forward(graph, lin, &zero, &external);
                let state = if rhs.amax() > 0.0 {
                    group.solve_linear(graph, lin, &(-rhs)).x
                } else {
                    zero
                };
                let (_, produced) = group.forward(graph, lin, &state, &external);
                dvals.extend(produced);
            }
        }
        if seed_port.kind == PortKind::Output {
            let owner = match step {
                Linearized::System(node, _) => *node == seed_port.slot.node,
                Linearized::Coupled(group, _) => group.contains(seed_port.slot.node),
            };
            if owner {
                dvals.insert(seed_port.slot.clone(), seed.clone());
            }
        }
    }
    dvals
}

fn reverse_pass(
    graph: &Graph,
    linearized: &[Linearized<'_>],
    wrt_ports: &[Port],
    target: &Port,
    seed: DVector<f64>,
) -> HashMap<Slot, DVector<f64>> {
    let mut adj: HashMap<Slot, DVector<f64>> = HashMap::new();
    adj.insert(target.slot.clone(), seed);
    let mut result: HashMap<Slot, DVector<f64>> = HashMap::new();

    let is_wrt_input =
        |slot: &Slot| wrt_ports.iter().any(|p| p.kind == PortKind::Input && p.slot == *slot);

    // Route the adjoint of an input either to the result or to its source.
    let route = |adj: &mut HashMap<Slot, DVector<f64>>,
                 result: &mut HashMap<Slot, DVector<f64>>,
                 slot: Slot,
                 value: DVector<f64>| {
        if is_wrt_input(&slot) {
            accumulate(result, slot, value);
            return;
        }
        if let Some((_, source)) = graph
            .incoming(slot.node)
            .iter()
            .find(|(port, _)| *port == slot.port)
        {
            accumulate(adj, source.clone(), value);
        }
    };

    for step in linearized.iter().rev() {
        let owns = |node: usize| match step {
            Linearized::System(n, _) => *n == node,
            Linearized::Coupled(group, _) => group.contains(node),
        };
        for port in wrt_ports {
            if port.kind == PortKind::Output && owns(port.slot.node) {
                if let Some(value) = adj.remove(&port.slot) {
                    accumulate(&mut result, port.slot.clone(), value);
                }
            }
        }

        match step {
            Linearized::System(node, partials) => {
                let mut inputs: HashMap<Slot, DVector<f64>> = HashMap::new();
                for (of, wrt, block) in partials.iter() {
                    if let Some(bar) = adj.get(&Slot::new(*node, of)) {
                        accumulate(&mut inputs, Slot::new(*node, wrt), block.tr_mul(bar));
                    }
                }
                for (slot, value) in inputs {
                    route(&mut adj, &mut result, slot, value);
                }
            }
            Linearized::Coupled(group, lin) => {
                let seeds: HashMap<Slot, DVector<f64>> = adj
                    .iter()
                    .filter(|(slot, _)| group.contains(slot.node))
                    .map(|(slot, value)| (slot.clone(), value.clone()))
                    .collect();
                if seeds.is_empty() {
                    continue;
                }
                let zero = DVector::zeros(group.size());
                let (rhs, _) = group.reverse(graph, lin, &zero, &seeds);
                let lambda = if rhs.amax() > 0.0 {
                    group.solve_linear_transpose(graph, lin, &(-rhs)).x
                } else {
                    zero
                };
                let (_, external) = group.reverse(graph, lin, &lambda, &seeds);
                for (slot, value) in external {
                    route(&mut adj, &mut result, slot, value);
                }
            }
        }
    }

    for port in wrt_ports {
        if port.kind == PortKind::Output {
            if let Some(value) = adj.remove(&port.slot) {
                accumulate(&mut result, port.slot.clone(), value);
            }
        }
    }
    result
}
