//! Connection graph holding systems and the current values of every port.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use nalgebra::DVector;
use thiserror::Error;

use crate::system::{
    PartialCheck, Partials, PortSpec, StateSpec, System, SystemError, check_partials,
};
use crate::vars::Vars;

/// Errors raised while wiring or evaluating a graph.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown system `{0}`")]
    UnknownSystem(String),
    #[error("system `{system}` has no port `{port}`")]
    UnknownPort { system: String, port: String },
    #[error("malformed port path `{0}`, expected `system.port`")]
    MalformedPath(String),
    #[error("system `{0}` is already part of the graph")]
    DuplicateSystem(String),
    #[error("input `{0}` already has an incoming connection")]
    AlreadyConnected(String),
    #[error("cannot connect `{source_path}` ({source_len} entries) to `{target}` ({target_len} entries)")]
    LengthMismatch {
        source_path: String,
        source_len: usize,
        target: String,
        target_len: usize,
    },
    #[error("connection source `{0}` must be an output port")]
    SourceNotOutput(String),
    #[error("connection target `{0}` must be an input port")]
    TargetNotInput(String),
    #[error("coupled group `{0}` is invalid: {1}")]
    InvalidGroup(String, String),
    #[error("system `{system}` failed: {source}")]
    System {
        system: String,
        #[source]
        source: SystemError,
    },
}

/// Whether a port is read or written by its system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortKind {
    Input,
    Output,
}

/// A resolved port: node index plus port name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub node: usize,
    pub port: String,
}

impl Slot {
    pub fn new(node: usize, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub source: Slot,
    pub target: Slot,
}

struct Node {
    system: Box<dyn System>,
    input_specs: Vec<PortSpec>,
    output_specs: Vec<PortSpec>,
    states: Vec<StateSpec>,
    inputs: Vars,
    outputs: Vars,
    /// Connected inputs and their sources.
    incoming: Vec<(String, Slot)>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("system", &self.system.name())
            .field("incoming", &self.incoming)
            .finish()
    }
}

/// Systems, their connections, and the values currently held on every port.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system; its ports start at their declared values.
    pub fn add_system(&mut self, system: Box<dyn System>) -> Result<usize, GraphError> {
        let name = system.name().to_string();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateSystem(name));
        }
        let input_specs = system.inputs();
        let output_specs = system.outputs();
        let states = system.states();
        for state in &states {
            for port in [&state.state, &state.residual] {
                if !output_specs.iter().any(|spec| &spec.name == port) {
                    return Err(GraphError::UnknownPort {
                        system: name.clone(),
                        port: port.clone(),
                    });
                }
            }
        }
        let inputs = input_specs
            .iter()
            .map(|spec| (spec.name.clone(), spec.value.clone()))
            .collect();
        let outputs = output_specs
            .iter()
            .map(|spec| (spec.name.clone(), spec.value.clone()))
            .collect();
        let idx = self.nodes.len();
        self.nodes.push(Node {
            system,
            input_specs,
            output_specs,
            states,
            inputs,
            outputs,
            incoming: Vec::new(),
        });
        self.index.insert(name, idx);
        Ok(idx)
    }

    pub fn add<S: System + 'static>(&mut self, system: S) -> Result<usize, GraphError> {
        self.add_system(Box::new(system))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_index(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownSystem(name.to_string()))
    }

    pub fn system_name(&self, node: usize) -> &str {
        self.nodes[node].system.name()
    }

    pub fn states(&self, node: usize) -> &[StateSpec] {
        &self.nodes[node].states
    }

    pub fn input_specs(&self, node: usize) -> &[PortSpec] {
        &self.nodes[node].input_specs
    }

    pub fn output_specs(&self, node: usize) -> &[PortSpec] {
        &self.nodes[node].output_specs
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connected inputs of `node` with their sources.
    pub fn incoming(&self, node: usize) -> &[(String, Slot)] {
        &self.nodes[node].incoming
    }

    pub fn is_state_port(&self, slot: &Slot) -> bool {
        self.nodes[slot.node]
            .states
            .iter()
            .any(|state| state.state == slot.port)
    }

    /// Resolve a `system.port` path into a slot and the port kind.
    pub fn resolve(&self, path: &str) -> Result<(Slot, PortKind), GraphError> {
        let (system, port) = path
            .split_once('.')
            .filter(|(s, p)| !s.is_empty() && !p.is_empty())
            .ok_or_else(|| GraphError::MalformedPath(path.to_string()))?;
        let node = self.node_index(system)?;
        let n = &self.nodes[node];
        let kind = if n.output_specs.iter().any(|spec| spec.name == port) {
            PortKind::Output
        } else if n.input_specs.iter().any(|spec| spec.name == port) {
            PortKind::Input
        } else {
            return Err(GraphError::UnknownPort {
                system: system.to_string(),
                port: port.to_string(),
            });
        };
        Ok((Slot::new(node, port), kind))
    }

    pub fn path(&self, slot: &Slot) -> String {
        format!("{}.{}", self.system_name(slot.node), slot.port)
    }

    /// Connect an output port to an input port.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<(), GraphError> {
        let (src, src_kind) = self.resolve(source)?;
        let (dst, dst_kind) = self.resolve(target)?;
        if src_kind != PortKind::Output {
            return Err(GraphError::SourceNotOutput(source.to_string()));
        }
        if dst_kind != PortKind::Input {
            return Err(GraphError::TargetNotInput(target.to_string()));
        }
        if self.nodes[dst.node]
            .incoming
            .iter()
            .any(|(port, _)| *port == dst.port)
        {
            return Err(GraphError::AlreadyConnected(target.to_string()));
        }
        let source_len = self.slot_len(&src, PortKind::Output);
        let target_len = self.slot_len(&dst, PortKind::Input);
        if source_len != target_len {
            return Err(GraphError::LengthMismatch {
                source_path: source.to_string(),
                source_len,
                target: target.to_string(),
                target_len,
            });
        }
        self.nodes[dst.node]
            .incoming
            .push((dst.port.clone(), src.clone()));
        self.connections.push(Connection {
            source: src,
            target: dst,
        });
        Ok(())
    }

    fn slot_len(&self, slot: &Slot, kind: PortKind) -> usize {
        let vars = match kind {
            PortKind::Input => &self.nodes[slot.node].inputs,
            PortKind::Output => &self.nodes[slot.node].outputs,
        };
        vars.get(&slot.port).map(|v| v.len()).unwrap_or(0)
    }

    /// Inputs without an incoming connection, as `system.port` paths.
    pub fn list_unconnected_inputs(&self) -> Vec<String> {
        let mut unconnected = Vec::new();
        for node in &self.nodes {
            for spec in &node.input_specs {
                if !node.incoming.iter().any(|(port, _)| *port == spec.name) {
                    unconnected.push(format!("{}.{}", node.system.name(), spec.name));
                }
            }
        }
        unconnected
    }

    /// Current value of an input or output port.
    pub fn value(&self, path: &str) -> Result<&DVector<f64>, GraphError> {
        let (slot, kind) = self.resolve(path)?;
        self.slot_value(&slot, kind)
    }

    pub fn scalar(&self, path: &str) -> Result<f64, GraphError> {
        let (slot, kind) = self.resolve(path)?;
        let node = &self.nodes[slot.node];
        let vars = match kind {
            PortKind::Input => &node.inputs,
            PortKind::Output => &node.outputs,
        };
        vars.scalar(&slot.port).map_err(system_error(node.system.as_ref()))
    }

    pub(crate) fn slot_value(
        &self,
        slot: &Slot,
        kind: PortKind,
    ) -> Result<&DVector<f64>, GraphError> {
        let node = &self.nodes[slot.node];
        let vars = match kind {
            PortKind::Input => &node.inputs,
            PortKind::Output => &node.outputs,
        };
        vars.get(&slot.port)
            .map_err(|_| GraphError::UnknownPort {
                system: node.system.name().to_string(),
                port: slot.port.clone(),
            })
    }

    /// Overwrite a port value; the length must match the declaration.
    pub fn set_value(&mut self, path: &str, value: DVector<f64>) -> Result<(), GraphError> {
        let (slot, kind) = self.resolve(path)?;
        self.set_slot(&slot, kind, &value)
    }

    pub(crate) fn set_slot(
        &mut self,
        slot: &Slot,
        kind: PortKind,
        value: &DVector<f64>,
    ) -> Result<(), GraphError> {
        let node = &mut self.nodes[slot.node];
        let vars = match kind {
            PortKind::Input => &mut node.inputs,
            PortKind::Output => &mut node.outputs,
        };
        vars.assign(&slot.port, value)
            .map_err(system_error(node.system.as_ref()))
    }

    /// Pull connected inputs and run one system.
    pub fn run_node(&mut self, node: usize) -> Result<(), GraphError> {
        self.run_node_holding(node, &BTreeSet::new())
    }

    /// Like [`Graph::run_node`], but inputs listed in `held` keep their current
    /// value instead of being refreshed from their source.
    pub(crate) fn run_node_holding(
        &mut self,
        node: usize,
        held: &BTreeSet<Slot>,
    ) -> Result<(), GraphError> {
        let mut pulled = Vec::with_capacity(self.nodes[node].incoming.len());
        for (port, source) in &self.nodes[node].incoming {
            if held.contains(&Slot::new(node, port.as_str())) {
                continue;
            }
            let value = self.slot_value(source, PortKind::Output)?.clone();
            pulled.push((port.clone(), value));
        }

        let n = &mut self.nodes[node];
        let system = n.system.as_ref();
        let wrap = system_error(system);
        for (port, value) in pulled {
            n.inputs.assign(&port, &value).map_err(wrap)?;
        }
        let mut outputs = n.outputs.clone();
        system.compute(&n.inputs, &mut outputs).map_err(wrap)?;
        for spec in &n.output_specs {
            let value = outputs.get(&spec.name).map_err(wrap)?;
            n.outputs.assign(&spec.name, value).map_err(wrap)?;
        }
        Ok(())
    }

    /// Partial derivatives of one system at its current port values.
    pub fn partials(&self, node: usize) -> Result<Partials, GraphError> {
        let n = &self.nodes[node];
        n.system
            .compute_derivatives(&n.inputs, &n.outputs)
            .map_err(system_error(n.system.as_ref()))
    }

    /// Compare one system's analytic partials with finite differences at its
    /// current port values.
    pub fn check_partials(&self, node: usize) -> Result<Vec<PartialCheck>, GraphError> {
        let n = &self.nodes[node];
        check_partials(n.system.as_ref(), &n.inputs, &n.outputs)
            .map_err(system_error(n.system.as_ref()))
    }
}

fn system_error(system: &dyn System) -> impl Fn(SystemError) -> GraphError + Copy + '_ {
    move |source| GraphError::System {
        system: system.name().to_string(),
        source,
    }
}
