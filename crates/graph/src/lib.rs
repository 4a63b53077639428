//! Graph execution core: systems with declared ports, the connections between
//! them, a workflow executor and Newton-solved coupled groups.

pub mod coupled;
pub mod derivatives;
pub mod graph;
pub mod indep;
pub mod system;
pub mod vars;
pub mod workflow;

pub use coupled::{ConvergenceWarning, CoupledGroup, Linearization, NewtonReport, NewtonSettings};
pub use derivatives::{DerivativeMode, total_derivatives};
pub use graph::{Connection, Graph, GraphError, PortKind, Slot};
pub use indep::IndependentVars;
pub use system::{
    PartialCheck, Partials, PortSpec, StateSpec, System, SystemError, check_partials,
    finite_difference, initial_vars,
};
pub use vars::Vars;
pub use workflow::{RunReport, Step, Workflow};
