//! Coupled mission analysis for transport aircraft.
//!
//! Each mission leg is assembled into a graph of systems (splines,
//! atmosphere, aerodynamics, propulsion and performance) whose cyclic part
//! is solved by Newton iteration. Legs run serially, on a thread pool or
//! across ranks, and their results are reduced into one report. The member
//! crates are re-exported so front-ends only depend on this package.

pub use mission_aero as aero;
pub use mission_atmosphere as atmosphere;
pub use mission_config as config;
pub use mission_core as common;
pub use mission_export as export;
pub use mission_graph as graph;
pub use mission_performance as performance;
pub use mission_planner as planner;
pub use mission_propulsion as propulsion;
pub use mission_splines as splines;

pub use mission_config::{MissionConfig, load_mission};
pub use mission_planner::{MissionReport, Segment, run_mission};

/// Returns the version of the library for smoke tests.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
