//! Mission legs as coupled-analysis segments, and their multipoint execution.

use mission_graph::{GraphError, SystemError};
use thiserror::Error;

pub mod comm;
pub mod leg;
pub mod mission;
pub mod multipoint;
pub mod segment;
mod wire;

pub use comm::{CommError, Communicator, LocalCluster, LocalComm, SerialCommunicator};
pub use leg::LegPlan;
pub use mission::{build_multipoint, load_surrogate, newton_settings, run_mission};
pub use multipoint::{
    Collective, Leg, LegMetrics, LegResult, LegStatus, MissionReport, Multipoint, Partition,
    ReductionRule, reduce,
};
pub use segment::{Segment, SegmentConfig, StationProfile};

/// Segment failures. Configuration errors are raised while assembling and
/// are fatal for the segment; domain errors abort one run of one segment.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SegmentError {
    #[error("invalid segment configuration: {0}")]
    Configuration(String),
    #[error("numerical domain error in `{system}`: {message}")]
    Domain { system: String, message: String },
    #[error("boundary input `{0}` is read-only after the first run")]
    Frozen(String),
    #[error(transparent)]
    Graph(GraphError),
}

impl From<GraphError> for SegmentError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::System {
                system,
                source: SystemError::Domain(message),
            } => SegmentError::Domain { system, message },
            other => SegmentError::Graph(other),
        }
    }
}

/// Mission-level failures.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("failed to load the surrogate table: {0}")]
    Surrogate(#[from] mission_aero::AeroError),
    #[error("failed to build the thread pool: {0}")]
    ThreadPool(String),
    #[error("no rank returned the mission report")]
    NoReport,
}
