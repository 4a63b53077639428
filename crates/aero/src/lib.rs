//! Aerodynamics for the coupled analysis: a parametric model, the surrogate
//! table sampled from it, and the systems that evaluate the table.

use std::io;

use mission_graph::SystemError;
use thiserror::Error;

pub mod model;
pub mod systems;
pub mod table;

pub use model::{GridSpec, SurrogateModel};
pub use systems::{Drag, Lift, Moment};
pub use table::{Coefficient, Sample, SurrogateTable};

#[derive(Debug, Error)]
pub enum AeroError {
    #[error("failed to access surrogate table: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse surrogate table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid surrogate grid: {0}")]
    Grid(String),
    #[error("{axis} = {value:.4} lies outside the surrogate table")]
    OutOfRange { axis: &'static str, value: f64 },
}

impl From<AeroError> for SystemError {
    fn from(err: AeroError) -> Self {
        SystemError::Domain(err.to_string())
    }
}
