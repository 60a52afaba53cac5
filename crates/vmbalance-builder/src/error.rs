//! Problem builder error types.

use thiserror::Error;
use vmbalance_core::{Resource, ValidationError};

/// Result type alias for problem building.
pub type BuildResult<T> = Result<T, BuildError>;

/// Demand cannot be served by the available host capacity.
///
/// A problem in this state must not be handed to the formulator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeasibilityError {
    #[error("{resource} demand {demand} exceeds remaining host capacity {available}")]
    InsufficientCapacity {
        resource: Resource,
        demand: f64,
        available: f64,
    },

    #[error("vm {vm} needs {requirement} {resource} but the roomiest host has {largest_remaining}")]
    OversizedVm {
        vm: String,
        resource: Resource,
        requirement: f64,
        largest_remaining: f64,
    },
}

/// Errors raised while building a problem instance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("invalid generator parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("infeasible problem: {0}")]
    Infeasible(#[from] FeasibilityError),
}
