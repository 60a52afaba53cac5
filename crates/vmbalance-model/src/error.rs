//! Model, scoring, and solver error types.

use std::time::Duration;

use thiserror::Error;
use vmbalance_core::Resource;

/// Result type alias for model formulation.
pub type ModelResult<T> = Result<T, ModelBuildError>;

/// Result type alias for scoring and solution decoding.
pub type ScoringResult<T> = Result<T, ScoringError>;

/// Degenerate inputs that cannot be turned into a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelBuildError {
    #[error("no hosts to place vms on")]
    NoHosts,

    #[error("no vms to place")]
    NoVms,

    #[error("duplicate host id: {0}")]
    DuplicateHost(String),

    #[error("duplicate vm id: {0}")]
    DuplicateVm(String),

    #[error("host {host} has zero {resource} capacity")]
    ZeroCapacity { host: String, resource: Resource },

    #[error("cluster has no {resource} capacity")]
    NoCapacity { resource: Resource },

    #[error("invalid model options: {0}")]
    InvalidOptions(String),

    #[error("inconsistent model document: {0}")]
    InconsistentModel(String),
}

/// An assignment or sample that is inconsistent with the problem.
///
/// Scoring never proceeds on partial data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("assignment references unknown vm: {0}")]
    UnknownVm(String),

    #[error("assignment references unknown host: {0}")]
    UnknownHost(String),

    #[error("vm {0} is not assigned to any host")]
    Unassigned(String),

    #[error("vm {vm} is assigned to {count} hosts")]
    MultipleHosts { vm: String, count: usize },

    #[error("duplicate id in problem: {0}")]
    DuplicateId(String),

    #[error("variable {label} has non-binary value {value}")]
    NonBinary { label: String, value: f64 },

    #[error("sample has {actual} values, model has {expected} variables")]
    SampleSize { expected: usize, actual: usize },

    #[error("host {host} has no {resource} capacity but carries load {load}")]
    LoadWithoutCapacity {
        host: String,
        resource: Resource,
        load: f64,
    },

    #[error("invalid scoring weights: priority {priority}, other {other}")]
    InvalidWeights { priority: f64, other: f64 },
}

/// Failures reported by, or detected after, an external solver run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("solver unreachable: {0}")]
    Unreachable(String),

    #[error("no feasible solution (violated: {})", .violated.join(", "))]
    Infeasible { violated: Vec<String> },

    #[error("solver timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid solution: {0}")]
    InvalidSolution(#[from] ScoringError),
}
