//! Validation errors for host, VM, and range records.

use thiserror::Error;

use crate::types::Resource;

/// Result type alias for record construction.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors raised when a record is built from out-of-range values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("identifier must not be empty")]
    EmptyId,

    #[error("{record} id {id:?} must not contain \"{separator}\"")]
    ReservedSeparator {
        record: &'static str,
        id: String,
        separator: &'static str,
    },

    #[error("{record} {id}: {resource} {field} is not a finite number")]
    NotFinite {
        record: &'static str,
        id: String,
        resource: Resource,
        field: &'static str,
    },

    #[error("{record} {id}: {resource} {field} must not be negative (got {value})")]
    Negative {
        record: &'static str,
        id: String,
        resource: Resource,
        field: &'static str,
        value: f64,
    },

    #[error("vm {id}: {resource} requirement must be positive (got {value})")]
    NonPositiveRequirement {
        id: String,
        resource: Resource,
        value: f64,
    },

    #[error("host {id}: {resource} use {used} exceeds capacity {capacity}")]
    UseExceedsCapacity {
        id: String,
        resource: Resource,
        used: f64,
        capacity: f64,
    },

    #[error("invalid range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    #[error("malformed assignment label: {0}")]
    MalformedLabel(String),

    #[error("vm {0} is placed more than once")]
    DuplicatePlacement(String),
}
