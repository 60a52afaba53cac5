//! vmbalance-core: shared records for VM load balancing.
//!
//! Hosts, VMs, resource ranges, priorities, and assignments, plus the
//! `vmbalance.toml` configuration. Everything here is plain data with
//! validating constructors; the builder and model crates depend on it.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BalancerConfig, GeneratorConfig, ModelConfig, ScoringConfig, SolverConfig};
pub use error::{ValidationError, ValidationResult};
pub use types::*;
