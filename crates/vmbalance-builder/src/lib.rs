//! vmbalance-builder: problem instances for the balancing model.
//!
//! Generates hosts and VMs from parameter ranges (seedable, for demos and
//! tests) and validates that total demand fits in remaining capacity
//! before anything is handed to the formulator.
//!
//! # Components
//!
//! - **`generator`**: Seeded random hosts, VMs, and a lopsided starting placement
//! - **`feasibility`**: Capacity checks for generated or user-edited problems

pub mod error;
pub mod feasibility;
pub mod generator;

pub use error::{BuildError, BuildResult, FeasibilityError};
pub use feasibility::{CapacityBalance, check_feasibility};
pub use generator::{GeneratorParams, Problem, build_problem, build_problem_with_rng};
