//! vmbalance-model: constrained assignment model and balance scoring.
//!
//! Turns hosts and VMs into a solver-neutral model with binary placement
//! variables, proportional-allocation constraints, and a balance objective.
//! Solving happens elsewhere, behind the [`Solver`] trait; this crate
//! checks and decodes what comes back and scores the resulting plan.
//!
//! # Components
//!
//! - **`model`**: Variables, linear expressions, labelled hard/soft constraints, evaluation
//! - **`formulate`**: Model construction from a problem and a resource priority
//! - **`convert`**: Assignment/sample conversion and per-host loads
//! - **`scorer`**: Cluster balance factor
//! - **`solver`**: Solver trait and solution checking

pub mod convert;
pub mod error;
pub mod formulate;
pub mod model;
pub mod scorer;
pub mod solver;

pub use convert::{HostLoad, apply_assignment, decode_sample, validate_assignment};
pub use error::{ModelBuildError, ModelResult, ScoringError, ScoringResult, SolveError};
pub use formulate::{ModelOptions, formulate, formulate_with, proportional_targets};
pub use model::{
    BALANCE_ERROR_LABEL, BINARY_TOLERANCE, ConstrainedModel, Constraint, ConstraintRole,
    ConstraintViolation, Evaluation, FEASIBILITY_TOLERANCE, LinearExpr, ModelSummary, Objective,
    ObjectiveSense, Sample, Sense, Strictness, VarId, Variable, VariableKind, VariableRole,
};
pub use scorer::{
    BalanceReport, ResourceBalance, ScoringWeights, balance_factor, balance_report, improvement,
    resource_balance,
};
pub use solver::{Solver, solve_and_decode};
