//! Solver seam.
//!
//! A [`Solver`] takes a [`ConstrainedModel`] and returns one value per model
//! variable. Concrete solvers (remote hybrid services, local MIP engines)
//! live outside this crate; everything here is about checking what they
//! hand back.

use std::time::Duration;

use tracing::{info, warn};
use vmbalance_core::Assignment;

use crate::convert::decode_sample;
use crate::error::SolveError;
use crate::model::{ConstrainedModel, Sample};

/// An optimizer for constrained assignment models.
pub trait Solver: Send + Sync {
    /// Human-readable solver name, used in logs.
    fn name(&self) -> &str;

    /// Return the best sample found within `time_limit`.
    fn solve(&self, model: &ConstrainedModel, time_limit: Duration) -> Result<Sample, SolveError>;
}

/// Run `solver` and decode its sample into an assignment.
///
/// Samples that break a hard constraint are rejected with
/// [`SolveError::Infeasible`] listing the violated labels.
pub fn solve_and_decode(
    solver: &dyn Solver,
    model: &ConstrainedModel,
    time_limit: Duration,
) -> Result<Assignment, SolveError> {
    info!(
        solver = solver.name(),
        variables = model.variables().len(),
        constraints = model.constraints().len(),
        time_limit_secs = time_limit.as_secs(),
        "submitting model"
    );

    let sample = solver.solve(model, time_limit)?;
    let evaluation = model.evaluate(&sample)?;
    if !evaluation.is_feasible() {
        let violated: Vec<String> = evaluation
            .hard_violations()
            .map(|v| v.label.clone())
            .collect();
        warn!(
            solver = solver.name(),
            violated = violated.len(),
            "solver returned an infeasible sample"
        );
        return Err(SolveError::Infeasible { violated });
    }

    let assignment = decode_sample(model, &sample)?;
    info!(
        solver = solver.name(),
        objective = evaluation.objective,
        penalty = evaluation.penalty,
        "solution accepted"
    );
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoringError;
    use crate::formulate::formulate;
    use vmbalance_core::{Host, Priority, VirtualMachine};

    /// Returns a fixed sample regardless of the model.
    struct FixedSolver(Sample);

    impl Solver for FixedSolver {
        fn name(&self) -> &str {
            "fixed"
        }

        fn solve(
            &self,
            _model: &ConstrainedModel,
            _time_limit: Duration,
        ) -> Result<Sample, SolveError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSolver(SolveError);

    impl Solver for FailingSolver {
        fn name(&self) -> &str {
            "failing"
        }

        fn solve(
            &self,
            _model: &ConstrainedModel,
            _time_limit: Duration,
        ) -> Result<Sample, SolveError> {
            Err(self.0.clone())
        }
    }

    fn make_model() -> ConstrainedModel {
        let hosts = vec![
            Host::idle("A", 100.0, 100.0).unwrap(),
            Host::idle("B", 100.0, 100.0).unwrap(),
        ];
        let vms = vec![
            VirtualMachine::new("vm1", 50.0, 10.0).unwrap(),
            VirtualMachine::new("vm2", 50.0, 10.0).unwrap(),
        ];
        formulate(&hosts, &vms, Priority::Cpu).unwrap()
    }

    const LIMIT: Duration = Duration::from_secs(10);

    #[test]
    fn accepts_feasible_sample() {
        let model = make_model();
        let plan: Assignment = [("vm1", "A"), ("vm2", "B")].into_iter().collect();
        let solver = FixedSolver(model.sample_for(&plan).unwrap());

        assert_eq!(solve_and_decode(&solver, &model, LIMIT).unwrap(), plan);
    }

    #[test]
    fn rejects_hard_violations() {
        let model = make_model();
        let stacked: Assignment = [("vm1", "A"), ("vm2", "A")].into_iter().collect();
        let solver = FixedSolver(model.sample_for(&stacked).unwrap());

        match solve_and_decode(&solver, &model, LIMIT) {
            Err(SolveError::Infeasible { violated }) => {
                assert_eq!(violated, vec!["cpu_A".to_string()]);
            }
            other => panic!("expected infeasible, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_sample_size() {
        let model = make_model();
        let solver = FixedSolver(Sample::zeros(2));

        assert_eq!(
            solve_and_decode(&solver, &model, LIMIT),
            Err(SolveError::InvalidSolution(ScoringError::SampleSize {
                expected: 5,
                actual: 2,
            }))
        );
    }

    #[test]
    fn passes_solver_errors_through() {
        let model = make_model();
        let solver = FailingSolver(SolveError::Timeout(LIMIT));
        assert_eq!(
            solve_and_decode(&solver, &model, LIMIT),
            Err(SolveError::Timeout(LIMIT))
        );

        let solver = FailingSolver(SolveError::Unreachable("connection refused".into()));
        assert!(matches!(
            solve_and_decode(&solver, &model, LIMIT),
            Err(SolveError::Unreachable(_))
        ));
    }
}
