//! Abstract constrained model handed to an external solver.
//!
//! The model mixes binary assignment variables with one continuous
//! auxiliary variable, a linear objective, and labelled constraints that
//! are either hard or soft (penalized). It does not solve anything; it is
//! a description a solver adapter can serialize, plus an evaluator that
//! checks a candidate sample against it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vmbalance_core::{HostId, PenaltyKind, Priority, Resource, VmId, assignment_label};

use crate::error::{ModelBuildError, ScoringError, ScoringResult};

/// Label of the auxiliary objective variable.
pub const BALANCE_ERROR_LABEL: &str = "balance_error";

/// Relative slack allowed when checking constraints: a few ULPs of the
/// largest magnitude involved, enough for rounding in the sum and no more.
pub const FEASIBILITY_TOLERANCE: f64 = 4.0 * f64::EPSILON;

/// Distance from 0 or 1 a solver may report for a binary variable.
pub const BINARY_TOLERANCE: f64 = 1e-9;

// ── Variables ─────────────────────────────────────────────────────

/// Index of a variable in [`ConstrainedModel::variables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableKind {
    Binary,
    Continuous { lower: f64, upper: Option<f64> },
}

/// What a variable stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum VariableRole {
    /// `vm` is hosted on `host`.
    Assignment { vm: VmId, host: HostId },
    /// Upper bound on the soft resource's deviation from its targets.
    BalanceError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VarId,
    pub label: String,
    pub kind: VariableKind,
    pub role: VariableRole,
}

impl Variable {
    pub fn is_binary(&self) -> bool {
        matches!(self.kind, VariableKind::Binary)
    }
}

// ── Expressions ───────────────────────────────────────────────────

/// `constant + Σ coefficient * variable`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(id: VarId) -> Self {
        Self::new().plus(id, 1.0)
    }

    pub fn plus(mut self, id: VarId, coefficient: f64) -> Self {
        self.terms.push((id, coefficient));
        self
    }

    pub fn negated(mut self) -> Self {
        for (_, c) in &mut self.terms {
            *c = -*c;
        }
        self.constant = -self.constant;
        self
    }

    pub fn coefficient(&self, id: VarId) -> f64 {
        self.terms
            .iter()
            .filter(|(v, _)| *v == id)
            .map(|(_, c)| c)
            .sum()
    }

    pub fn evaluate(&self, sample: &Sample) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|(id, c)| c * sample.value(*id))
                .sum::<f64>()
    }

    /// `|constant| + Σ |coefficient * value|`, the scale of the rounding
    /// error in [`LinearExpr::evaluate`].
    pub fn magnitude(&self, sample: &Sample) -> f64 {
        self.constant.abs()
            + self
                .terms
                .iter()
                .map(|(id, c)| (c * sample.value(*id)).abs())
                .sum::<f64>()
    }

    pub fn max_var(&self) -> Option<VarId> {
        self.terms.iter().map(|(id, _)| *id).max()
    }

    /// Evaluate while treating `skip` as zero.
    pub fn evaluate_without(&self, sample: &Sample, skip: VarId) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .filter(|(id, _)| *id != skip)
                .map(|(id, c)| c * sample.value(*id))
                .sum::<f64>()
    }
}

// ── Constraints ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    Le,
    Eq,
    Ge,
}

/// Whether a constraint must hold or is traded off against the objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strictness {
    Hard,
    Soft { weight: f64, penalty: PenaltyKind },
}

impl Strictness {
    pub fn is_hard(&self) -> bool {
        matches!(self, Strictness::Hard)
    }
}

/// Why a constraint exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConstraintRole {
    /// Exactly one host per VM.
    OneHot { vm: VmId },
    /// Host load for `resource` within its proportional share.
    Allocation { host: HostId, resource: Resource },
    /// Load minus target bounded by the balance error.
    BalanceUpper { host: HostId },
    /// Target minus load bounded by the balance error.
    BalanceLower { host: HostId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub label: String,
    pub lhs: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
    pub strictness: Strictness,
    pub role: ConstraintRole,
}

impl Constraint {
    /// How far `sample` is from satisfying this constraint; zero when it
    /// holds within [`FEASIBILITY_TOLERANCE`] of `max(1, |rhs|, |lhs terms|)`.
    pub fn violation(&self, sample: &Sample) -> f64 {
        let lhs = self.lhs.evaluate(sample);
        let raw = match self.sense {
            Sense::Le => lhs - self.rhs,
            Sense::Ge => self.rhs - lhs,
            Sense::Eq => (lhs - self.rhs).abs(),
        };
        let scale = self.lhs.magnitude(sample).max(self.rhs.abs()).max(1.0);
        if raw <= FEASIBILITY_TOLERANCE * scale {
            0.0
        } else {
            raw
        }
    }

    pub fn is_hard(&self) -> bool {
        self.strictness.is_hard()
    }

    pub fn is_one_hot(&self) -> bool {
        matches!(self.role, ConstraintRole::OneHot { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub sense: ObjectiveSense,
    pub expr: LinearExpr,
}

// ── Samples and evaluation ────────────────────────────────────────

/// One value per model variable, indexed by [`VarId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample {
    values: Vec<f64>,
}

impl Sample {
    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Value of `id`; variables past the end read as zero.
    pub fn value(&self, id: VarId) -> f64 {
        self.values.get(id.0).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, id: VarId, value: f64) {
        if id.0 >= self.values.len() {
            self.values.resize(id.0 + 1, 0.0);
        }
        self.values[id.0] = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A constraint that a sample does not satisfy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintViolation {
    pub label: String,
    pub amount: f64,
    pub hard: bool,
    /// Objective penalty charged (zero for hard constraints).
    pub penalty: f64,
}

/// Result of checking a sample against a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Objective value before penalties.
    pub objective: f64,
    /// Sum of soft-constraint penalties.
    pub penalty: f64,
    pub violations: Vec<ConstraintViolation>,
}

impl Evaluation {
    /// True when no hard constraint is violated.
    pub fn is_feasible(&self) -> bool {
        self.violations.iter().all(|v| !v.hard)
    }

    /// Objective plus soft penalties.
    pub fn energy(&self) -> f64 {
        self.objective + self.penalty
    }

    pub fn hard_violations(&self) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(|v| v.hard)
    }

    pub fn soft_violations(&self) -> impl Iterator<Item = &ConstraintViolation> {
        self.violations.iter().filter(|v| !v.hard)
    }
}

/// Variable and constraint counts, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub binary_variables: usize,
    pub continuous_variables: usize,
    pub hard_constraints: usize,
    pub soft_constraints: usize,
    pub one_hot_constraints: usize,
}

// ── Model ─────────────────────────────────────────────────────────

/// Variables, objective, and labelled constraints for one problem.
///
/// Assignment variables are laid out VM-major: the variable for VM `i`
/// on host `j` has id `i * host_count + j`. The balance error variable
/// comes last. Deserialization rebuilds that layout and rejects documents
/// that disagree with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelRecord")]
pub struct ConstrainedModel {
    priority: Priority,
    vm_ids: Vec<VmId>,
    host_ids: Vec<HostId>,
    vm_index: BTreeMap<VmId, usize>,
    host_index: BTreeMap<HostId, usize>,
    variables: Vec<Variable>,
    objective: Objective,
    constraints: Vec<Constraint>,
}

/// Wire form of [`ConstrainedModel`]; the id indexes are derived.
#[derive(Deserialize)]
struct ModelRecord {
    priority: Priority,
    vm_ids: Vec<VmId>,
    host_ids: Vec<HostId>,
    variables: Vec<Variable>,
    objective: Objective,
    constraints: Vec<Constraint>,
}

impl TryFrom<ModelRecord> for ConstrainedModel {
    type Error = ModelBuildError;

    fn try_from(record: ModelRecord) -> Result<Self, Self::Error> {
        if record.host_ids.is_empty() {
            return Err(ModelBuildError::NoHosts);
        }
        if record.vm_ids.is_empty() {
            return Err(ModelBuildError::NoVms);
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = record.host_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(ModelBuildError::DuplicateHost(dup.clone()));
        }
        seen.clear();
        if let Some(dup) = record.vm_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(ModelBuildError::DuplicateVm(dup.clone()));
        }

        let mut model = Self::with_variables(record.priority, record.vm_ids, record.host_ids);
        if model.variables != record.variables {
            return Err(ModelBuildError::InconsistentModel(
                "variables do not follow the vm-major layout".to_string(),
            ));
        }

        let len = model.variables.len();
        let out_of_range = |expr: &LinearExpr| expr.max_var().is_some_and(|id| id.0 >= len);
        if out_of_range(&record.objective.expr) {
            return Err(ModelBuildError::InconsistentModel(
                "objective references an unknown variable".to_string(),
            ));
        }
        if let Some(c) = record.constraints.iter().find(|c| out_of_range(&c.lhs)) {
            return Err(ModelBuildError::InconsistentModel(format!(
                "constraint {} references an unknown variable",
                c.label
            )));
        }

        model.objective = record.objective;
        model.constraints = record.constraints;
        Ok(model)
    }
}

impl ConstrainedModel {
    /// Declare the assignment variables and the balance error variable,
    /// with an empty minimization objective and no constraints.
    ///
    /// Ids must be unique; the formulator checks that before calling.
    pub(crate) fn with_variables(
        priority: Priority,
        vm_ids: Vec<VmId>,
        host_ids: Vec<HostId>,
    ) -> Self {
        let mut variables = Vec::with_capacity(vm_ids.len() * host_ids.len() + 1);
        for vm in &vm_ids {
            for host in &host_ids {
                variables.push(Variable {
                    id: VarId(variables.len()),
                    label: assignment_label(vm, host),
                    kind: VariableKind::Binary,
                    role: VariableRole::Assignment {
                        vm: vm.clone(),
                        host: host.clone(),
                    },
                });
            }
        }
        variables.push(Variable {
            id: VarId(variables.len()),
            label: BALANCE_ERROR_LABEL.to_string(),
            kind: VariableKind::Continuous {
                lower: 0.0,
                upper: None,
            },
            role: VariableRole::BalanceError,
        });

        let vm_index = vm_ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let host_index = host_ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();

        Self {
            priority,
            vm_ids,
            host_ids,
            vm_index,
            host_index,
            variables,
            objective: Objective {
                sense: ObjectiveSense::Minimize,
                expr: LinearExpr::new(),
            },
            constraints: Vec::new(),
        }
    }

    pub(crate) fn set_objective(&mut self, objective: Objective) {
        self.objective = objective;
    }

    pub(crate) fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn vm_ids(&self) -> &[VmId] {
        &self.vm_ids
    }

    pub fn host_ids(&self) -> &[HostId] {
        &self.host_ids
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint(&self, label: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.label == label)
    }

    /// The binary variable for `vm` on `host`.
    pub fn assignment_var(&self, vm: &str, host: &str) -> Option<VarId> {
        let i = *self.vm_index.get(vm)?;
        let j = *self.host_index.get(host)?;
        Some(VarId(i * self.host_ids.len() + j))
    }

    /// Always present: every constructor declares it last.
    pub fn balance_error_var(&self) -> VarId {
        VarId(self.variables.len() - 1)
    }

    pub(crate) fn vm_position(&self, vm: &str) -> Option<usize> {
        self.vm_index.get(vm).copied()
    }

    pub(crate) fn host_position(&self, host: &str) -> Option<usize> {
        self.host_index.get(host).copied()
    }

    /// A sample with every variable at zero.
    pub fn empty_sample(&self) -> Sample {
        Sample::zeros(self.variables.len())
    }

    /// JSON form of the model, for solver adapters that take a document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn summary(&self) -> ModelSummary {
        let binary_variables = self.variables.iter().filter(|v| v.is_binary()).count();
        let hard_constraints = self.constraints.iter().filter(|c| c.is_hard()).count();
        ModelSummary {
            binary_variables,
            continuous_variables: self.variables.len() - binary_variables,
            hard_constraints,
            soft_constraints: self.constraints.len() - hard_constraints,
            one_hot_constraints: self.constraints.iter().filter(|c| c.is_one_hot()).count(),
        }
    }

    /// Check `sample` against every constraint and price the objective.
    pub fn evaluate(&self, sample: &Sample) -> ScoringResult<Evaluation> {
        if sample.len() != self.variables.len() {
            return Err(ScoringError::SampleSize {
                expected: self.variables.len(),
                actual: sample.len(),
            });
        }

        let mut penalty = 0.0;
        let mut violations = Vec::new();
        for constraint in &self.constraints {
            let amount = constraint.violation(sample);
            if amount == 0.0 {
                continue;
            }
            let charged = match constraint.strictness {
                Strictness::Hard => 0.0,
                Strictness::Soft { weight, penalty: kind } => kind.apply(weight, amount),
            };
            penalty += charged;
            violations.push(ConstraintViolation {
                label: constraint.label.clone(),
                amount,
                hard: constraint.is_hard(),
                penalty: charged,
            });
        }

        Ok(Evaluation {
            objective: self.objective.expr.evaluate(sample),
            penalty,
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_model() -> ConstrainedModel {
        ConstrainedModel::with_variables(
            Priority::Cpu,
            vec!["vm1".to_string(), "vm2".to_string()],
            vec!["h1".to_string(), "h2".to_string(), "h3".to_string()],
        )
    }

    #[test]
    fn variables_are_vm_major() {
        let model = make_model();
        assert_eq!(model.variables().len(), 7);
        assert_eq!(model.assignment_var("vm2", "h1"), Some(VarId(3)));
        assert_eq!(model.variables()[3].label, "vm2_on_h1");
        assert_eq!(model.balance_error_var(), VarId(6));
        assert_eq!(model.variables()[6].label, BALANCE_ERROR_LABEL);
        assert_eq!(model.assignment_var("vm3", "h1"), None);
    }

    #[test]
    fn linear_expr_evaluates() {
        let mut sample = Sample::zeros(3);
        sample.set(VarId(0), 1.0);
        sample.set(VarId(2), 4.0);
        let expr = LinearExpr {
            terms: vec![(VarId(0), 2.0), (VarId(1), 5.0), (VarId(2), -0.5)],
            constant: 3.0,
        };
        assert_eq!(expr.evaluate(&sample), 3.0);
        assert_eq!(expr.evaluate_without(&sample, VarId(2)), 5.0);
        assert_eq!(expr.coefficient(VarId(1)), 5.0);
    }

    #[test]
    fn violation_by_sense() {
        let sample = Sample::from_values(vec![3.0]);
        let make = |sense, rhs| Constraint {
            label: "c".to_string(),
            lhs: LinearExpr::variable(VarId(0)),
            sense,
            rhs,
            strictness: Strictness::Hard,
            role: ConstraintRole::OneHot { vm: "vm1".to_string() },
        };
        assert_eq!(make(Sense::Le, 2.0).violation(&sample), 1.0);
        assert_eq!(make(Sense::Le, 3.0).violation(&sample), 0.0);
        assert_eq!(make(Sense::Ge, 5.0).violation(&sample), 2.0);
        assert_eq!(make(Sense::Eq, 1.0).violation(&sample), 2.0);
        // one ULP of rounding passes, a real gap does not
        assert_eq!(make(Sense::Eq, 3.0 + 2.0 * f64::EPSILON).violation(&sample), 0.0);
        assert!(make(Sense::Eq, 3.0 + 1e-12).violation(&sample) > 0.0);
    }

    #[test]
    fn tiny_overshoot_on_a_large_rhs_is_a_violation() {
        let sample = Sample::from_values(vec![1.0, 1.0]);
        let constraint = Constraint {
            label: "cpu_A".to_string(),
            lhs: LinearExpr::new().plus(VarId(0), 500.0).plus(VarId(1), 2e-7),
            sense: Sense::Le,
            rhs: 500.0000001,
            strictness: Strictness::Hard,
            role: ConstraintRole::Allocation {
                host: "A".to_string(),
                resource: Resource::Cpu,
            },
        };
        let amount = constraint.violation(&sample);
        assert!(amount > 5e-8 && amount < 2e-7, "amount {amount}");
    }

    #[test]
    fn json_round_trips() {
        let mut model = make_model();
        let x = model.assignment_var("vm1", "h2").unwrap();
        model.add_constraint(Constraint {
            label: "discrete_vm1".to_string(),
            lhs: LinearExpr::variable(x),
            sense: Sense::Eq,
            rhs: 1.0,
            strictness: Strictness::Hard,
            role: ConstraintRole::OneHot { vm: "vm1".to_string() },
        });

        let json = model.to_json().unwrap();
        let back: ConstrainedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
        assert_eq!(back.assignment_var("vm1", "h2"), Some(x));
    }

    #[test]
    fn deserialize_rejects_inconsistent_documents() {
        let model = make_model();
        let mut doc: serde_json::Value = serde_json::from_str(&model.to_json().unwrap()).unwrap();

        let mut no_vars = doc.clone();
        no_vars["variables"] = serde_json::json!([]);
        let err = serde_json::from_value::<ConstrainedModel>(no_vars).unwrap_err();
        assert!(err.to_string().contains("vm-major"), "{err}");

        let mut no_hosts = doc.clone();
        no_hosts["host_ids"] = serde_json::json!([]);
        assert!(serde_json::from_value::<ConstrainedModel>(no_hosts).is_err());

        doc["constraints"] = serde_json::json!([{
            "label": "stray",
            "lhs": { "terms": [[99, 1.0]], "constant": 0.0 },
            "sense": "le",
            "rhs": 1.0,
            "strictness": { "type": "hard" },
            "role": { "role": "one_hot", "vm": "vm1" }
        }]);
        let err = serde_json::from_value::<ConstrainedModel>(doc).unwrap_err();
        assert!(err.to_string().contains("stray"), "{err}");
    }

    #[test]
    fn evaluate_prices_soft_violations_only() {
        let mut model = make_model();
        let x = model.assignment_var("vm1", "h1").unwrap();
        model.add_constraint(Constraint {
            label: "hard".to_string(),
            lhs: LinearExpr::variable(x),
            sense: Sense::Le,
            rhs: 0.0,
            strictness: Strictness::Hard,
            role: ConstraintRole::OneHot { vm: "vm1".to_string() },
        });
        model.add_constraint(Constraint {
            label: "soft".to_string(),
            lhs: LinearExpr::new().plus(x, 3.0),
            sense: Sense::Le,
            rhs: 1.0,
            strictness: Strictness::Soft {
                weight: 2.0,
                penalty: PenaltyKind::Quadratic,
            },
            role: ConstraintRole::Allocation {
                host: "h1".to_string(),
                resource: Resource::Memory,
            },
        });

        let mut sample = model.empty_sample();
        sample.set(x, 1.0);
        let evaluation = model.evaluate(&sample).unwrap();

        assert!(!evaluation.is_feasible());
        assert_eq!(evaluation.hard_violations().count(), 1);
        assert_eq!(evaluation.penalty, 8.0);
        assert_eq!(evaluation.energy(), 8.0);
    }

    #[test]
    fn evaluate_rejects_wrong_sample_size() {
        let model = make_model();
        assert_eq!(
            model.evaluate(&Sample::zeros(2)),
            Err(ScoringError::SampleSize { expected: 7, actual: 2 })
        );
    }
}
