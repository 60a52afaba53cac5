//! Translate hosts and VMs into a [`ConstrainedModel`].
//!
//! For each resource `r` and host `h` the proportional target is
//! `capacity(h, r) * total_demand(r) / total_capacity(r)`. The prioritized
//! resource must stay under its target (hard); the other resource is
//! asked to (soft) and its largest deviation from target is minimized.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vmbalance_core::{Host, ModelConfig, PenaltyKind, Priority, Resource, VirtualMachine};

use crate::error::{ModelBuildError, ModelResult};
use crate::model::{
    ConstrainedModel, Constraint, ConstraintRole, LinearExpr, Objective, ObjectiveSense, Sense,
    Strictness,
};

/// Penalty settings for the soft allocation constraints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    pub soft_penalty_weight: f64,
    pub soft_penalty: PenaltyKind,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            soft_penalty_weight: 1.0,
            soft_penalty: PenaltyKind::Quadratic,
        }
    }
}

impl ModelOptions {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            soft_penalty_weight: config.soft_penalty_weight,
            soft_penalty: config.soft_penalty,
        }
    }

    /// Strictness of the allocation constraint for `resource`.
    fn strictness(&self, priority: Priority, resource: Resource) -> Strictness {
        if priority.is_prioritized(resource) {
            Strictness::Hard
        } else {
            Strictness::Soft {
                weight: self.soft_penalty_weight,
                penalty: self.soft_penalty,
            }
        }
    }
}

/// Build the balancing model with default soft-penalty settings.
pub fn formulate(
    hosts: &[Host],
    vms: &[VirtualMachine],
    priority: Priority,
) -> ModelResult<ConstrainedModel> {
    formulate_with(hosts, vms, priority, &ModelOptions::default())
}

/// Build the balancing model.
pub fn formulate_with(
    hosts: &[Host],
    vms: &[VirtualMachine],
    priority: Priority,
    options: &ModelOptions,
) -> ModelResult<ConstrainedModel> {
    validate_inputs(hosts, vms, priority, options)?;

    let mut model = ConstrainedModel::with_variables(
        priority,
        vms.iter().map(|vm| vm.id().to_string()).collect(),
        hosts.iter().map(|h| h.id().to_string()).collect(),
    );

    let cpu_targets = proportional_targets(hosts, vms, Resource::Cpu);
    let mem_targets = proportional_targets(hosts, vms, Resource::Memory);
    let targets = |resource: Resource| match resource {
        Resource::Cpu => &cpu_targets,
        Resource::Memory => &mem_targets,
    };

    for (index, host) in hosts.iter().enumerate() {
        for resource in Resource::ALL {
            let target = targets(resource)[index];
            debug!(host = host.id(), %resource, target, "proportional target");
            let strictness = options.strictness(priority, resource);
            let constraint =
                allocation_constraint(&model, host, vms, resource, target, strictness);
            model.add_constraint(constraint);
        }
    }

    for vm in vms {
        model.add_constraint(one_hot_constraint(&model, vm));
    }

    let soft = priority.soft_resource();
    let balance_error = model.balance_error_var();
    for (index, host) in hosts.iter().enumerate() {
        let target = targets(soft)[index];
        let load = load_terms(&model, host, vms, soft);
        let headroom = target - host.used(soft);

        // load - target - e <= 0
        model.add_constraint(Constraint {
            label: format!("balance_hi_{}", host.id()),
            lhs: load.clone().plus(balance_error, -1.0),
            sense: Sense::Le,
            rhs: headroom,
            strictness: Strictness::Hard,
            role: ConstraintRole::BalanceUpper {
                host: host.id().to_string(),
            },
        });

        // target - load - e <= 0
        model.add_constraint(Constraint {
            label: format!("balance_lo_{}", host.id()),
            lhs: load.negated().plus(balance_error, -1.0),
            sense: Sense::Le,
            rhs: -headroom,
            strictness: Strictness::Hard,
            role: ConstraintRole::BalanceLower {
                host: host.id().to_string(),
            },
        });
    }

    model.set_objective(Objective {
        sense: ObjectiveSense::Minimize,
        expr: LinearExpr::variable(balance_error),
    });

    let summary = model.summary();
    info!(
        %priority,
        hosts = hosts.len(),
        vms = vms.len(),
        binaries = summary.binary_variables,
        hard = summary.hard_constraints,
        soft = summary.soft_constraints,
        "formulated balancing model"
    );
    Ok(model)
}

fn validate_inputs(
    hosts: &[Host],
    vms: &[VirtualMachine],
    priority: Priority,
    options: &ModelOptions,
) -> ModelResult<()> {
    if hosts.is_empty() {
        return Err(ModelBuildError::NoHosts);
    }
    if vms.is_empty() {
        return Err(ModelBuildError::NoVms);
    }
    if !(options.soft_penalty_weight.is_finite() && options.soft_penalty_weight > 0.0) {
        return Err(ModelBuildError::InvalidOptions(format!(
            "soft penalty weight must be positive, got {}",
            options.soft_penalty_weight
        )));
    }

    let mut seen = HashSet::new();
    if let Some(host) = hosts.iter().find(|h| !seen.insert(h.id())) {
        return Err(ModelBuildError::DuplicateHost(host.id().to_string()));
    }
    let mut seen = HashSet::new();
    if let Some(vm) = vms.iter().find(|vm| !seen.insert(vm.id())) {
        return Err(ModelBuildError::DuplicateVm(vm.id().to_string()));
    }

    let hard = priority.hard_resource();
    if let Some(host) = hosts.iter().find(|h| h.capacity(hard) == 0.0) {
        return Err(ModelBuildError::ZeroCapacity {
            host: host.id().to_string(),
            resource: hard,
        });
    }
    let soft = priority.soft_resource();
    if hosts.iter().all(|h| h.capacity(soft) == 0.0) {
        return Err(ModelBuildError::NoCapacity { resource: soft });
    }
    Ok(())
}

/// Each host's fair share of the total VM demand for `resource`.
///
/// Callers guarantee a non-zero total capacity.
pub fn proportional_targets(
    hosts: &[Host],
    vms: &[VirtualMachine],
    resource: Resource,
) -> Vec<f64> {
    let total_demand: f64 = vms.iter().map(|vm| vm.requirement(resource)).sum();
    let total_capacity: f64 = hosts.iter().map(|h| h.capacity(resource)).sum();
    hosts
        .iter()
        .map(|h| h.capacity(resource) * total_demand / total_capacity)
        .collect()
}

/// `Σ_vm requirement(vm, resource) * x[vm, host]`, without existing use.
fn load_terms(
    model: &ConstrainedModel,
    host: &Host,
    vms: &[VirtualMachine],
    resource: Resource,
) -> LinearExpr {
    vms.iter().fold(LinearExpr::new(), |expr, vm| {
        match model.assignment_var(vm.id(), host.id()) {
            Some(var) => expr.plus(var, vm.requirement(resource)),
            None => expr,
        }
    })
}

/// `existing_use + load <= target`, with existing use moved to the
/// right-hand side. Hard or soft depending on `strictness`; both
/// resources go through here so their shape stays identical.
fn allocation_constraint(
    model: &ConstrainedModel,
    host: &Host,
    vms: &[VirtualMachine],
    resource: Resource,
    target: f64,
    strictness: Strictness,
) -> Constraint {
    Constraint {
        label: format!("{}_{}", resource.label(), host.id()),
        lhs: load_terms(model, host, vms, resource),
        sense: Sense::Le,
        rhs: target - host.used(resource),
        strictness,
        role: ConstraintRole::Allocation {
            host: host.id().to_string(),
            resource,
        },
    }
}

/// `Σ_host x[vm, host] == 1`.
fn one_hot_constraint(model: &ConstrainedModel, vm: &VirtualMachine) -> Constraint {
    let lhs = model
        .host_ids()
        .iter()
        .filter_map(|host| model.assignment_var(vm.id(), host))
        .fold(LinearExpr::new(), |expr, var| expr.plus(var, 1.0));
    Constraint {
        label: format!("discrete_{}", vm.id()),
        lhs,
        sense: Sense::Eq,
        rhs: 1.0,
        strictness: Strictness::Hard,
        role: ConstraintRole::OneHot {
            vm: vm.id().to_string(),
        },
    }
}
