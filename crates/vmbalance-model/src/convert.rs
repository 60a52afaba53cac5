//! Conversions between assignments, solver samples, and host loads.
//!
//! Bridges the solver's view (one value per model variable) and the
//! problem's view (VM id -> host id), and rebuilds per-host usage from a
//! plan so it can be scored or displayed.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;
use vmbalance_core::{Assignment, Host, Resource, VirtualMachine};

use crate::error::{ScoringError, ScoringResult};
use crate::model::{BINARY_TOLERANCE, ConstrainedModel, ConstraintRole, Sample};

/// Load on one host after applying an assignment on top of existing use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLoad {
    pub host_id: String,
    pub cpu_load: f64,
    pub memory_load: f64,
    pub cpu_capacity: f64,
    pub memory_capacity: f64,
    /// VMs placed on this host, in assignment order.
    pub vms: Vec<String>,
}

impl HostLoad {
    pub fn load(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_load,
            Resource::Memory => self.memory_load,
        }
    }

    pub fn capacity(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_capacity,
            Resource::Memory => self.memory_capacity,
        }
    }

    /// Fraction of capacity in use; `None` for a zero-capacity resource.
    pub fn utilization(&self, resource: Resource) -> Option<f64> {
        let capacity = self.capacity(resource);
        (capacity > 0.0).then(|| self.load(resource) / capacity)
    }

    pub fn is_overloaded(&self) -> bool {
        Resource::ALL
            .iter()
            .any(|&r| self.load(r) > self.capacity(r))
    }
}

/// Check that `assignment` places every VM in `vms` on a host in `hosts`
/// and mentions nothing else.
pub fn validate_assignment(
    hosts: &[Host],
    vms: &[VirtualMachine],
    assignment: &Assignment,
) -> ScoringResult<()> {
    let mut host_ids = HashSet::new();
    for host in hosts {
        if !host_ids.insert(host.id()) {
            return Err(ScoringError::DuplicateId(host.id().to_string()));
        }
    }
    let mut vm_ids = HashSet::new();
    for vm in vms {
        if !vm_ids.insert(vm.id()) {
            return Err(ScoringError::DuplicateId(vm.id().to_string()));
        }
    }

    for (vm, host) in assignment.iter() {
        if !vm_ids.contains(vm) {
            return Err(ScoringError::UnknownVm(vm.to_string()));
        }
        if !host_ids.contains(host) {
            return Err(ScoringError::UnknownHost(host.to_string()));
        }
    }
    if let Some(vm) = vms.iter().find(|vm| assignment.host_of(vm.id()).is_none()) {
        return Err(ScoringError::Unassigned(vm.id().to_string()));
    }
    Ok(())
}

/// Per-host loads under `assignment`, in host order.
pub fn apply_assignment(
    hosts: &[Host],
    vms: &[VirtualMachine],
    assignment: &Assignment,
) -> ScoringResult<Vec<HostLoad>> {
    validate_assignment(hosts, vms, assignment)?;

    let mut loads: Vec<HostLoad> = hosts
        .iter()
        .map(|h| HostLoad {
            host_id: h.id().to_string(),
            cpu_load: h.used(Resource::Cpu),
            memory_load: h.used(Resource::Memory),
            cpu_capacity: h.capacity(Resource::Cpu),
            memory_capacity: h.capacity(Resource::Memory),
            vms: Vec::new(),
        })
        .collect();
    let position: HashMap<&str, usize> =
        hosts.iter().enumerate().map(|(i, h)| (h.id(), i)).collect();

    for vm in vms {
        // Validated above: every VM is assigned to a known host.
        let Some(index) = assignment.host_of(vm.id()).and_then(|h| position.get(h)) else {
            continue;
        };
        let load = &mut loads[*index];
        load.cpu_load += vm.requirement(Resource::Cpu);
        load.memory_load += vm.requirement(Resource::Memory);
        load.vms.push(vm.id().to_string());
    }
    Ok(loads)
}

impl ConstrainedModel {
    /// Full variable sample for `assignment`: assignment binaries set, and
    /// the balance error at the smallest value its bounds allow.
    pub fn sample_for(&self, assignment: &Assignment) -> ScoringResult<Sample> {
        for (vm, host) in assignment.iter() {
            if self.vm_position(vm).is_none() {
                return Err(ScoringError::UnknownVm(vm.to_string()));
            }
            if self.host_position(host).is_none() {
                return Err(ScoringError::UnknownHost(host.to_string()));
            }
        }

        let mut sample = self.empty_sample();
        for vm in self.vm_ids() {
            let host = assignment
                .host_of(vm)
                .ok_or_else(|| ScoringError::Unassigned(vm.clone()))?;
            if let Some(var) = self.assignment_var(vm, host) {
                sample.set(var, 1.0);
            }
        }

        let balance_error = self.balance_error_var();
        let needed = self
            .constraints()
            .iter()
            .filter(|c| {
                matches!(
                    c.role,
                    ConstraintRole::BalanceUpper { .. } | ConstraintRole::BalanceLower { .. }
                )
            })
            .map(|c| c.lhs.evaluate_without(&sample, balance_error) - c.rhs)
            .fold(0.0_f64, f64::max);
        sample.set(balance_error, needed);
        Ok(sample)
    }
}

/// Decode a solver sample into an assignment.
///
/// Every assignment variable must be 0 or 1 and every VM must have
/// exactly one selected host.
pub fn decode_sample(model: &ConstrainedModel, sample: &Sample) -> ScoringResult<Assignment> {
    let expected = model.variables().len();
    if sample.len() != expected {
        return Err(ScoringError::SampleSize {
            expected,
            actual: sample.len(),
        });
    }

    let mut assignment = Assignment::new();
    for vm in model.vm_ids() {
        let mut selected = Vec::new();
        for host in model.host_ids() {
            let Some(var) = model.assignment_var(vm, host) else {
                continue;
            };
            let value = sample.value(var);
            if value.is_finite() && (value - 1.0).abs() <= BINARY_TOLERANCE {
                selected.push(host);
            } else if !value.is_finite() || value.abs() > BINARY_TOLERANCE {
                return Err(ScoringError::NonBinary {
                    label: model.variables()[var.0].label.clone(),
                    value,
                });
            }
        }

        match selected.as_slice() {
            [host] => {
                assignment.assign(vm.as_str(), host.as_str());
            }
            [] => return Err(ScoringError::Unassigned(vm.clone())),
            many => {
                warn!(vm = %vm, hosts = many.len(), "sample places vm on several hosts");
                return Err(ScoringError::MultipleHosts {
                    vm: vm.clone(),
                    count: many.len(),
                });
            }
        }
    }
    Ok(assignment)
}
