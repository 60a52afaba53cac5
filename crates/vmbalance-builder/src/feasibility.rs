//! Capacity feasibility checks.
//!
//! A problem is feasible when, for each resource, the summed VM demand
//! fits in the summed remaining host capacity and no single VM is larger
//! than what any one host has left.

use tracing::{debug, warn};
use vmbalance_core::{Host, Resource, VirtualMachine};

use crate::error::FeasibilityError;

/// Demand and remaining capacity for one resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityBalance {
    pub resource: Resource,
    /// Sum of VM requirements.
    pub demand: f64,
    /// Sum of host capacity minus existing use.
    pub available: f64,
}

impl CapacityBalance {
    pub fn of(hosts: &[Host], vms: &[VirtualMachine], resource: Resource) -> Self {
        Self {
            resource,
            demand: vms.iter().map(|vm| vm.requirement(resource)).sum(),
            available: hosts.iter().map(|h| h.remaining(resource)).sum(),
        }
    }

    pub fn headroom(&self) -> f64 {
        self.available - self.demand
    }
}

/// Reject host/VM sets whose demand cannot be served.
pub fn check_feasibility(hosts: &[Host], vms: &[VirtualMachine]) -> Result<(), FeasibilityError> {
    for resource in Resource::ALL {
        let balance = CapacityBalance::of(hosts, vms, resource);
        debug!(
            %resource,
            demand = balance.demand,
            available = balance.available,
            "capacity balance"
        );
        if balance.demand > balance.available {
            warn!(
                %resource,
                demand = balance.demand,
                available = balance.available,
                "demand exceeds remaining capacity"
            );
            return Err(FeasibilityError::InsufficientCapacity {
                resource,
                demand: balance.demand,
                available: balance.available,
            });
        }

        let largest_remaining = hosts
            .iter()
            .map(|h| h.remaining(resource))
            .fold(0.0_f64, f64::max);
        if let Some(vm) = vms.iter().find(|vm| vm.requirement(resource) > largest_remaining) {
            warn!(vm = vm.id(), %resource, "vm does not fit on any host");
            return Err(FeasibilityError::OversizedVm {
                vm: vm.id().to_string(),
                resource,
                requirement: vm.requirement(resource),
                largest_remaining,
            });
        }
    }
    Ok(())
}
