//! Cluster balance factor.
//!
//! Scores how evenly a plan spreads load over the cluster. Each resource
//! is scored from the capacity-weighted coefficient of variation of host
//! utilization:
//!
//! ```text
//! mu    = sum(load) / sum(capacity)
//! sigma = sqrt(sum(capacity_h * (u_h - mu)^2) / sum(capacity))
//! score = 1 / (1 + sigma / mu)
//! ```
//!
//! The two resource scores are combined as a weighted mean that favours
//! the prioritized resource. The factor lies in (0, 1] and reaches 1 only
//! when every host runs at the same utilization in both resources.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmbalance_core::{Assignment, Host, Priority, Resource, ScoringConfig, VirtualMachine};

use crate::convert::{HostLoad, apply_assignment};
use crate::error::{ScoringError, ScoringResult};

/// Weights of the prioritized and the other resource in the combined factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub priority: f64,
    pub other: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            priority: 10.0,
            other: 1.0,
        }
    }
}

impl ScoringWeights {
    pub fn from_config(config: &ScoringConfig) -> ScoringResult<Self> {
        let weights = Self {
            priority: config.priority_weight,
            other: config.other_weight,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// The prioritized resource must weigh at least as much as the other,
    /// and both must be positive.
    pub fn validate(&self) -> ScoringResult<()> {
        let valid = self.priority.is_finite()
            && self.other.is_finite()
            && self.other > 0.0
            && self.priority >= self.other;
        if valid {
            Ok(())
        } else {
            Err(ScoringError::InvalidWeights {
                priority: self.priority,
                other: self.other,
            })
        }
    }
}

/// Utilization statistics and score for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBalance {
    pub resource: Resource,
    /// Cluster-wide utilization, `sum(load) / sum(capacity)`.
    pub mean_utilization: f64,
    pub min_utilization: f64,
    pub max_utilization: f64,
    /// `max_utilization - min_utilization`.
    pub spread: f64,
    /// Capacity-weighted standard deviation of host utilization.
    pub deviation: f64,
    /// `deviation / mean_utilization`, 0 for an unloaded cluster.
    pub dispersion: f64,
    pub score: f64,
}

/// Balance of a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub priority: Priority,
    pub cpu: ResourceBalance,
    pub memory: ResourceBalance,
    /// Weighted combination of the two resource scores.
    pub factor: f64,
}

impl BalanceReport {
    pub fn get(&self, resource: Resource) -> &ResourceBalance {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
        }
    }

    pub fn improvement_over(&self, before: &BalanceReport) -> f64 {
        improvement(before.factor, self.factor)
    }
}

/// Score one resource over precomputed host loads.
pub fn resource_balance(loads: &[HostLoad], resource: Resource) -> ScoringResult<ResourceBalance> {
    let mut total_load = 0.0;
    let mut total_capacity = 0.0;
    let mut min_utilization = f64::INFINITY;
    let mut max_utilization = f64::NEG_INFINITY;

    for host in loads {
        let load = host.load(resource);
        match host.utilization(resource) {
            Some(u) => {
                min_utilization = min_utilization.min(u);
                max_utilization = max_utilization.max(u);
            }
            None if load > 0.0 => {
                return Err(ScoringError::LoadWithoutCapacity {
                    host: host.host_id.clone(),
                    resource,
                    load,
                });
            }
            None => {}
        }
        total_load += load;
        total_capacity += host.capacity(resource);
    }

    if total_capacity <= 0.0 || total_load <= 0.0 {
        // Nothing to spread, or nowhere to spread it.
        let (min_utilization, max_utilization) = if min_utilization.is_finite() {
            (min_utilization, max_utilization)
        } else {
            (0.0, 0.0)
        };
        return Ok(ResourceBalance {
            resource,
            mean_utilization: 0.0,
            min_utilization,
            max_utilization,
            spread: max_utilization - min_utilization,
            deviation: 0.0,
            dispersion: 0.0,
            score: 1.0,
        });
    }

    let mean = total_load / total_capacity;
    let weighted_squares: f64 = loads
        .iter()
        .filter_map(|h| h.utilization(resource).map(|u| h.capacity(resource) * (u - mean).powi(2)))
        .sum();
    let deviation = (weighted_squares / total_capacity).sqrt();
    let dispersion = deviation / mean;

    Ok(ResourceBalance {
        resource,
        mean_utilization: mean,
        min_utilization,
        max_utilization,
        spread: max_utilization - min_utilization,
        deviation,
        dispersion,
        score: 1.0 / (1.0 + dispersion),
    })
}

/// Full balance report for `assignment`.
pub fn balance_report(
    hosts: &[Host],
    vms: &[VirtualMachine],
    assignment: &Assignment,
    priority: Priority,
    weights: &ScoringWeights,
) -> ScoringResult<BalanceReport> {
    weights.validate()?;
    let loads = apply_assignment(hosts, vms, assignment)?;

    let cpu = resource_balance(&loads, Resource::Cpu)?;
    let memory = resource_balance(&loads, Resource::Memory)?;
    let (prioritized, other) = match priority {
        Priority::Cpu => (&cpu, &memory),
        Priority::Memory => (&memory, &cpu),
    };
    let factor = (weights.priority * prioritized.score + weights.other * other.score)
        / (weights.priority + weights.other);

    debug!(
        %priority,
        cpu_score = cpu.score,
        memory_score = memory.score,
        factor,
        "scored assignment"
    );
    Ok(BalanceReport {
        priority,
        cpu,
        memory,
        factor,
    })
}

/// Cluster balance factor of `assignment` with the default weights.
pub fn balance_factor(
    hosts: &[Host],
    vms: &[VirtualMachine],
    assignment: &Assignment,
    priority: Priority,
) -> ScoringResult<f64> {
    balance_report(hosts, vms, assignment, priority, &ScoringWeights::default())
        .map(|report| report.factor)
}

/// Change in balance factor from `before` to `after`; positive is better.
pub fn improvement(before: f64, after: f64) -> f64 {
    after - before
}
