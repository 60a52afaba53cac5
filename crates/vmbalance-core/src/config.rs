//! vmbalance.toml configuration parser.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::ensure;
use serde::{Deserialize, Serialize};

use crate::types::{PenaltyKind, Priority, ResourceRange};

/// Bounds for the solver time limit, in seconds.
pub const MIN_TIME_LIMIT_SECS: u64 = 10;
pub const MAX_TIME_LIMIT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub generator: GeneratorConfig,
    pub model: ModelConfig,
    pub scoring: ScoringConfig,
    pub solver: SolverConfig,
}

/// Random problem generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub num_hosts: usize,
    pub num_vms: usize,
    pub cpu_capacity: ResourceRange,
    pub memory_capacity: ResourceRange,
    pub cpu_requirement: ResourceRange,
    pub memory_requirement: ResourceRange,
    /// Existing use as a fraction of each host's capacity.
    pub existing_use: ResourceRange,
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            num_hosts: 10,
            num_vms: 100,
            cpu_capacity: ResourceRange::from_bounds(167.0, 167.0),
            memory_capacity: ResourceRange::from_bounds(1026.0, 1026.0),
            cpu_requirement: ResourceRange::from_bounds(1.0, 15.0),
            memory_requirement: ResourceRange::from_bounds(5.0, 90.0),
            existing_use: ResourceRange::from_bounds(0.0, 0.25),
            seed: None,
        }
    }
}

/// Model formulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub priority: Priority,
    pub soft_penalty_weight: f64,
    pub soft_penalty: PenaltyKind,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            priority: Priority::Cpu,
            soft_penalty_weight: 1.0,
            soft_penalty: PenaltyKind::Quadratic,
        }
    }
}

/// Cluster balance factor weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub priority_weight: f64,
    pub other_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            priority_weight: 10.0,
            other_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub time_limit_secs: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: MIN_TIME_LIMIT_SECS,
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }
}

impl BalancerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: BalancerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        let g = &self.generator;
        ensure!(g.num_hosts > 0, "generator.num_hosts must be at least 1");
        ensure!(g.num_vms > 0, "generator.num_vms must be at least 1");
        ensure!(
            g.existing_use.max() <= 1.0,
            "generator.existing_use must stay within [0, 1]"
        );

        let m = &self.model;
        ensure!(
            m.soft_penalty_weight.is_finite() && m.soft_penalty_weight > 0.0,
            "model.soft_penalty_weight must be positive"
        );

        let s = &self.scoring;
        ensure!(
            s.other_weight.is_finite() && s.other_weight > 0.0,
            "scoring.other_weight must be positive"
        );
        ensure!(
            s.priority_weight.is_finite() && s.priority_weight >= s.other_weight,
            "scoring.priority_weight must be at least scoring.other_weight"
        );

        ensure!(
            (MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&self.solver.time_limit_secs),
            "solver.time_limit_secs must be within {MIN_TIME_LIMIT_SECS}..={MAX_TIME_LIMIT_SECS}"
        );
        Ok(())
    }
}
