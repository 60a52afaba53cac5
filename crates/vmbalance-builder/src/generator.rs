//! Random problem generation.
//!
//! Produces hosts with capacities and existing use, VMs with requirements,
//! and a deliberately lopsided starting placement to improve on. All
//! randomness flows through a caller-supplied [`rand::Rng`], so tests can
//! pin the generator and seeded runs are reproducible.

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vmbalance_core::{
    Assignment, GeneratorConfig, Host, Resource, ResourceRange, ResourceRanges, VirtualMachine,
};

use crate::error::{BuildError, BuildResult};
use crate::feasibility::check_feasibility;

/// Inputs for [`build_problem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorParams {
    pub num_hosts: usize,
    pub num_vms: usize,
    /// Host capacity range per resource. Minimums must be positive.
    pub host_capacity: ResourceRanges,
    /// VM requirement range per resource. Minimums must be positive.
    pub vm_requirement: ResourceRanges,
    /// Existing use as a fraction of capacity, within `[0, 1]`.
    pub existing_use: ResourceRange,
    pub seed: Option<u64>,
}

impl GeneratorParams {
    /// Parameters with idle hosts and no seed.
    pub fn new(
        num_hosts: usize,
        num_vms: usize,
        host_capacity: ResourceRanges,
        vm_requirement: ResourceRanges,
    ) -> Self {
        Self {
            num_hosts,
            num_vms,
            host_capacity,
            vm_requirement,
            existing_use: ResourceRange::default(),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_existing_use(mut self, fraction: ResourceRange) -> Self {
        self.existing_use = fraction;
        self
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            num_hosts: config.num_hosts,
            num_vms: config.num_vms,
            host_capacity: ResourceRanges {
                cpu: config.cpu_capacity,
                memory: config.memory_capacity,
            },
            vm_requirement: ResourceRanges {
                cpu: config.cpu_requirement,
                memory: config.memory_requirement,
            },
            existing_use: config.existing_use,
            seed: config.seed,
        }
    }

    pub fn validate(&self) -> BuildResult<()> {
        if self.num_hosts == 0 {
            return Err(BuildError::InvalidParameter("num_hosts must be at least 1".into()));
        }
        if self.num_vms == 0 {
            return Err(BuildError::InvalidParameter("num_vms must be at least 1".into()));
        }
        for resource in Resource::ALL {
            if self.host_capacity.get(resource).min() <= 0.0 {
                return Err(BuildError::InvalidParameter(format!(
                    "host {resource} capacity range must start above zero"
                )));
            }
            if self.vm_requirement.get(resource).min() <= 0.0 {
                return Err(BuildError::InvalidParameter(format!(
                    "vm {resource} requirement range must start above zero"
                )));
            }
        }
        if self.existing_use.max() > 1.0 {
            return Err(BuildError::InvalidParameter(
                "existing use fraction must stay within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// A generated problem instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub hosts: Vec<Host>,
    pub vms: Vec<VirtualMachine>,
    /// Capacity-respecting but unbalanced placement of every VM, if one
    /// was found.
    pub initial_placement: Option<Assignment>,
}

impl Problem {
    pub fn into_parts(self) -> (Vec<Host>, Vec<VirtualMachine>) {
        (self.hosts, self.vms)
    }
}

/// Generate a feasible problem, seeding [`ChaCha8Rng`] from `params.seed`
/// (or from entropy when no seed is given).
pub fn build_problem(params: &GeneratorParams) -> BuildResult<Problem> {
    let mut rng = match params.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    build_problem_with_rng(params, &mut rng)
}

/// Generate a feasible problem using the given random source.
///
/// `params.seed` is ignored; the caller owns the generator state.
pub fn build_problem_with_rng<R: Rng + ?Sized>(
    params: &GeneratorParams,
    rng: &mut R,
) -> BuildResult<Problem> {
    params.validate()?;

    let hosts = (1..=params.num_hosts)
        .map(|i| {
            let cpu_capacity = sample(rng, params.host_capacity.cpu);
            let memory_capacity = sample(rng, params.host_capacity.memory);
            let cpu_used = cpu_capacity * sample(rng, params.existing_use);
            let memory_used = memory_capacity * sample(rng, params.existing_use);
            Host::new(format!("Host {i}"), cpu_capacity, memory_capacity, cpu_used, memory_used)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let vms = (1..=params.num_vms)
        .map(|i| {
            VirtualMachine::new(
                format!("VM {i}"),
                sample(rng, params.vm_requirement.cpu),
                sample(rng, params.vm_requirement.memory),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    check_feasibility(&hosts, &vms)?;

    let initial_placement = lopsided_placement(&hosts, &vms, rng);
    if initial_placement.is_none() {
        debug!("no capacity-respecting initial placement found");
    }

    info!(
        hosts = hosts.len(),
        vms = vms.len(),
        seeded = params.seed.is_some(),
        "generated problem"
    );

    Ok(Problem {
        hosts,
        vms,
        initial_placement,
    })
}

fn sample<R: Rng + ?Sized>(rng: &mut R, range: ResourceRange) -> f64 {
    if range.is_fixed() {
        range.min()
    } else {
        rng.gen_range(range.min()..=range.max())
    }
}

/// Place every VM on a host drawn by a random per-host popularity, among
/// hosts that still have room for it. Popularity is squared so a few
/// hosts attract most VMs.
fn lopsided_placement<R: Rng + ?Sized>(
    hosts: &[Host],
    vms: &[VirtualMachine],
    rng: &mut R,
) -> Option<Assignment> {
    let popularity: Vec<f64> = hosts
        .iter()
        .map(|_| rng.gen_range(0.05..=1.0_f64).powi(2))
        .collect();
    let mut free: Vec<(f64, f64)> = hosts
        .iter()
        .map(|h| (h.remaining(Resource::Cpu), h.remaining(Resource::Memory)))
        .collect();

    let mut assignment = Assignment::new();
    for vm in vms {
        let cpu = vm.requirement(Resource::Cpu);
        let memory = vm.requirement(Resource::Memory);
        let weights: Vec<f64> = free
            .iter()
            .zip(&popularity)
            .map(|(&(free_cpu, free_mem), &p)| {
                if cpu <= free_cpu && memory <= free_mem { p } else { 0.0 }
            })
            .collect();

        // All-zero weights: the VM fits nowhere given earlier choices.
        let index = WeightedIndex::new(&weights).ok()?.sample(rng);
        free[index].0 -= cpu;
        free[index].1 -= memory;
        assignment.assign(vm.id(), hosts[index].id());
    }
    Some(assignment)
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::error::FeasibilityError;

    fn range(min: f64, max: f64) -> ResourceRange {
        ResourceRange::new(min, max).unwrap()
    }

    fn default_params() -> GeneratorParams {
        GeneratorParams::new(
            5,
            30,
            ResourceRanges {
                cpu: range(100.0, 200.0),
                memory: range(512.0, 1024.0),
            },
            ResourceRanges {
                cpu: range(1.0, 10.0),
                memory: range(4.0, 40.0),
            },
        )
        .with_existing_use(range(0.0, 0.25))
        .with_seed(7)
    }

    #[test]
    fn generates_requested_counts() {
        let problem = build_problem(&default_params()).unwrap();
        assert_eq!(problem.hosts.len(), 5);
        assert_eq!(problem.vms.len(), 30);
        assert_eq!(problem.hosts[0].id(), "Host 1");
        assert_eq!(problem.vms[29].id(), "VM 30");
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let a = build_problem(&default_params()).unwrap();
        let b = build_problem(&default_params()).unwrap();
        assert_eq!(a, b);

        let c = build_problem(&default_params().with_seed(8)).unwrap();
        assert_ne!(a.vms, c.vms);
    }

    #[test]
    fn values_stay_in_range() {
        let params = default_params();
        let problem = build_problem(&params).unwrap();
        for host in &problem.hosts {
            for resource in Resource::ALL {
                assert!(params.host_capacity.get(resource).contains(host.capacity(resource)));
                assert!(host.used(resource) <= host.capacity(resource) * 0.25 + 1e-9);
            }
        }
        for vm in &problem.vms {
            for resource in Resource::ALL {
                assert!(params.vm_requirement.get(resource).contains(vm.requirement(resource)));
            }
        }
    }

    #[test]
    fn initial_placement_respects_capacity() {
        let problem = build_problem(&default_params()).unwrap();
        let placement = problem.initial_placement.expect("roomy cluster has a placement");
        assert_eq!(placement.len(), problem.vms.len());

        for host in &problem.hosts {
            for resource in Resource::ALL {
                let load: f64 = placement
                    .vms_on(host.id())
                    .map(|id| problem.vms.iter().find(|vm| vm.id() == id).unwrap())
                    .map(|vm| vm.requirement(resource))
                    .sum();
                assert!(host.used(resource) + load <= host.capacity(resource) + 1e-9);
            }
        }
    }

    #[test]
    fn works_with_any_rng() {
        // A constant generator always draws range minimums.
        let mut rng = StepRng::new(0, 0);
        let problem = build_problem_with_rng(&default_params(), &mut rng).unwrap();
        assert!(problem.hosts.iter().all(|h| h.capacity(Resource::Cpu) == 100.0));
        assert!(problem.vms.iter().all(|vm| vm.requirement(Resource::Memory) == 4.0));
    }

    #[test]
    fn rejects_overcommitted_parameters() {
        let params = GeneratorParams::new(
            2,
            10,
            ResourceRanges::uniform(range(10.0, 10.0)),
            ResourceRanges::uniform(range(5.0, 5.0)),
        )
        .with_seed(1);
        let err = build_problem(&params).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Infeasible(FeasibilityError::InsufficientCapacity {
                resource: Resource::Cpu,
                ..
            })
        ));
    }

    #[test]
    fn rejects_invalid_parameters() {
        let mut params = default_params();
        params.num_hosts = 0;
        assert!(matches!(build_problem(&params), Err(BuildError::InvalidParameter(_))));

        let mut params = default_params();
        params.vm_requirement.cpu = range(0.0, 5.0);
        assert!(matches!(build_problem(&params), Err(BuildError::InvalidParameter(_))));

        let mut params = default_params();
        params.existing_use = range(0.5, 1.5);
        assert!(matches!(build_problem(&params), Err(BuildError::InvalidParameter(_))));
    }

    #[test]
    fn from_config_uses_defaults() {
        let params = GeneratorParams::from_config(&GeneratorConfig::default());
        assert_eq!(params.num_hosts, 10);
        assert_eq!(params.num_vms, 100);
        assert_eq!(params.host_capacity.memory.min(), 1026.0);
        assert!(build_problem(&params.with_seed(3)).is_ok());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn generated_problems_are_feasible(
                seed in any::<u64>(),
                num_hosts in 1usize..8,
                num_vms in 1usize..40,
            ) {
                let params = GeneratorParams {
                    num_hosts,
                    num_vms,
                    ..default_params()
                }
                .with_seed(seed);

                match build_problem(&params) {
                    Ok(problem) => {
                        prop_assert!(check_feasibility(&problem.hosts, &problem.vms).is_ok());
                        for host in &problem.hosts {
                            for resource in Resource::ALL {
                                prop_assert!(host.used(resource) <= host.capacity(resource));
                            }
                        }
                    }
                    Err(BuildError::Infeasible(_)) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
            }
        }
    }
}
