//! Domain records shared across vmbalance crates.
//!
//! Hosts and VMs are built through validating constructors and are
//! immutable afterwards. Deserialization routes through the same
//! validation via the plain `*Record` types, so a `Host` or
//! `VirtualMachine` in hand always satisfies its invariants.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};

/// Unique identifier for a host.
pub type HostId = String;

/// Unique identifier for a virtual machine.
pub type VmId = String;

/// Separator between VM and host ids in assignment labels (`"{vm}_on_{host}"`).
pub const ASSIGNMENT_SEPARATOR: &str = "_on_";

// ── Resources ─────────────────────────────────────────────────────

/// A balanced resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Memory];

    /// The other balanced resource.
    pub fn other(self) -> Resource {
        match self {
            Resource::Cpu => Resource::Memory,
            Resource::Memory => Resource::Cpu,
        }
    }

    /// Short prefix used in constraint labels.
    pub fn label(self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "mem",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
        }
    }
}

/// Which resource's proportional-allocation constraint is hard.
///
/// The other resource is balanced through a soft (penalized) constraint
/// and the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Cpu,
    Memory,
}

impl Priority {
    pub fn hard_resource(self) -> Resource {
        match self {
            Priority::Cpu => Resource::Cpu,
            Priority::Memory => Resource::Memory,
        }
    }

    pub fn soft_resource(self) -> Resource {
        self.hard_resource().other()
    }

    pub fn is_prioritized(self, resource: Resource) -> bool {
        self.hard_resource() == resource
    }
}

impl From<Resource> for Priority {
    fn from(resource: Resource) -> Self {
        match resource {
            Resource::Cpu => Priority::Cpu,
            Resource::Memory => Priority::Memory,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.hard_resource(), f)
    }
}

/// How a soft constraint's violation is penalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    /// Penalty grows with the violation amount.
    Linear,
    /// Penalty grows with the square of the violation amount.
    #[default]
    Quadratic,
}

impl PenaltyKind {
    /// Penalty for a violation of `amount` (zero when satisfied).
    pub fn apply(self, weight: f64, amount: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        match self {
            PenaltyKind::Linear => weight * amount,
            PenaltyKind::Quadratic => weight * amount * amount,
        }
    }
}

// ── Ranges ────────────────────────────────────────────────────────

/// Inclusive `[min, max]` range with `0 <= min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RangeRecord", into = "RangeRecord")]
pub struct ResourceRange {
    min: f64,
    max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RangeRecord {
    min: f64,
    max: f64,
}

impl ResourceRange {
    pub fn new(min: f64, max: f64) -> ValidationResult<Self> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
            return Err(ValidationError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Unchecked constructor for crate-internal constant defaults.
    pub(crate) const fn from_bounds(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A degenerate range holding one value.
    pub fn fixed(value: f64) -> ValidationResult<Self> {
        Self::new(value, value)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }
}

impl Default for ResourceRange {
    /// The zero range `[0, 0]`.
    fn default() -> Self {
        Self::from_bounds(0.0, 0.0)
    }
}

impl TryFrom<RangeRecord> for ResourceRange {
    type Error = ValidationError;

    fn try_from(r: RangeRecord) -> Result<Self, Self::Error> {
        ResourceRange::new(r.min, r.max)
    }
}

impl From<ResourceRange> for RangeRecord {
    fn from(r: ResourceRange) -> Self {
        RangeRecord { min: r.min, max: r.max }
    }
}

/// One range per balanced resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRanges {
    pub cpu: ResourceRange,
    pub memory: ResourceRange,
}

impl ResourceRanges {
    /// Use the same range for both resources.
    pub fn uniform(range: ResourceRange) -> Self {
        Self {
            cpu: range,
            memory: range,
        }
    }

    pub fn get(&self, resource: Resource) -> ResourceRange {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
        }
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// Plain host parameters as supplied by a driver, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub cpu_capacity: f64,
    pub memory_capacity: f64,
    #[serde(default)]
    pub cpu_used: f64,
    #[serde(default)]
    pub memory_used: f64,
}

/// A physical host with capacity and existing (non-movable) use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HostRecord", into = "HostRecord")]
pub struct Host {
    id: HostId,
    cpu_capacity: f64,
    memory_capacity: f64,
    cpu_used: f64,
    memory_used: f64,
}

impl Host {
    /// Build a host, rejecting negative, non-finite, or over-capacity values.
    ///
    /// Zero capacity is accepted here; the formulator decides whether it
    /// can work with it.
    pub fn new(
        id: impl Into<HostId>,
        cpu_capacity: f64,
        memory_capacity: f64,
        cpu_used: f64,
        memory_used: f64,
    ) -> ValidationResult<Self> {
        let id = check_id("host", id.into())?;

        for (resource, capacity, used) in [
            (Resource::Cpu, cpu_capacity, cpu_used),
            (Resource::Memory, memory_capacity, memory_used),
        ] {
            check_non_negative("host", &id, resource, "capacity", capacity)?;
            check_non_negative("host", &id, resource, "use", used)?;
            if used > capacity {
                return Err(ValidationError::UseExceedsCapacity {
                    id,
                    resource,
                    used,
                    capacity,
                });
            }
        }

        Ok(Self {
            id,
            cpu_capacity,
            memory_capacity,
            cpu_used,
            memory_used,
        })
    }

    /// A host with no existing use.
    pub fn idle(
        id: impl Into<HostId>,
        cpu_capacity: f64,
        memory_capacity: f64,
    ) -> ValidationResult<Self> {
        Self::new(id, cpu_capacity, memory_capacity, 0.0, 0.0)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_capacity,
            Resource::Memory => self.memory_capacity,
        }
    }

    pub fn used(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_used,
            Resource::Memory => self.memory_used,
        }
    }

    /// Capacity left after existing use.
    pub fn remaining(&self, resource: Resource) -> f64 {
        self.capacity(resource) - self.used(resource)
    }
}

impl TryFrom<HostRecord> for Host {
    type Error = ValidationError;

    fn try_from(r: HostRecord) -> Result<Self, Self::Error> {
        Host::new(r.id, r.cpu_capacity, r.memory_capacity, r.cpu_used, r.memory_used)
    }
}

impl From<Host> for HostRecord {
    fn from(h: Host) -> Self {
        HostRecord {
            id: h.id,
            cpu_capacity: h.cpu_capacity,
            memory_capacity: h.memory_capacity,
            cpu_used: h.cpu_used,
            memory_used: h.memory_used,
        }
    }
}

// ── Virtual machine ───────────────────────────────────────────────

/// Plain VM parameters as supplied by a driver, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: VmId,
    pub cpu: f64,
    pub memory: f64,
}

/// A virtual machine with positive CPU and memory requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VmRecord", into = "VmRecord")]
pub struct VirtualMachine {
    id: VmId,
    cpu: f64,
    memory: f64,
}

impl VirtualMachine {
    pub fn new(id: impl Into<VmId>, cpu: f64, memory: f64) -> ValidationResult<Self> {
        let id = check_id("vm", id.into())?;
        for (resource, value) in [(Resource::Cpu, cpu), (Resource::Memory, memory)] {
            check_non_negative("vm", &id, resource, "requirement", value)?;
            if value == 0.0 {
                return Err(ValidationError::NonPositiveRequirement { id, resource, value });
            }
        }
        Ok(Self { id, cpu, memory })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requirement(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
        }
    }
}

impl TryFrom<VmRecord> for VirtualMachine {
    type Error = ValidationError;

    fn try_from(r: VmRecord) -> Result<Self, Self::Error> {
        VirtualMachine::new(r.id, r.cpu, r.memory)
    }
}

impl From<VirtualMachine> for VmRecord {
    fn from(vm: VirtualMachine) -> Self {
        VmRecord {
            id: vm.id,
            cpu: vm.cpu,
            memory: vm.memory,
        }
    }
}

/// Ids end up inside `"{vm}_on_{host}"` labels, so they must not contain
/// the separator themselves.
fn check_id(record: &'static str, id: String) -> ValidationResult<String> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if id.contains(ASSIGNMENT_SEPARATOR) {
        return Err(ValidationError::ReservedSeparator {
            record,
            id,
            separator: ASSIGNMENT_SEPARATOR,
        });
    }
    Ok(id)
}

fn check_non_negative(
    record: &'static str,
    id: &str,
    resource: Resource,
    field: &'static str,
    value: f64,
) -> ValidationResult<()> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            record,
            id: id.to_string(),
            resource,
            field,
        });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            record,
            id: id.to_string(),
            resource,
            field,
            value,
        });
    }
    Ok(())
}

// ── Assignment ────────────────────────────────────────────────────

/// Label of the binary decision "`vm` is hosted on `host`".
pub fn assignment_label(vm: &str, host: &str) -> String {
    format!("{vm}{ASSIGNMENT_SEPARATOR}{host}")
}

/// A solution: each VM id mapped to exactly one host id.
///
/// The map is not checked against any host/VM set on construction; the
/// scorer and model validate it against the problem it is applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment {
    placements: BTreeMap<VmId, HostId>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `vm` on `host`, returning the previous host if any.
    pub fn assign(&mut self, vm: impl Into<VmId>, host: impl Into<HostId>) -> Option<HostId> {
        self.placements.insert(vm.into(), host.into())
    }

    pub fn host_of(&self, vm: &str) -> Option<&str> {
        self.placements.get(vm).map(String::as_str)
    }

    /// VMs placed on `host`, in id order.
    pub fn vms_on<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.placements
            .iter()
            .filter(move |(_, h)| h.as_str() == host)
            .map(|(vm, _)| vm.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.placements.iter().map(|(vm, host)| (vm.as_str(), host.as_str()))
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Parse the solver's list form (`"{vm}_on_{host}"` per selected variable).
    pub fn from_labels<I, S>(labels: I) -> ValidationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut assignment = Assignment::new();
        for label in labels {
            let label = label.as_ref();
            let (vm, host) = label
                .split_once(ASSIGNMENT_SEPARATOR)
                .filter(|(vm, host)| !vm.is_empty() && !host.is_empty())
                .ok_or_else(|| ValidationError::MalformedLabel(label.to_string()))?;
            if assignment.assign(vm, host).is_some() {
                return Err(ValidationError::DuplicatePlacement(vm.to_string()));
            }
        }
        Ok(assignment)
    }

    /// Render as the solver's list form, in VM id order.
    pub fn to_labels(&self) -> Vec<String> {
        self.iter().map(|(vm, host)| assignment_label(vm, host)).collect()
    }
}

impl<V: Into<VmId>, H: Into<HostId>> FromIterator<(V, H)> for Assignment {
    fn from_iter<T: IntoIterator<Item = (V, H)>>(iter: T) -> Self {
        let mut assignment = Assignment::new();
        for (vm, host) in iter {
            assignment.assign(vm, host);
        }
        assignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_rejects_use_above_capacity() {
        let err = Host::new("h1", 100.0, 100.0, 120.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UseExceedsCapacity { resource: Resource::Cpu, .. }
        ));
    }

    #[test]
    fn host_rejects_negative_and_nan() {
        assert!(matches!(
            Host::new("h1", -1.0, 100.0, 0.0, 0.0),
            Err(ValidationError::Negative { .. })
        ));
        assert!(matches!(
            Host::new("h1", 100.0, f64::NAN, 0.0, 0.0),
            Err(ValidationError::NotFinite { resource: Resource::Memory, .. })
        ));
        assert_eq!(Host::new("", 1.0, 1.0, 0.0, 0.0), Err(ValidationError::EmptyId));
    }

    #[test]
    fn host_accepts_zero_capacity() {
        let host = Host::idle("h1", 0.0, 64.0).unwrap();
        assert_eq!(host.capacity(Resource::Cpu), 0.0);
        assert_eq!(host.remaining(Resource::Memory), 64.0);
    }

    #[test]
    fn vm_requires_positive_requirements() {
        assert!(matches!(
            VirtualMachine::new("vm1", 0.0, 4.0),
            Err(ValidationError::NonPositiveRequirement { resource: Resource::Cpu, .. })
        ));
        let vm = VirtualMachine::new("vm1", 2.0, 4.0).unwrap();
        assert_eq!(vm.requirement(Resource::Memory), 4.0);
    }

    #[test]
    fn host_deserialization_is_validated() {
        let ok: Host = serde_json::from_str(
            r#"{"id":"h1","cpu_capacity":10,"memory_capacity":20,"cpu_used":5}"#,
        )
        .unwrap();
        assert_eq!(ok.used(Resource::Cpu), 5.0);
        assert_eq!(ok.used(Resource::Memory), 0.0);

        let bad = serde_json::from_str::<Host>(
            r#"{"id":"h1","cpu_capacity":10,"memory_capacity":20,"cpu_used":50}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn ids_must_not_contain_label_separator() {
        assert!(matches!(
            Host::idle("b_on_c", 10.0, 10.0),
            Err(ValidationError::ReservedSeparator { record: "host", .. })
        ));
        assert!(matches!(
            VirtualMachine::new("a_on_b", 1.0, 1.0),
            Err(ValidationError::ReservedSeparator { record: "vm", .. })
        ));
        // "on" alone is fine
        assert!(Host::idle("on_call", 10.0, 10.0).is_ok());
        assert!(VirtualMachine::new("vm_on", 1.0, 1.0).is_ok());

        let json = r#"{"id":"x_on_y","cpu":1,"memory":1}"#;
        assert!(serde_json::from_str::<VirtualMachine>(json).is_err());
    }

    #[test]
    fn labels_round_trip_for_valid_ids() {
        let hosts = [
            Host::idle("c", 1.0, 1.0).unwrap(),
            Host::idle("b_c", 1.0, 1.0).unwrap(),
        ];
        let vms = [
            VirtualMachine::new("a_b", 1.0, 1.0).unwrap(),
            VirtualMachine::new("a", 1.0, 1.0).unwrap(),
        ];
        let plan: Assignment = [(vms[0].id(), hosts[1].id()), (vms[1].id(), hosts[0].id())]
            .into_iter()
            .collect();
        assert_eq!(Assignment::from_labels(plan.to_labels()).unwrap(), plan);
    }

    #[test]
    fn range_validation() {
        assert!(ResourceRange::new(2.0, 1.0).is_err());
        assert!(ResourceRange::new(-1.0, 1.0).is_err());
        let range = ResourceRange::new(1.0, 3.0).unwrap();
        assert!(range.contains(2.0));
        assert!(!range.contains(3.5));
        assert!(ResourceRange::fixed(4.0).unwrap().is_fixed());
    }

    #[test]
    fn priority_splits_resources() {
        assert_eq!(Priority::Cpu.hard_resource(), Resource::Cpu);
        assert_eq!(Priority::Cpu.soft_resource(), Resource::Memory);
        assert_eq!(Priority::Memory.soft_resource(), Resource::Cpu);
        assert!(Priority::Memory.is_prioritized(Resource::Memory));
    }

    #[test]
    fn assignment_labels_parse() {
        let labels = ["VM 1_on_Host 1", "VM 2_on_Host 1", "VM 3_on_Host 2"];
        let assignment = Assignment::from_labels(labels).unwrap();
        assert_eq!(assignment.host_of("VM 2"), Some("Host 1"));
        assert_eq!(assignment.vms_on("Host 1").collect::<Vec<_>>(), vec!["VM 1", "VM 2"]);
        assert_eq!(assignment.to_labels()[2], "VM 3_on_Host 2");
    }

    #[test]
    fn assignment_labels_reject_garbage() {
        assert!(matches!(
            Assignment::from_labels(["VM 1 on Host 1"]),
            Err(ValidationError::MalformedLabel(_))
        ));
        assert!(matches!(
            Assignment::from_labels(["a_on_h1", "a_on_h2"]),
            Err(ValidationError::DuplicatePlacement(_))
        ));
    }
}
