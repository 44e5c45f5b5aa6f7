use log::{trace, warn};
use speedy::{Endianness, Readable};
use serde::{Deserialize, Serialize};

use crate::{
  messages::submessages::submessage_elements::parameter_list::ParameterList,
  structure::{duration::Duration, parameter_id::ParameterId},
};

/// Trait that is implemented by all entities that carry QosPolicies.
pub trait HasQoSPolicy {
  fn qos(&self) -> QosPolicies;
}

/// Identifies the policy that made an offered/requested pair incompatible.
/// Numbering follows the DDS IDL PSM.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum QosPolicyId {
  Durability,    // 2
  Deadline,      // 4
  LatencyBudget, // 5
  Ownership,     // 6
  Liveliness,    // 8
  Reliability,   // 11
  DestinationOrder,
  History, // 13
  ResourceLimits,
}

/// Utility for building [QosPolicies]
#[derive(Default)]
pub struct QosPolicyBuilder {
  durability: Option<policy::Durability>,
  deadline: Option<policy::Deadline>,
  latency_budget: Option<policy::LatencyBudget>,
  ownership: Option<policy::Ownership>,
  liveliness: Option<policy::Liveliness>,
  reliability: Option<policy::Reliability>,
  destination_order: Option<policy::DestinationOrder>,
  history: Option<policy::History>,
  resource_limits: Option<policy::ResourceLimits>,
}

impl QosPolicyBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub const fn durability(mut self, durability: policy::Durability) -> Self {
    self.durability = Some(durability);
    self
  }

  #[must_use]
  pub const fn deadline(mut self, deadline: policy::Deadline) -> Self {
    self.deadline = Some(deadline);
    self
  }

  #[must_use]
  pub const fn latency_budget(mut self, latency_budget: policy::LatencyBudget) -> Self {
    self.latency_budget = Some(latency_budget);
    self
  }

  #[must_use]
  pub const fn ownership(mut self, ownership: policy::Ownership) -> Self {
    self.ownership = Some(ownership);
    self
  }

  #[must_use]
  pub const fn liveliness(mut self, liveliness: policy::Liveliness) -> Self {
    self.liveliness = Some(liveliness);
    self
  }

  #[must_use]
  pub const fn reliability(mut self, reliability: policy::Reliability) -> Self {
    self.reliability = Some(reliability);
    self
  }

  #[must_use]
  pub const fn destination_order(mut self, destination_order: policy::DestinationOrder) -> Self {
    self.destination_order = Some(destination_order);
    self
  }

  #[must_use]
  pub const fn history(mut self, history: policy::History) -> Self {
    self.history = Some(history);
    self
  }

  #[must_use]
  pub const fn resource_limits(mut self, resource_limits: policy::ResourceLimits) -> Self {
    self.resource_limits = Some(resource_limits);
    self
  }

  pub const fn build(self) -> QosPolicies {
    QosPolicies {
      durability: self.durability,
      deadline: self.deadline,
      latency_budget: self.latency_budget,
      ownership: self.ownership,
      liveliness: self.liveliness,
      reliability: self.reliability,
      destination_order: self.destination_order,
      history: self.history,
      resource_limits: self.resource_limits,
    }
  }
}

/// Describes a set of RTPS/DDS QoS policies
///
/// QosPolicies are constructed using a [`QosPolicyBuilder`]. An unset policy
/// means the DDS default for that policy.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QosPolicies {
  pub(crate) durability: Option<policy::Durability>,
  pub(crate) deadline: Option<policy::Deadline>,
  pub(crate) latency_budget: Option<policy::LatencyBudget>,
  pub(crate) ownership: Option<policy::Ownership>,
  pub(crate) liveliness: Option<policy::Liveliness>,
  pub(crate) reliability: Option<policy::Reliability>,
  pub(crate) destination_order: Option<policy::DestinationOrder>,
  pub(crate) history: Option<policy::History>,
  pub(crate) resource_limits: Option<policy::ResourceLimits>,
}

impl QosPolicies {
  pub fn qos_none() -> Self {
    Self::default()
  }

  pub fn builder() -> QosPolicyBuilder {
    QosPolicyBuilder::new()
  }

  pub const fn durability(&self) -> Option<policy::Durability> {
    self.durability
  }

  pub const fn deadline(&self) -> Option<policy::Deadline> {
    self.deadline
  }

  pub const fn latency_budget(&self) -> Option<policy::LatencyBudget> {
    self.latency_budget
  }

  pub const fn ownership(&self) -> Option<policy::Ownership> {
    self.ownership
  }

  pub const fn liveliness(&self) -> Option<policy::Liveliness> {
    self.liveliness
  }

  pub const fn reliability(&self) -> Option<policy::Reliability> {
    self.reliability
  }

  pub const fn destination_order(&self) -> Option<policy::DestinationOrder> {
    self.destination_order
  }

  pub const fn history(&self) -> Option<policy::History> {
    self.history
  }

  pub const fn resource_limits(&self) -> Option<policy::ResourceLimits> {
    self.resource_limits
  }

  pub fn is_reliable(&self) -> bool {
    matches!(self.reliability, Some(policy::Reliability::Reliable { .. }))
  }

  /// Volatile unless set.
  pub fn durability_or_default(&self) -> policy::Durability {
    self.durability.unwrap_or(policy::Durability::Volatile)
  }

  /// KEEP_LAST 1 unless set.
  pub fn history_or_default(&self) -> policy::History {
    self.history.unwrap_or(policy::History::KeepLast { depth: 1 })
  }

  pub fn resource_limits_or_default(&self) -> policy::ResourceLimits {
    self.resource_limits.unwrap_or_default()
  }

  pub fn ownership_strength(&self) -> i32 {
    match self.ownership {
      Some(policy::Ownership::Exclusive { strength }) => strength,
      _ => 0,
    }
  }

  /// Merge two QosPolicies
  ///
  /// Constructs a QosPolicy, where each policy is taken from `self`,
  /// and overwritten with those policies from `other` that are defined.
  #[must_use]
  pub fn modify_by(&self, other: &Self) -> Self {
    Self {
      durability: other.durability.or(self.durability),
      deadline: other.deadline.or(self.deadline),
      latency_budget: other.latency_budget.or(self.latency_budget),
      ownership: other.ownership.or(self.ownership),
      liveliness: other.liveliness.or(self.liveliness),
      reliability: other.reliability.or(self.reliability),
      destination_order: other.destination_order.or(self.destination_order),
      history: other.history.or(self.history),
      resource_limits: other.resource_limits.or(self.resource_limits),
    }
  }

  /// Check if policy complies to another policy.
  ///
  /// `self` is the "offered" (publisher) QoS
  /// `other` is the "requested" (subscriber) QoS
  ///
  /// * None => Policies are compatible
  /// * Some(policyId) => Failure, where policyId is (any) one of the policies
  /// causing incompliance
  ///
  /// Compliance is defined in the table in DDS spec v1.4 Section "2.2.3
  /// Supported QoS". Unset policies are compared as their defaults.
  ///
  /// This is not symmetric.
  pub fn compliance_failure_wrt(&self, other: &Self) -> Option<QosPolicyId> {
    trace!(
      "QoS compatibility check - offered: {:?} - requested {:?}",
      self,
      other
    );
    let result = self.compliance_failure_wrt_impl(other);
    trace!("Result: {:?}", result);
    result
  }

  fn compliance_failure_wrt_impl(&self, other: &Self) -> Option<QosPolicyId> {
    use policy::*;

    // Offered must be better than or equal to Requested.
    if self.durability_or_default() < other.durability_or_default() {
      return Some(QosPolicyId::Durability);
    }

    // offered period <= requested period
    if let (Some(off), Some(req)) = (self.deadline, other.deadline) {
      if off.0 > req.0 {
        return Some(QosPolicyId::Deadline);
      }
    } else if self.deadline.is_none() && other.deadline.is_some() {
      // default offered deadline is infinite
      return Some(QosPolicyId::Deadline);
    }

    // offered duration <= requested duration
    if let (Some(off), Some(req)) = (self.latency_budget, other.latency_budget) {
      if off.duration > req.duration {
        return Some(QosPolicyId::LatencyBudget);
      }
    }

    // offered kind == requested kind
    let off_ownership_shared = !matches!(self.ownership, Some(Ownership::Exclusive { .. }));
    let req_ownership_shared = !matches!(other.ownership, Some(Ownership::Exclusive { .. }));
    if off_ownership_shared != req_ownership_shared {
      return Some(QosPolicyId::Ownership);
    }

    // offered kind >= requested kind
    // AUTOMATIC < MANUAL_BY_PARTICIPANT < MANUAL_BY_TOPIC
    // AND offered lease_duration <= requested lease_duration
    if let (Some(off), Some(req)) = (self.liveliness, other.liveliness) {
      if off < req {
        return Some(QosPolicyId::Liveliness);
      }
    }

    // BEST_EFFORT < RELIABLE. The default for writers is RELIABLE and for
    // readers BEST_EFFORT, so only an explicit pair is compared.
    if let (Some(off), Some(req)) = (self.reliability, other.reliability) {
      if off < req {
        return Some(QosPolicyId::Reliability);
      }
    }

    // BY_RECEPTION_TIMESTAMP < BY_SOURCE_TIMESTAMP
    if let (Some(off), Some(req)) = (self.destination_order, other.destination_order) {
      if off < req {
        return Some(QosPolicyId::DestinationOrder);
      }
    }

    None
  }

  /// Appends the set policies to a discovery parameter list.
  pub fn add_to_parameter_list(&self, pl: &mut ParameterList, endianness: Endianness) {
    use wire::*;
    if let Some(d) = self.durability {
      pl.push_value(ParameterId::PID_DURABILITY, &DurabilityData::from(d), endianness);
    }
    if let Some(d) = self.deadline {
      pl.push_value(ParameterId::PID_DEADLINE, &d.0, endianness);
    }
    if let Some(lb) = self.latency_budget {
      pl.push_value(ParameterId::PID_LATENCY_BUDGET, &lb.duration, endianness);
    }
    if let Some(o) = self.ownership {
      pl.push_value(ParameterId::PID_OWNERSHIP, &OwnershipData::from(o), endianness);
      if let policy::Ownership::Exclusive { strength } = o {
        pl.push_value(ParameterId::PID_OWNERSHIP_STRENGTH, &strength, endianness);
      }
    }
    if let Some(l) = self.liveliness {
      pl.push_value(ParameterId::PID_LIVELINESS, &LivelinessData::from(l), endianness);
    }
    if let Some(r) = self.reliability {
      pl.push_value(ParameterId::PID_RELIABILITY, &ReliabilityData::from(r), endianness);
    }
    if let Some(d) = self.destination_order {
      pl.push_value(
        ParameterId::PID_DESTINATION_ORDER,
        &DestinationOrderData::from(d),
        endianness,
      );
    }
    if let Some(h) = self.history {
      pl.push_value(ParameterId::PID_HISTORY, &HistoryData::from(h), endianness);
    }
    if let Some(r) = self.resource_limits {
      pl.push_value(ParameterId::PID_RESOURCE_LIMITS, &r, endianness);
    }
  }

  /// Reads the policies present in a discovery parameter list. Malformed
  /// policy parameters are logged and treated as absent.
  pub fn from_parameter_list(pl: &ParameterList, endianness: Endianness) -> Self {
    use wire::*;

    fn get<'a, T: Readable<'a, Endianness>>(
      pl: &'a ParameterList,
      pid: ParameterId,
      endianness: Endianness,
    ) -> Option<T> {
      match pl.get_value::<T>(pid, endianness) {
        Some(Ok(v)) => Some(v),
        Some(Err(e)) => {
          warn!("Malformed QoS parameter {:?}: {:?}", pid, e);
          None
        }
        None => None,
      }
    }

    let strength: Option<i32> = get(pl, ParameterId::PID_OWNERSHIP_STRENGTH, endianness);
    Self {
      durability: get::<DurabilityData>(pl, ParameterId::PID_DURABILITY, endianness)
        .and_then(DurabilityData::into_policy),
      deadline: get::<Duration>(pl, ParameterId::PID_DEADLINE, endianness).map(policy::Deadline),
      latency_budget: get::<Duration>(pl, ParameterId::PID_LATENCY_BUDGET, endianness)
        .map(|duration| policy::LatencyBudget { duration }),
      ownership: get::<OwnershipData>(pl, ParameterId::PID_OWNERSHIP, endianness)
        .and_then(|o| o.into_policy(strength.unwrap_or(0))),
      liveliness: get::<LivelinessData>(pl, ParameterId::PID_LIVELINESS, endianness)
        .and_then(LivelinessData::into_policy),
      reliability: get::<ReliabilityData>(pl, ParameterId::PID_RELIABILITY, endianness)
        .and_then(ReliabilityData::into_policy),
      destination_order: get::<DestinationOrderData>(
        pl,
        ParameterId::PID_DESTINATION_ORDER,
        endianness,
      )
      .and_then(DestinationOrderData::into_policy),
      history: get::<HistoryData>(pl, ParameterId::PID_HISTORY, endianness)
        .and_then(HistoryData::into_policy),
      resource_limits: get(pl, ParameterId::PID_RESOURCE_LIMITS, endianness),
    }
  }
}

// DDS spec v1.4 p.139
pub const LENGTH_UNLIMITED: i32 = -1;

/// Contains all available QoSPolicies
pub mod policy {
  use std::cmp::Ordering;

  use serde::{Deserialize, Serialize};
  use speedy::{Readable, Writable};

  use super::LENGTH_UNLIMITED;
  use crate::structure::duration::Duration;

  /// DDS 2.2.3.4 DURABILITY
  #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
  pub enum Durability {
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
  }

  /// DDS 2.2.3.7 DEADLINE
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
  pub struct Deadline(pub Duration);

  /// DDS 2.2.3.8 LATENCY_BUDGET
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct LatencyBudget {
    pub duration: Duration,
  }

  /// DDS 2.2.3.9 OWNERSHIP
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Ownership {
    Shared,
    Exclusive { strength: i32 }, // This also implements OwnershipStrength
  }

  /// DDS 2.2.3.11 LIVELINESS
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Liveliness {
    Automatic { lease_duration: Duration },
    ManualByParticipant { lease_duration: Duration },
    ManualByTopic { lease_duration: Duration },
  }

  impl Liveliness {
    fn kind_num(&self) -> i32 {
      match self {
        Self::Automatic { .. } => 0,
        Self::ManualByParticipant { .. } => 1,
        Self::ManualByTopic { .. } => 2,
      }
    }

    pub fn duration(&self) -> Duration {
      match self {
        Self::Automatic { lease_duration }
        | Self::ManualByParticipant { lease_duration }
        | Self::ManualByTopic { lease_duration } => *lease_duration,
      }
    }

    pub fn is_manual(&self) -> bool {
      !matches!(self, Self::Automatic { .. })
    }
  }

  impl Ord for Liveliness {
    fn cmp(&self, other: &Self) -> Ordering {
      // Manual liveliness is greater than automatic, but
      // duration compares in reverse
      self
        .kind_num()
        .cmp(&other.kind_num())
        .then_with(|| self.duration().cmp(&other.duration()).reverse())
    }
  }

  impl PartialOrd for Liveliness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
      Some(self.cmp(other))
    }
  }

  /// DDS 2.2.3.14 RELIABILITY
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub enum Reliability {
    BestEffort,
    Reliable { max_blocking_time: Duration },
  }

  impl Ord for Reliability {
    // max_blocking_time is not compared.
    fn cmp(&self, other: &Self) -> Ordering {
      match (self, other) {
        (Self::BestEffort, Self::BestEffort) | (Self::Reliable { .. }, Self::Reliable { .. }) => {
          Ordering::Equal
        }
        (Self::BestEffort, Self::Reliable { .. }) => Ordering::Less,
        (Self::Reliable { .. }, Self::BestEffort) => Ordering::Greater,
      }
    }
  }

  impl PartialOrd for Reliability {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
      Some(self.cmp(other))
    }
  }

  /// DDS 2.2.3.17 DESTINATION_ORDER
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
  pub enum DestinationOrder {
    ByReceptionTimestamp,
    BySourceTimeStamp,
  }

  /// DDS 2.2.3.18 HISTORY
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
  pub enum History {
    // Variants must be in this order ot derive Ord correctly.
    KeepLast { depth: i32 },
    KeepAll,
  }

  /// DDS 2.2.3.19 RESOURCE_LIMITS
  ///
  /// Negative values mean `LENGTH_UNLIMITED`.
  #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Readable, Writable)]
  pub struct ResourceLimits {
    pub max_samples: i32,
    pub max_instances: i32,
    pub max_samples_per_instance: i32,
  }

  impl ResourceLimits {
    fn limit(v: i32) -> Option<usize> {
      if v <= 0 {
        None
      } else {
        Some(v as usize)
      }
    }

    pub fn max_samples(&self) -> Option<usize> {
      Self::limit(self.max_samples)
    }

    pub fn max_instances(&self) -> Option<usize> {
      Self::limit(self.max_instances)
    }

    pub fn max_samples_per_instance(&self) -> Option<usize> {
      Self::limit(self.max_samples_per_instance)
    }
  }

  impl Default for ResourceLimits {
    fn default() -> Self {
      Self {
        max_samples: LENGTH_UNLIMITED,
        max_instances: LENGTH_UNLIMITED,
        max_samples_per_instance: LENGTH_UNLIMITED,
      }
    }
  }
}

// RTPS spec 9.6.3.2 encodings of the policies in parameter lists
mod wire {
  use speedy::{Readable, Writable};

  use super::policy;
  use crate::structure::duration::Duration;

  #[derive(Readable, Writable)]
  pub struct DurabilityData {
    kind: u32,
  }

  impl From<policy::Durability> for DurabilityData {
    fn from(d: policy::Durability) -> Self {
      let kind = match d {
        policy::Durability::Volatile => 0,
        policy::Durability::TransientLocal => 1,
        policy::Durability::Transient => 2,
        policy::Durability::Persistent => 3,
      };
      Self { kind }
    }
  }

  impl DurabilityData {
    pub fn into_policy(self) -> Option<policy::Durability> {
      match self.kind {
        0 => Some(policy::Durability::Volatile),
        1 => Some(policy::Durability::TransientLocal),
        2 => Some(policy::Durability::Transient),
        3 => Some(policy::Durability::Persistent),
        _ => None,
      }
    }
  }

  #[derive(Readable, Writable)]
  pub struct OwnershipData {
    kind: u32,
  }

  impl From<policy::Ownership> for OwnershipData {
    fn from(o: policy::Ownership) -> Self {
      let kind = match o {
        policy::Ownership::Shared => 0,
        policy::Ownership::Exclusive { .. } => 1,
      };
      Self { kind }
    }
  }

  impl OwnershipData {
    pub fn into_policy(self, strength: i32) -> Option<policy::Ownership> {
      match self.kind {
        0 => Some(policy::Ownership::Shared),
        1 => Some(policy::Ownership::Exclusive { strength }),
        _ => None,
      }
    }
  }

  #[derive(Readable, Writable)]
  pub struct LivelinessData {
    kind: u32,
    lease_duration: Duration,
  }

  impl From<policy::Liveliness> for LivelinessData {
    fn from(l: policy::Liveliness) -> Self {
      let kind = match l {
        policy::Liveliness::Automatic { .. } => 0,
        policy::Liveliness::ManualByParticipant { .. } => 1,
        policy::Liveliness::ManualByTopic { .. } => 2,
      };
      Self {
        kind,
        lease_duration: l.duration(),
      }
    }
  }

  impl LivelinessData {
    pub fn into_policy(self) -> Option<policy::Liveliness> {
      let lease_duration = self.lease_duration;
      match self.kind {
        0 => Some(policy::Liveliness::Automatic { lease_duration }),
        1 => Some(policy::Liveliness::ManualByParticipant { lease_duration }),
        2 => Some(policy::Liveliness::ManualByTopic { lease_duration }),
        _ => None,
      }
    }
  }

  #[derive(Readable, Writable)]
  pub struct ReliabilityData {
    kind: u32,
    max_blocking_time: Duration,
  }

  impl From<policy::Reliability> for ReliabilityData {
    fn from(r: policy::Reliability) -> Self {
      match r {
        policy::Reliability::BestEffort => Self {
          kind: 1,
          max_blocking_time: Duration::DURATION_ZERO,
        },
        policy::Reliability::Reliable { max_blocking_time } => Self {
          kind: 2,
          max_blocking_time,
        },
      }
    }
  }

  impl ReliabilityData {
    pub fn into_policy(self) -> Option<policy::Reliability> {
      match self.kind {
        1 => Some(policy::Reliability::BestEffort),
        2 => Some(policy::Reliability::Reliable {
          max_blocking_time: self.max_blocking_time,
        }),
        _ => None,
      }
    }
  }

  #[derive(Readable, Writable)]
  pub struct DestinationOrderData {
    kind: u32,
  }

  impl From<policy::DestinationOrder> for DestinationOrderData {
    fn from(d: policy::DestinationOrder) -> Self {
      let kind = match d {
        policy::DestinationOrder::ByReceptionTimestamp => 0,
        policy::DestinationOrder::BySourceTimeStamp => 1,
      };
      Self { kind }
    }
  }

  impl DestinationOrderData {
    pub fn into_policy(self) -> Option<policy::DestinationOrder> {
      match self.kind {
        0 => Some(policy::DestinationOrder::ByReceptionTimestamp),
        1 => Some(policy::DestinationOrder::BySourceTimeStamp),
        _ => None,
      }
    }
  }

  #[derive(Readable, Writable)]
  pub struct HistoryData {
    kind: u32,
    depth: i32,
  }

  impl From<policy::History> for HistoryData {
    fn from(h: policy::History) -> Self {
      match h {
        policy::History::KeepLast { depth } => Self { kind: 0, depth },
        policy::History::KeepAll => Self { kind: 1, depth: 0 },
      }
    }
  }

  impl HistoryData {
    pub fn into_policy(self) -> Option<policy::History> {
      match self.kind {
        0 => Some(policy::History::KeepLast { depth: self.depth }),
        1 => Some(policy::History::KeepAll),
        _ => None,
      }
    }
  }
}
