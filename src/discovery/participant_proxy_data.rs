use std::time::Duration as StdDuration;

use bytes::Bytes;
use speedy::Endianness;

use crate::{
  dds::result::Result,
  discovery::{builtin_endpoint::BuiltinEndpointSet, pl_cdr},
  messages::{
    protocol_version::ProtocolVersion,
    submessages::submessage_elements::parameter_list::ParameterList, vendor_id::VendorId,
  },
  structure::{
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    locator::Locator,
    parameter_id::ParameterId,
  },
};

/// What SPDP announces about a participant. RTPS spec 8.5.3.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantProxyData {
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub participant_guid: GUID,
  pub expects_inline_qos: bool,
  pub metatraffic_unicast_locators: Vec<Locator>,
  pub metatraffic_multicast_locators: Vec<Locator>,
  pub default_unicast_locators: Vec<Locator>,
  pub default_multicast_locators: Vec<Locator>,
  pub available_builtin_endpoints: BuiltinEndpointSet,
  pub lease_duration: Duration,
  pub manual_liveliness_count: i32,
  pub entity_name: Option<String>,
}

impl ParticipantProxyData {
  pub fn new(guid_prefix: GuidPrefix, lease_duration: StdDuration) -> Self {
    Self {
      protocol_version: ProtocolVersion::PROTOCOLVERSION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      participant_guid: GUID::new(guid_prefix, EntityId::PARTICIPANT),
      expects_inline_qos: false,
      metatraffic_unicast_locators: Vec::new(),
      metatraffic_multicast_locators: Vec::new(),
      default_unicast_locators: Vec::new(),
      default_multicast_locators: Vec::new(),
      available_builtin_endpoints: BuiltinEndpointSet::default(),
      lease_duration: Duration::from(lease_duration),
      manual_liveliness_count: 0,
      entity_name: None,
    }
  }

  pub fn guid_prefix(&self) -> GuidPrefix {
    self.participant_guid.prefix
  }

  /// Instance of this participant in the SPDP topic.
  pub fn key(&self) -> InstanceHandle {
    InstanceHandle::new(self.participant_guid.to_bytes())
  }

  /// `None` if the lease is infinite.
  pub fn lease_duration_std(&self) -> Option<StdDuration> {
    self.lease_duration.to_std()
  }

  /// Where the remote builtin endpoints listen.
  pub fn metatraffic_locators(&self) -> (Vec<Locator>, Vec<Locator>) {
    (
      self.metatraffic_unicast_locators.clone(),
      self.metatraffic_multicast_locators.clone(),
    )
  }

  /// Locators used for user endpoints that announce none of their own.
  pub fn default_locators(&self) -> (Vec<Locator>, Vec<Locator>) {
    (
      self.default_unicast_locators.clone(),
      self.default_multicast_locators.clone(),
    )
  }

  pub fn to_pl_cdr_bytes(&self, endianness: Endianness) -> Result<Bytes> {
    let mut pl = ParameterList::new();
    pl.push_value(ParameterId::PID_PROTOCOL_VERSION, &self.protocol_version, endianness);
    pl.push_value(ParameterId::PID_VENDOR_ID, &self.vendor_id, endianness);
    pl.push_value(ParameterId::PID_PARTICIPANT_GUID, &self.participant_guid, endianness);
    if self.expects_inline_qos {
      pl.push_value(ParameterId::PID_EXPECTS_INLINE_QOS, &1u8, endianness);
    }
    let locator_lists = [
      (ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR, &self.metatraffic_unicast_locators),
      (ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR, &self.metatraffic_multicast_locators),
      (ParameterId::PID_DEFAULT_UNICAST_LOCATOR, &self.default_unicast_locators),
      (ParameterId::PID_DEFAULT_MULTICAST_LOCATOR, &self.default_multicast_locators),
    ];
    for (pid, locators) in locator_lists.iter() {
      for locator in locators.iter() {
        pl.push_value(*pid, locator, endianness);
      }
    }
    pl.push_value(
      ParameterId::PID_BUILTIN_ENDPOINT_SET,
      &self.available_builtin_endpoints,
      endianness,
    );
    pl.push_value(ParameterId::PID_PARTICIPANT_LEASE_DURATION, &self.lease_duration, endianness);
    pl.push_value(
      ParameterId::PID_PARTICIPANT_MANUAL_LIVELINESS_COUNT,
      &self.manual_liveliness_count,
      endianness,
    );
    if let Some(name) = &self.entity_name {
      pl_cdr::push_string(&mut pl, ParameterId::PID_ENTITY_NAME, name, endianness);
    }
    pl_cdr::to_payload(&pl, endianness)
  }

  pub fn from_pl_cdr_bytes(bytes: &Bytes) -> Result<Self> {
    let (pl, e) = pl_cdr::from_payload(bytes)?;
    let participant_guid: GUID = pl_cdr::required(&pl, ParameterId::PID_PARTICIPANT_GUID, e)?;
    Ok(Self {
      protocol_version: pl_cdr::optional(&pl, ParameterId::PID_PROTOCOL_VERSION, e)
        .unwrap_or(ProtocolVersion::PROTOCOLVERSION),
      vendor_id: pl_cdr::optional(&pl, ParameterId::PID_VENDOR_ID, e)
        .unwrap_or(VendorId::VENDOR_UNKNOWN),
      participant_guid,
      expects_inline_qos: pl_cdr::optional::<u8>(&pl, ParameterId::PID_EXPECTS_INLINE_QOS, e)
        .map_or(false, |b| b != 0),
      metatraffic_unicast_locators: pl
        .get_all_values(ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR, e)
        .collect(),
      metatraffic_multicast_locators: pl
        .get_all_values(ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR, e)
        .collect(),
      default_unicast_locators: pl
        .get_all_values(ParameterId::PID_DEFAULT_UNICAST_LOCATOR, e)
        .collect(),
      default_multicast_locators: pl
        .get_all_values(ParameterId::PID_DEFAULT_MULTICAST_LOCATOR, e)
        .collect(),
      // Missing means the remote has the standard set.
      available_builtin_endpoints: pl_cdr::optional(&pl, ParameterId::PID_BUILTIN_ENDPOINT_SET, e)
        .unwrap_or_default(),
      // RTPS spec 9.6.2.2.2 default lease is 100 s.
      lease_duration: pl_cdr::optional(&pl, ParameterId::PID_PARTICIPANT_LEASE_DURATION, e)
        .unwrap_or(Duration::from_secs(100)),
      manual_liveliness_count: pl_cdr::optional(
        &pl,
        ParameterId::PID_PARTICIPANT_MANUAL_LIVELINESS_COUNT,
        e,
      )
      .unwrap_or(0),
      entity_name: pl_cdr::get_string(&pl, ParameterId::PID_ENTITY_NAME, e),
    })
  }
}
