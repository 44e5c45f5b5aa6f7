use bytes::Bytes;
use speedy::Endianness;

use crate::{
  dds::{
    qos::{QosPolicies, QosPolicyId},
    result::Result,
  },
  discovery::pl_cdr,
  messages::submessages::submessage_elements::parameter_list::ParameterList,
  rtps::{rtps_reader_proxy::RtpsReaderProxy, rtps_writer_proxy::RtpsWriterProxy},
  structure::{
    guid::GUID, instance_handle::InstanceHandle, locator::Locator, parameter_id::ParameterId,
  },
};

/// What SEDP announces about a reader (DCPSSubscription).
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderProxyData {
  pub reader_guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  pub unicast_locators: Vec<Locator>,
  pub multicast_locators: Vec<Locator>,
  pub expects_inline_qos: bool,
}

/// What SEDP announces about a writer (DCPSPublication).
#[derive(Debug, Clone, PartialEq)]
pub struct WriterProxyData {
  pub writer_guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  pub unicast_locators: Vec<Locator>,
  pub multicast_locators: Vec<Locator>,
}

// Locators announced by the endpoint itself, or the participant defaults if
// it announced none.
fn locators_or_default(
  unicast: &[Locator],
  multicast: &[Locator],
  default: &(Vec<Locator>, Vec<Locator>),
) -> (Vec<Locator>, Vec<Locator>) {
  if unicast.is_empty() && multicast.is_empty() {
    default.clone()
  } else {
    (unicast.to_vec(), multicast.to_vec())
  }
}

fn push_common(
  pl: &mut ParameterList,
  guid: GUID,
  topic_name: &str,
  type_name: &str,
  qos: &QosPolicies,
  (unicast, multicast): (&[Locator], &[Locator]),
  endianness: Endianness,
) {
  pl.push_value(ParameterId::PID_ENDPOINT_GUID, &guid, endianness);
  pl_cdr::push_string(pl, ParameterId::PID_TOPIC_NAME, topic_name, endianness);
  pl_cdr::push_string(pl, ParameterId::PID_TYPE_NAME, type_name, endianness);
  for l in unicast {
    pl.push_value(ParameterId::PID_UNICAST_LOCATOR, l, endianness);
  }
  for l in multicast {
    pl.push_value(ParameterId::PID_MULTICAST_LOCATOR, l, endianness);
  }
  qos.add_to_parameter_list(pl, endianness);
}

struct Common {
  guid: GUID,
  topic_name: String,
  type_name: String,
  qos: QosPolicies,
  unicast: Vec<Locator>,
  multicast: Vec<Locator>,
}

fn read_common(pl: &ParameterList, e: Endianness) -> Result<Common> {
  let guid: GUID = pl_cdr::required(pl, ParameterId::PID_ENDPOINT_GUID, e)?;
  let missing = |what: &str| crate::dds::result::Error::Serialization {
    reason: format!("Endpoint {:?} announced without {}", guid, what),
  };
  Ok(Common {
    guid,
    topic_name: pl_cdr::get_string(pl, ParameterId::PID_TOPIC_NAME, e)
      .ok_or_else(|| missing("topic name"))?,
    type_name: pl_cdr::get_string(pl, ParameterId::PID_TYPE_NAME, e)
      .ok_or_else(|| missing("type name"))?,
    qos: QosPolicies::from_parameter_list(pl, e),
    unicast: pl.get_all_values(ParameterId::PID_UNICAST_LOCATOR, e).collect(),
    multicast: pl
      .get_all_values(ParameterId::PID_MULTICAST_LOCATOR, e)
      .collect(),
  })
}

impl ReaderProxyData {
  pub fn new(reader_guid: GUID, topic_name: &str, type_name: &str, qos: QosPolicies) -> Self {
    Self {
      reader_guid,
      topic_name: topic_name.to_string(),
      type_name: type_name.to_string(),
      qos,
      unicast_locators: Vec::new(),
      multicast_locators: Vec::new(),
      expects_inline_qos: false,
    }
  }

  /// Instance of this reader in the DCPSSubscription topic.
  pub fn key(&self) -> InstanceHandle {
    InstanceHandle::new(self.reader_guid.to_bytes())
  }

  /// Proxy for a local writer. `default_locators` are those of the remote
  /// participant.
  pub fn to_reader_proxy(&self, default_locators: &(Vec<Locator>, Vec<Locator>)) -> RtpsReaderProxy {
    let (unicast, multicast) =
      locators_or_default(&self.unicast_locators, &self.multicast_locators, default_locators);
    RtpsReaderProxy::new(self.reader_guid, self.qos.clone(), self.expects_inline_qos)
      .with_locators(unicast, multicast)
  }

  pub fn to_pl_cdr_bytes(&self, endianness: Endianness) -> Result<Bytes> {
    let mut pl = ParameterList::new();
    push_common(
      &mut pl,
      self.reader_guid,
      &self.topic_name,
      &self.type_name,
      &self.qos,
      (&self.unicast_locators, &self.multicast_locators),
      endianness,
    );
    if self.expects_inline_qos {
      pl.push_value(ParameterId::PID_EXPECTS_INLINE_QOS, &1u8, endianness);
    }
    pl_cdr::to_payload(&pl, endianness)
  }

  pub fn from_pl_cdr_bytes(bytes: &Bytes) -> Result<Self> {
    let (pl, e) = pl_cdr::from_payload(bytes)?;
    let c = read_common(&pl, e)?;
    Ok(Self {
      reader_guid: c.guid,
      topic_name: c.topic_name,
      type_name: c.type_name,
      qos: c.qos,
      unicast_locators: c.unicast,
      multicast_locators: c.multicast,
      expects_inline_qos: pl_cdr::optional::<u8>(&pl, ParameterId::PID_EXPECTS_INLINE_QOS, e)
        .map_or(false, |b| b != 0),
    })
  }
}

impl WriterProxyData {
  pub fn new(writer_guid: GUID, topic_name: &str, type_name: &str, qos: QosPolicies) -> Self {
    Self {
      writer_guid,
      topic_name: topic_name.to_string(),
      type_name: type_name.to_string(),
      qos,
      unicast_locators: Vec::new(),
      multicast_locators: Vec::new(),
    }
  }

  /// Instance of this writer in the DCPSPublication topic.
  pub fn key(&self) -> InstanceHandle {
    InstanceHandle::new(self.writer_guid.to_bytes())
  }

  pub fn to_writer_proxy(&self, default_locators: &(Vec<Locator>, Vec<Locator>)) -> RtpsWriterProxy {
    let (unicast, multicast) =
      locators_or_default(&self.unicast_locators, &self.multicast_locators, default_locators);
    RtpsWriterProxy::new(self.writer_guid, self.qos.clone()).with_locators(unicast, multicast)
  }

  pub fn to_pl_cdr_bytes(&self, endianness: Endianness) -> Result<Bytes> {
    let mut pl = ParameterList::new();
    push_common(
      &mut pl,
      self.writer_guid,
      &self.topic_name,
      &self.type_name,
      &self.qos,
      (&self.unicast_locators, &self.multicast_locators),
      endianness,
    );
    pl_cdr::to_payload(&pl, endianness)
  }

  pub fn from_pl_cdr_bytes(bytes: &Bytes) -> Result<Self> {
    let (pl, e) = pl_cdr::from_payload(bytes)?;
    let c = read_common(&pl, e)?;
    Ok(Self {
      writer_guid: c.guid,
      topic_name: c.topic_name,
      type_name: c.type_name,
      qos: c.qos,
      unicast_locators: c.unicast,
      multicast_locators: c.multicast,
    })
  }
}

/// Why a writer and a reader do not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailure {
  /// Different topic or type. Not reported to anyone.
  DifferentTopic,
  IncompatibleQos(QosPolicyId),
}

/// Decides whether a writer and a reader match. Both the writer side and the
/// reader side use this, so the outcome does not depend on who asks.
pub fn check_match(
  writer: &WriterProxyData,
  reader: &ReaderProxyData,
) -> std::result::Result<(), MatchFailure> {
  if writer.topic_name != reader.topic_name || writer.type_name != reader.type_name {
    return Err(MatchFailure::DifferentTopic);
  }
  match writer.qos.compliance_failure_wrt(&reader.qos) {
    None => Ok(()),
    Some(policy) => Err(MatchFailure::IncompatibleQos(policy)),
  }
}
