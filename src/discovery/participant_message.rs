use bytes::Bytes;
use speedy::{Endianness, Readable, Writable};

use crate::{
  dds::{
    qos::policy::Liveliness,
    result::{Error, Result},
  },
  messages::submessages::submessage_elements::serialized_payload::{
    RepresentationIdentifier, SerializedPayload,
  },
  structure::{guid::GuidPrefix, instance_handle::InstanceHandle},
};

/// What a participant message is about. RTPS spec 9.6.2.1
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable)]
pub struct ParticipantMessageKind {
  value: [u8; 4],
}

impl ParticipantMessageKind {
  pub const UNKNOWN: Self = Self {
    value: [0x00, 0x00, 0x00, 0x00],
  };
  pub const AUTOMATIC_LIVELINESS_UPDATE: Self = Self {
    value: [0x00, 0x00, 0x00, 0x01],
  };
  pub const MANUAL_LIVELINESS_UPDATE: Self = Self {
    value: [0x00, 0x00, 0x00, 0x02],
  };

  /// Whether a writer with `liveliness` is kept alive by this kind of
  /// message.
  pub fn asserts(self, liveliness: &Liveliness) -> bool {
    matches!(
      (self, liveliness),
      (Self::AUTOMATIC_LIVELINESS_UPDATE, Liveliness::Automatic { .. })
        | (
          Self::MANUAL_LIVELINESS_UPDATE,
          Liveliness::ManualByParticipant { .. }
        )
    )
  }
}

/// Sample of the builtin DCPSParticipantMessage topic, used by the writer
/// liveliness protocol. Keyed by participant and kind.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct ParticipantMessageData {
  pub guid_prefix: GuidPrefix,
  pub kind: ParticipantMessageKind,
  // normally empty
  pub data: Vec<u8>,
}

impl ParticipantMessageData {
  pub fn liveliness(guid_prefix: GuidPrefix, kind: ParticipantMessageKind) -> Self {
    Self {
      guid_prefix,
      kind,
      data: Vec::new(),
    }
  }

  pub fn key(&self) -> InstanceHandle {
    let mut bytes = [0; 16];
    bytes[..12].copy_from_slice(&self.guid_prefix.bytes);
    bytes[12..].copy_from_slice(&self.kind.value);
    InstanceHandle::new(bytes)
  }

  pub fn to_cdr_bytes(&self, endianness: Endianness) -> Result<Bytes> {
    let rep_id = match endianness {
      Endianness::LittleEndian => RepresentationIdentifier::CDR_LE,
      Endianness::BigEndian => RepresentationIdentifier::CDR_BE,
    };
    let value = self.write_to_vec_with_ctx(endianness)?;
    Ok(SerializedPayload::new(rep_id, Bytes::from(value)).to_bytes())
  }

  pub fn from_cdr_bytes(bytes: &Bytes) -> Result<Self> {
    let payload = SerializedPayload::from_bytes(bytes)?;
    let endianness = match payload.representation_identifier {
      RepresentationIdentifier::CDR_LE => Endianness::LittleEndian,
      RepresentationIdentifier::CDR_BE => Endianness::BigEndian,
      other => {
        return Err(Error::Serialization {
          reason: format!("Expected CDR participant message, got {:?}", other),
        })
      }
    };
    Ok(Self::read_from_buffer_with_ctx(endianness, &payload.value)?)
  }
}

/// Instance of a participant message sample.
pub fn participant_message_key(bytes: &Bytes) -> Option<InstanceHandle> {
  ParticipantMessageData::from_cdr_bytes(bytes)
    .ok()
    .map(|d| d.key())
}
