use bytes::Bytes;
use speedy::{Endianness, Readable, Writable};

use crate::{
  dds::result::{Error, Result},
  messages::submessages::submessage_elements::{
    parameter_list::ParameterList,
    serialized_payload::{RepresentationIdentifier, SerializedPayload},
  },
  structure::{guid::GUID, instance_handle::InstanceHandle, parameter_id::ParameterId},
};

/// Wraps a parameter list into a PL_CDR serialized payload.
pub fn to_payload(pl: &ParameterList, endianness: Endianness) -> Result<Bytes> {
  let rep_id = match endianness {
    Endianness::LittleEndian => RepresentationIdentifier::PL_CDR_LE,
    Endianness::BigEndian => RepresentationIdentifier::PL_CDR_BE,
  };
  let value = pl.write_to_vec_with_ctx(endianness)?;
  Ok(SerializedPayload::new(rep_id, Bytes::from(value)).to_bytes())
}

/// Parses a PL_CDR serialized payload.
pub fn from_payload(bytes: &Bytes) -> Result<(ParameterList, Endianness)> {
  let payload = SerializedPayload::from_bytes(bytes)?;
  let endianness = match payload.representation_identifier {
    RepresentationIdentifier::PL_CDR_LE => Endianness::LittleEndian,
    RepresentationIdentifier::PL_CDR_BE => Endianness::BigEndian,
    other => {
      return Err(Error::Serialization {
        reason: format!("Expected PL_CDR payload, got {:?}", other),
      })
    }
  };
  let pl = ParameterList::read_from_buffer_with_ctx(endianness, &payload.value)?;
  Ok((pl, endianness))
}

/// CDR string: length with the terminating NUL, characters, NUL.
pub fn push_string(pl: &mut ParameterList, pid: ParameterId, s: &str, endianness: Endianness) {
  let mut value = Vec::with_capacity(s.len() + 5);
  let len = (s.len() + 1) as u32;
  match endianness {
    Endianness::LittleEndian => value.extend_from_slice(&len.to_le_bytes()),
    Endianness::BigEndian => value.extend_from_slice(&len.to_be_bytes()),
  }
  value.extend_from_slice(s.as_bytes());
  value.push(0);
  pl.push(pid, value);
}

pub fn get_string(pl: &ParameterList, pid: ParameterId, endianness: Endianness) -> Option<String> {
  let value = &pl.get(pid)?.value;
  if value.len() < 4 {
    return None;
  }
  let mut len_bytes = [0; 4];
  len_bytes.copy_from_slice(&value[..4]);
  let len = match endianness {
    Endianness::LittleEndian => u32::from_le_bytes(len_bytes),
    Endianness::BigEndian => u32::from_be_bytes(len_bytes),
  } as usize;
  let chars = value.get(4..4 + len)?;
  let chars = chars.strip_suffix(&[0]).unwrap_or(chars);
  String::from_utf8(chars.to_vec()).ok()
}

/// Value of a mandatory parameter.
pub fn required<'a, T>(pl: &'a ParameterList, pid: ParameterId, endianness: Endianness) -> Result<T>
where
  T: Readable<'a, Endianness>,
{
  match pl.get_value::<T>(pid, endianness) {
    Some(r) => Ok(r?),
    None => Err(Error::Serialization {
      reason: format!("Missing parameter {:?}", pid),
    }),
  }
}

/// Value of an optional parameter. A malformed value counts as missing.
pub fn optional<'a, T>(pl: &'a ParameterList, pid: ParameterId, endianness: Endianness) -> Option<T>
where
  T: Readable<'a, Endianness>,
{
  pl.get_value::<T>(pid, endianness).and_then(|r| r.ok())
}

/// Instance of a discovery sample: the GUID found under `pid`.
pub fn guid_key(bytes: &Bytes, pid: ParameterId) -> Option<InstanceHandle> {
  let (pl, e) = from_payload(bytes).ok()?;
  optional::<GUID>(&pl, pid, e).map(|guid| InstanceHandle::new(guid.to_bytes()))
}
