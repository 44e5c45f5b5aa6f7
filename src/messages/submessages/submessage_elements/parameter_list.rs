use log::error;
use speedy::{Context, Endianness, Readable, Reader, Writable, Writer};

use crate::{
  messages::submessages::submessage_elements::parameter::Parameter,
  structure::parameter_id::ParameterId,
};

/// ParameterList encapsulates QoS and discovery data as a sequence of
/// parameters terminated by PID_SENTINEL. RTPS spec 9.4.2.11
///
/// Parameters are kept in wire order, including ones this crate does not
/// understand, so that a parsed list serializes back to the same octets.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ParameterList {
  pub parameters: Vec<Parameter>,
}

/// Largest value that fits the 16-bit length field, padding included.
const MAX_PARAMETER_LENGTH: usize = 0xFFFC;

impl ParameterList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.parameters.is_empty()
  }

  pub fn len(&self) -> usize {
    self.parameters.len()
  }

  pub fn push(&mut self, pid: ParameterId, value: Vec<u8>) {
    if value.len() > MAX_PARAMETER_LENGTH {
      error!(
        "Parameter {:?} value of {} bytes does not fit a ParameterList. Dropped.",
        pid,
        value.len()
      );
      return;
    }
    self.parameters.push(Parameter::new(pid, value));
  }

  /// Serializes `value` with the given endianness and appends it.
  pub fn push_value<T>(&mut self, pid: ParameterId, value: &T, endianness: Endianness)
  where
    T: Writable<Endianness>,
  {
    match value.write_to_vec_with_ctx(endianness) {
      Ok(bytes) => self.push(pid, bytes),
      Err(e) => error!("Cannot serialize parameter {:?}: {:?}", pid, e),
    }
  }

  pub fn get(&self, pid: ParameterId) -> Option<&Parameter> {
    self.parameters.iter().find(|p| p.parameter_id == pid)
  }

  pub fn get_all(&self, pid: ParameterId) -> impl Iterator<Item = &Parameter> {
    self
      .parameters
      .iter()
      .filter(move |p| p.parameter_id == pid)
  }

  /// First parameter with `pid`, deserialized. `None` if absent, `Some(Err)`
  /// if present but malformed.
  pub fn get_value<'a, T>(
    &'a self,
    pid: ParameterId,
    endianness: Endianness,
  ) -> Option<Result<T, speedy::Error>>
  where
    T: Readable<'a, Endianness>,
  {
    self
      .get(pid)
      .map(|p| T::read_from_buffer_with_ctx(endianness, &p.value))
  }

  pub fn get_all_values<'a, T>(
    &'a self,
    pid: ParameterId,
    endianness: Endianness,
  ) -> impl Iterator<Item = T> + 'a
  where
    T: Readable<'a, Endianness> + 'a,
  {
    self
      .get_all(pid)
      .filter_map(move |p| T::read_from_buffer_with_ctx(endianness, &p.value).ok())
  }

  /// Number of octets this list occupied on the wire when it was read,
  /// sentinel included.
  pub fn wire_length(&self) -> usize {
    self
      .parameters
      .iter()
      .map(|p| 4 + p.value.len())
      .sum::<usize>()
      + 4
  }
}

impl<'a, C: Context> Readable<'a, C> for ParameterList {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut parameters = Vec::new();
    loop {
      let parameter: Parameter = reader.read_value()?;
      if parameter.parameter_id == ParameterId::PID_SENTINEL {
        // Sentinel length is ignored. It should be zero.
        return Ok(Self { parameters });
      }
      parameters.push(parameter);
    }
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for ParameterList {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for param in &self.parameters {
      writer.write_value(param)?;
    }
    writer.write_value(&ParameterId::PID_SENTINEL)?;
    writer.write_u16(0)
  }
}

#[cfg(test)]
mod tests {
  use hex_literal::hex;

  use super::*;

  #[test]
  fn unknown_pids_survive_round_trip() {
    // vendor specific 0x8001 and an unassigned standard id 0x0077
    let bytes = hex!(
      "
      15 00 04 00 02 03 00 00
      01 80 08 00 de ad be ef 01 02 03 04
      77 00 04 00 aa bb cc dd
      01 00 00 00"
    )
    .to_vec();
    let pl = ParameterList::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).unwrap();
    assert_eq!(pl.len(), 3);
    assert_eq!(pl.wire_length(), bytes.len());
    assert_eq!(
      pl.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap(),
      bytes
    );
  }

  #[test]
  fn values_are_padded() {
    let mut pl = ParameterList::new();
    pl.push(ParameterId::PID_TOPIC_NAME, vec![b'a', b'b', 0]);
    let bytes = pl.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(
      bytes,
      vec![0x05, 0x00, 0x04, 0x00, b'a', b'b', 0, 0, 0x01, 0x00, 0x00, 0x00]
    );
  }

  #[test]
  fn typed_access() {
    let mut pl = ParameterList::new();
    pl.push_value(ParameterId::PID_PARTICIPANT_MANUAL_LIVELINESS_COUNT, &7u32, Endianness::BigEndian);
    let v: u32 = pl
      .get_value(ParameterId::PID_PARTICIPANT_MANUAL_LIVELINESS_COUNT, Endianness::BigEndian)
      .unwrap()
      .unwrap();
    assert_eq!(v, 7);
    assert!(pl
      .get_value::<u32>(ParameterId::PID_KEY_HASH, Endianness::BigEndian)
      .is_none());
  }

  #[test]
  fn truncated_list_is_an_error() {
    let bytes = hex!("05 00 08 00 61 62 63").to_vec();
    assert!(ParameterList::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).is_err());
  }
}
