//! Connects application data types to serialized payloads.
//!
//! The engine itself only moves `Bytes`. A [`TypeSupport`] turns samples into
//! encapsulated payloads (RTPS spec 10.2) and back, and computes the instance
//! key hash of keyed types.

use std::{marker::PhantomData, sync::Arc};

use bytes::Bytes;
use speedy::{Endianness, Readable, Writable};

use crate::{
  dds::result::{Error, Result},
  messages::submessages::submessage_elements::serialized_payload::{
    RepresentationIdentifier, SerializedPayload,
  },
  rtps::reader::KeyHashFn,
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::GUID,
    instance_handle::InstanceHandle,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

pub trait TypeSupport<D> {
  /// Serialized payload including the encapsulation header.
  fn serialize(data: &D) -> Result<Bytes>;

  fn deserialize(payload: &Bytes) -> Result<D>;

  /// Instance of `data`. `None` for types without a key.
  fn key_hash(_data: &D) -> Option<InstanceHandle> {
    None
  }
}

/// A sample type with a key, which tells instances apart.
pub trait Keyed {
  type K: Writable<Endianness>;

  fn key(&self) -> Self::K;
}

/// Plain CDR through speedy. Speedy does not align, so this matches CDR only
/// for types whose fields need no padding.
pub struct SpeedyCdr<D> {
  phantom: PhantomData<D>,
}

fn encapsulate<D: Writable<Endianness>>(data: &D, endianness: Endianness) -> Result<Bytes> {
  let rep_id = match endianness {
    Endianness::LittleEndian => RepresentationIdentifier::CDR_LE,
    Endianness::BigEndian => RepresentationIdentifier::CDR_BE,
  };
  let value = data.write_to_vec_with_ctx(endianness)?;
  Ok(SerializedPayload::new(rep_id, Bytes::from(value)).to_bytes())
}

fn decapsulate<D>(payload: &Bytes) -> Result<D>
where
  D: for<'a> Readable<'a, Endianness>,
{
  let payload = SerializedPayload::from_bytes(payload)?;
  let endianness = match payload.representation_identifier {
    RepresentationIdentifier::CDR_LE => Endianness::LittleEndian,
    RepresentationIdentifier::CDR_BE => Endianness::BigEndian,
    other => {
      return Err(Error::Serialization {
        reason: format!("Unsupported representation {:?}", other),
      })
    }
  };
  Ok(D::read_from_buffer_with_ctx(endianness, &payload.value)?)
}

impl<D> TypeSupport<D> for SpeedyCdr<D>
where
  D: Writable<Endianness> + for<'a> Readable<'a, Endianness>,
{
  fn serialize(data: &D) -> Result<Bytes> {
    encapsulate(data, Endianness::LittleEndian)
  }

  fn deserialize(payload: &Bytes) -> Result<D> {
    decapsulate(payload)
  }
}

/// [`SpeedyCdr`] for keyed types. The key hash is the big endian CDR
/// serialization of the key, MD5 hashed when longer than 16 bytes
/// (RTPS spec 9.6.3.8).
pub struct SpeedyCdrWithKey<D> {
  phantom: PhantomData<D>,
}

impl<D> TypeSupport<D> for SpeedyCdrWithKey<D>
where
  D: Keyed + Writable<Endianness> + for<'a> Readable<'a, Endianness>,
{
  fn serialize(data: &D) -> Result<Bytes> {
    encapsulate(data, Endianness::LittleEndian)
  }

  fn deserialize(payload: &Bytes) -> Result<D> {
    decapsulate(payload)
  }

  fn key_hash(data: &D) -> Option<InstanceHandle> {
    let key = data.key().write_to_vec_with_ctx(Endianness::BigEndian).ok()?;
    Some(InstanceHandle::from_serialized_key(&key))
  }
}

/// Instance of a received payload, for readers of keyed types whose
/// writers do not send PID_KEY_HASH.
pub fn key_hash_fn<D: 'static, SA: TypeSupport<D> + 'static>() -> KeyHashFn {
  Arc::new(|payload: &Bytes| SA::deserialize(payload).ok().and_then(|d| SA::key_hash(&d)))
}

/// A change taken from a reader history, with the payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<D> {
  /// `None` for dispose and unregister notifications.
  pub value: Option<D>,
  pub kind: ChangeKind,
  pub instance_handle: InstanceHandle,
  pub writer_guid: GUID,
  pub sequence_number: SequenceNumber,
  pub source_timestamp: Option<Timestamp>,
}

impl<D> Sample<D> {
  pub fn from_change<SA: TypeSupport<D>>(change: &CacheChange) -> Result<Self> {
    let value = if change.kind.is_alive() {
      Some(SA::deserialize(&change.data_value)?)
    } else {
      None
    };
    Ok(Self {
      value,
      kind: change.kind,
      instance_handle: change.instance_handle,
      writer_guid: change.writer_guid,
      sequence_number: change.sequence_number,
      source_timestamp: change.source_timestamp,
    })
  }
}

#[cfg(test)]
mod tests {
  use speedy::{Readable, Writable};

  use super::*;

  #[derive(Debug, Clone, PartialEq, Readable, Writable)]
  struct Shape {
    id: u32,
    x: i32,
    y: i32,
  }

  impl Keyed for Shape {
    type K = u32;

    fn key(&self) -> u32 {
      self.id
    }
  }

  #[test]
  fn payload_is_encapsulated_cdr() {
    let s = Shape { id: 1, x: -1, y: 2 };
    let bytes = SpeedyCdr::<Shape>::serialize(&s).unwrap();
    assert_eq!(
      &bytes[..],
      &[
        0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x02, 0x00, 0x00,
        0x00
      ][..]
    );
    assert_eq!(SpeedyCdr::<Shape>::deserialize(&bytes).unwrap(), s);
    assert_eq!(SpeedyCdr::<Shape>::key_hash(&s), None);
  }

  #[test]
  fn big_endian_payload_is_accepted() {
    let bytes = Bytes::from_static(&[
      0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
      0x02,
    ]);
    assert_eq!(
      SpeedyCdr::<Shape>::deserialize(&bytes).unwrap(),
      Shape { id: 7, x: 1, y: 2 }
    );
    let pl = Bytes::from_static(&[0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    assert!(SpeedyCdr::<Shape>::deserialize(&pl).is_err());
  }

  #[test]
  fn key_hash_is_big_endian_key() {
    let s = Shape { id: 0x0102, x: 0, y: 0 };
    let mut expected = [0; 16];
    expected[2] = 0x01;
    expected[3] = 0x02;
    assert_eq!(
      SpeedyCdrWithKey::<Shape>::key_hash(&s),
      Some(InstanceHandle::new(expected))
    );
  }

  #[test]
  fn key_hash_fn_decodes_payload() {
    let s = Shape { id: 9, x: 1, y: 1 };
    let payload = SpeedyCdrWithKey::<Shape>::serialize(&s).unwrap();
    let f = key_hash_fn::<Shape, SpeedyCdrWithKey<Shape>>();
    assert_eq!(f(&payload), SpeedyCdrWithKey::<Shape>::key_hash(&s));
    assert_eq!(f(&Bytes::from_static(&[0, 1])), None);
  }

  #[test]
  fn disposed_sample_has_no_value() {
    let change = CacheChange::new(
      ChangeKind::NotAliveDisposed,
      GUID::GUID_UNKNOWN,
      InstanceHandle::new([1; 16]),
      SequenceNumber::new(3),
      Bytes::new(),
    );
    let sample = Sample::<Shape>::from_change::<SpeedyCdrWithKey<Shape>>(&change).unwrap();
    assert_eq!(sample.value, None);
    assert_eq!(sample.sequence_number, SequenceNumber::new(3));
  }
}
