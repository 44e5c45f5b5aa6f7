use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use speedy::{Endianness, Readable, Writable};

/// Identifies the serialization format of payload data over RTPS.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Readable, Writable, Serialize, Deserialize)]
pub struct RepresentationIdentifier {
  bytes: [u8; 2],
}

impl RepresentationIdentifier {
  // Numeric values are from RTPS spec v2.3 Section 10.5 , Table 10.3
  pub const CDR_BE: Self = Self {
    bytes: [0x00, 0x00],
  };
  pub const CDR_LE: Self = Self {
    bytes: [0x00, 0x01],
  };
  pub const PL_CDR_BE: Self = Self {
    bytes: [0x00, 0x02],
  };
  pub const PL_CDR_LE: Self = Self {
    bytes: [0x00, 0x03],
  };

  pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
    match bytes {
      [a, b, ..] => Ok(Self { bytes: [*a, *b] }),
      _ => Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "representation identifier needs 2 bytes",
      )),
    }
  }

  pub fn to_bytes(self) -> [u8; 2] {
    self.bytes
  }

  /// Endianness of a CDR or PL_CDR representation, `None` for anything
  /// else.
  pub fn endianness(self) -> Option<Endianness> {
    match self {
      Self::CDR_LE | Self::PL_CDR_LE => Some(Endianness::LittleEndian),
      Self::CDR_BE | Self::PL_CDR_BE => Some(Endianness::BigEndian),
      _ => None,
    }
  }
}

/// A serialized payload: 4-byte encapsulation header and the serialized
/// value. RTPS spec 10.2
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SerializedPayload {
  pub representation_identifier: RepresentationIdentifier,
  pub representation_options: [u8; 2],
  pub value: Bytes,
}

impl SerializedPayload {
  pub fn new(representation_identifier: RepresentationIdentifier, value: Bytes) -> Self {
    Self {
      representation_identifier,
      representation_options: [0, 0],
      value,
    }
  }

  pub fn from_bytes(bytes: &Bytes) -> io::Result<Self> {
    if bytes.len() < 4 {
      return Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("serialized payload of {} bytes is too short", bytes.len()),
      ));
    }
    Ok(Self {
      representation_identifier: RepresentationIdentifier::from_bytes(&bytes[0..2])?,
      representation_options: [bytes[2], bytes[3]],
      value: bytes.slice(4..),
    })
  }

  pub fn to_bytes(&self) -> Bytes {
    let mut b = BytesMut::with_capacity(4 + self.value.len());
    b.put_slice(&self.representation_identifier.to_bytes());
    b.put_slice(&self.representation_options);
    b.put_slice(&self.value);
    b.freeze()
  }

  pub fn len_serialized(&self) -> usize {
    4 + self.value.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encapsulation_header_is_split_off() {
    let b = Bytes::from_static(&[0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    let p = SerializedPayload::from_bytes(&b).unwrap();
    assert_eq!(p.representation_identifier, RepresentationIdentifier::PL_CDR_LE);
    assert_eq!(
      p.representation_identifier.endianness(),
      Some(Endianness::LittleEndian)
    );
    assert_eq!(&p.value[..], &[0x01, 0x00, 0x00, 0x00]);
    assert_eq!(p.to_bytes(), b);
  }

  #[test]
  fn short_payload_is_rejected() {
    assert!(SerializedPayload::from_bytes(&Bytes::from_static(&[0, 1])).is_err());
  }
}
