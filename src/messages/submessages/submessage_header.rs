use speedy::{Context, Endianness, Readable, Reader, Writable, Writer};

use crate::messages::submessages::{submessage_flag::endianness_flag, submessage_kind::SubmessageKind};

/// 4-byte header in front of every submessage. The endianness of
/// `content_length` is given by bit 0 of `flags`, not by the enclosing
/// context. RTPS spec 9.4.5.1
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SubmessageHeader {
  pub kind: SubmessageKind,
  pub flags: u8,
  pub content_length: u16, // octetsToNextHeader
}

impl SubmessageHeader {
  pub const LENGTH: usize = 4;

  pub fn read_from_buffer(buffer: &[u8]) -> Result<Self, speedy::Error> {
    Self::read_from_buffer_with_ctx(Endianness::LittleEndian, buffer)
  }
}

impl<'a, C: Context> Readable<'a, C> for SubmessageHeader {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let kind: SubmessageKind = reader.read_value()?;
    let flags: u8 = reader.read_value()?;
    let content_length = match endianness_flag(flags) {
      Endianness::LittleEndian => u16::from_le_bytes([reader.read_u8()?, reader.read_u8()?]),
      Endianness::BigEndian => u16::from_be_bytes([reader.read_u8()?, reader.read_u8()?]),
    };
    Ok(Self {
      kind,
      flags,
      content_length,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    Self::LENGTH
  }
}

impl<C: Context> Writable<C> for SubmessageHeader {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.kind)?;
    writer.write_value(&self.flags)?;
    let len = match endianness_flag(self.flags) {
      Endianness::LittleEndian => self.content_length.to_le_bytes(),
      Endianness::BigEndian => self.content_length.to_be_bytes(),
    };
    writer.write_u8(len[0])?;
    writer.write_u8(len[1])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn length_follows_flags_not_context() {
    let le = SubmessageHeader::read_from_buffer(&[0x07, 0x01, 0x1c, 0x00]).unwrap();
    assert_eq!(le.kind, SubmessageKind::HEARTBEAT);
    assert_eq!(le.content_length, 28);

    let be = SubmessageHeader::read_from_buffer_with_ctx(
      Endianness::LittleEndian,
      &[0x07, 0x00, 0x00, 0x1c],
    )
    .unwrap();
    assert_eq!(be.content_length, 28);
    assert_eq!(
      be.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap(),
      vec![0x07, 0x00, 0x00, 0x1c]
    );
  }
}
