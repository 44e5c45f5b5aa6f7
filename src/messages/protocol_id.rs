use speedy::{Context, Readable, Reader, Writable, Writer};

#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Ord, Eq)]
pub struct ProtocolId {
  protocol_id: [u8; 4],
}

impl ProtocolId {
  pub const PROTOCOL_RTPS: Self = Self {
    protocol_id: *b"RTPS",
  };

  /// A 16-byte "RTPX" ping message is sent by some implementations. It has
  /// no submessages and is ignored.
  pub const PROTOCOL_RTPX: Self = Self {
    protocol_id: *b"RTPX",
  };

  pub fn is_valid(&self) -> bool {
    *self == Self::PROTOCOL_RTPS
  }
}

impl Default for ProtocolId {
  fn default() -> Self {
    Self::PROTOCOL_RTPS
  }
}

impl<'a, C: Context> Readable<'a, C> for ProtocolId {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut protocol_id = [0; 4];
    for b in protocol_id.iter_mut() {
      *b = reader.read_u8()?;
    }
    Ok(Self { protocol_id })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for ProtocolId {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for elem in &self.protocol_id {
      writer.write_u8(*elem)?;
    }
    Ok(())
  }
}
