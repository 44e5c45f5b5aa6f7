use speedy::{Context, Readable, Reader, Writable, Writer};

use crate::structure::parameter_id::ParameterId;

/// One (pid, length, value) entry of a ParameterList. The value is kept as
/// raw octets in the endianness of the enclosing encapsulation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Parameter {
  pub parameter_id: ParameterId,
  pub value: Vec<u8>,
}

impl Parameter {
  pub fn new(parameter_id: ParameterId, value: Vec<u8>) -> Self {
    Self {
      parameter_id,
      value,
    }
  }

  /// Length on the wire, rounded up to a multiple of 4.
  pub fn padded_length(&self) -> usize {
    (self.value.len() + 3) & !3
  }
}

impl<'a, C: Context> Readable<'a, C> for Parameter {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let parameter_id: ParameterId = reader.read_value()?;
    let length = reader.read_u16()?;
    let value = reader.read_vec(length as usize)?;
    Ok(Self {
      parameter_id,
      value,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for Parameter {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.parameter_id)?;
    writer.write_u16(self.padded_length() as u16)?;
    writer.write_bytes(&self.value)?;
    for _ in self.value.len()..self.padded_length() {
      writer.write_u8(0x00)?;
    }
    Ok(())
  }
}
