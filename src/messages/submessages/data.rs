use std::io;

use bytes::Bytes;
use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::submessages::{
    submessage::WriterSubmessage,
    submessage_elements::parameter_list::ParameterList,
    submessage_flag::{endianness_flag, DATA_Flags},
    submessage_header::SubmessageHeader,
    submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{guid::EntityId, sequence_number::SequenceNumber},
};

/// This Submessage is sent from an RTPS Writer (NO_KEY or WITH_KEY)
/// to an RTPS Reader (NO_KEY or WITH_KEY)
///
/// The Submessage notifies the RTPS Reader of a change to
/// a data-object belonging to the RTPS Writer. The possible changes
/// include both changes in value as well as changes to the lifecycle
/// of the data-object.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Data {
  /// Identifies the RTPS Reader entity that is being informed of the change
  /// to the data-object.
  pub reader_id: EntityId,

  /// Identifies the RTPS Writer entity that made the change to the
  /// data-object.
  pub writer_id: EntityId,

  /// Uniquely identifies the change and the relative order for all changes
  /// made by the RTPS Writer identified by the writerGuid.
  pub writer_sn: SequenceNumber,

  /// Present only if the InlineQosFlag is set in the header.
  pub inline_qos: Option<ParameterList>,

  /// Encapsulated value (DataFlag) or key (KeyFlag), including the 4-byte
  /// encapsulation header.
  pub serialized_payload: Option<Bytes>,
}

/// octetsToInlineQos when the inline QoS follows writerSN directly.
const OCTETS_TO_INLINE_QOS: u16 = 16;

impl Data {
  /// DATA needs its own parser: the position of the inline QoS is given by
  /// octetsToInlineQos, and the payload extends to the end of the
  /// submessage.
  pub fn deserialize_data(buffer: &Bytes, flags: BitFlags<DATA_Flags>) -> io::Result<Self> {
    let endianness = endianness_flag(flags.bits());
    if buffer.len() < 4 + OCTETS_TO_INLINE_QOS as usize {
      return Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("DATA submessage too short: {} bytes", buffer.len()),
      ));
    }
    // buffer[0..2] is extraFlags, ignored.
    let octets_to_inline_qos = u16::read_from_buffer_with_ctx(endianness, &buffer[2..4])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let reader_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[4..8])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let writer_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[8..12])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let writer_sn = SequenceNumber::read_from_buffer_with_ctx(endianness, &buffer[12..20])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if !writer_sn.is_valid() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("DATA writerSN {:?} is out of range", writer_sn),
      ));
    }

    let mut rest_start = 4 + octets_to_inline_qos as usize;
    if rest_start > buffer.len() || octets_to_inline_qos < OCTETS_TO_INLINE_QOS {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("DATA octetsToInlineQos {} is invalid", octets_to_inline_qos),
      ));
    }

    let inline_qos = if flags.contains(DATA_Flags::InlineQos) {
      let pl = ParameterList::read_from_buffer_with_ctx(endianness, &buffer[rest_start..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
      rest_start += pl.wire_length();
      Some(pl)
    } else {
      None
    };

    let serialized_payload =
      if flags.contains(DATA_Flags::Data) || flags.contains(DATA_Flags::Key) {
        if rest_start > buffer.len() {
          return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "DATA inline QoS overruns the submessage",
          ));
        }
        Some(buffer.slice(rest_start..))
      } else {
        None
      };

    Ok(Self {
      reader_id,
      writer_id,
      writer_sn,
      inline_qos,
      serialized_payload,
    })
  }

  /// Flags that agree with the contents. `key_only` chooses the K flag
  /// over D for the payload.
  pub fn flags(&self, endianness: Endianness, key_only: bool) -> BitFlags<DATA_Flags> {
    let mut flags = if endianness == Endianness::LittleEndian {
      BitFlags::from(DATA_Flags::Endianness)
    } else {
      BitFlags::empty()
    };
    if self.inline_qos.is_some() {
      flags |= DATA_Flags::InlineQos;
    }
    if self.serialized_payload.is_some() {
      flags |= if key_only {
        DATA_Flags::Key
      } else {
        DATA_Flags::Data
      };
    }
    flags
  }

  pub fn len_serialized(&self) -> usize {
    4 + OCTETS_TO_INLINE_QOS as usize
      + self.inline_qos.as_ref().map_or(0, |pl| {
        pl.parameters
          .iter()
          .map(|p| 4 + p.padded_length())
          .sum::<usize>()
          + 4
      })
      + self.serialized_payload.as_ref().map_or(0, Bytes::len)
  }

  pub fn create_submessage(self, flags: BitFlags<DATA_Flags>) -> Option<Submessage> {
    let len = self.len_serialized();
    if len > u16::MAX as usize {
      error!(
        "DATA submessage of {} bytes does not fit the length field. Fragmentation is not \
         supported.",
        len
      );
      return None;
    }
    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::DATA,
        flags: flags.bits(),
        content_length: len as u16,
      },
      body: SubmessageBody::Writer(WriterSubmessage::Data(self, flags)),
    })
  }
}

impl<C: Context> Writable<C> for Data {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    // extraFlags are zero in this protocol version
    writer.write_u16(0)?;
    writer.write_u16(OCTETS_TO_INLINE_QOS)?;
    writer.write_value(&self.reader_id)?;
    writer.write_value(&self.writer_id)?;
    writer.write_value(&self.writer_sn)?;
    if let Some(inline_qos) = &self.inline_qos {
      writer.write_value(inline_qos)?;
    }
    if let Some(payload) = &self.serialized_payload {
      writer.write_bytes(payload)?;
    }
    Ok(())
  }
}
