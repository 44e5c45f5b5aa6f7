use std::io;

use bytes::Bytes;
use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::submessages::{
    submessage::WriterSubmessage,
    submessage_elements::parameter_list::ParameterList,
    submessage_flag::{endianness_flag, DATAFRAG_Flags},
    submessage_header::SubmessageHeader,
    submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{
    guid::EntityId,
    sequence_number::{FragmentNumber, SequenceNumber},
  },
};

/// The DataFrag Submessage extends the Data Submessage by enabling the
/// serializedData to be fragmented and sent as multiple DataFrag Submessages.
/// The fragments contained in the DataFrag Submessages are then re-assembled
/// by the RTPS Reader.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataFrag {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,

  /// Fragment numbering starts with number 1.
  pub fragment_starting_num: FragmentNumber,

  /// The number of consecutive fragments contained in this Submessage,
  /// starting at fragment_starting_num.
  pub fragments_in_submessage: u16,

  /// The total size in bytes of the original data before fragmentation.
  pub data_size: u32,

  /// Size of every fragment except possibly the last one.
  pub fragment_size: u16,

  pub inline_qos: Option<ParameterList>,

  /// fragments_in_submessage consecutive fragments of the serialized data.
  pub serialized_payload: Bytes,
}

/// readerId .. sampleSize
const OCTETS_TO_INLINE_QOS: u16 = 28;

fn invalid_data(msg: String) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl DataFrag {
  pub fn deserialize_data_frag(
    buffer: &Bytes,
    flags: BitFlags<DATAFRAG_Flags>,
  ) -> io::Result<Self> {
    let endianness = endianness_flag(flags.bits());
    if buffer.len() < 4 + OCTETS_TO_INLINE_QOS as usize {
      return Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("DATA_FRAG submessage too short: {} bytes", buffer.len()),
      ));
    }
    let read_err = |e: speedy::Error| io::Error::new(io::ErrorKind::InvalidData, e);
    let octets_to_inline_qos =
      u16::read_from_buffer_with_ctx(endianness, &buffer[2..4]).map_err(read_err)?;
    let reader_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[4..8]).map_err(read_err)?;
    let writer_id =
      EntityId::read_from_buffer_with_ctx(endianness, &buffer[8..12]).map_err(read_err)?;
    let writer_sn =
      SequenceNumber::read_from_buffer_with_ctx(endianness, &buffer[12..20]).map_err(read_err)?;
    let fragment_starting_num =
      FragmentNumber::read_from_buffer_with_ctx(endianness, &buffer[20..24]).map_err(read_err)?;
    let fragments_in_submessage =
      u16::read_from_buffer_with_ctx(endianness, &buffer[24..26]).map_err(read_err)?;
    let fragment_size =
      u16::read_from_buffer_with_ctx(endianness, &buffer[26..28]).map_err(read_err)?;
    let data_size = u32::read_from_buffer_with_ctx(endianness, &buffer[28..32]).map_err(read_err)?;

    let mut rest_start = 4 + octets_to_inline_qos as usize;
    if rest_start > buffer.len() || octets_to_inline_qos < OCTETS_TO_INLINE_QOS {
      return Err(invalid_data(format!(
        "DATA_FRAG octetsToInlineQos {} is invalid",
        octets_to_inline_qos
      )));
    }
    let inline_qos = if flags.contains(DATAFRAG_Flags::InlineQos) {
      let pl = ParameterList::read_from_buffer_with_ctx(endianness, &buffer[rest_start..])
        .map_err(read_err)?;
      rest_start += pl.wire_length();
      Some(pl)
    } else {
      None
    };
    if rest_start > buffer.len() {
      return Err(invalid_data(
        "DATA_FRAG inline QoS overruns the submessage".to_string(),
      ));
    }

    let mut frag = Self {
      reader_id,
      writer_id,
      writer_sn,
      fragment_starting_num,
      fragments_in_submessage,
      data_size,
      fragment_size,
      inline_qos,
      serialized_payload: Bytes::new(),
    };
    if !frag.is_valid() {
      return Err(invalid_data(format!(
        "DATA_FRAG {:?} {:?} has inconsistent fragment fields",
        frag.writer_sn, frag.fragment_starting_num
      )));
    }
    // Submessage bodies are padded to 4 bytes. Anything past the fragments is
    // padding.
    let payload_len = frag.expected_payload_len();
    if rest_start + payload_len > buffer.len() {
      return Err(invalid_data(format!(
        "DATA_FRAG carries {} payload bytes, expected {}",
        buffer.len() - rest_start,
        payload_len
      )));
    }
    frag.serialized_payload = buffer.slice(rest_start..rest_start + payload_len);
    Ok(frag)
  }

  /// RTPS spec 8.3.7.3.3 validity, plus consistency of the fragment range
  /// with the sample size.
  pub fn is_valid(&self) -> bool {
    let start = u32::from(self.fragment_starting_num);
    self.writer_sn.is_valid()
      && self.fragment_size > 0
      && self.data_size > 0
      && u32::from(self.fragment_size) <= self.data_size
      && self.fragments_in_submessage > 0
      && start >= 1
      && u64::from(start) + u64::from(self.fragments_in_submessage) - 1
        <= u64::from(self.total_fragments())
  }

  /// Number of fragments the whole sample is split into.
  pub fn total_fragments(&self) -> u32 {
    total_fragments(self.data_size, self.fragment_size)
  }

  fn expected_payload_len(&self) -> usize {
    let offset = u64::from(u32::from(self.fragment_starting_num) - 1) * u64::from(self.fragment_size);
    let wanted = u64::from(self.fragments_in_submessage) * u64::from(self.fragment_size);
    wanted.min(u64::from(self.data_size).saturating_sub(offset)) as usize
  }

  /// Byte offset of the first fragment in the reassembled sample.
  pub fn payload_offset(&self) -> usize {
    (u32::from(self.fragment_starting_num) as usize - 1) * self.fragment_size as usize
  }

  pub fn flags(&self, endianness: Endianness, key_only: bool) -> BitFlags<DATAFRAG_Flags> {
    let mut flags = if endianness == Endianness::LittleEndian {
      BitFlags::from(DATAFRAG_Flags::Endianness)
    } else {
      BitFlags::empty()
    };
    if self.inline_qos.is_some() {
      flags |= DATAFRAG_Flags::InlineQos;
    }
    if key_only {
      flags |= DATAFRAG_Flags::Key;
    }
    flags
  }

  pub fn len_serialized(&self) -> usize {
    let unpadded = 4
      + OCTETS_TO_INLINE_QOS as usize
      + self.inline_qos.as_ref().map_or(0, ParameterList::wire_length)
      + self.serialized_payload.len();
    (unpadded + 3) & !3
  }

  pub fn create_submessage(self, flags: BitFlags<DATAFRAG_Flags>) -> Option<Submessage> {
    let len = self.len_serialized();
    if len > u16::MAX as usize {
      error!(
        "DATA_FRAG of {} bytes does not fit the length field. Fragment size {} is too large.",
        len, self.fragment_size
      );
      return None;
    }
    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::DATA_FRAG,
        flags: flags.bits(),
        content_length: len as u16,
      },
      body: SubmessageBody::Writer(WriterSubmessage::DataFrag(self, flags)),
    })
  }
}

/// Number of `fragment_size` fragments needed for `data_size` bytes.
pub fn total_fragments(data_size: u32, fragment_size: u16) -> u32 {
  if fragment_size == 0 {
    return 0;
  }
  let fragment_size = u32::from(fragment_size);
  data_size / fragment_size + u32::from(data_size % fragment_size != 0)
}

impl<C: Context> Writable<C> for DataFrag {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_u16(0)?;
    writer.write_u16(OCTETS_TO_INLINE_QOS)?;
    writer.write_value(&self.reader_id)?;
    writer.write_value(&self.writer_id)?;
    writer.write_value(&self.writer_sn)?;
    writer.write_value(&self.fragment_starting_num)?;
    writer.write_u16(self.fragments_in_submessage)?;
    writer.write_u16(self.fragment_size)?;
    writer.write_u32(self.data_size)?;
    if let Some(inline_qos) = &self.inline_qos {
      writer.write_value(inline_qos)?;
    }
    writer.write_bytes(&self.serialized_payload)?;
    let written = 4
      + OCTETS_TO_INLINE_QOS as usize
      + self.inline_qos.as_ref().map_or(0, ParameterList::wire_length)
      + self.serialized_payload.len();
    for _ in written..self.len_serialized() {
      writer.write_u8(0)?;
    }
    Ok(())
  }
}
