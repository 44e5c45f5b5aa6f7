use std::{collections::BTreeSet, io};

use bytes::Bytes;
use enumflags2::BitFlags;
#[allow(unused_imports)]
use log::{debug, error, trace, warn};
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::{
    header::Header,
    submessages::{
      submessage_elements::parameter_list::ParameterList,
      submessage_flag::{
        FromEndianness, ACKNACK_Flags, DATA_Flags, GAP_Flags, HEARTBEATFRAG_Flags,
        HEARTBEAT_Flags, INFODESTINATION_Flags, INFOTIMESTAMP_Flags, NACKFRAG_Flags,
      },
      submessages::*,
    },
  },
  rtps::{Submessage, SubmessageBody},
  structure::{
    cache_change::CacheChange,
    count::Count,
    guid::{EntityId, GuidPrefix},
    parameter_id::ParameterId,
    sequence_number::{FragmentNumber, FragmentNumberSet, SequenceNumber, SequenceNumberSet},
    time::Timestamp,
  },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub header: Header,
  pub submessages: Vec<Submessage>,
}

impl Message {
  pub fn new(header: Header) -> Self {
    Self {
      header,
      submessages: vec![],
    }
  }

  pub fn add_submessage(&mut self, submessage: Submessage) {
    self.submessages.push(submessage);
  }

  /// Parses a whole message. A submessage with an inconsistent length ends
  /// parsing: the submessages before it are kept. Only a bad header is an
  /// error.
  pub fn read_from_buffer(buffer: &Bytes) -> io::Result<Self> {
    if buffer.len() < Header::LENGTH {
      return Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("Message of {} bytes is shorter than RTPS header", buffer.len()),
      ));
    }
    let rtps_header = Header::read_from_buffer(&buffer[..Header::LENGTH])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if !rtps_header.is_valid() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Invalid RTPS header {:?}", rtps_header),
      ));
    }
    let mut message = Self::new(rtps_header);
    let mut submessages_left: Bytes = buffer.slice(Header::LENGTH..);
    while !submessages_left.is_empty() {
      match Submessage::read_from_buffer(&mut submessages_left) {
        Ok(Some(submessage)) => message.submessages.push(submessage),
        Ok(None) => (), // skipped
        Err(e) => {
          warn!(
            "Message from {:?}: {}. Ignoring the rest of the message.",
            rtps_header.guid_prefix, e
          );
          break;
        }
      }
    }
    Ok(message)
  }
}

impl<C: Context> Writable<C> for Message {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.header)?;
    for x in &self.submessages {
      writer.write_value(x)?;
    }
    Ok(())
  }
}

/// Builds the submessages of one outgoing message.
#[derive(Default, Clone)]
pub(crate) struct MessageBuilder {
  submessages: Vec<Submessage>,
}

impl MessageBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn dst_submessage(mut self, endianness: Endianness, guid_prefix: GuidPrefix) -> Self {
    let flags = BitFlags::<INFODESTINATION_Flags>::from_endianness(endianness);
    self
      .submessages
      .push(InfoDestination { guid_prefix }.create_submessage(flags));
    self
  }

  /// Argument Some(timestamp) means that a timestamp is sent.
  /// Argument None means "invalidate", i.e. the previously sent
  /// [`InfoTimestamp`] submessage no longer applies.
  pub fn ts_msg(mut self, endianness: Endianness, timestamp: Option<Timestamp>) -> Self {
    let flags = BitFlags::<INFOTIMESTAMP_Flags>::from_endianness(endianness);
    self
      .submessages
      .push(InfoTimestamp { timestamp }.create_submessage(flags));
    self
  }

  /// Inline QoS of a change. Non-alive changes carry PID_STATUS_INFO and
  /// PID_KEY_HASH; the key hash is also sent for alive changes when the
  /// reader expects inline QoS.
  pub fn change_inline_qos(
    cache_change: &CacheChange,
    expects_inline_qos: bool,
  ) -> Option<ParameterList> {
    let mut inline_qos = ParameterList::new();
    let alive = cache_change.kind.is_alive();
    if !cache_change.instance_handle.is_nil() && (!alive || expects_inline_qos) {
      inline_qos.push(
        ParameterId::PID_KEY_HASH,
        cache_change.instance_handle.to_bytes().to_vec(),
      );
    }
    if !alive {
      inline_qos.push(
        ParameterId::PID_STATUS_INFO,
        cache_change.kind.to_status_info().to_vec(),
      );
    }
    if inline_qos.is_empty() {
      None
    } else {
      Some(inline_qos)
    }
  }

  /// DATA for a change. Nothing is added when the change does not fit into
  /// one submessage.
  pub fn data_msg(
    mut self,
    cache_change: &CacheChange,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    endianness: Endianness,
    expects_inline_qos: bool,
  ) -> Self {
    let serialized_payload = if cache_change.data_value.is_empty() {
      None
    } else {
      Some(cache_change.data_value.clone())
    };

    let data_message = Data {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      writer_sn: cache_change.sequence_number,
      inline_qos: Self::change_inline_qos(cache_change, expects_inline_qos),
      serialized_payload,
    };
    // Payload of a non-alive change is the serialized key.
    let flags: BitFlags<DATA_Flags> = data_message.flags(endianness, !cache_change.kind.is_alive());
    if let Some(submessage) = data_message.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  /// One DATA_FRAG carrying fragment `fragment_num` of the change payload.
  #[allow(clippy::too_many_arguments)]
  pub fn data_frag_msg(
    mut self,
    cache_change: &CacheChange,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    fragment_num: FragmentNumber,
    fragment_size: u16,
    endianness: Endianness,
    expects_inline_qos: bool,
  ) -> Self {
    let data_size = cache_change.data_value.len();
    let start = (u32::from(fragment_num) as usize - 1) * fragment_size as usize;
    if start >= data_size {
      error!(
        "data_frag_msg: {:?} is past the end of {:?} ({} bytes)",
        fragment_num, cache_change.sequence_number, data_size
      );
      return self;
    }
    let end = data_size.min(start + fragment_size as usize);
    let data_frag = DataFrag {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      writer_sn: cache_change.sequence_number,
      fragment_starting_num: fragment_num,
      fragments_in_submessage: 1,
      data_size: data_size as u32,
      fragment_size,
      inline_qos: Self::change_inline_qos(cache_change, expects_inline_qos),
      serialized_payload: cache_change.data_value.slice(start..end),
    };
    let flags = data_frag.flags(endianness, !cache_change.kind.is_alive());
    if let Some(submessage) = data_frag.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn gap_msg(
    mut self,
    irrelevant_sns: &BTreeSet<SequenceNumber>,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    endianness: Endianness,
  ) -> Self {
    if irrelevant_sns.is_empty() {
      error!("gap_msg called with empty SN set. Skipping GAP submessage");
      return self;
    }
    let gap_flags = BitFlags::<GAP_Flags>::from_endianness(endianness);
    for gap in Gap::cover_all(reader_entity_id, writer_entity_id, irrelevant_sns) {
      if let Some(s) = gap.create_submessage(gap_flags) {
        self.submessages.push(s);
      }
    }
    self
  }

  #[allow(clippy::too_many_arguments)]
  pub fn heartbeat_msg(
    mut self,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: Count,
    endianness: Endianness,
    set_final_flag: bool,
    set_liveliness_flag: bool,
  ) -> Self {
    let heartbeat = Heartbeat {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      first_sn,
      last_sn,
      count,
    };

    let mut flags = BitFlags::<HEARTBEAT_Flags>::from_endianness(endianness);
    if set_final_flag {
      flags.insert(HEARTBEAT_Flags::Final);
    }
    if set_liveliness_flag {
      flags.insert(HEARTBEAT_Flags::Liveliness);
    }

    if let Some(sm) = heartbeat.create_submessage(flags) {
      self.submessages.push(sm);
    }
    self
  }

  pub fn acknack_msg(
    mut self,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    reader_sn_state: SequenceNumberSet,
    count: Count,
    endianness: Endianness,
    set_final_flag: bool,
  ) -> Self {
    let mut flags = BitFlags::<ACKNACK_Flags>::from_endianness(endianness);
    if set_final_flag {
      flags.insert(ACKNACK_Flags::Final);
    }
    let acknack = AckNack {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      reader_sn_state,
      count,
    };
    if let Some(sm) = acknack.create_submessage(flags) {
      self.submessages.push(sm);
    }
    self
  }

  pub fn heartbeat_frag_msg(
    mut self,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    writer_sn: SequenceNumber,
    last_fragment_num: FragmentNumber,
    count: Count,
    endianness: Endianness,
  ) -> Self {
    let heartbeat_frag = HeartbeatFrag {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      writer_sn,
      last_fragment_num,
      count,
    };
    let flags = BitFlags::<HEARTBEATFRAG_Flags>::from_endianness(endianness);
    if let Some(sm) = heartbeat_frag.create_submessage(flags) {
      self.submessages.push(sm);
    }
    self
  }

  pub fn nack_frag_msg(
    mut self,
    reader_entity_id: EntityId,
    writer_entity_id: EntityId,
    writer_sn: SequenceNumber,
    fragment_number_state: FragmentNumberSet,
    count: Count,
    endianness: Endianness,
  ) -> Self {
    let nack_frag = NackFrag {
      reader_id: reader_entity_id,
      writer_id: writer_entity_id,
      writer_sn,
      fragment_number_state,
      count,
    };
    let flags = BitFlags::<NACKFRAG_Flags>::from_endianness(endianness);
    if let Some(sm) = nack_frag.create_submessage(flags) {
      self.submessages.push(sm);
    }
    self
  }

  pub fn into_submessages(self) -> Vec<Submessage> {
    self.submessages
  }

  pub fn add_header_and_build(self, guid_prefix: GuidPrefix) -> Message {
    Message {
      header: Header::new(guid_prefix),
      submessages: self.submessages,
    }
  }
}

/// Length of a submessage on the wire, header included.
pub(crate) fn submessage_wire_length(submessage: &Submessage) -> usize {
  match &submessage.body {
    SubmessageBody::Writer(WriterSubmessage::Data(d, _)) => 4 + d.len_serialized(),
    SubmessageBody::Writer(WriterSubmessage::DataFrag(d, _)) => 4 + d.len_serialized(),
    _ => 4 + submessage.header.content_length as usize,
  }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
  use log::info;
  use speedy::Writable;

  use super::*;
  use crate::structure::{
    cache_change::ChangeKind, guid::GUID, instance_handle::InstanceHandle,
  };

  #[test]

  fn rtps_message_test_shapes_demo_message_deserialization() {
    // Data message should contain Shapetype values.
    // captured with wireshark from shapes demo.
    // packet with INFO_DST, INFO_TS, DATA, HEARTBEAT
    let bits1 = Bytes::from_static(&[
      0x52, 0x54, 0x50, 0x53, 0x02, 0x03, 0x01, 0x0f, 0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0x00,
      0x00, 0x01, 0x00, 0x00, 0x00, 0x0e, 0x01, 0x0c, 0x00, 0x01, 0x03, 0x00, 0x0c, 0x29, 0x2d,
      0x31, 0xa2, 0x28, 0x20, 0x02, 0x08, 0x09, 0x01, 0x08, 0x00, 0x1a, 0x15, 0xf3, 0x5e, 0x00,
      0xcc, 0xfb, 0x13, 0x15, 0x05, 0x2c, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x07,
      0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x5b, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
      0x00, 0x04, 0x00, 0x00, 0x00, 0x52, 0x45, 0x44, 0x00, 0x69, 0x00, 0x00, 0x00, 0x17, 0x00,
      0x00, 0x00, 0x1e, 0x00, 0x00, 0x00, 0x07, 0x01, 0x1c, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00,
      0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x5b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
      0x5b, 0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00,
    ]);
    let rtps = Message::read_from_buffer(&bits1).unwrap();
    info!("{:?}", rtps);

    let serialized = Bytes::from(
      rtps
        .write_to_vec_with_ctx(Endianness::LittleEndian)
        .unwrap(),
    );
    assert_eq!(bits1, serialized);
  }
  #[test]
  fn rtps_message_test_shapes_demo_DataP() {
    // / captured with wireshark from shapes demo.
    // packet with DATA(p)
    let bits2 = Bytes::from_static(&[
      0x52, 0x54, 0x50, 0x53, 0x02, 0x04, 0x01, 0x03, 0x01, 0x03, 0x00, 0x0c, 0x29, 0x2d, 0x31,
      0xa2, 0x28, 0x20, 0x02, 0x08, 0x15, 0x05, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00,
      0x00, 0x00, 0x00, 0x01, 0x00, 0xc2, 0x00, 0x00, 0x00, 0x00, 0x23, 0x00, 0x00, 0x00, 0x00,
      0x03, 0x00, 0x00, 0x77, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0f, 0x00, 0x04, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x15, 0x00, 0x04, 0x00, 0x02, 0x04, 0x00, 0x00, 0x50, 0x00, 0x10,
      0x00, 0x01, 0x03, 0x00, 0x0c, 0x29, 0x2d, 0x31, 0xa2, 0x28, 0x20, 0x02, 0x08, 0x00, 0x00,
      0x01, 0xc1, 0x16, 0x00, 0x04, 0x00, 0x01, 0x03, 0x00, 0x00, 0x44, 0x00, 0x04, 0x00, 0x3f,
      0x0c, 0x00, 0x00, 0x58, 0x00, 0x04, 0x00, 0x3f, 0x0c, 0x00, 0x00, 0x32, 0x00, 0x18, 0x00,
      0x01, 0x00, 0x00, 0x00, 0x9f, 0xa4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x50, 0x8e, 0xc9, 0x32, 0x00, 0x18, 0x00, 0x01, 0x00,
      0x00, 0x00, 0x9f, 0xa4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
      0x00, 0x00, 0x00, 0xc0, 0xa8, 0x45, 0x14, 0x32, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00,
      0x9f, 0xa4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
      0x00, 0xac, 0x11, 0x00, 0x01, 0x33, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00, 0xea, 0x1c,
      0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xef,
      0xff, 0x00, 0x01, 0x31, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00, 0x39, 0x30, 0x00, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7f, 0x00, 0x00,
      0x01, 0x48, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00, 0x39, 0x30, 0x00, 0x00, 0x00, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7f, 0x00, 0x00, 0x01, 0x34,
      0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xb0, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00,
      0x02, 0x00, 0x08, 0x00, 0x2c, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
      0x00,
    ]);

    let rtps_data = Message::read_from_buffer(&bits2).unwrap();

    let serialized_data = Bytes::from(
      rtps_data
        .write_to_vec_with_ctx(Endianness::LittleEndian)
        .unwrap(),
    );
    assert_eq!(bits2, serialized_data);
  }

  #[test]
  fn rtps_message_test_shapes_demo_info_TS_dataP() {
    // captured with wireshark from shapes demo.
    // rtps packet with info TS and Data(p)
    let bits1 = Bytes::from_static(&[
      0x52, 0x54, 0x50, 0x53, 0x02, 0x03, 0x01, 0x0f, 0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0x00,
      0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x08, 0x00, 0x0e, 0x15, 0xf3, 0x5e, 0x00, 0x28,
      0x74, 0xd2, 0x15, 0x05, 0xa8, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x01, 0x00, 0xc7, 0x00,
      0x01, 0x00, 0xc2, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00,
      0x15, 0x00, 0x04, 0x00, 0x02, 0x03, 0x00, 0x00, 0x16, 0x00, 0x04, 0x00, 0x01, 0x0f, 0x00,
      0x00, 0x50, 0x00, 0x10, 0x00, 0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0x00, 0x00, 0x01, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x01, 0xc1, 0x32, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00, 0xf4,
      0x1c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
      0x0a, 0x50, 0x8e, 0x68, 0x31, 0x00, 0x18, 0x00, 0x01, 0x00, 0x00, 0x00, 0xf5, 0x1c, 0x00,
      0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x50,
      0x8e, 0x68, 0x02, 0x00, 0x08, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x58,
      0x00, 0x04, 0x00, 0x3f, 0x0c, 0x3f, 0x0c, 0x62, 0x00, 0x18, 0x00, 0x14, 0x00, 0x00, 0x00,
      0x66, 0x61, 0x73, 0x74, 0x72, 0x74, 0x70, 0x73, 0x50, 0x61, 0x72, 0x74, 0x69, 0x63, 0x69,
      0x70, 0x61, 0x6e, 0x74, 0x00, 0x01, 0x00, 0x00, 0x00,
    ]);

    let rtps = Message::read_from_buffer(&bits1).unwrap();
    info!("{:?}", rtps);

    let serialized = Bytes::from(
      rtps
        .write_to_vec_with_ctx(Endianness::LittleEndian)
        .unwrap(),
    );
    assert_eq!(bits1, serialized);
  }

  #[test]
  fn rtps_message_test_shapes_demo_info_TS_AckNack() {
    // captured with wireshark from shapes demo.
    // rtps packet with info TS three AckNacks
    let bits1 = Bytes::from_static(&[
      0x52, 0x54, 0x50, 0x53, 0x02, 0x04, 0x01, 0x03, 0x01, 0x03, 0x00, 0x0c, 0x29, 0x2d, 0x31,
      0xa2, 0x28, 0x20, 0x02, 0x08, 0x0e, 0x01, 0x0c, 0x00, 0x01, 0x0f, 0x99, 0x06, 0x78, 0x34,
      0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x03, 0x18, 0x00, 0x00, 0x00, 0x03, 0xc7, 0x00,
      0x00, 0x03, 0xc2, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
      0x01, 0x00, 0x00, 0x00, 0x06, 0x03, 0x18, 0x00, 0x00, 0x00, 0x04, 0xc7, 0x00, 0x00, 0x04,
      0xc2, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
      0x00, 0x00, 0x06, 0x03, 0x18, 0x00, 0x00, 0x02, 0x00, 0xc7, 0x00, 0x02, 0x00, 0xc2, 0x00,
      0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    ]);

    let rtps = Message::read_from_buffer(&bits1).unwrap();
    info!("{:?}", rtps);

    let serialized = Bytes::from(
      rtps
        .write_to_vec_with_ctx(Endianness::LittleEndian)
        .unwrap(),
    );
    assert_eq!(bits1, serialized);
  }

  #[test]
  fn rtps_message_truncated_tail_keeps_leading_submessages() {
    // INFO_DST, then a HEARTBEAT whose length overruns the message
    let bits = Bytes::from_static(&[
      0x52, 0x54, 0x50, 0x53, 0x02, 0x03, 0x01, 0x0f, 0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0x00,
      0x00, 0x01, 0x00, 0x00, 0x00, 0x0e, 0x01, 0x0c, 0x00, 0x01, 0x03, 0x00, 0x0c, 0x29, 0x2d,
      0x31, 0xa2, 0x28, 0x20, 0x02, 0x08, 0x07, 0x01, 0x40, 0x00, 0x00, 0x00, 0x00, 0x07,
    ]);
    let rtps = Message::read_from_buffer(&bits).unwrap();
    assert_eq!(rtps.submessages.len(), 1);
  }

  #[test]
  fn rtps_message_rejects_bad_header() {
    let bits = Bytes::from_static(b"RTPX\x02\x03\x01\x0f\x01\x0f\x99\x06\x78\x34\x00\x00\x01\x00\x00\x00");
    assert!(Message::read_from_buffer(&bits).is_err());
    assert!(Message::read_from_buffer(&Bytes::from_static(b"RTPS")).is_err());
  }

  #[test]
  fn dispose_carries_status_info_and_key_hash() {
    let writer_guid = GUID::new(
      GuidPrefix::new([1; 12]),
      EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
    );
    let change = CacheChange::new(
      ChangeKind::NotAliveDisposed,
      writer_guid,
      InstanceHandle::new([5; 16]),
      SequenceNumber::from(4),
      Bytes::new(),
    );
    let msg = MessageBuilder::new()
      .data_msg(
        &change,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
        writer_guid.entity_id,
        Endianness::LittleEndian,
        false,
      )
      .add_header_and_build(writer_guid.prefix);
    let bytes = Bytes::from(msg.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap());
    let back = Message::read_from_buffer(&bytes).unwrap();
    assert_eq!(back, msg);
    match &back.submessages[0].body {
      SubmessageBody::Writer(WriterSubmessage::Data(d, flags)) => {
        assert!(flags.contains(DATA_Flags::InlineQos));
        assert!(d.serialized_payload.is_none());
        let qos = d.inline_qos.as_ref().unwrap();
        assert_eq!(
          qos.get(ParameterId::PID_STATUS_INFO).unwrap().value,
          vec![0, 0, 0, 1]
        );
        assert_eq!(
          qos.get(ParameterId::PID_KEY_HASH).unwrap().value,
          vec![5; 16]
        );
      }
      other => panic!("not DATA: {:?}", other),
    }
  }

  #[test]
  fn builder_lengths_agree_with_serialization() {
    let msg = MessageBuilder::new()
      .ts_msg(Endianness::LittleEndian, Some(Timestamp::ZERO))
      .heartbeat_msg(
        EntityId::UNKNOWN,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
        SequenceNumber::from(1),
        SequenceNumber::from(3),
        Count::from(2),
        Endianness::LittleEndian,
        true,
        false,
      )
      .acknack_msg(
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
        SequenceNumberSet::new_empty(SequenceNumber::from(4)),
        Count::from(1),
        Endianness::LittleEndian,
        true,
      )
      .add_header_and_build(GuidPrefix::new([2; 12]));
    let bytes = msg.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    let expected: usize =
      Header::LENGTH + msg.submessages.iter().map(submessage_wire_length).sum::<usize>();
    assert_eq!(bytes.len(), expected);
    info!("{:?}", msg);
  }
}
