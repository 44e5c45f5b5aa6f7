use std::collections::{btree_map::Entry, BTreeMap};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use bytes::Bytes;

use crate::{
  messages::{
    header::Header,
    protocol_version::ProtocolVersion,
    submessages::{
      submessage_flag::{ACKNACK_Flags, HEARTBEAT_Flags},
      submessages::*,
    },
    vendor_id::VendorId,
  },
  rtps::{reader::Reader, Message, SubmessageBody},
  structure::{
    entity::RTPSEntity,
    guid::{EntityId, GuidPrefix, GUID},
    locator::Locator,
    time::Timestamp,
  },
};

/// An ACKNACK addressed to one of our writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedAckNack {
  pub reader_guid_prefix: GuidPrefix,
  pub acknack: AckNack,
  pub final_flag: bool,
}

/// A NACK_FRAG addressed to one of our writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedNackFrag {
  pub reader_guid_prefix: GuidPrefix,
  pub nack_frag: NackFrag,
}

/// What a message carried for the local writers and for discovery. Readers
/// are handled in place.
#[derive(Debug, Default)]
pub struct ReceiverOutput {
  pub acknacks: Vec<ReceivedAckNack>,
  pub nack_frags: Vec<ReceivedNackFrag>,
  // Remote participants that sent SPDP data. Duplicate samples are dropped by
  // the SPDP reader, so its history does not show them all.
  pub spdp_liveness: Vec<GuidPrefix>,
}

/// [`MessageReceiver`] is the submessage sequence interpreter described in
/// RTPS spec v2.3 Section 8.3.4 "The RTPS Message Receiver".
/// It processes the instructions in the Interpreter Submessages and
/// forwards Entity Submessages to the appropriate Entities. (See RTPS spec
/// Section 8.3.7)
pub(crate) struct MessageReceiver {
  pub available_readers: BTreeMap<EntityId, Reader>,

  own_guid_prefix: GuidPrefix,
  pub source_version: ProtocolVersion,
  pub source_vendor_id: VendorId,
  pub source_guid_prefix: GuidPrefix,
  pub dest_guid_prefix: GuidPrefix,
  pub unicast_reply_locator_list: Vec<Locator>,
  pub multicast_reply_locator_list: Vec<Locator>,
  pub source_timestamp: Option<Timestamp>,

  submessage_count: usize, // for log messages
  output: ReceiverOutput,
}

impl MessageReceiver {
  pub fn new(participant_guid_prefix: GuidPrefix) -> Self {
    Self {
      available_readers: BTreeMap::new(),
      own_guid_prefix: participant_guid_prefix,

      source_version: ProtocolVersion::PROTOCOLVERSION,
      source_vendor_id: VendorId::VENDOR_UNKNOWN,
      source_guid_prefix: GuidPrefix::UNKNOWN,
      dest_guid_prefix: GuidPrefix::UNKNOWN,
      unicast_reply_locator_list: Vec::new(),
      multicast_reply_locator_list: Vec::new(),
      source_timestamp: None,

      submessage_count: 0,
      output: ReceiverOutput::default(),
    }
  }

  pub fn reset(&mut self) {
    self.source_version = ProtocolVersion::PROTOCOLVERSION;
    self.source_vendor_id = VendorId::VENDOR_UNKNOWN;
    self.source_guid_prefix = GuidPrefix::UNKNOWN;
    self.dest_guid_prefix = GuidPrefix::UNKNOWN;
    self.unicast_reply_locator_list.clear();
    self.multicast_reply_locator_list.clear();
    self.source_timestamp = None;

    self.submessage_count = 0;
  }

  pub fn add_reader(&mut self, new_reader: Reader) {
    let eid = new_reader.guid().entity_id;
    match self.available_readers.entry(eid) {
      Entry::Occupied(_) => warn!("Already have Reader {:?} - not adding.", eid),
      Entry::Vacant(e) => {
        e.insert(new_reader);
      }
    }
  }

  pub fn remove_reader(&mut self, old_reader_guid: GUID) -> Option<Reader> {
    self.available_readers.remove(&old_reader_guid.entity_id)
  }

  pub fn reader(&self, reader_id: EntityId) -> Option<&Reader> {
    self.available_readers.get(&reader_id)
  }

  pub fn reader_mut(&mut self, reader_id: EntityId) -> Option<&mut Reader> {
    self.available_readers.get_mut(&reader_id)
  }

  pub fn readers_mut(&mut self) -> impl Iterator<Item = &mut Reader> {
    self.available_readers.values_mut()
  }

  /// Parses and processes one received datagram. Malformed input is logged
  /// and dropped.
  pub fn handle_received_packet(&mut self, msg_bytes: &Bytes) -> ReceiverOutput {
    // RTPS ping (at least RTI sends these) is shorter than a header.
    if msg_bytes.len() < Header::LENGTH {
      if msg_bytes.len() >= 16
        && msg_bytes[0..4] == b"RTPS"[..]
        && msg_bytes[9..16] == b"DDSPING"[..]
      {
        debug!("Received RTPS PING. Ignoring.");
      } else {
        warn!("Message is shorter than RTPS header. Cannot deserialize.");
        trace!("Data was {:?}", &msg_bytes);
      }
      return ReceiverOutput::default();
    }

    let rtps_message = match Message::read_from_buffer(msg_bytes) {
      Ok(m) => m,
      Err(e) => {
        warn!("RTPS deserialize error {:?}", e);
        trace!("Data was {:?}", msg_bytes);
        return ReceiverOutput::default();
      }
    };

    self.handle_parsed_message(rtps_message)
  }

  // This is also called directly for loopback messages.
  pub fn handle_parsed_message(&mut self, rtps_message: Message) -> ReceiverOutput {
    self.reset();
    self.dest_guid_prefix = self.own_guid_prefix;
    self.source_guid_prefix = rtps_message.header.guid_prefix;
    self.source_version = rtps_message.header.protocol_version;
    self.source_vendor_id = rtps_message.header.vendor_id;

    if self.source_guid_prefix == self.own_guid_prefix {
      trace!("Ignoring a message from ourselves.");
      return ReceiverOutput::default();
    }

    for submessage in rtps_message.submessages {
      match submessage.body {
        SubmessageBody::Interpreter(i) => self.handle_interpreter_submessage(i),
        SubmessageBody::Writer(w) => self.handle_writer_submessage(w),
        SubmessageBody::Reader(r) => self.handle_reader_submessage(r),
      }
      self.submessage_count += 1;
    }
    std::mem::take(&mut self.output)
  }

  fn is_for_this_participant(&self) -> bool {
    if self.dest_guid_prefix != self.own_guid_prefix && self.dest_guid_prefix != GuidPrefix::UNKNOWN
    {
      trace!(
        "Message is not for this participant. Dropping. dest_guid_prefix={:?} participant \
         guid={:?}",
        self.dest_guid_prefix,
        self.own_guid_prefix
      );
      false
    } else {
      true
    }
  }

  fn handle_writer_submessage(&mut self, submessage: WriterSubmessage) {
    if !self.is_for_this_participant() {
      return;
    }
    let writer_guid = GUID::new(self.source_guid_prefix, submessage.sender_entity_id());

    let target_readers: Vec<EntityId> = match submessage.receiver_entity_id() {
      EntityId::UNKNOWN => self
        .available_readers
        .values()
        .filter(|reader| {
          reader.contains_writer(writer_guid)
            // SPDP reader reads from writers it does not know yet.
            || (writer_guid.entity_id == EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER
              && reader.entity_id() == EntityId::SPDP_BUILTIN_PARTICIPANT_READER)
        })
        .map(Reader::entity_id)
        .collect(),
      other => vec![other],
    };
    if target_readers.is_empty() {
      trace!(
        "No local reader for submessage #{} from {:?}",
        self.submessage_count,
        writer_guid
      );
    }

    let source_prefix = self.source_guid_prefix;
    let source_timestamp = self.source_timestamp;
    for reader_id in target_readers {
      let reader = match self.available_readers.get_mut(&reader_id) {
        Some(r) => r,
        None => {
          debug!("Submessage for unknown reader {:?}", reader_id);
          continue;
        }
      };
      match &submessage {
        WriterSubmessage::Data(data, _flags) => {
          reader.handle_data_msg(source_prefix, data, source_timestamp);
          // Tell discovery that the remote participant seems to be alive.
          if writer_guid.entity_id == EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER
            && reader_id == EntityId::SPDP_BUILTIN_PARTICIPANT_READER
          {
            self.output.spdp_liveness.push(source_prefix);
          }
        }
        WriterSubmessage::Heartbeat(heartbeat, flags) => {
          reader.handle_heartbeat_msg(
            source_prefix,
            heartbeat,
            flags.contains(HEARTBEAT_Flags::Final),
          );
        }
        WriterSubmessage::Gap(gap, _flags) => {
          reader.handle_gap_msg(source_prefix, gap);
        }
        WriterSubmessage::DataFrag(data_frag, flags) => {
          reader.handle_data_frag_msg(source_prefix, data_frag, *flags, source_timestamp);
          if writer_guid.entity_id == EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER
            && reader_id == EntityId::SPDP_BUILTIN_PARTICIPANT_READER
          {
            self.output.spdp_liveness.push(source_prefix);
          }
        }
        WriterSubmessage::HeartbeatFrag(heartbeat_frag, _flags) => {
          reader.handle_heartbeat_frag_msg(source_prefix, heartbeat_frag);
        }
      }
    }
  }

  fn handle_reader_submessage(&mut self, submessage: ReaderSubmessage) {
    if !self.is_for_this_participant() {
      return;
    }
    match submessage {
      ReaderSubmessage::AckNack(acknack, flags) => {
        self.output.acknacks.push(ReceivedAckNack {
          reader_guid_prefix: self.source_guid_prefix,
          acknack,
          final_flag: flags.contains(ACKNACK_Flags::Final),
        });
      }
      ReaderSubmessage::NackFrag(nack_frag, _flags) => {
        self.output.nack_frags.push(ReceivedNackFrag {
          reader_guid_prefix: self.source_guid_prefix,
          nack_frag,
        });
      }
    }
  }

  fn handle_interpreter_submessage(&mut self, interpreter_submessage: InterpreterSubmessage) {
    match interpreter_submessage {
      InterpreterSubmessage::InfoTimestamp(ts_struct, _flags) => {
        // flags value was used already when parsing timestamp into an Option
        self.source_timestamp = ts_struct.timestamp;
      }
      InterpreterSubmessage::InfoSource(info_src, _flags) => {
        self.source_guid_prefix = info_src.guid_prefix;
        self.source_version = info_src.protocol_version;
        self.source_vendor_id = info_src.vendor_id;
        self.unicast_reply_locator_list.clear();
        self.multicast_reply_locator_list.clear();
        self.source_timestamp = None;
      }
      InterpreterSubmessage::InfoDestination(info_dest, _flags) => {
        if info_dest.guid_prefix == GuidPrefix::UNKNOWN {
          self.dest_guid_prefix = self.own_guid_prefix;
        } else {
          self.dest_guid_prefix = info_dest.guid_prefix;
        }
      }
    }
  }
}
