use std::{collections::BTreeSet, convert::TryFrom};

use itertools::Itertools;
use log::{error, trace, warn};
use speedy::{Endianness, Writable};

use crate::{
  messages::{header::Header, submessages::submessages::total_fragments},
  rtps::{
    context::ParticipantContext,
    message::{submessage_wire_length, Message, MessageBuilder},
    Submessage,
  },
  structure::{
    cache_change::CacheChange,
    count::Count,
    guid::{EntityId, GuidPrefix},
    locator::Locator,
    sequence_number::{FragmentNumber, FragmentNumberSet, SequenceNumber, SequenceNumberSet},
    time::Timestamp,
  },
};

const INFO_DST_LENGTH: usize = 16;
const INFO_TS_LENGTH: usize = 12;
// Submessage header and the fixed part of a DATA_FRAG body
const DATA_FRAG_HEADER_LENGTH: usize = 4 + 32;
const DATA_FRAG_OVERHEAD: usize =
  Header::LENGTH + INFO_DST_LENGTH + INFO_TS_LENGTH + DATA_FRAG_HEADER_LENGTH;
const MAX_FRAGMENT_SIZE: usize = 64_000;
const MIN_FRAGMENT_SIZE: usize = 64;

/// Packs submessages for one destination into as few messages as the MTU
/// allows. A new message starts with INFO_DST when the destination
/// participant is known, and INFO_TS is repeated only when the source
/// timestamp changes.
///
/// Nothing is sent before [`MessageGroup::finish`] or a full message.
pub(crate) struct MessageGroup<'a> {
  ctx: &'a ParticipantContext,
  endianness: Endianness,
  destination: Option<GuidPrefix>,
  locators: Vec<Locator>,
  submessages: Vec<Submessage>,
  length: usize,
  // Timestamp in effect in the current message. None = nothing sent yet.
  current_timestamp: Option<Option<Timestamp>>,
  messages_sent: usize,
}

impl<'a> MessageGroup<'a> {
  pub fn new(
    ctx: &'a ParticipantContext,
    destination: Option<GuidPrefix>,
    locators: &[Locator],
  ) -> Self {
    Self {
      ctx,
      endianness: Endianness::LittleEndian,
      destination,
      locators: locators.iter().copied().unique().collect(),
      submessages: Vec::new(),
      length: 0,
      current_timestamp: None,
      messages_sent: 0,
    }
  }

  pub fn has_destination(&self) -> bool {
    !self.locators.is_empty()
  }

  fn start_message(&mut self) {
    self.length = Header::LENGTH;
    self.current_timestamp = None;
    if let Some(prefix) = self.destination {
      self.submessages = MessageBuilder::new()
        .dst_submessage(self.endianness, prefix)
        .into_submessages();
      self.length += INFO_DST_LENGTH;
    }
  }

  fn body_len(&self) -> usize {
    let base = if self.destination.is_some() {
      Header::LENGTH + INFO_DST_LENGTH
    } else {
      Header::LENGTH
    };
    self.length.saturating_sub(base)
  }

  // Adds submessages that must travel in the same message.
  fn add_unit(&mut self, unit: Vec<Submessage>) {
    if unit.is_empty() {
      return;
    }
    if self.length == 0 {
      self.start_message();
    }
    let unit_len: usize = unit.iter().map(submessage_wire_length).sum();
    if self.length + unit_len > self.ctx.mtu && self.body_len() > 0 {
      self.flush();
      self.start_message();
    }
    if self.length + unit_len > self.ctx.mtu {
      warn!(
        "Submessage of {} bytes exceeds MTU {}. Sending anyway.",
        unit_len, self.ctx.mtu
      );
    }
    self.length += unit_len;
    self.submessages.extend(unit);
  }

  /// DATA for a change, or DATA_FRAGs when it does not fit one message.
  pub fn add_data(
    &mut self,
    change: &CacheChange,
    reader_id: EntityId,
    writer_id: EntityId,
    expects_inline_qos: bool,
  ) {
    let data = MessageBuilder::new()
      .data_msg(change, reader_id, writer_id, self.endianness, expects_inline_qos)
      .into_submessages();
    let data_len: usize = data.iter().map(submessage_wire_length).sum();
    if data.is_empty() || Header::LENGTH + INFO_DST_LENGTH + INFO_TS_LENGTH + data_len > self.ctx.mtu
    {
      self.add_data_frags(change, reader_id, writer_id, expects_inline_qos, None);
    } else {
      self.add_with_timestamp(change.source_timestamp, data);
    }
  }

  /// Size of the fragments a change is split into. The same for every send
  /// of the change, so that fragment numbers stay meaningful.
  pub fn fragment_size(&self, change: &CacheChange, expects_inline_qos: bool) -> u16 {
    let qos_len = MessageBuilder::change_inline_qos(change, expects_inline_qos)
      .map_or(0, |pl| pl.wire_length());
    let room = self
      .ctx
      .mtu
      .saturating_sub(DATA_FRAG_OVERHEAD + qos_len)
      .min(MAX_FRAGMENT_SIZE);
    // keep fragments 4-aligned
    (room & !3).max(MIN_FRAGMENT_SIZE) as u16
  }

  /// DATA_FRAGs of a change, one fragment per submessage. `only` restricts
  /// them to the given fragment numbers.
  pub fn add_data_frags(
    &mut self,
    change: &CacheChange,
    reader_id: EntityId,
    writer_id: EntityId,
    expects_inline_qos: bool,
    only: Option<&BTreeSet<FragmentNumber>>,
  ) {
    let data_size = match u32::try_from(change.data_value.len()) {
      Ok(size) => size,
      Err(_) => {
        error!(
          "{:?} of {} bytes is too large to send",
          change.sequence_number,
          change.data_value.len()
        );
        return;
      }
    };
    let fragment_size = self.fragment_size(change, expects_inline_qos);
    let total = total_fragments(data_size, fragment_size);
    trace!(
      "{:?}: {} bytes in {} fragments of {}",
      change.sequence_number,
      data_size,
      total,
      fragment_size
    );
    for n in 1..=total {
      let fragment_num = FragmentNumber::new(n);
      if only.map_or(false, |wanted| !wanted.contains(&fragment_num)) {
        continue;
      }
      let frag = MessageBuilder::new()
        .data_frag_msg(
          change,
          reader_id,
          writer_id,
          fragment_num,
          fragment_size,
          self.endianness,
          expects_inline_qos,
        )
        .into_submessages();
      self.add_with_timestamp(change.source_timestamp, frag);
    }
  }

  // The timestamp must stay in the same message as its DATA or DATA_FRAG.
  fn add_with_timestamp(&mut self, timestamp: Option<Timestamp>, data: Vec<Submessage>) {
    let data_len: usize = data.iter().map(submessage_wire_length).sum();
    if self.length == 0 {
      self.start_message();
    }
    let ts_len = if timestamp.is_some() { INFO_TS_LENGTH } else { 4 };
    if self.length + ts_len + data_len > self.ctx.mtu && self.body_len() > 0 {
      self.flush();
      self.start_message();
    }
    let mut unit = Vec::with_capacity(2);
    let ts_needed = match self.current_timestamp {
      None => timestamp.is_some(),
      Some(current) => current != timestamp,
    };
    if ts_needed {
      unit.extend(
        MessageBuilder::new()
          .ts_msg(self.endianness, timestamp)
          .into_submessages(),
      );
    }
    unit.extend(data);
    self.add_unit(unit);
    self.current_timestamp = Some(timestamp);
  }

  pub fn add_gap(
    &mut self,
    irrelevant: &BTreeSet<SequenceNumber>,
    reader_id: EntityId,
    writer_id: EntityId,
  ) {
    if irrelevant.is_empty() {
      return;
    }
    let gaps = MessageBuilder::new()
      .gap_msg(irrelevant, reader_id, writer_id, self.endianness)
      .into_submessages();
    for gap in gaps {
      self.add_unit(vec![gap]);
    }
  }

  #[allow(clippy::too_many_arguments)]
  pub fn add_heartbeat(
    &mut self,
    reader_id: EntityId,
    writer_id: EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: Count,
    final_flag: bool,
    liveliness_flag: bool,
  ) {
    let hb = MessageBuilder::new()
      .heartbeat_msg(
        reader_id,
        writer_id,
        first_sn,
        last_sn,
        count,
        self.endianness,
        final_flag,
        liveliness_flag,
      )
      .into_submessages();
    self.add_unit(hb);
  }

  pub fn add_acknack(
    &mut self,
    reader_id: EntityId,
    writer_id: EntityId,
    sn_state: SequenceNumberSet,
    count: Count,
    final_flag: bool,
  ) {
    let an = MessageBuilder::new()
      .acknack_msg(reader_id, writer_id, sn_state, count, self.endianness, final_flag)
      .into_submessages();
    self.add_unit(an);
  }

  pub fn add_nack_frag(
    &mut self,
    reader_id: EntityId,
    writer_id: EntityId,
    writer_sn: SequenceNumber,
    missing: FragmentNumberSet,
    count: Count,
  ) {
    let nf = MessageBuilder::new()
      .nack_frag_msg(reader_id, writer_id, writer_sn, missing, count, self.endianness)
      .into_submessages();
    self.add_unit(nf);
  }

  fn flush(&mut self) {
    if self.body_len() == 0 {
      self.submessages.clear();
      self.length = 0;
      return;
    }
    let message = Message {
      header: Header::new(self.ctx.guid_prefix),
      submessages: std::mem::take(&mut self.submessages),
    };
    self.length = 0;
    match message.write_to_vec_with_ctx(self.endianness) {
      Ok(bytes) => {
        trace!(
          "MessageGroup: {} bytes, {} submessages to {:?}",
          bytes.len(),
          message.submessages.len(),
          self.locators
        );
        self
          .ctx
          .transport
          .send_to_locator_list(&bytes, &self.locators);
        self.messages_sent += 1;
      }
      Err(e) => warn!("Cannot serialize outgoing message: {:?}", e),
    }
  }

  /// Sends what is left. Returns the number of messages sent by this group.
  pub fn finish(mut self) -> usize {
    self.flush();
    self.messages_sent
  }
}
