use std::{
  cmp::max,
  collections::{BTreeMap, BTreeSet},
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::qos::QosPolicies,
  messages::submessages::submessages::{Data, DataFrag},
  rtps::{
    constant::MAX_OUT_OF_ORDER_CHANGES, fragment_assembler::FragmentAssembler,
    timed_event::TimerId,
  },
  structure::{
    cache_change::CacheChange,
    count::Count,
    guid::{EntityId, GUID},
    locator::Locator,
    sequence_number::{
      FragmentNumber, FragmentNumberSet, SequenceNumber, SequenceNumberSet,
      SEQUENCE_NUMBER_SET_MAX_BITS,
    },
  },
};

/// Receipt state of one sequence number of a matched writer.
/// RTPS spec 8.4.10.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFromWriterStatus {
  Unknown,
  Missing,
  Received,
  Lost,
}

/// WriterProxy class represents the information an RTPS StatefulReader
/// maintains on each matched RTPS Writer.
///
/// Reliable proxies hold back changes received out of order until their
/// predecessors are received or known to be lost.
#[derive(Debug, Clone)]
pub struct RtpsWriterProxy {
  /// Identifies the remote matched Writer
  pub remote_writer_guid: GUID,
  /// Identifies the group to which the matched Writer belongs
  pub remote_group_entity_id: EntityId,
  /// List of unicast (address, port) combinations that can be used to send
  /// messages to the matched Writer. The list may be empty.
  pub unicast_locator_list: Vec<Locator>,
  /// List of multicast (address, port) combinations that can be used to send
  /// messages to the matched Writer. The list may be empty.
  pub multicast_locator_list: Vec<Locator>,
  qos: QosPolicies,

  // Every SN below this is Received or Lost, and already delivered.
  ack_base: SequenceNumber,
  // Received or Lost at or above ack_base. Anything else up to max_known is
  // Missing, above it Unknown.
  changes: BTreeMap<SequenceNumber, ChangeFromWriterStatus>,
  // Received out of order, at most MAX_OUT_OF_ORDER_CHANGES.
  pending: BTreeMap<SequenceNumber, CacheChange>,
  max_known: SequenceNumber,

  // Best-effort delivery: highest SN passed on.
  last_delivered: SequenceNumber,

  // Samples arriving in DATA_FRAGs, not yet complete.
  fragments: FragmentAssembler,
  last_heartbeat_frag_count: Option<Count>,
  nack_frag_count: Count,

  last_heartbeat_count: Option<Count>,
  last_heartbeat_time: Option<Instant>,
  acknack_count: Count,
  pub(crate) acknack_timer: Option<TimerId>,

  last_liveliness: Option<Instant>,
  alive: bool,
  pub(crate) liveliness_timer: Option<TimerId>,
}

impl RtpsWriterProxy {
  pub fn new(remote_writer_guid: GUID, qos: QosPolicies) -> Self {
    Self {
      remote_writer_guid,
      remote_group_entity_id: EntityId::UNKNOWN,
      unicast_locator_list: Vec::new(),
      multicast_locator_list: Vec::new(),
      qos,
      ack_base: SequenceNumber::new(1),
      changes: BTreeMap::new(),
      pending: BTreeMap::new(),
      max_known: SequenceNumber::ZERO,
      last_delivered: SequenceNumber::ZERO,
      fragments: FragmentAssembler::default(),
      last_heartbeat_frag_count: None,
      nack_frag_count: Count::ZERO,
      last_heartbeat_count: None,
      last_heartbeat_time: None,
      acknack_count: Count::ZERO,
      acknack_timer: None,
      last_liveliness: None,
      alive: true,
      liveliness_timer: None,
    }
  }

  #[must_use]
  pub fn with_locators(mut self, unicast: Vec<Locator>, multicast: Vec<Locator>) -> Self {
    self.unicast_locator_list = unicast;
    self.multicast_locator_list = multicast;
    self
  }

  // Discovery update: take the new properties, keep run-time state.
  pub fn update(&mut self, update: &Self) {
    if self.remote_writer_guid != update.remote_writer_guid {
      error!("Update tried to change WriterProxy GUID!");
      return;
    }
    self.remote_group_entity_id = update.remote_group_entity_id;
    self
      .unicast_locator_list
      .clone_from(&update.unicast_locator_list);
    self
      .multicast_locator_list
      .clone_from(&update.multicast_locator_list);
    if self.qos != update.qos {
      debug!("Update changes QoS in WriterProxy.");
      self.qos = update.qos.clone();
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  pub fn is_reliable(&self) -> bool {
    self.qos.is_reliable()
  }

  /// Where to send ACKNACKs.
  pub fn locators(&self) -> &[Locator] {
    if self.unicast_locator_list.is_empty() {
      &self.multicast_locator_list
    } else {
      &self.unicast_locator_list
    }
  }

  /// Highest sequence number such that it and everything before it is
  /// received or lost.
  pub fn available_changes_max(&self) -> SequenceNumber {
    self.ack_base.prev()
  }

  pub fn status_of(&self, sn: SequenceNumber) -> ChangeFromWriterStatus {
    if sn < self.ack_base {
      // Delivered or skipped. Which one is not remembered.
      ChangeFromWriterStatus::Received
    } else if let Some(status) = self.changes.get(&sn) {
      *status
    } else if sn <= self.max_known {
      ChangeFromWriterStatus::Missing
    } else {
      ChangeFromWriterStatus::Unknown
    }
  }

  /// Stores a received change. Returns the changes that can now be delivered,
  /// in sequence number order. Duplicates return nothing.
  ///
  /// When too many changes are already waiting, the highest of them (or the
  /// new one, if it is higher) is forgotten and becomes missing again.
  pub fn received_change_set(&mut self, change: CacheChange) -> Vec<CacheChange> {
    let sn = change.sequence_number;
    if sn < self.ack_base || self.changes.contains_key(&sn) {
      trace!("Duplicate {:?} from {:?}", sn, self.remote_writer_guid);
      return Vec::new();
    }
    if sn != self.ack_base && self.pending.len() >= MAX_OUT_OF_ORDER_CHANGES {
      match self.pending.keys().next_back().copied() {
        Some(highest) if sn < highest => {
          self.pending.remove(&highest);
          self.changes.remove(&highest);
        }
        _ => {
          debug!(
            "Dropping {:?} from {:?}: {} changes already wait for {:?}",
            sn,
            self.remote_writer_guid,
            self.pending.len(),
            self.ack_base
          );
          self.max_known = max(self.max_known, sn);
          return Vec::new();
        }
      }
    }
    self.fragments.discard(sn);
    self.changes.insert(sn, ChangeFromWriterStatus::Received);
    self.pending.insert(sn, change);
    self.max_known = max(self.max_known, sn);
    self.advance()
  }

  /// The writer says `sn` is not relevant (GAP). It will not be requested
  /// again and is not counted as lost.
  pub fn irrelevant_change_set(&mut self, sn: SequenceNumber) -> Vec<CacheChange> {
    if sn < self.ack_base {
      return Vec::new();
    }
    // Outside the ACKNACK window it is gapped again when requested.
    if sn >= self.ack_base.plus(i64::from(SEQUENCE_NUMBER_SET_MAX_BITS)) {
      self.max_known = max(self.max_known, sn);
      return Vec::new();
    }
    self.fragments.discard(sn);
    self.changes.entry(sn).or_insert(ChangeFromWriterStatus::Lost);
    self.max_known = max(self.max_known, sn);
    self.advance()
  }

  /// GAP of the range [start, end). A range that starts at or before the
  /// first unreceived change jumps over it without visiting every member.
  pub fn irrelevant_range_set(
    &mut self,
    start: SequenceNumber,
    end: SequenceNumber,
  ) -> Vec<CacheChange> {
    if end <= start {
      return Vec::new();
    }
    if start <= self.ack_base {
      let (_, ready) = self.skip_below(end, false);
      return ready;
    }
    // A range ahead of us. Only the part inside the ACKNACK window matters,
    // the rest will be requested and gapped again later.
    let window_end = self.ack_base.plus(i64::from(SEQUENCE_NUMBER_SET_MAX_BITS));
    let mut sn = start;
    while sn < end && sn < window_end {
      self.changes.entry(sn).or_insert(ChangeFromWriterStatus::Lost);
      sn = sn.next();
    }
    self.max_known = max(self.max_known, end.prev());
    self.advance()
  }

  /// HEARTBEAT says the writer no longer has anything below
  /// `first_available`. Unreceived changes below it are lost. Returns the
  /// number of lost changes and the changes that can now be delivered.
  pub fn lost_changes_update(
    &mut self,
    first_available: SequenceNumber,
  ) -> (i64, Vec<CacheChange>) {
    // Before the writer has announced or sent anything, there is nothing to
    // lose.
    let count_lost = self.max_known > SequenceNumber::ZERO;
    self.skip_below(first_available, count_lost)
  }

  fn skip_below(&mut self, first: SequenceNumber, count_lost: bool) -> (i64, Vec<CacheChange>) {
    if first <= self.ack_base {
      return (0, Vec::new());
    }
    let kept = self.changes.split_off(&first);
    let below = std::mem::replace(&mut self.changes, kept);
    let mut ready = Vec::new();
    let mut accounted = 0;
    for (sn, status) in below {
      accounted += 1;
      if status == ChangeFromWriterStatus::Received {
        if let Some(c) = self.pending.remove(&sn) {
          ready.push(c);
        }
      }
    }
    let lost = i64::from(first) - i64::from(self.ack_base) - accounted;
    self.ack_base = first;
    self.max_known = max(self.max_known, first.prev());
    ready.extend(self.advance());
    (if count_lost { lost.max(0) } else { 0 }, ready)
  }

  /// HEARTBEAT says the writer has everything up to `last_available`.
  pub fn missing_changes_update(&mut self, last_available: SequenceNumber) {
    self.max_known = max(self.max_known, last_available);
  }

  /// Missing changes that fit into one ACKNACK.
  pub fn missing_changes(&self) -> BTreeSet<SequenceNumber> {
    let window_end = self
      .ack_base
      .plus(i64::from(SEQUENCE_NUMBER_SET_MAX_BITS) - 1);
    let last = if self.max_known < window_end {
      self.max_known
    } else {
      window_end
    };
    let mut missing = BTreeSet::new();
    let mut sn = self.ack_base;
    while sn <= last {
      if !self.changes.contains_key(&sn) {
        missing.insert(sn);
      }
      sn = sn.next();
    }
    missing
  }

  pub fn has_missing_changes(&self) -> bool {
    self.ack_base <= self.max_known && !self.missing_changes().is_empty()
  }

  /// readerSNState for the next ACKNACK. Partially received changes are
  /// left out, their fragments are asked for with NACK_FRAG.
  pub fn acknack_state(&self) -> SequenceNumberSet {
    let missing: BTreeSet<SequenceNumber> = self
      .missing_changes()
      .into_iter()
      .filter(|sn| !self.fragments.is_partial(*sn))
      .collect();
    SequenceNumberSet::from_base_and_set(self.ack_base, &missing)
  }

  /// Missing fragments of every partially received change.
  pub fn nack_frag_state(&self) -> Vec<(SequenceNumber, FragmentNumberSet)> {
    self
      .fragments
      .partial_sequence_numbers()
      .filter_map(|sn| self.fragments.missing_fragments(sn).map(|set| (sn, set)))
      .collect()
  }

  /// Missing fragments of `sn`, up to `last_fragment` announced in a
  /// HEARTBEAT_FRAG.
  pub fn missing_fragments(
    &self,
    sn: SequenceNumber,
    last_fragment: FragmentNumber,
  ) -> Option<FragmentNumberSet> {
    self.fragments.missing_fragments_up_to(sn, last_fragment)
  }

  /// Adds a DATA_FRAG. Returns the whole change when it is complete and
  /// still wanted.
  pub fn data_frag_received(&mut self, frag: &DataFrag) -> Option<Data> {
    let sn = frag.writer_sn;
    let wanted = if self.is_reliable() {
      sn >= self.ack_base && !self.changes.contains_key(&sn)
    } else {
      sn > self.last_delivered
    };
    if !wanted {
      trace!("DATA_FRAG of {:?} that is already received", sn);
      return None;
    }
    self.max_known = max(self.max_known, sn);
    self.fragments.new_datafrag(frag)
  }

  pub fn next_nack_frag_count(&mut self) -> Count {
    self.nack_frag_count = self.nack_frag_count.next();
    self.nack_frag_count
  }

  /// Returns false for a duplicate or stale HEARTBEAT_FRAG.
  pub fn heartbeat_frag_is_newer(&mut self, count: Count) -> bool {
    match self.last_heartbeat_frag_count {
      Some(last) if count <= last => false,
      _ => {
        self.last_heartbeat_frag_count = Some(count);
        true
      }
    }
  }

  pub fn heartbeat_received(&self) -> bool {
    self.last_heartbeat_time.is_some()
  }

  pub fn next_acknack_count(&mut self) -> Count {
    self.acknack_count = self.acknack_count.next();
    self.acknack_count
  }

  /// Accepts a HEARTBEAT if its count is newer and it is not within
  /// `suppression` of the previous accepted one.
  pub fn heartbeat_is_newer(&mut self, count: Count, now: Instant, suppression: Duration) -> bool {
    if let Some(last) = self.last_heartbeat_count {
      if count <= last {
        return false;
      }
    }
    if let Some(t) = self.last_heartbeat_time {
      if suppression > Duration::ZERO && now < t + suppression {
        trace!("Heartbeat from {:?} suppressed", self.remote_writer_guid);
        return false;
      }
    }
    self.last_heartbeat_count = Some(count);
    self.last_heartbeat_time = Some(now);
    true
  }

  /// Best-effort delivery of `sn`: `None` if it is not newer than what was
  /// already delivered, otherwise the number of skipped changes.
  pub fn best_effort_accept(&mut self, sn: SequenceNumber) -> Option<i64> {
    let accepted = best_effort_accept(&mut self.last_delivered, sn);
    self.fragments.discard_below(self.last_delivered.next());
    accepted
  }

  /// A best-effort GAP: the range is not coming, so it is not lost either.
  pub fn best_effort_skip(&mut self, start: SequenceNumber, end: SequenceNumber) {
    if start <= self.last_delivered.next() && end.prev() > self.last_delivered {
      self.last_delivered = end.prev();
    }
  }

  fn advance(&mut self) -> Vec<CacheChange> {
    let mut ready = Vec::new();
    while let Some(status) = self.changes.get(&self.ack_base).copied() {
      self.changes.remove(&self.ack_base);
      if status == ChangeFromWriterStatus::Received {
        if let Some(c) = self.pending.remove(&self.ack_base) {
          ready.push(c);
        }
      }
      self.ack_base = self.ack_base.next();
    }
    self.fragments.discard_below(self.ack_base);
    ready
  }

  pub fn lease_duration(&self) -> Option<Duration> {
    self.qos.liveliness().and_then(|l| l.duration().to_std())
  }

  pub fn is_alive(&self) -> bool {
    self.alive
  }

  /// Returns true if the writer was not alive before.
  pub fn assert_liveliness(&mut self, now: Instant) -> bool {
    self.last_liveliness = Some(now);
    let revived = !self.alive;
    self.alive = true;
    revived
  }

  /// When the lease runs out, if nothing is heard before that.
  pub fn liveliness_deadline(&self, matched_at: Instant) -> Option<Instant> {
    let lease = self.lease_duration()?;
    Some(self.last_liveliness.unwrap_or(matched_at) + lease)
  }

  pub fn set_not_alive(&mut self) {
    self.alive = false;
  }
}

/// Shared by best-effort writer proxies and the stateless reader.
pub(crate) fn best_effort_accept(
  last_delivered: &mut SequenceNumber,
  sn: SequenceNumber,
) -> Option<i64> {
  if sn <= *last_delivered {
    return None;
  }
  // Only count losses after the first sample: a late joiner has not lost
  // what was sent before it.
  let lost = if *last_delivered > SequenceNumber::ZERO {
    i64::from(sn) - i64::from(*last_delivered) - 1
  } else {
    0
  };
  *last_delivered = sn;
  Some(lost)
}
