use std::{
  cmp::min,
  collections::{btree_map::Entry, BTreeMap, BTreeSet},
  sync::Arc,
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
  dds::{
    qos::{policy, QosPolicies},
    statusevents::{DataWriterStatus, StatusChannelSender, WriterStatusCounters},
  },
  history::{
    change_pool::CacheChangePool,
    writer_history::{AddChangeError, WriterHistory},
  },
  messages::submessages::submessages::{AckNack, NackFrag},
  rtps::{
    constant::{
      HEARTBEAT_PERIOD, INITIAL_HEARTBEAT_DELAY, NACK_RESPONSE_DELAY, NACK_SUPPRESSION_DURATION,
      SEDP_HEARTBEAT_PERIOD, SEDP_NACK_RESPONSE_DELAY, SEDP_NACK_SUPPRESSION_DURATION,
    },
    context::ParticipantContext,
    message_group::MessageGroup,
    persistence::{PersistenceDecorator, PersistenceService},
    reader_locator::ReaderLocator,
    rtps_reader_proxy::RtpsReaderProxy,
    timed_event::{TimedEvent, TimerId, TimerTarget},
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    count::Count,
    entity::RTPSEntity,
    guid::{EntityId, GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    locator::Locator,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// Protocol tuning of a writer. RTPS 2.3 section 8.4.7.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterTimes {
  pub initial_heartbeat_delay: Duration,
  pub heartbeat_period: Duration,
  pub nack_response_delay: Duration,
  pub nack_suppression_duration: Duration,
}

impl Default for WriterTimes {
  fn default() -> Self {
    Self {
      initial_heartbeat_delay: INITIAL_HEARTBEAT_DELAY,
      heartbeat_period: HEARTBEAT_PERIOD,
      nack_response_delay: NACK_RESPONSE_DELAY,
      nack_suppression_duration: NACK_SUPPRESSION_DURATION,
    }
  }
}

impl WriterTimes {
  /// Timing of the builtin SEDP writers.
  pub fn sedp() -> Self {
    Self {
      initial_heartbeat_delay: INITIAL_HEARTBEAT_DELAY,
      heartbeat_period: SEDP_HEARTBEAT_PERIOD,
      nack_response_delay: SEDP_NACK_RESPONSE_DELAY,
      nack_suppression_duration: SEDP_NACK_SUPPRESSION_DURATION,
    }
  }
}

// This is used to construct an actual Writer.
// Ingredients are sendable between threads, whereas the Writer is not.
pub struct WriterIngredients {
  pub guid: GUID,
  pub topic_name: String,
  pub qos_policies: QosPolicies,
  pub times: WriterTimes,
  /// Stateless writers send to locators and do not track readers.
  pub stateless: bool,
  pub push_mode: bool,
  pub pool: CacheChangePool,
  pub persistence: Option<Arc<dyn PersistenceService>>,
  pub status_sender: StatusChannelSender<DataWriterStatus>,
}

impl WriterIngredients {
  pub fn new(guid: GUID, topic_name: &str, qos_policies: QosPolicies) -> Self {
    Self {
      guid,
      topic_name: topic_name.to_string(),
      qos_policies,
      times: WriterTimes::default(),
      stateless: false,
      push_mode: true,
      pool: CacheChangePool::unbounded(),
      persistence: None,
      status_sender: StatusChannelSender::disconnected(),
    }
  }
}

pub enum WriterKind {
  Stateless { reader_locators: Vec<ReaderLocator> },
  Stateful { readers: BTreeMap<GUID, RtpsReaderProxy> },
}

pub struct Writer {
  ctx: ParticipantContext,
  my_guid: GUID,
  topic_name: String,
  qos_policies: QosPolicies,
  history: WriterHistory,
  kind: WriterKind,
  times: WriterTimes,
  /// Configures the mode in which the Writer operates. If push_mode==true,
  /// then the Writer will push changes to the reader. If push_mode==false,
  /// changes will only be announced via heartbeats and only be sent as
  /// response to the request of a reader
  push_mode: bool,
  heartbeat_count: Count,
  heartbeat_timer: Option<TimerId>,
  liveliness_timer: Option<TimerId>,
  last_liveliness_assertion: Instant,
  liveliness_lost_reported: bool,
  status_counters: WriterStatusCounters,
  status_sender: StatusChannelSender<DataWriterStatus>,
  // Readers already counted as incompatible.
  incompatible_readers: BTreeSet<GUID>,
  persistence: Option<PersistenceDecorator>,
}

impl Writer {
  pub fn new(i: WriterIngredients, ctx: ParticipantContext) -> Self {
    let mut history = WriterHistory::new(&i.qos_policies, i.pool);
    let persistence = match i.persistence {
      Some(service) if i.qos_policies.durability_or_default() >= policy::Durability::Transient => {
        Some(PersistenceDecorator::new(service, i.guid))
      }
      Some(_) => {
        debug!(
          "Writer {:?} is not TRANSIENT or PERSISTENT. Persistence service ignored.",
          i.guid
        );
        None
      }
      None => None,
    };
    if let Some(p) = &persistence {
      let (changes, last) = p.load_writer_history();
      for change in changes {
        if let Err(e) = history.restore_change(change) {
          warn!("Writer {:?} cannot restore a change: {}", i.guid, e);
        }
      }
      history.set_last_sequence_number(last);
      info!(
        "Writer {:?} restored {} changes, continuing after {:?}",
        i.guid,
        history.len(),
        history.last_sequence_number()
      );
    }

    let kind = if i.stateless {
      WriterKind::Stateless {
        reader_locators: Vec::new(),
      }
    } else {
      WriterKind::Stateful {
        readers: BTreeMap::new(),
      }
    };
    let now = ctx.now();
    let mut w = Self {
      ctx,
      my_guid: i.guid,
      topic_name: i.topic_name,
      qos_policies: i.qos_policies,
      history,
      kind,
      times: i.times,
      push_mode: i.push_mode,
      heartbeat_count: Count::ZERO,
      heartbeat_timer: None,
      liveliness_timer: None,
      last_liveliness_assertion: now,
      liveliness_lost_reported: false,
      status_counters: WriterStatusCounters::default(),
      status_sender: i.status_sender,
      incompatible_readers: BTreeSet::new(),
      persistence,
    };
    w.schedule_liveliness_check();
    w
  }

  fn target(&self) -> TimerTarget {
    TimerTarget::Writer(self.my_guid.entity_id)
  }

  pub fn topic_name(&self) -> &str {
    &self.topic_name
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos_policies
  }

  pub fn is_reliable(&self) -> bool {
    self.qos_policies.is_reliable()
  }

  pub fn is_stateless(&self) -> bool {
    matches!(self.kind, WriterKind::Stateless { .. })
  }

  pub fn history(&self) -> &WriterHistory {
    &self.history
  }

  pub fn times(&self) -> &WriterTimes {
    &self.times
  }

  pub fn status_counters(&self) -> &WriterStatusCounters {
    &self.status_counters
  }

  pub fn matched_readers(&self) -> Vec<GUID> {
    match &self.kind {
      WriterKind::Stateful { readers } => readers.keys().copied().collect(),
      WriterKind::Stateless { .. } => Vec::new(),
    }
  }

  pub fn reader_proxy(&self, guid: GUID) -> Option<&RtpsReaderProxy> {
    match &self.kind {
      WriterKind::Stateful { readers } => readers.get(&guid),
      WriterKind::Stateless { .. } => None,
    }
  }

  pub fn reader_locators(&self) -> &[ReaderLocator] {
    match &self.kind {
      WriterKind::Stateless { reader_locators } => reader_locators,
      WriterKind::Stateful { .. } => &[],
    }
  }

  /// Whether every matched reliable reader has acknowledged `sn`.
  pub fn is_acked_by_all(&self, sn: SequenceNumber) -> bool {
    match &self.kind {
      WriterKind::Stateful { readers } => readers
        .values()
        .filter(|rp| rp.is_reliable())
        .all(|rp| rp.is_acked(sn)),
      WriterKind::Stateless { .. } => true,
    }
  }

  // Changes below this can be evicted from the history.
  fn acked_below(&self) -> SequenceNumber {
    let all = self.history.last_sequence_number().next();
    match &self.kind {
      WriterKind::Stateful { readers } => readers
        .values()
        .filter_map(RtpsReaderProxy::acked_below)
        .fold(all, min),
      WriterKind::Stateless { .. } => all,
    }
  }

  // -----------------------------------------------------------------------
  // Writing

  /// Adds a change to the history and hands it to every matched reader.
  ///
  /// Nothing is sent or modified when the history refuses the change.
  pub fn new_change(
    &mut self,
    kind: ChangeKind,
    instance_handle: InstanceHandle,
    data: Bytes,
    source_timestamp: Option<Timestamp>,
  ) -> Result<SequenceNumber, AddChangeError> {
    let change = CacheChange::new(
      kind,
      self.my_guid,
      instance_handle,
      SequenceNumber::ZERO,
      data,
    )
    .with_source_timestamp(source_timestamp);
    let added = self.history.add_change(change, self.acked_below())?;
    for sn in &added.evicted {
      self.change_removed(*sn);
    }
    let sn = added.sequence_number;
    trace!(
      "Writer {:?} topic={:?} new change {:?}",
      self.my_guid.entity_id,
      self.topic_name,
      sn
    );
    if let (Some(p), Some(c)) = (&self.persistence, self.history.get_change(sn)) {
      p.add_change(c);
    }
    match &mut self.kind {
      WriterKind::Stateless { reader_locators } => {
        for rl in reader_locators.iter_mut() {
          rl.add_change(sn);
        }
      }
      WriterKind::Stateful { readers } => {
        for rp in readers.values_mut() {
          rp.add_change(sn, true);
        }
      }
    }
    // Writing asserts liveliness of the writer.
    self.liveliness_asserted();

    if self.push_mode {
      self.send_unsent_changes();
    }
    self.schedule_heartbeat(self.times.heartbeat_period);
    Ok(sn)
  }

  // Change evicted from the history: readers that did not get it get a GAP.
  fn change_removed(&mut self, sn: SequenceNumber) {
    trace!("Writer {:?} evicted {:?}", self.my_guid.entity_id, sn);
    if let Some(p) = &self.persistence {
      p.remove_change(sn);
    }
    match &mut self.kind {
      WriterKind::Stateless { reader_locators } => {
        for rl in reader_locators.iter_mut() {
          rl.remove_change(sn);
        }
      }
      WriterKind::Stateful { readers } => {
        for rp in readers.values_mut() {
          rp.set_irrelevant(sn);
        }
      }
    }
  }

  fn heartbeat_range(&self) -> (SequenceNumber, SequenceNumber) {
    let last = self.history.last_sequence_number();
    let first = self.history.min_sn().unwrap_or_else(|| last.next());
    (first, last)
  }

  /// Sends every UNSENT change to every reader: DATA if relevant and still
  /// in the history, GAP otherwise.
  pub fn send_unsent_changes(&mut self) {
    let writer_id = self.my_guid.entity_id;
    let nack_suppressed = self.times.nack_suppression_duration > Duration::ZERO;
    let (first, last) = self.heartbeat_range();
    match &mut self.kind {
      WriterKind::Stateless { reader_locators } => {
        for rl in reader_locators.iter_mut() {
          if !rl.has_unsent_changes() {
            continue;
          }
          let mut group = MessageGroup::new(&self.ctx, None, &[rl.locator]);
          let mut gaps = BTreeSet::new();
          while let Some(sn) = rl.next_unsent_change() {
            match self.history.get_change(sn) {
              Some(change) => {
                group.add_data(change, EntityId::UNKNOWN, writer_id, rl.expects_inline_qos);
              }
              None => {
                gaps.insert(sn);
              }
            }
          }
          group.add_gap(&gaps, EntityId::UNKNOWN, writer_id);
          group.finish();
        }
      }
      WriterKind::Stateful { readers } => {
        for rp in readers.values_mut() {
          let unsent = rp.unsent_changes();
          if unsent.is_empty() {
            continue;
          }
          let reader_guid = rp.remote_reader_guid;
          let reader_id = reader_guid.entity_id;
          let mut group = MessageGroup::new(&self.ctx, Some(reader_guid.prefix), rp.locators());
          let mut gaps = BTreeSet::new();
          for (sn, relevant) in &unsent {
            match self.history.get_change(*sn).filter(|_| *relevant) {
              Some(change) => {
                group.add_data(change, reader_id, writer_id, rp.expects_inline_qos());
              }
              None => {
                gaps.insert(*sn);
              }
            }
          }
          group.add_gap(&gaps, reader_id, writer_id);
          if rp.is_reliable() {
            // piggyback
            self.heartbeat_count = self.heartbeat_count.next();
            group.add_heartbeat(
              reader_id,
              writer_id,
              first,
              last,
              self.heartbeat_count,
              false,
              false,
            );
          }
          group.finish();
          for (sn, _) in unsent {
            rp.change_sent(sn, nack_suppressed);
          }
          if nack_suppressed
            && rp.is_reliable()
            && !rp
              .nack_suppression_timer
              .map_or(false, |t| self.ctx.timers.is_pending(t))
          {
            rp.nack_suppression_timer = Some(self.ctx.schedule_after(
              self.times.nack_suppression_duration,
              TimerTarget::Writer(writer_id),
              TimedEvent::NackSuppressionEnd {
                reader: reader_guid,
              },
            ));
          }
        }
      }
    }
  }

  // -----------------------------------------------------------------------
  // Timers

  pub fn handle_timed_event(&mut self, event: TimedEvent) {
    match event {
      TimedEvent::Heartbeat => self.handle_heartbeat_tick(false),
      TimedEvent::SendRepairData { to_reader } => self.send_repair_data(to_reader),
      TimedEvent::NackSuppressionEnd { reader } => self.handle_nack_suppression_end(reader),
      TimedEvent::LivelinessAssertionCheck => self.handle_liveliness_check(),
      other => warn!(
        "Writer {:?} got an unexpected timer event {:?}",
        self.my_guid.entity_id, other
      ),
    }
  }

  fn schedule_heartbeat(&mut self, delay: Duration) {
    if self.is_stateless() || !self.is_reliable() {
      return;
    }
    if self
      .heartbeat_timer
      .map_or(false, |t| self.ctx.timers.is_pending(t))
    {
      return;
    }
    self.heartbeat_timer = Some(
      self
        .ctx
        .schedule_after(delay, self.target(), TimedEvent::Heartbeat),
    );
  }

  fn reschedule_heartbeat(&mut self, delay: Duration) {
    if let Some(t) = self.heartbeat_timer.take() {
      self.ctx.timers.cancel(t);
    }
    self.schedule_heartbeat(delay);
  }

  /// Periodic HEARTBEAT to every reliable reader that has not acknowledged
  /// everything. A manual liveliness assertion goes to all reliable readers
  /// and carries the L flag.
  pub fn handle_heartbeat_tick(&mut self, is_manual_assertion: bool) {
    self.heartbeat_timer = None;
    let writer_id = self.my_guid.entity_id;
    let (first, last) = self.heartbeat_range();
    let readers = match &mut self.kind {
      WriterKind::Stateful { readers } => readers,
      WriterKind::Stateless { .. } => return,
    };
    let mut any_unacked = false;
    for rp in readers.values().filter(|rp| rp.is_reliable()) {
      let unacked = rp.has_unacked_changes();
      any_unacked |= unacked;
      if !unacked && !is_manual_assertion {
        continue;
      }
      self.heartbeat_count = self.heartbeat_count.next();
      let reader_guid = rp.remote_reader_guid;
      trace!(
        "Writer {:?} HEARTBEAT {:?}..{:?} to {:?}",
        writer_id,
        first,
        last,
        reader_guid
      );
      let mut group = MessageGroup::new(&self.ctx, Some(reader_guid.prefix), rp.locators());
      group.add_heartbeat(
        reader_guid.entity_id,
        writer_id,
        first,
        last,
        self.heartbeat_count,
        !unacked,
        is_manual_assertion,
      );
      group.finish();
    }
    if any_unacked {
      self.schedule_heartbeat(self.times.heartbeat_period);
    } else {
      trace!("heartbeat tick: all readers have all available data.");
    }
  }

  fn handle_nack_suppression_end(&mut self, reader: GUID) {
    if let WriterKind::Stateful { readers } = &mut self.kind {
      if let Some(rp) = readers.get_mut(&reader) {
        rp.nack_suppression_timer = None;
        if rp.underway_to_unacknowledged() {
          trace!("Nack suppression ended for {:?}", reader);
        }
      }
    }
  }

  // -----------------------------------------------------------------------
  // Reliability

  /// When receiving an ACKNACK Message indicating a Reader is missing some
  /// data samples, the Writer responds by either sending the missing data
  /// samples or a GAP when the sample is not relevant or no longer available.
  pub fn handle_ack_nack(&mut self, reader_guid_prefix: GuidPrefix, an: &AckNack, final_flag: bool) {
    let reader_guid = GUID::new(reader_guid_prefix, an.reader_id);
    let last = self.history.last_sequence_number();
    let readers = match &mut self.kind {
      WriterKind::Stateful { readers } => readers,
      WriterKind::Stateless { .. } => {
        trace!("Stateless writer {:?} ignores ACKNACK", self.my_guid.entity_id);
        return;
      }
    };
    let rp = match readers.get_mut(&reader_guid) {
      Some(rp) => rp,
      None => {
        debug!(
          "ACKNACK from unknown reader {:?} to {:?}",
          reader_guid, self.my_guid.entity_id
        );
        return;
      }
    };
    if !rp.acknack_is_newer(an.count) {
      trace!("Stale ACKNACK {:?} from {:?}", an.count, reader_guid);
      return;
    }
    let base = an.reader_sn_state.base();
    if base > last.next() {
      warn!(
        "ACKNACK from {:?} acks up to {:?}, but I have only up to {:?}",
        reader_guid, base, last
      );
    }
    rp.acked_changes_set(min(base, last.next()));
    let requested = rp.requested_changes_set(an.reader_sn_state.iter(), last);
    let repair_pending = rp
      .repair_timer
      .map_or(false, |t| self.ctx.timers.is_pending(t));
    let unacked = rp.has_unacked_changes();

    if requested && !repair_pending {
      self.schedule_repair(reader_guid);
    } else if !requested && !final_flag && !repair_pending {
      // The reader wants to know what is available.
      self.send_heartbeat_to(reader_guid, !unacked);
    }
  }

  /// A NACK_FRAG asks for fragments of one change. They are resent after
  /// nack_response_delay, together with anything else REQUESTED.
  pub fn handle_nack_frag(&mut self, reader_guid_prefix: GuidPrefix, nack_frag: &NackFrag) {
    let reader_guid = GUID::new(reader_guid_prefix, nack_frag.reader_id);
    let last = self.history.last_sequence_number();
    let rp = match &mut self.kind {
      WriterKind::Stateful { readers } => match readers.get_mut(&reader_guid) {
        Some(rp) => rp,
        None => {
          debug!(
            "NACK_FRAG from unknown reader {:?} to {:?}",
            reader_guid, self.my_guid.entity_id
          );
          return;
        }
      },
      WriterKind::Stateless { .. } => return,
    };
    if !rp.nack_frag_is_newer(nack_frag.count) {
      trace!("Stale NACK_FRAG {:?} from {:?}", nack_frag.count, reader_guid);
      return;
    }
    let requested = rp.requested_fragments_set(
      nack_frag.writer_sn,
      nack_frag.fragment_number_state.iter(),
      last,
    );
    let repair_pending = rp
      .repair_timer
      .map_or(false, |t| self.ctx.timers.is_pending(t));
    if requested && !repair_pending {
      self.schedule_repair(reader_guid);
    }
  }

  fn schedule_repair(&mut self, reader_guid: GUID) {
    if self.times.nack_response_delay == Duration::ZERO {
      self.send_repair_data(reader_guid);
      return;
    }
    let t = self.ctx.schedule_after(
      self.times.nack_response_delay,
      self.target(),
      TimedEvent::SendRepairData {
        to_reader: reader_guid,
      },
    );
    if let WriterKind::Stateful { readers } = &mut self.kind {
      if let Some(rp) = readers.get_mut(&reader_guid) {
        rp.repair_timer = Some(t);
      }
    }
  }

  fn send_heartbeat_to(&mut self, reader_guid: GUID, final_flag: bool) {
    let writer_id = self.my_guid.entity_id;
    let (first, last) = self.heartbeat_range();
    if let WriterKind::Stateful { readers } = &self.kind {
      if let Some(rp) = readers.get(&reader_guid) {
        self.heartbeat_count = self.heartbeat_count.next();
        let mut group = MessageGroup::new(&self.ctx, Some(reader_guid.prefix), rp.locators());
        group.add_heartbeat(
          reader_guid.entity_id,
          writer_id,
          first,
          last,
          self.heartbeat_count,
          final_flag,
          false,
        );
        group.finish();
      }
    }
  }

  /// Sends the REQUESTED changes of one reader.
  pub fn send_repair_data(&mut self, to_reader: GUID) {
    let writer_id = self.my_guid.entity_id;
    let nack_suppressed = self.times.nack_suppression_duration > Duration::ZERO;
    let readers = match &mut self.kind {
      WriterKind::Stateful { readers } => readers,
      WriterKind::Stateless { .. } => return,
    };
    let rp = match readers.get_mut(&to_reader) {
      Some(rp) => rp,
      None => {
        debug!("Repair for a reader that is gone: {:?}", to_reader);
        return;
      }
    };
    rp.repair_timer = None;
    let requested = rp.requested_changes();
    if requested.is_empty() {
      return;
    }
    debug!(
      "Writer {:?} repairs {} changes for {:?}",
      writer_id,
      requested.len(),
      to_reader
    );
    let reader_id = to_reader.entity_id;
    let mut group = MessageGroup::new(&self.ctx, Some(to_reader.prefix), rp.locators());
    let mut gaps = BTreeSet::new();
    for (sn, relevant) in &requested {
      match self.history.get_change(*sn).filter(|_| *relevant) {
        Some(change) => match rp.requested_fragments(*sn) {
          Some(fragments) => group.add_data_frags(
            change,
            reader_id,
            writer_id,
            rp.expects_inline_qos(),
            Some(fragments),
          ),
          None => group.add_data(change, reader_id, writer_id, rp.expects_inline_qos()),
        },
        None => {
          gaps.insert(*sn);
        }
      }
    }
    group.add_gap(&gaps, reader_id, writer_id);
    group.finish();
    for (sn, _) in requested {
      rp.change_sent(sn, nack_suppressed);
    }
    if nack_suppressed
      && !rp
        .nack_suppression_timer
        .map_or(false, |t| self.ctx.timers.is_pending(t))
    {
      rp.nack_suppression_timer = Some(self.ctx.schedule_after(
        self.times.nack_suppression_duration,
        TimerTarget::Writer(writer_id),
        TimedEvent::NackSuppressionEnd { reader: to_reader },
      ));
    }
    self.schedule_heartbeat(self.times.heartbeat_period);
  }

  // -----------------------------------------------------------------------
  // Liveliness

  fn lease_duration(&self) -> Option<Duration> {
    self
      .qos_policies
      .liveliness()
      .and_then(|l| l.duration().to_std())
  }

  fn has_manual_liveliness(&self) -> bool {
    self
      .qos_policies
      .liveliness()
      .map_or(false, |l| l.is_manual())
  }

  pub(crate) fn liveliness_asserted(&mut self) {
    self.last_liveliness_assertion = self.ctx.now();
    self.liveliness_lost_reported = false;
  }

  /// Manual assertion: resets the lease and tells the readers with a
  /// HEARTBEAT carrying the L flag.
  pub fn assert_liveliness(&mut self) {
    self.liveliness_asserted();
    self.handle_heartbeat_tick(true);
  }

  fn schedule_liveliness_check(&mut self) {
    if !self.has_manual_liveliness() {
      return;
    }
    if let Some(lease) = self.lease_duration() {
      let at = self.last_liveliness_assertion + lease;
      let delay = at.saturating_duration_since(self.ctx.now());
      self.liveliness_timer = Some(self.ctx.schedule_after(
        delay,
        self.target(),
        TimedEvent::LivelinessAssertionCheck,
      ));
    }
  }

  pub fn handle_liveliness_check(&mut self) {
    self.liveliness_timer = None;
    let lease = match self.lease_duration() {
      Some(lease) => lease,
      None => return,
    };
    let now = self.ctx.now();
    if now >= self.last_liveliness_assertion + lease && !self.liveliness_lost_reported {
      info!(
        "Writer {:?} topic={:?} lost liveliness",
        self.my_guid.entity_id, self.topic_name
      );
      self.liveliness_lost_reported = true;
      self.status_counters.liveliness_lost.increase();
      self.status_sender.send(DataWriterStatus::LivelinessLost {
        count: self.status_counters.liveliness_lost,
      });
      // Next check one lease from now.
      self.last_liveliness_assertion = now;
    }
    self.schedule_liveliness_check();
  }

  // -----------------------------------------------------------------------
  // Matching

  /// A remote reader was discovered or its data changed.
  pub fn update_reader_proxy(&mut self, reader_proxy: &RtpsReaderProxy, requested_qos: &QosPolicies) {
    let guid = reader_proxy.remote_reader_guid;
    debug!(
      "update_reader_proxy topic={:?} reader={:?}",
      self.topic_name, guid
    );
    match self.qos_policies.compliance_failure_wrt(requested_qos) {
      None => {
        self.incompatible_readers.remove(&guid);
        if self.matched_reader_update(reader_proxy) {
          self.status_counters.publication_matched_total.increase();
          self.status_counters.publication_matched_current.increase();
          self.status_sender.send(DataWriterStatus::PublicationMatched {
            total: self.status_counters.publication_matched_total,
            current: self.status_counters.publication_matched_current,
            reader: guid,
          });
          info!(
            "Matched new remote reader on topic={:?} reader={:?}",
            self.topic_name, guid
          );
          if self.push_mode {
            self.send_unsent_changes();
          }
          if reader_proxy.is_reliable() {
            self.reschedule_heartbeat(self.times.initial_heartbeat_delay);
          }
        }
      }
      Some(bad_policy_id) => {
        warn!(
          "update_reader_proxy - QoS mismatch {:?} topic={:?} reader={:?}",
          bad_policy_id, self.topic_name, guid
        );
        debug!(
          "Reader QoS={:?} Writer QoS={:?}",
          requested_qos, self.qos_policies
        );
        if self.incompatible_readers.insert(guid) {
          self.status_counters.offered_incompatible_qos.increase();
          self.status_sender.send(DataWriterStatus::OfferedIncompatibleQos {
            count: self.status_counters.offered_incompatible_qos,
            last_policy_id: bad_policy_id,
            reader: guid,
          });
        }
        // A QoS update may break an existing match.
        if self.reader_proxy(guid).is_some() {
          self.reader_lost(guid);
        }
      }
    }
  }

  // Returns true if the reader is new.
  fn matched_reader_update(&mut self, updated: &RtpsReaderProxy) -> bool {
    let history: Vec<SequenceNumber> = self.history.sequence_numbers().into_iter().collect();
    let readers = match &mut self.kind {
      WriterKind::Stateful { readers } => readers,
      WriterKind::Stateless { .. } => {
        warn!(
          "Stateless writer {:?} cannot match reader proxies",
          self.my_guid.entity_id
        );
        return false;
      }
    };
    match readers.entry(updated.remote_reader_guid) {
      Entry::Occupied(mut e) => {
        e.get_mut().update(updated);
        false
      }
      Entry::Vacant(e) => {
        let mut proxy = updated.clone();
        // Readers that are not durable get what was written before the match
        // as GAP.
        let relevant = proxy.wants_historical_data();
        for sn in history {
          proxy.add_change(sn, relevant);
        }
        e.insert(proxy);
        true
      }
    }
  }

  pub fn reader_lost(&mut self, guid: GUID) {
    self.incompatible_readers.remove(&guid);
    let removed = match &mut self.kind {
      WriterKind::Stateful { readers } => readers.remove(&guid),
      WriterKind::Stateless { .. } => None,
    };
    if let Some(rp) = removed {
      info!(
        "reader_lost topic={:?} reader={:?}",
        self.topic_name, guid
      );
      for t in rp.repair_timer.iter().chain(rp.nack_suppression_timer.iter()) {
        self.ctx.timers.cancel(*t);
      }
      self.status_counters.publication_matched_current.decrease();
      self.status_sender.send(DataWriterStatus::PublicationMatched {
        total: self.status_counters.publication_matched_total,
        current: self.status_counters.publication_matched_current,
        reader: guid,
      });
    }
  }

  // Entire remote participant was lost.
  // Remove all remote readers belonging to it.
  pub fn participant_lost(&mut self, guid_prefix: GuidPrefix) {
    let lost_readers: Vec<GUID> = match &self.kind {
      WriterKind::Stateful { readers } => readers
        .range(guid_prefix.range())
        .map(|(g, _)| *g)
        .collect(),
      WriterKind::Stateless { .. } => Vec::new(),
    };
    for reader in lost_readers {
      self.reader_lost(reader);
    }
    let incompatible: Vec<GUID> = self
      .incompatible_readers
      .range(guid_prefix.range())
      .copied()
      .collect();
    for g in incompatible {
      self.incompatible_readers.remove(&g);
    }
  }

  /// Stateless writers only. The locator gets the whole history.
  pub fn add_reader_locator(&mut self, locator: Locator, expects_inline_qos: bool) {
    let history = self.history.sequence_numbers();
    match &mut self.kind {
      WriterKind::Stateless { reader_locators } => {
        if reader_locators.iter().any(|rl| rl.locator == locator) {
          return;
        }
        let mut rl = ReaderLocator::new(locator, expects_inline_qos);
        rl.unsent_changes_reset(history);
        reader_locators.push(rl);
      }
      WriterKind::Stateful { .. } => warn!(
        "Stateful writer {:?} does not use reader locators",
        self.my_guid.entity_id
      ),
    }
  }

  pub fn remove_reader_locator(&mut self, locator: Locator) {
    if let WriterKind::Stateless { reader_locators } = &mut self.kind {
      reader_locators.retain(|rl| rl.locator != locator);
    }
  }

  /// Makes the whole history UNSENT again for every reader locator and sends
  /// it. Used for periodic announcements.
  pub fn unsent_changes_reset(&mut self) {
    let history = self.history.sequence_numbers();
    if let WriterKind::Stateless { reader_locators } = &mut self.kind {
      for rl in reader_locators.iter_mut() {
        rl.unsent_changes_reset(history.iter().copied());
      }
    }
    self.send_unsent_changes();
  }

  /// Cancels every timer of this writer. Call before dropping it.
  pub fn cancel_timers(&mut self) {
    self.ctx.timers.cancel_all(self.target());
    self.heartbeat_timer = None;
    self.liveliness_timer = None;
  }
}

impl RTPSEntity for Writer {
  fn guid(&self) -> GUID {
    self.my_guid
  }
}
