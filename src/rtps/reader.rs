use std::{
  collections::{btree_map::Entry, BTreeMap, BTreeSet},
  convert::TryFrom,
  sync::{Arc, Mutex},
  time::Duration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use bytes::Bytes;
use enumflags2::BitFlags;
use mio_extras::channel as mio_channel;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
  dds::{
    qos::{policy, QosPolicies},
    statusevents::{DataReaderStatus, ReaderStatusCounters, StatusChannelSender},
  },
  discovery::participant_message::ParticipantMessageKind,
  history::{change_pool::CacheChangePool, reader_history::ReaderHistory},
  messages::submessages::{
    submessage_flag::DATAFRAG_Flags,
    submessages::{Data, DataFrag, Gap, Heartbeat, HeartbeatFrag},
  },
  rtps::{
    constant::{
      HEARTBEAT_RESPONSE_DELAY, HEARTBEAT_SUPPRESSION_DURATION, INITIAL_ACKNACK_DELAY,
      SEDP_HEARTBEAT_RESPONSE_DELAY,
    },
    context::ParticipantContext,
    fragment_assembler::FragmentAssembler,
    message_group::MessageGroup,
    persistence::{PersistenceDecorator, PersistenceService},
    rtps_writer_proxy::{best_effort_accept, RtpsWriterProxy},
    timed_event::{TimedEvent, TimerTarget},
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    entity::RTPSEntity,
    guid::{GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    parameter_id::ParameterId,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// Protocol tuning of a reader. RTPS 2.3 section 8.4.10.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderTimes {
  pub initial_acknack_delay: Duration,
  pub heartbeat_response_delay: Duration,
  pub heartbeat_suppression_duration: Duration,
}

impl Default for ReaderTimes {
  fn default() -> Self {
    Self {
      initial_acknack_delay: INITIAL_ACKNACK_DELAY,
      heartbeat_response_delay: HEARTBEAT_RESPONSE_DELAY,
      heartbeat_suppression_duration: HEARTBEAT_SUPPRESSION_DURATION,
    }
  }
}

impl ReaderTimes {
  /// Timing of the builtin SEDP readers.
  pub fn sedp() -> Self {
    Self {
      heartbeat_response_delay: SEDP_HEARTBEAT_RESPONSE_DELAY,
      ..Self::default()
    }
  }
}

/// Computes the instance of a received sample from its serialized payload,
/// when the writer did not send PID_KEY_HASH.
pub type KeyHashFn = Arc<dyn Fn(&Bytes) -> Option<InstanceHandle> + Send + Sync>;

// This is used to construct an actual Reader.
// Ingredients are sendable between threads, whereas the Reader is not.
pub struct ReaderIngredients {
  pub guid: GUID,
  pub topic_name: String,
  pub qos_policies: QosPolicies,
  pub times: ReaderTimes,
  /// Stateless readers accept data from any writer and never acknowledge.
  pub stateless: bool,
  pub history: Arc<Mutex<ReaderHistory>>,
  /// Poked (without blocking) whenever new data is in the history.
  pub notification_sender: Option<mio_channel::SyncSender<()>>,
  pub key_hash: Option<KeyHashFn>,
  pub persistence: Option<Arc<dyn PersistenceService>>,
  pub status_sender: StatusChannelSender<DataReaderStatus>,
}

impl ReaderIngredients {
  pub fn new(guid: GUID, topic_name: &str, qos_policies: QosPolicies) -> Self {
    let history = ReaderHistory::new(&qos_policies, CacheChangePool::unbounded());
    Self {
      guid,
      topic_name: topic_name.to_string(),
      qos_policies,
      times: ReaderTimes::default(),
      stateless: false,
      history: Arc::new(Mutex::new(history)),
      notification_sender: None,
      key_hash: None,
      persistence: None,
      status_sender: StatusChannelSender::disconnected(),
    }
  }
}

pub enum ReaderKind {
  Stateless {
    last_sn_by_writer: BTreeMap<GUID, SequenceNumber>,
    fragments: BTreeMap<GUID, FragmentAssembler>,
  },
  Stateful {
    writers: BTreeMap<GUID, RtpsWriterProxy>,
  },
}

pub struct Reader {
  ctx: ParticipantContext,
  my_guid: GUID,
  topic_name: String,
  qos_policies: QosPolicies,
  times: ReaderTimes,
  kind: ReaderKind,
  history: Arc<Mutex<ReaderHistory>>,
  notification_sender: Option<mio_channel::SyncSender<()>>,
  key_hash: Option<KeyHashFn>,
  status_counters: ReaderStatusCounters,
  status_sender: StatusChannelSender<DataReaderStatus>,
  // Writers already counted as incompatible.
  incompatible_writers: BTreeSet<GUID>,
  persistence: Option<PersistenceDecorator>,
  // Persistent readers: what was delivered before a restart.
  last_notified: BTreeMap<GUID, SequenceNumber>,
}

impl Reader {
  pub fn new(i: ReaderIngredients, ctx: ParticipantContext) -> Self {
    let persistence = match i.persistence {
      Some(service) if i.qos_policies.durability_or_default() >= policy::Durability::Transient => {
        Some(PersistenceDecorator::new(service, i.guid))
      }
      _ => None,
    };
    let last_notified = persistence
      .as_ref()
      .map(PersistenceDecorator::last_notified)
      .unwrap_or_default();
    let kind = if i.stateless {
      ReaderKind::Stateless {
        last_sn_by_writer: BTreeMap::new(),
        fragments: BTreeMap::new(),
      }
    } else {
      ReaderKind::Stateful {
        writers: BTreeMap::new(),
      }
    };
    Self {
      ctx,
      my_guid: i.guid,
      topic_name: i.topic_name,
      qos_policies: i.qos_policies,
      times: i.times,
      kind,
      history: i.history,
      notification_sender: i.notification_sender,
      key_hash: i.key_hash,
      status_counters: ReaderStatusCounters::default(),
      status_sender: i.status_sender,
      incompatible_writers: BTreeSet::new(),
      persistence,
      last_notified,
    }
  }

  fn target(&self) -> TimerTarget {
    TimerTarget::Reader(self.my_guid.entity_id)
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
    matches!(self.kind, ReaderKind::Stateless { .. })
  }

  pub fn times(&self) -> &ReaderTimes {
    &self.times
  }

  /// The history shared with the application.
  pub fn history(&self) -> Arc<Mutex<ReaderHistory>> {
    self.history.clone()
  }

  pub fn status_counters(&self) -> &ReaderStatusCounters {
    &self.status_counters
  }

  pub fn matched_writers(&self) -> Vec<GUID> {
    match &self.kind {
      ReaderKind::Stateful { writers } => writers.keys().copied().collect(),
      ReaderKind::Stateless { .. } => Vec::new(),
    }
  }

  /// True if submessages from `writer` that are not addressed to a specific
  /// reader belong to this one.
  pub fn contains_writer(&self, writer: GUID) -> bool {
    match &self.kind {
      ReaderKind::Stateful { writers } => writers.contains_key(&writer),
      ReaderKind::Stateless { .. } => false,
    }
  }

  pub fn writer_proxy(&self, guid: GUID) -> Option<&RtpsWriterProxy> {
    match &self.kind {
      ReaderKind::Stateful { writers } => writers.get(&guid),
      ReaderKind::Stateless { .. } => None,
    }
  }

  // -----------------------------------------------------------------------
  // Inbound submessages

  fn make_cache_change(
    &self,
    writer_guid: GUID,
    data: &Data,
    source_timestamp: Option<Timestamp>,
  ) -> CacheChange {
    let inline_qos = data.inline_qos.as_ref();
    let kind = inline_qos
      .and_then(|pl| pl.get(ParameterId::PID_STATUS_INFO))
      .and_then(|p| <[u8; 4]>::try_from(p.value.as_slice()).ok())
      .map_or(ChangeKind::Alive, ChangeKind::from_status_info);
    let payload = data.serialized_payload.clone().unwrap_or_default();
    let instance_handle = inline_qos
      .and_then(|pl| pl.get(ParameterId::PID_KEY_HASH))
      .and_then(|p| InstanceHandle::from_slice(&p.value))
      .or_else(|| {
        if kind.is_alive() {
          self.key_hash.as_ref().and_then(|f| f(&payload))
        } else {
          None
        }
      })
      .unwrap_or(InstanceHandle::NIL);
    let data_value = if kind.is_alive() { payload } else { Bytes::new() };
    CacheChange::new(kind, writer_guid, instance_handle, data.writer_sn, data_value)
      .with_source_timestamp(source_timestamp)
  }

  pub fn handle_data_msg(
    &mut self,
    writer_guid_prefix: GuidPrefix,
    data: &Data,
    source_timestamp: Option<Timestamp>,
  ) {
    let writer_guid = GUID::new(writer_guid_prefix, data.writer_id);
    let sn = data.writer_sn;
    let change = self.make_cache_change(writer_guid, data, source_timestamp);
    let now = self.ctx.now();
    let mut revived = false;
    let mut lost = 0;
    let ready = match &mut self.kind {
      ReaderKind::Stateless {
        last_sn_by_writer,
        fragments,
      } => {
        let last = last_sn_by_writer
          .entry(writer_guid)
          .or_insert(SequenceNumber::ZERO);
        let accepted = best_effort_accept(last, sn);
        if let Some(assembler) = fragments.get_mut(&writer_guid) {
          assembler.discard_below(last.next());
        }
        match accepted {
          Some(skipped) => {
            lost = skipped;
            vec![change]
          }
          None => Vec::new(),
        }
      }
      ReaderKind::Stateful { writers } => {
        let proxy = match writers.get_mut(&writer_guid) {
          Some(p) => p,
          None => {
            trace!(
              "DATA from unmatched writer {:?} to {:?}",
              writer_guid,
              self.my_guid.entity_id
            );
            return;
          }
        };
        revived = proxy.assert_liveliness(now);
        if proxy.is_reliable() {
          proxy.received_change_set(change)
        } else {
          match proxy.best_effort_accept(sn) {
            Some(skipped) => {
              lost = skipped;
              vec![change]
            }
            None => Vec::new(),
          }
        }
      }
    };
    if revived {
      self.writer_revived(writer_guid);
    }
    self.samples_lost(lost);
    self.deliver(ready);
  }

  /// Collects DATA_FRAGs. A completed sample is handled as if it had come
  /// in one DATA.
  pub fn handle_data_frag_msg(
    &mut self,
    writer_guid_prefix: GuidPrefix,
    data_frag: &DataFrag,
    flags: BitFlags<DATAFRAG_Flags>,
    source_timestamp: Option<Timestamp>,
  ) {
    let writer_guid = GUID::new(writer_guid_prefix, data_frag.writer_id);
    let sn = data_frag.writer_sn;
    if flags.contains(DATAFRAG_Flags::NonStandardPayload) {
      trace!("DATA_FRAG {:?} with a non-standard payload from {:?}", sn, writer_guid);
    }
    let now = self.ctx.now();
    let mut revived = false;
    let completed = match &mut self.kind {
      ReaderKind::Stateless {
        last_sn_by_writer,
        fragments,
      } => {
        let delivered = last_sn_by_writer
          .get(&writer_guid)
          .map_or(false, |last| sn <= *last);
        if delivered {
          None
        } else {
          fragments
            .entry(writer_guid)
            .or_default()
            .new_datafrag(data_frag)
        }
      }
      ReaderKind::Stateful { writers } => match writers.get_mut(&writer_guid) {
        Some(proxy) => {
          revived = proxy.assert_liveliness(now);
          proxy.data_frag_received(data_frag)
        }
        None => {
          trace!(
            "DATA_FRAG from unmatched writer {:?} to {:?}",
            writer_guid,
            self.my_guid.entity_id
          );
          return;
        }
      },
    };
    if revived {
      self.writer_revived(writer_guid);
    }
    if let Some(data) = completed {
      debug!(
        "Reader {:?} reassembled {:?} from {:?}",
        self.my_guid.entity_id, sn, writer_guid
      );
      self.handle_data_msg(writer_guid_prefix, &data, source_timestamp);
    }
  }

  /// HEARTBEAT_FRAG: the writer has sent fragments up to
  /// `last_fragment_num`. Those still missing are asked for at once.
  pub fn handle_heartbeat_frag_msg(
    &mut self,
    writer_guid_prefix: GuidPrefix,
    heartbeat_frag: &HeartbeatFrag,
  ) {
    let writer_guid = GUID::new(writer_guid_prefix, heartbeat_frag.writer_id);
    let reader_id = self.my_guid.entity_id;
    let writers = match &mut self.kind {
      ReaderKind::Stateful { writers } => writers,
      ReaderKind::Stateless { .. } => return,
    };
    let proxy = match writers.get_mut(&writer_guid) {
      Some(p) if p.is_reliable() => p,
      _ => return,
    };
    if !proxy.heartbeat_frag_is_newer(heartbeat_frag.count) {
      trace!("Old HEARTBEAT_FRAG from {:?}", writer_guid);
      return;
    }
    let missing = match proxy.missing_fragments(
      heartbeat_frag.writer_sn,
      heartbeat_frag.last_fragment_num,
    ) {
      Some(m) => m,
      None => return,
    };
    let count = proxy.next_nack_frag_count();
    let mut group = MessageGroup::new(&self.ctx, Some(writer_guid.prefix), proxy.locators());
    group.add_nack_frag(
      reader_id,
      writer_guid.entity_id,
      heartbeat_frag.writer_sn,
      missing,
      count,
    );
    group.finish();
  }

  pub fn handle_heartbeat_msg(
    &mut self,
    writer_guid_prefix: GuidPrefix,
    heartbeat: &Heartbeat,
    final_flag: bool,
  ) {
    let writer_guid = GUID::new(writer_guid_prefix, heartbeat.writer_id);
    let now = self.ctx.now();
    let suppression = self.times.heartbeat_suppression_duration;
    let writers = match &mut self.kind {
      ReaderKind::Stateful { writers } => writers,
      ReaderKind::Stateless { .. } => return,
    };
    let proxy = match writers.get_mut(&writer_guid) {
      Some(p) => p,
      None => {
        trace!(
          "HEARTBEAT from unmatched writer {:?} to {:?}",
          writer_guid,
          self.my_guid.entity_id
        );
        return;
      }
    };
    if !proxy.is_reliable() {
      let revived = proxy.assert_liveliness(now);
      if revived {
        self.writer_revived(writer_guid);
      }
      return;
    }
    if !proxy.heartbeat_is_newer(heartbeat.count, now, suppression) {
      trace!("Old or suppressed HEARTBEAT from {:?}", writer_guid);
      return;
    }
    let revived = proxy.assert_liveliness(now);
    let (lost, ready) = proxy.lost_changes_update(heartbeat.first_sn);
    proxy.missing_changes_update(heartbeat.last_sn);
    let must_respond = proxy.has_missing_changes() || !final_flag;
    let acknack_timer = proxy.acknack_timer;
    let response_pending = match acknack_timer {
      Some(t) => self.ctx.timers.is_pending(t),
      None => false,
    };

    if revived {
      self.writer_revived(writer_guid);
    }
    self.samples_lost(lost);
    self.deliver(ready);

    if must_respond && !response_pending {
      let max_delay = self.times.heartbeat_response_delay;
      if max_delay == Duration::ZERO {
        self.send_acknack(writer_guid);
      } else {
        let max_nanos = u64::try_from(max_delay.as_nanos()).unwrap_or(u64::MAX);
        let delay = Duration::from_nanos(rand::thread_rng().gen_range(0..=max_nanos));
        self.schedule_acknack(writer_guid, delay);
      }
    }
  }

  pub fn handle_gap_msg(&mut self, writer_guid_prefix: GuidPrefix, gap: &Gap) {
    let writer_guid = GUID::new(writer_guid_prefix, gap.writer_id);
    let range_end = gap.gap_list.base();
    let ready = match &mut self.kind {
      ReaderKind::Stateless {
        last_sn_by_writer, ..
      } => {
        if let Some(last) = last_sn_by_writer.get_mut(&writer_guid) {
          if gap.gap_start <= last.next() && range_end.prev() > *last {
            *last = range_end.prev();
          }
        }
        Vec::new()
      }
      ReaderKind::Stateful { writers } => {
        let proxy = match writers.get_mut(&writer_guid) {
          Some(p) => p,
          None => {
            trace!("GAP from unmatched writer {:?}", writer_guid);
            return;
          }
        };
        if proxy.is_reliable() {
          let mut ready = proxy.irrelevant_range_set(gap.gap_start, range_end);
          for sn in gap.gap_list.iter() {
            ready.extend(proxy.irrelevant_change_set(sn));
          }
          ready
        } else {
          proxy.best_effort_skip(gap.gap_start, range_end);
          Vec::new()
        }
      }
    };
    self.deliver(ready);
  }

  // -----------------------------------------------------------------------
  // Timers and ACKNACK

  pub fn handle_timed_event(&mut self, event: TimedEvent) {
    match event {
      TimedEvent::AckNackResponse { writer } => self.send_acknack(writer),
      TimedEvent::WriterLivelinessCheck { writer } => self.handle_writer_liveliness_check(writer),
      other => warn!(
        "Reader {:?} got an unexpected timer event {:?}",
        self.my_guid.entity_id, other
      ),
    }
  }

  fn schedule_acknack(&mut self, writer_guid: GUID, delay: Duration) {
    let target = self.target();
    if let ReaderKind::Stateful { writers } = &mut self.kind {
      if let Some(proxy) = writers.get_mut(&writer_guid) {
        proxy.acknack_timer = Some(self.ctx.schedule_after(
          delay,
          target,
          TimedEvent::AckNackResponse {
            writer: writer_guid,
          },
        ));
      }
    }
  }

  /// ACKNACK to one writer: everything before the base is received or lost,
  /// the set lists what is missing.
  pub fn send_acknack(&mut self, writer_guid: GUID) {
    let reader_id = self.my_guid.entity_id;
    let writers = match &mut self.kind {
      ReaderKind::Stateful { writers } => writers,
      ReaderKind::Stateless { .. } => return,
    };
    let proxy = match writers.get_mut(&writer_guid) {
      Some(p) => p,
      None => return,
    };
    proxy.acknack_timer = None;
    if !proxy.is_reliable() {
      return;
    }
    let sn_state = proxy.acknack_state();
    // Before the first HEARTBEAT we ask for one.
    let final_flag = !proxy.has_missing_changes() && proxy.heartbeat_received();
    let count = proxy.next_acknack_count();
    debug!(
      "Reader {:?} ACKNACK to {:?} base={:?} missing={} final={}",
      reader_id,
      writer_guid,
      sn_state.base(),
      sn_state.iter().count(),
      final_flag
    );
    let nack_frags = proxy.nack_frag_state();
    let mut group = MessageGroup::new(&self.ctx, Some(writer_guid.prefix), proxy.locators());
    group.add_acknack(reader_id, writer_guid.entity_id, sn_state, count, final_flag);
    for (sn, missing) in nack_frags {
      let count = proxy.next_nack_frag_count();
      group.add_nack_frag(reader_id, writer_guid.entity_id, sn, missing, count);
    }
    group.finish();
  }

  fn schedule_liveliness_check(&mut self, writer_guid: GUID) {
    let target = self.target();
    if let ReaderKind::Stateful { writers } = &mut self.kind {
      if let Some(proxy) = writers.get_mut(&writer_guid) {
        if let Some(deadline) = proxy.liveliness_deadline(self.ctx.now()) {
          if let Some(t) = proxy.liveliness_timer.take() {
            self.ctx.timers.cancel(t);
          }
          proxy.liveliness_timer = Some(self.ctx.timers.schedule(
            deadline,
            target,
            TimedEvent::WriterLivelinessCheck {
              writer: writer_guid,
            },
          ));
        }
      }
    }
  }

  fn handle_writer_liveliness_check(&mut self, writer_guid: GUID) {
    let now = self.ctx.now();
    let expired = match &mut self.kind {
      ReaderKind::Stateful { writers } => match writers.get_mut(&writer_guid) {
        Some(proxy) => {
          proxy.liveliness_timer = None;
          match proxy.liveliness_deadline(now) {
            Some(deadline) if now >= deadline && proxy.is_alive() => {
              proxy.set_not_alive();
              true
            }
            _ => false,
          }
        }
        None => return,
      },
      ReaderKind::Stateless { .. } => return,
    };
    if expired {
      info!(
        "Writer {:?} lost liveliness on topic={:?}",
        writer_guid, self.topic_name
      );
      self.status_counters.liveliness_alive.decrease();
      self.status_counters.liveliness_not_alive.increase();
      self.send_liveliness_changed(writer_guid);
    } else {
      self.schedule_liveliness_check(writer_guid);
    }
  }

  /// A participant message renewed the lease of every matched writer of
  /// that participant whose liveliness kind it covers.
  pub fn participant_liveliness_asserted(
    &mut self,
    guid_prefix: GuidPrefix,
    kind: ParticipantMessageKind,
  ) {
    let now = self.ctx.now();
    let revived: Vec<GUID> = match &mut self.kind {
      ReaderKind::Stateful { writers } => writers
        .range_mut(guid_prefix.range())
        .filter(|(_, proxy)| {
          proxy
            .qos()
            .liveliness()
            .map_or(false, |l| kind.asserts(&l))
        })
        .filter_map(|(guid, proxy)| {
          if proxy.assert_liveliness(now) {
            Some(*guid)
          } else {
            None
          }
        })
        .collect(),
      ReaderKind::Stateless { .. } => return,
    };
    for guid in revived {
      self.writer_revived(guid);
    }
  }

  fn writer_revived(&mut self, writer_guid: GUID) {
    debug!("Writer {:?} is alive again", writer_guid);
    self.status_counters.liveliness_alive.increase();
    self.status_counters.liveliness_not_alive.decrease();
    self.send_liveliness_changed(writer_guid);
    self.schedule_liveliness_check(writer_guid);
  }

  fn send_liveliness_changed(&self, writer: GUID) {
    self.status_sender.send(DataReaderStatus::LivelinessChanged {
      alive_total: self.status_counters.liveliness_alive,
      not_alive_total: self.status_counters.liveliness_not_alive,
      writer,
    });
  }

  fn samples_lost(&mut self, lost: i64) {
    if lost <= 0 {
      return;
    }
    debug!(
      "Reader {:?} topic={:?} lost {} samples",
      self.my_guid.entity_id, self.topic_name, lost
    );
    self
      .status_counters
      .sample_lost
      .add(i32::try_from(lost).unwrap_or(i32::MAX));
    self.status_sender.send(DataReaderStatus::SampleLost {
      count: self.status_counters.sample_lost,
    });
  }

  // -----------------------------------------------------------------------
  // Delivery

  // Puts changes into the history, in the given order. The lock is released
  // before anything else is done.
  fn deliver(&mut self, changes: Vec<CacheChange>) {
    if changes.is_empty() {
      return;
    }
    let mut added = Vec::new();
    let mut rejected = Vec::new();
    match self.history.lock() {
      Ok(mut history) => {
        for change in changes {
          let writer = change.writer_guid;
          let sn = change.sequence_number;
          if self.last_notified.get(&writer).map_or(false, |n| sn <= *n) {
            trace!("{:?} of {:?} was delivered before a restart", sn, writer);
            continue;
          }
          match history.add_change(change) {
            Ok(true) => added.push((writer, sn)),
            Ok(false) => (),
            Err(reason) => rejected.push(reason),
          }
        }
      }
      Err(e) => {
        error!(
          "Reader {:?} history lock poisoned: {}",
          self.my_guid.entity_id, e
        );
        return;
      }
    }

    for reason in rejected {
      debug!(
        "Reader {:?} rejected a sample: {:?}",
        self.my_guid.entity_id, reason
      );
      self.status_counters.sample_rejected.increase();
      self.status_sender.send(DataReaderStatus::SampleRejected {
        count: self.status_counters.sample_rejected,
        last_reason: reason,
      });
    }
    if added.is_empty() {
      return;
    }
    if let Some(p) = &self.persistence {
      for (writer, sn) in &added {
        p.set_last_notified(*writer, *sn);
      }
    }
    if let Some(sender) = &self.notification_sender {
      // A full channel already has a pending notification.
      let _ = sender.try_send(());
    }
  }

  // -----------------------------------------------------------------------
  // Matching

  /// A remote writer was discovered or its data changed.
  pub fn update_writer_proxy(&mut self, writer_proxy: &RtpsWriterProxy, offered_qos: &QosPolicies) {
    let guid = writer_proxy.remote_writer_guid;
    debug!(
      "update_writer_proxy topic={:?} writer={:?}",
      self.topic_name, guid
    );
    match offered_qos.compliance_failure_wrt(&self.qos_policies) {
      None => {
        self.incompatible_writers.remove(&guid);
        if self.matched_writer_update(writer_proxy) {
          self.status_counters.subscription_matched_total.increase();
          self.status_counters.subscription_matched_current.increase();
          self.status_sender.send(DataReaderStatus::SubscriptionMatched {
            total: self.status_counters.subscription_matched_total,
            current: self.status_counters.subscription_matched_current,
            writer: guid,
          });
          self.status_counters.liveliness_alive.increase();
          self.send_liveliness_changed(guid);
          info!(
            "Matched new remote writer on topic={:?} writer={:?}",
            self.topic_name, guid
          );
          if self.is_reliable() && writer_proxy.is_reliable() {
            self.schedule_acknack(guid, self.times.initial_acknack_delay);
          }
          self.schedule_liveliness_check(guid);
        }
      }
      Some(bad_policy_id) => {
        warn!(
          "update_writer_proxy - QoS mismatch {:?} topic={:?} writer={:?}",
          bad_policy_id, self.topic_name, guid
        );
        if self.incompatible_writers.insert(guid) {
          self.status_counters.requested_incompatible_qos.increase();
          self.status_sender.send(DataReaderStatus::RequestedIncompatibleQos {
            count: self.status_counters.requested_incompatible_qos,
            last_policy_id: bad_policy_id,
            writer: guid,
          });
        }
        if self.writer_proxy(guid).is_some() {
          self.writer_lost(guid);
        }
      }
    }
  }

  // Returns true if the writer is new.
  fn matched_writer_update(&mut self, updated: &RtpsWriterProxy) -> bool {
    let now = self.ctx.now();
    let writers = match &mut self.kind {
      ReaderKind::Stateful { writers } => writers,
      ReaderKind::Stateless { .. } => {
        warn!(
          "Stateless reader {:?} cannot match writer proxies",
          self.my_guid.entity_id
        );
        return false;
      }
    };
    match writers.entry(updated.remote_writer_guid) {
      Entry::Occupied(mut e) => {
        e.get_mut().update(updated);
        false
      }
      Entry::Vacant(e) => {
        let mut proxy = updated.clone();
        proxy.assert_liveliness(now);
        e.insert(proxy);
        true
      }
    }
  }

  pub fn writer_lost(&mut self, guid: GUID) {
    self.incompatible_writers.remove(&guid);
    let removed = match &mut self.kind {
      ReaderKind::Stateful { writers } => writers.remove(&guid),
      ReaderKind::Stateless {
        last_sn_by_writer,
        fragments,
      } => {
        last_sn_by_writer.remove(&guid);
        fragments.remove(&guid);
        None
      }
    };
    match self.history.lock() {
      Ok(mut history) => history.forget_writer(guid),
      Err(e) => error!("Reader history lock poisoned: {}", e),
    }
    let proxy = match removed {
      Some(p) => p,
      None => return,
    };
    info!(
      "writer_lost topic={:?} writer={:?}",
      self.topic_name, guid
    );
    for t in proxy.acknack_timer.iter().chain(proxy.liveliness_timer.iter()) {
      self.ctx.timers.cancel(*t);
    }
    self.status_counters.subscription_matched_current.decrease();
    self.status_sender.send(DataReaderStatus::SubscriptionMatched {
      total: self.status_counters.subscription_matched_total,
      current: self.status_counters.subscription_matched_current,
      writer: guid,
    });
    if proxy.is_alive() {
      self.status_counters.liveliness_alive.decrease();
    } else {
      self.status_counters.liveliness_not_alive.decrease();
    }
    self.send_liveliness_changed(guid);
  }

  // Entire remote participant was lost.
  // Remove all remote writers belonging to it.
  pub fn participant_lost(&mut self, guid_prefix: GuidPrefix) {
    let lost: Vec<GUID> = match &self.kind {
      ReaderKind::Stateful { writers } => writers
        .range(guid_prefix.range())
        .map(|(g, _)| *g)
        .collect(),
      ReaderKind::Stateless {
        last_sn_by_writer,
        fragments,
      } => last_sn_by_writer
        .range(guid_prefix.range())
        .map(|(g, _)| *g)
        .chain(fragments.range(guid_prefix.range()).map(|(g, _)| *g))
        .collect::<BTreeSet<GUID>>()
        .into_iter()
        .collect(),
    };
    for writer in lost {
      self.writer_lost(writer);
    }
    let incompatible: Vec<GUID> = self
      .incompatible_writers
      .range(guid_prefix.range())
      .copied()
      .collect();
    for g in incompatible {
      self.incompatible_writers.remove(&g);
    }
  }

  /// Cancels every timer of this reader. Call before dropping it.
  pub fn cancel_timers(&mut self) {
    self.ctx.timers.cancel_all(self.target());
  }
}

impl RTPSEntity for Reader {
  fn guid(&self) -> GUID {
    self.my_guid
  }
}

#[cfg(test)]
mod tests {
  use std::{net::SocketAddr, rc::Rc};

  use super::*;
  use crate::{
    dds::qos::policy::{Durability, Liveliness, Reliability},
    messages::submessages::{
      submessage_flag::ACKNACK_Flags,
      submessages::{AckNack, ReaderSubmessage},
    },
    network::simulated::SimulatedNetwork,
    rtps::{
      message::Message,
      persistence::InMemoryPersistence,
      timed_event::{Clock, ManualClock},
      SubmessageBody,
    },
    structure::{
      count::Count,
      duration,
      guid::{EntityId, EntityKind},
      locator::Locator,
      sequence_number::{FragmentNumber, SequenceNumberSet},
    },
  };

  fn reliable() -> Reliability {
    Reliability::Reliable {
      max_blocking_time: duration::Duration::from_millis(100),
    }
  }

  struct Fixture {
    net: SimulatedNetwork,
    clock: Rc<ManualClock>,
    ctx: ParticipantContext,
  }

  fn fixture() -> Fixture {
    let net = SimulatedNetwork::new();
    let clock = Rc::new(ManualClock::new());
    let ctx = ParticipantContext::new(GuidPrefix::new([2; 12]), clock.clone(), net.transport());
    Fixture { net, clock, ctx }
  }

  fn writer_guid() -> GUID {
    GUID::new(
      GuidPrefix::new([1; 12]),
      EntityId::new([0, 0, 1], EntityKind::WRITER_NO_KEY_USER_DEFINED),
    )
  }

  fn reader_ingredients(qos: QosPolicies) -> ReaderIngredients {
    let guid = GUID::new(
      GuidPrefix::new([2; 12]),
      EntityId::new([0, 0, 1], EntityKind::READER_NO_KEY_USER_DEFINED),
    );
    ReaderIngredients::new(guid, "T", qos)
  }

  fn matched_reader(f: &Fixture, qos: QosPolicies) -> Reader {
    let mut r = Reader::new(reader_ingredients(qos.clone()), f.ctx.clone());
    let wp = RtpsWriterProxy::new(writer_guid(), qos.clone()).with_locators(
      vec![Locator::from(SocketAddr::new(
        "127.0.0.1".parse().unwrap(),
        7410,
      ))],
      vec![],
    );
    r.update_writer_proxy(&wp, &qos);
    r
  }

  fn data(sn: i64) -> Data {
    Data {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      writer_sn: SequenceNumber::new(sn),
      inline_qos: None,
      serialized_payload: Some(Bytes::from(vec![0, 1, 0, 0, sn as u8])),
    }
  }

  fn heartbeat(first: i64, last: i64, count: i32) -> Heartbeat {
    Heartbeat {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      first_sn: SequenceNumber::new(first),
      last_sn: SequenceNumber::new(last),
      count: Count::new(count),
    }
  }

  fn taken(r: &Reader) -> Vec<i64> {
    r.history()
      .lock()
      .unwrap()
      .take_all()
      .iter()
      .map(|c| i64::from(c.sequence_number))
      .collect()
  }

  fn acknacks(net: &SimulatedNetwork) -> Vec<(AckNack, bool)> {
    let mut out = Vec::new();
    while let Some((_, bytes)) = net.pop() {
      for s in Message::read_from_buffer(&bytes).unwrap().submessages {
        if let SubmessageBody::Reader(ReaderSubmessage::AckNack(an, flags)) = s.body {
          out.push((an, flags.contains(ACKNACK_Flags::Final)));
        }
      }
    }
    out
  }

  fn run_timers(f: &Fixture, r: &mut Reader) {
    while let Some((_, event)) = f.ctx.timers.pop_expired(f.clock.now()) {
      r.handle_timed_event(event);
    }
  }

  #[test]
  fn reliable_reader_delivers_in_order() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    r.handle_data_msg(prefix, &data(1), None);
    r.handle_data_msg(prefix, &data(3), None);
    assert_eq!(taken(&r), vec![1]);
    r.handle_data_msg(prefix, &data(2), None);
    assert_eq!(taken(&r), vec![2, 3]);
    r.handle_data_msg(prefix, &data(2), None);
    assert!(taken(&r).is_empty());
  }

  #[test]
  fn heartbeat_with_gap_in_receipt_is_nacked() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    // Preemptive ACKNACK
    f.clock.advance(r.times().initial_acknack_delay);
    run_timers(&f, &mut r);
    let pre = acknacks(&f.net);
    assert_eq!(pre.len(), 1);
    assert_eq!(pre[0].0.reader_sn_state.base(), SequenceNumber::new(1));
    assert!(!pre[0].1);

    r.handle_data_msg(prefix, &data(1), None);
    r.handle_data_msg(prefix, &data(3), None);
    r.handle_heartbeat_msg(prefix, &heartbeat(1, 4, 1), true);
    f.clock.advance(r.times().heartbeat_response_delay);
    run_timers(&f, &mut r);
    let ans = acknacks(&f.net);
    assert_eq!(ans.len(), 1);
    let (an, final_flag) = &ans[0];
    assert_eq!(an.reader_sn_state.base(), SequenceNumber::new(2));
    assert_eq!(
      an.reader_sn_state.iter().collect::<Vec<_>>(),
      vec![SequenceNumber::new(2), SequenceNumber::new(4)]
    );
    assert!(!final_flag);

    // Same count again: ignored.
    r.handle_heartbeat_msg(prefix, &heartbeat(1, 4, 1), true);
    f.clock.advance(r.times().heartbeat_response_delay);
    run_timers(&f, &mut r);
    assert!(acknacks(&f.net).is_empty());
  }

  // Fragment `n` of the 10-byte sample `sn`, in fragments of 4 bytes.
  fn data_frag(sn: i64, n: u32) -> DataFrag {
    let sample: Vec<u8> = (0..10).map(|i| sn as u8 * 16 + i).collect();
    let start = (n as usize - 1) * 4;
    let end = sample.len().min(start + 4);
    DataFrag {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      writer_sn: SequenceNumber::new(sn),
      fragment_starting_num: FragmentNumber::new(n),
      fragments_in_submessage: 1,
      data_size: 10,
      fragment_size: 4,
      inline_qos: None,
      serialized_payload: Bytes::copy_from_slice(&sample[start..end]),
    }
  }

  fn reader_submessages(net: &SimulatedNetwork) -> Vec<ReaderSubmessage> {
    let mut out = Vec::new();
    while let Some((_, bytes)) = net.pop() {
      for s in Message::read_from_buffer(&bytes).unwrap().submessages {
        if let SubmessageBody::Reader(r) = s.body {
          out.push(r);
        }
      }
    }
    out
  }

  #[test]
  fn fragmented_sample_is_delivered_when_complete() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    let flags = BitFlags::from(DATAFRAG_Flags::Endianness);
    r.handle_data_frag_msg(prefix, &data_frag(1, 2), flags, None);
    r.handle_data_frag_msg(prefix, &data_frag(1, 1), flags, None);
    assert!(taken(&r).is_empty());
    r.handle_data_frag_msg(prefix, &data_frag(1, 3), flags, None);
    let delivered = r.history().lock().unwrap().take_all();
    assert_eq!(delivered.len(), 1);
    assert_eq!(
      delivered[0].data_value,
      Bytes::from((16..26).collect::<Vec<u8>>())
    );
    // late duplicate
    r.handle_data_frag_msg(prefix, &data_frag(1, 3), flags, None);
    assert!(taken(&r).is_empty());
  }

  #[test]
  fn missing_fragments_are_nacked_with_nack_frag() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    f.clock.advance(r.times().initial_acknack_delay);
    run_timers(&f, &mut r);
    reader_submessages(&f.net);

    let flags = BitFlags::from(DATAFRAG_Flags::Endianness);
    r.handle_data_frag_msg(prefix, &data_frag(1, 1), flags, None);
    r.handle_data_frag_msg(prefix, &data_frag(1, 3), flags, None);
    r.handle_heartbeat_msg(prefix, &heartbeat(1, 2, 1), true);
    f.clock.advance(r.times().heartbeat_response_delay);
    run_timers(&f, &mut r);

    let subs = reader_submessages(&f.net);
    assert_eq!(subs.len(), 2);
    match &subs[0] {
      ReaderSubmessage::AckNack(an, _) => {
        assert_eq!(an.reader_sn_state.base(), SequenceNumber::new(1));
        // 1 is asked for by fragment
        assert_eq!(
          an.reader_sn_state.iter().collect::<Vec<_>>(),
          vec![SequenceNumber::new(2)]
        );
      }
      other => panic!("expected ACKNACK, got {:?}", other),
    }
    match &subs[1] {
      ReaderSubmessage::NackFrag(nf, _) => {
        assert_eq!(nf.writer_sn, SequenceNumber::new(1));
        assert_eq!(
          nf.fragment_number_state.iter().collect::<Vec<_>>(),
          vec![FragmentNumber::new(2)]
        );
      }
      other => panic!("expected NACK_FRAG, got {:?}", other),
    }
  }

  #[test]
  fn heartbeat_frag_asks_for_announced_fragments() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    let flags = BitFlags::from(DATAFRAG_Flags::Endianness);
    r.handle_data_frag_msg(prefix, &data_frag(1, 2), flags, None);
    let hb_frag = |count| HeartbeatFrag {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      writer_sn: SequenceNumber::new(1),
      last_fragment_num: FragmentNumber::new(2),
      count: Count::new(count),
    };
    r.handle_heartbeat_frag_msg(prefix, &hb_frag(1));
    let subs = reader_submessages(&f.net);
    assert_eq!(subs.len(), 1);
    match &subs[0] {
      ReaderSubmessage::NackFrag(nf, _) => assert_eq!(
        nf.fragment_number_state.iter().collect::<Vec<_>>(),
        vec![FragmentNumber::new(1)]
      ),
      other => panic!("expected NACK_FRAG, got {:?}", other),
    }
    r.handle_heartbeat_frag_msg(prefix, &hb_frag(1));
    assert!(reader_submessages(&f.net).is_empty());
  }

  #[test]
  fn stateless_reader_reassembles() {
    let f = fixture();
    let ingredients = ReaderIngredients {
      stateless: true,
      ..reader_ingredients(QosPolicies::default())
    };
    let mut r = Reader::new(ingredients, f.ctx.clone());
    let prefix = writer_guid().prefix;
    let flags = BitFlags::from(DATAFRAG_Flags::Endianness);
    for n in 1..=3 {
      r.handle_data_frag_msg(prefix, &data_frag(4, n), flags, None);
    }
    assert_eq!(taken(&r), vec![4]);
    r.handle_data_frag_msg(prefix, &data_frag(4, 1), flags, None);
    r.handle_data_frag_msg(prefix, &data_frag(3, 1), flags, None);
    match &r.kind {
      ReaderKind::Stateless { fragments, .. } => {
        assert!(fragments.values().all(FragmentAssembler::is_empty))
      }
      ReaderKind::Stateful { .. } => panic!("stateless reader expected"),
    }
  }

  #[test]
  fn heartbeat_first_marks_lost() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    r.handle_data_msg(prefix, &data(1), None);
    r.handle_data_msg(prefix, &data(4), None);
    r.handle_heartbeat_msg(prefix, &heartbeat(4, 4, 1), true);
    assert_eq!(taken(&r), vec![1, 4]);
    assert_eq!(r.status_counters().sample_lost.count(), 2);
  }

  #[test]
  fn gap_is_not_lost() {
    let f = fixture();
    let qos = QosPolicies::builder().reliability(reliable()).build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    r.handle_data_msg(prefix, &data(3), None);
    let gap = Gap {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer_guid().entity_id,
      gap_start: SequenceNumber::new(1),
      gap_list: SequenceNumberSet::new_empty(SequenceNumber::new(3)),
    };
    r.handle_gap_msg(prefix, &gap);
    assert_eq!(taken(&r), vec![3]);
    assert_eq!(r.status_counters().sample_lost.count(), 0);
  }

  #[test]
  fn best_effort_counts_skipped_after_first() {
    let f = fixture();
    let qos = QosPolicies::builder()
      .reliability(Reliability::BestEffort)
      .history(policy::History::KeepAll)
      .build();
    let mut r = matched_reader(&f, qos);
    let prefix = writer_guid().prefix;
    r.handle_data_msg(prefix, &data(5), None);
    r.handle_data_msg(prefix, &data(7), None);
    r.handle_data_msg(prefix, &data(6), None);
    assert_eq!(taken(&r), vec![5, 7]);
    assert_eq!(r.status_counters().sample_lost.count(), 1);
    f.clock.advance(Duration::from_secs(1));
    run_timers(&f, &mut r);
    assert!(acknacks(&f.net).is_empty());
  }

  #[test]
  fn incompatible_writer_counted_once() {
    let f = fixture();
    let requested = QosPolicies::builder().reliability(reliable()).build();
    let offered = QosPolicies::builder()
      .reliability(Reliability::BestEffort)
      .build();
    let mut r = Reader::new(reader_ingredients(requested), f.ctx.clone());
    let wp = RtpsWriterProxy::new(writer_guid(), offered.clone());
    r.update_writer_proxy(&wp, &offered);
    r.update_writer_proxy(&wp, &offered);
    assert_eq!(r.status_counters().requested_incompatible_qos.count(), 1);
    assert!(r.matched_writers().is_empty());
  }

  #[test]
  fn writer_liveliness_expires() {
    let f = fixture();
    let qos = QosPolicies::builder()
      .reliability(Reliability::BestEffort)
      .liveliness(Liveliness::Automatic {
        lease_duration: duration::Duration::from_secs(1),
      })
      .build();
    let mut r = matched_reader(&f, qos);
    assert_eq!(r.status_counters().liveliness_alive.count(), 1);
    f.clock.advance(Duration::from_millis(1500));
    run_timers(&f, &mut r);
    assert_eq!(r.status_counters().liveliness_alive.count(), 0);
    assert_eq!(r.status_counters().liveliness_not_alive.count(), 1);

    r.handle_data_msg(writer_guid().prefix, &data(1), None);
    assert_eq!(r.status_counters().liveliness_alive.count(), 1);
    assert_eq!(r.status_counters().liveliness_not_alive.count(), 0);
  }

  #[test]
  fn participant_message_revives_writers_of_its_kind() {
    let f = fixture();
    let qos = QosPolicies::builder()
      .reliability(Reliability::BestEffort)
      .liveliness(Liveliness::ManualByParticipant {
        lease_duration: duration::Duration::from_secs(1),
      })
      .build();
    let mut r = matched_reader(&f, qos);
    f.clock.advance(Duration::from_millis(1500));
    run_timers(&f, &mut r);
    assert_eq!(r.status_counters().liveliness_not_alive.count(), 1);

    let prefix = writer_guid().prefix;
    r.participant_liveliness_asserted(prefix, ParticipantMessageKind::AUTOMATIC_LIVELINESS_UPDATE);
    r.participant_liveliness_asserted(
      GuidPrefix::new([3; 12]),
      ParticipantMessageKind::MANUAL_LIVELINESS_UPDATE,
    );
    assert_eq!(r.status_counters().liveliness_alive.count(), 0);

    r.participant_liveliness_asserted(prefix, ParticipantMessageKind::MANUAL_LIVELINESS_UPDATE);
    assert_eq!(r.status_counters().liveliness_alive.count(), 1);
    assert_eq!(r.status_counters().liveliness_not_alive.count(), 0);

    // the lease runs from the assertion
    f.clock.advance(Duration::from_millis(900));
    run_timers(&f, &mut r);
    assert_eq!(r.status_counters().liveliness_alive.count(), 1);
    f.clock.advance(Duration::from_millis(200));
    run_timers(&f, &mut r);
    assert_eq!(r.status_counters().liveliness_alive.count(), 0);
  }

  #[test]
  fn persistent_reader_skips_notified() {
    let f = fixture();
    let qos = QosPolicies::builder()
      .reliability(Reliability::BestEffort)
      .durability(Durability::Persistent)
      .history(policy::History::KeepAll)
      .build();
    let service: Arc<dyn PersistenceService> = Arc::new(InMemoryPersistence::new());
    {
      let mut r = Reader::new(
        ReaderIngredients {
          persistence: Some(service.clone()),
          ..reader_ingredients(qos.clone())
        },
        f.ctx.clone(),
      );
      r.update_writer_proxy(&RtpsWriterProxy::new(writer_guid(), qos.clone()), &qos);
      r.handle_data_msg(writer_guid().prefix, &data(1), None);
      r.handle_data_msg(writer_guid().prefix, &data(2), None);
      assert_eq!(taken(&r), vec![1, 2]);
    }
    let mut r = Reader::new(
      ReaderIngredients {
        persistence: Some(service),
        ..reader_ingredients(qos.clone())
      },
      f.ctx.clone(),
    );
    r.update_writer_proxy(&RtpsWriterProxy::new(writer_guid(), qos.clone()), &qos);
    for sn in 1..=3 {
      r.handle_data_msg(writer_guid().prefix, &data(sn), None);
    }
    assert_eq!(taken(&r), vec![3]);
  }
}
