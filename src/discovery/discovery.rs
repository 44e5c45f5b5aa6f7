use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::Endianness;

use crate::{
  dds::{
    qos::{
      policy::{Durability, History, Liveliness, Reliability},
      QosPolicies,
    },
    statusevents::{DomainParticipantStatus, ParticipantState, StatusChannelSender},
  },
  discovery::{
    discovery_db::DiscoveryDB,
    endpoint_proxy_data::{check_match, MatchFailure, ReaderProxyData, WriterProxyData},
    participant_message::{participant_message_key, ParticipantMessageData, ParticipantMessageKind},
    participant_proxy_data::ParticipantProxyData,
    pl_cdr,
  },
  rtps::{
    constant::{
      STANDARD_BUILTIN_READERS_INIT_LIST, STANDARD_BUILTIN_WRITERS_INIT_LIST,
      WLP_ASSERTION_TENTHS_OF_LEASE,
    },
    context::ParticipantContext,
    message_receiver::MessageReceiver,
    participant::ParticipantConfig,
    reader::{KeyHashFn, Reader, ReaderIngredients, ReaderTimes},
    rtps_reader_proxy::RtpsReaderProxy,
    rtps_writer_proxy::RtpsWriterProxy,
    timed_event::{TimedEvent, TimerId, TimerTarget},
    writer::{Writer, WriterIngredients, WriterTimes},
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    duration::Duration as DdsDuration,
    guid::{EntityId, GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    parameter_id::ParameterId,
  },
};

pub const DCPS_PARTICIPANT_TOPIC: &str = "DCPSParticipant";
pub const DCPS_PUBLICATION_TOPIC: &str = "DCPSPublication";
pub const DCPS_SUBSCRIPTION_TOPIC: &str = "DCPSSubscription";
pub const DCPS_PARTICIPANT_MESSAGE_TOPIC: &str = "DCPSParticipantMessage";

const DISCOVERY_ENDIANNESS: Endianness = Endianness::LittleEndian;

/// SPDP endpoints: best effort, last announcement of each participant.
pub fn spdp_qos() -> QosPolicies {
  QosPolicies::builder()
    .reliability(Reliability::BestEffort)
    .durability(Durability::TransientLocal)
    .history(History::KeepLast { depth: 1 })
    .build()
}

/// SEDP endpoints: reliable, late joiners get the current endpoint set.
pub fn sedp_qos() -> QosPolicies {
  QosPolicies::builder()
    .reliability(Reliability::Reliable {
      max_blocking_time: DdsDuration::from_millis(100),
    })
    .durability(Durability::TransientLocal)
    .history(History::KeepLast { depth: 1 })
    .build()
}

/// Writer liveliness protocol endpoints. RTPS spec 8.4.13.3
pub fn participant_message_qos() -> QosPolicies {
  QosPolicies::builder()
    .reliability(Reliability::Reliable {
      max_blocking_time: DdsDuration::from_millis(100),
    })
    .durability(Durability::TransientLocal)
    .history(History::KeepLast { depth: 1 })
    .build()
}

type Writers = BTreeMap<EntityId, Writer>;

/// Simple Discovery: SPDP announcements and lease tracking of remote
/// participants, SEDP exchange of endpoint data, matching of local
/// endpoints against remote ones, and the writer liveliness protocol.
///
/// Discovery does not own endpoints. The participant passes its writers and
/// its message receiver (which owns the readers) to every call that needs
/// them.
pub struct Discovery {
  ctx: ParticipantContext,
  db: DiscoveryDB,
  local_data: ParticipantProxyData,
  announcement_period: Duration,
  initial_announcement_period: Duration,
  initial_announcements_left: u32,
  initial_announcement_count: u32,
  lease_check_period: Duration,
  builtin_writer_times: WriterTimes,
  builtin_reader_times: ReaderTimes,
  status_sender: StatusChannelSender<DomainParticipantStatus>,
  // automatic liveliness assertion, while some local writer needs it
  automatic_assertion_period: Option<Duration>,
  automatic_assertion_timer: Option<TimerId>,
}

impl Discovery {
  pub fn new(
    ctx: ParticipantContext,
    config: &ParticipantConfig,
    local_data: ParticipantProxyData,
    status_sender: StatusChannelSender<DomainParticipantStatus>,
  ) -> Self {
    Self {
      db: DiscoveryDB::new(ctx.guid_prefix),
      ctx,
      local_data,
      announcement_period: config.announcement_period,
      initial_announcement_period: config.initial_announcements.period,
      initial_announcements_left: 0,
      initial_announcement_count: config.initial_announcements.count,
      lease_check_period: config.lease_check_period,
      builtin_writer_times: config.builtin_writer_times,
      builtin_reader_times: config.builtin_reader_times,
      status_sender,
      automatic_assertion_period: None,
      automatic_assertion_timer: None,
    }
  }

  pub fn local_participant_data(&self) -> &ParticipantProxyData {
    &self.local_data
  }

  fn my_guid(&self, entity_id: EntityId) -> GUID {
    GUID::new(self.ctx.guid_prefix, entity_id)
  }

  // -----------------------------------------------------------------------
  // Builtin endpoints

  /// SPDP writer, the SEDP writers and the participant message writer.
  pub fn create_builtin_writers(&self) -> Vec<Writer> {
    let mut spdp = WriterIngredients::new(
      self.my_guid(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER),
      DCPS_PARTICIPANT_TOPIC,
      spdp_qos(),
    );
    spdp.stateless = true;
    let mut spdp_writer = Writer::new(spdp, self.ctx.clone());
    for locator in &self.local_data.metatraffic_multicast_locators {
      spdp_writer.add_reader_locator(*locator, false);
    }

    let mut writers = vec![spdp_writer];
    for (entity_id, topic, qos) in [
      (
        EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
        DCPS_PUBLICATION_TOPIC,
        sedp_qos(),
      ),
      (
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
        DCPS_SUBSCRIPTION_TOPIC,
        sedp_qos(),
      ),
      (
        EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER,
        DCPS_PARTICIPANT_MESSAGE_TOPIC,
        participant_message_qos(),
      ),
    ] {
      let mut i = WriterIngredients::new(self.my_guid(entity_id), topic, qos);
      i.times = self.builtin_writer_times;
      writers.push(Writer::new(i, self.ctx.clone()));
    }
    writers
  }

  /// SPDP reader, the SEDP readers and the participant message reader.
  pub fn create_builtin_readers(&self) -> Vec<Reader> {
    let ingredients = |entity_id: EntityId, topic: &str, qos: QosPolicies, key_hash: KeyHashFn| {
      let mut i = ReaderIngredients::new(self.my_guid(entity_id), topic, qos);
      i.key_hash = Some(key_hash);
      i
    };
    let guid_key = |key_pid: ParameterId| -> KeyHashFn {
      Arc::new(move |bytes: &Bytes| pl_cdr::guid_key(bytes, key_pid))
    };

    let mut spdp = ingredients(
      EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
      DCPS_PARTICIPANT_TOPIC,
      spdp_qos(),
      guid_key(ParameterId::PID_PARTICIPANT_GUID),
    );
    spdp.stateless = true;

    let mut readers = vec![Reader::new(spdp, self.ctx.clone())];
    for (entity_id, topic, qos, key_hash) in [
      (
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
        DCPS_PUBLICATION_TOPIC,
        sedp_qos(),
        guid_key(ParameterId::PID_ENDPOINT_GUID),
      ),
      (
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
        DCPS_SUBSCRIPTION_TOPIC,
        sedp_qos(),
        guid_key(ParameterId::PID_ENDPOINT_GUID),
      ),
      (
        EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_READER,
        DCPS_PARTICIPANT_MESSAGE_TOPIC,
        participant_message_qos(),
        Arc::new(|bytes: &Bytes| participant_message_key(bytes)) as KeyHashFn,
      ),
    ] {
      let mut i = ingredients(entity_id, topic, qos, key_hash);
      i.times = self.builtin_reader_times;
      readers.push(Reader::new(i, self.ctx.clone()));
    }
    readers
  }

  /// Writes our participant data and starts the announcement and lease
  /// check timers.
  pub fn start(&mut self, writers: &mut Writers) {
    self.write_participant_data(writers, ChangeKind::Alive);
    self.initial_announcements_left = self.initial_announcement_count.saturating_sub(1);
    let first_resend = if self.initial_announcements_left > 0 {
      self.initial_announcement_period
    } else {
      self.announcement_period
    };
    self
      .ctx
      .schedule_after(first_resend, TimerTarget::Participant, TimedEvent::SpdpAnnounce);
    self.ctx.schedule_after(
      self.lease_check_period,
      TimerTarget::Participant,
      TimedEvent::ParticipantLeaseCheck,
    );
  }

  fn write_participant_data(&mut self, writers: &mut Writers, kind: ChangeKind) {
    let payload = if kind.is_alive() {
      match self.local_data.to_pl_cdr_bytes(DISCOVERY_ENDIANNESS) {
        Ok(b) => b,
        Err(e) => {
          error!("Cannot serialize own participant data: {}", e);
          return;
        }
      }
    } else {
      Bytes::new()
    };
    match writers.get_mut(&EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER) {
      Some(w) => {
        if let Err(e) = w.new_change(kind, self.local_data.key(), payload, None) {
          error!("SPDP writer refused participant data: {:?}", e);
        }
      }
      None => error!("No SPDP writer"),
    }
  }

  /// Resends our participant data to every SPDP locator.
  pub fn announce(&mut self, writers: &mut Writers) {
    trace!("SPDP announcement");
    if let Some(w) = writers.get_mut(&EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER) {
      w.unsent_changes_reset();
    }
  }

  /// Tells remote participants we are going away.
  pub fn dispose_participant(&mut self, writers: &mut Writers) {
    info!("Disposing participant {:?}", self.ctx.guid_prefix);
    self.write_participant_data(writers, ChangeKind::NotAliveDisposedUnregistered);
  }

  pub fn handle_timed_event(
    &mut self,
    event: TimedEvent,
    writers: &mut Writers,
    receiver: &mut MessageReceiver,
  ) {
    match event {
      TimedEvent::SpdpAnnounce => {
        self.announce(writers);
        let next = if self.initial_announcements_left > 0 {
          self.initial_announcements_left -= 1;
          if self.initial_announcements_left > 0 {
            self.initial_announcement_period
          } else {
            self.announcement_period
          }
        } else {
          self.announcement_period
        };
        self
          .ctx
          .schedule_after(next, TimerTarget::Participant, TimedEvent::SpdpAnnounce);
      }
      TimedEvent::ParticipantLeaseCheck => {
        for prefix in self.db.participant_cleanup(self.ctx.now()) {
          self.remote_participant_gone(prefix, ParticipantState::Dropped, writers, receiver);
        }
        self.ctx.schedule_after(
          self.lease_check_period,
          TimerTarget::Participant,
          TimedEvent::ParticipantLeaseCheck,
        );
      }
      TimedEvent::AutomaticLivelinessAssertion => {
        self.automatic_assertion_timer = None;
        self.write_liveliness(writers, ParticipantMessageKind::AUTOMATIC_LIVELINESS_UPDATE);
        if let Some(period) = self.automatic_assertion_period {
          self.automatic_assertion_timer = Some(self.ctx.schedule_after(
            period,
            TimerTarget::Participant,
            TimedEvent::AutomaticLivelinessAssertion,
          ));
        }
      }
      other => warn!("Discovery got unexpected timed event {:?}", other),
    }
  }

  // -----------------------------------------------------------------------
  // Remote participants

  /// Any SPDP message from a participant renews its lease.
  pub fn participant_is_alive(&mut self, guid_prefix: GuidPrefix) {
    self.db.participant_is_alive(guid_prefix, self.ctx.now());
  }

  /// Consumes whatever the builtin readers have received.
  pub(crate) fn process_builtin_readers(&mut self, writers: &mut Writers, receiver: &mut MessageReceiver) {
    for change in take_changes(receiver, EntityId::SPDP_BUILTIN_PARTICIPANT_READER) {
      self.handle_participant_change(change, writers, receiver);
    }
    for change in take_changes(receiver, EntityId::SEDP_BUILTIN_PUBLICATIONS_READER) {
      self.handle_publication_change(change, receiver);
    }
    for change in take_changes(receiver, EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER) {
      self.handle_subscription_change(change, writers);
    }
    for change in take_changes(receiver, EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_READER) {
      self.handle_participant_message(change, receiver);
    }
  }

  fn handle_participant_change(
    &mut self,
    change: CacheChange,
    writers: &mut Writers,
    receiver: &mut MessageReceiver,
  ) {
    if !change.kind.is_alive() {
      let prefix = GUID::from_bytes(change.instance_handle.to_bytes()).prefix;
      if self.db.remove_participant(prefix).is_some() {
        self.remote_participant_gone(prefix, ParticipantState::Removed, writers, receiver);
      }
      return;
    }
    let data = match ParticipantProxyData::from_pl_cdr_bytes(&change.data_value) {
      Ok(d) => d,
      Err(e) => {
        warn!("Malformed participant data from {:?}: {}", change.writer_guid, e);
        return;
      }
    };
    let prefix = data.guid_prefix();
    match self.db.update_participant(&data, self.ctx.now()) {
      Some(state @ ParticipantState::Discovered) => {
        self.match_builtin_endpoints(&data, writers, receiver);
        self.status_sender.send(DomainParticipantStatus::ParticipantDiscovered {
          guid_prefix: prefix,
          state,
        });
        // Let the newcomer know about us without waiting for the period.
        self.announce(writers);
      }
      Some(state) => {
        self.match_builtin_endpoints(&data, writers, receiver);
        self.status_sender.send(DomainParticipantStatus::ParticipantDiscovered {
          guid_prefix: prefix,
          state,
        });
      }
      None => (),
    }
  }

  // Pairs our SEDP and participant message endpoints with those the remote
  // participant announces. The remote side is taken to use the QoS of our
  // local counterpart.
  fn match_builtin_endpoints(
    &self,
    data: &ParticipantProxyData,
    writers: &mut Writers,
    receiver: &mut MessageReceiver,
  ) {
    let prefix = data.guid_prefix();
    let (unicast, multicast) = data.metatraffic_locators();

    for (remote_writer, local_reader, flag) in STANDARD_BUILTIN_WRITERS_INIT_LIST {
      if !data.available_builtin_endpoints.contains(*flag) {
        continue;
      }
      if let Some(reader) = receiver.reader_mut(*local_reader) {
        let qos = reader.qos().clone();
        let proxy = RtpsWriterProxy::new(GUID::new(prefix, *remote_writer), qos.clone())
          .with_locators(unicast.clone(), multicast.clone());
        reader.update_writer_proxy(&proxy, &qos);
      }
    }
    for (local_writer, remote_reader, flag) in STANDARD_BUILTIN_READERS_INIT_LIST {
      if !data.available_builtin_endpoints.contains(*flag) {
        continue;
      }
      if let Some(writer) = writers.get_mut(local_writer) {
        let qos = writer.qos().clone();
        let proxy = RtpsReaderProxy::new(GUID::new(prefix, *remote_reader), qos.clone(), false)
          .with_locators(unicast.clone(), multicast.clone());
        writer.update_reader_proxy(&proxy, &qos);
      }
    }
  }

  // The participant is already out of the database. Unmatch everything it
  // had.
  fn remote_participant_gone(
    &mut self,
    prefix: GuidPrefix,
    state: ParticipantState,
    writers: &mut Writers,
    receiver: &mut MessageReceiver,
  ) {
    info!("Remote participant {:?} is gone: {:?}", prefix, state);
    for writer in writers.values_mut() {
      writer.participant_lost(prefix);
    }
    for reader in receiver.readers_mut() {
      reader.participant_lost(prefix);
    }
    self.status_sender.send(DomainParticipantStatus::ParticipantLost {
      guid_prefix: prefix,
      state,
    });
  }

  // -----------------------------------------------------------------------
  // Remote endpoints

  fn handle_publication_change(&mut self, change: CacheChange, receiver: &mut MessageReceiver) {
    if !change.kind.is_alive() {
      let guid = GUID::from_bytes(change.instance_handle.to_bytes());
      if self.db.remove_remote_writer(guid).is_some() {
        info!("Remote writer {:?} disposed", guid);
        for reader in receiver.readers_mut() {
          reader.writer_lost(guid);
        }
      }
      return;
    }
    let data = match WriterProxyData::from_pl_cdr_bytes(&change.data_value) {
      Ok(d) => d,
      Err(e) => {
        warn!("Malformed publication data from {:?}: {}", change.writer_guid, e);
        return;
      }
    };
    if data.writer_guid.prefix == self.ctx.guid_prefix || !self.db.update_remote_writer(&data) {
      return;
    }
    let proxy = data.to_writer_proxy(&self.db.default_locators(data.writer_guid.prefix));
    for local in self.db.local_readers() {
      match check_match(&data, local) {
        Err(MatchFailure::DifferentTopic) => continue,
        // Compatible or not, the reader decides with the same check and
        // keeps its counters.
        Ok(()) | Err(MatchFailure::IncompatibleQos(_)) => {
          if let Some(reader) = receiver.reader_mut(local.reader_guid.entity_id) {
            reader.update_writer_proxy(&proxy, &data.qos);
          }
        }
      }
    }
  }

  fn handle_subscription_change(&mut self, change: CacheChange, writers: &mut Writers) {
    if !change.kind.is_alive() {
      let guid = GUID::from_bytes(change.instance_handle.to_bytes());
      if self.db.remove_remote_reader(guid).is_some() {
        info!("Remote reader {:?} disposed", guid);
        for writer in writers.values_mut() {
          writer.reader_lost(guid);
        }
      }
      return;
    }
    let data = match ReaderProxyData::from_pl_cdr_bytes(&change.data_value) {
      Ok(d) => d,
      Err(e) => {
        warn!("Malformed subscription data from {:?}: {}", change.writer_guid, e);
        return;
      }
    };
    if data.reader_guid.prefix == self.ctx.guid_prefix || !self.db.update_remote_reader(&data) {
      return;
    }
    let proxy = data.to_reader_proxy(&self.db.default_locators(data.reader_guid.prefix));
    for local in self.db.local_writers() {
      match check_match(local, &data) {
        Err(MatchFailure::DifferentTopic) => continue,
        Ok(()) | Err(MatchFailure::IncompatibleQos(_)) => {
          if let Some(writer) = writers.get_mut(&local.writer_guid.entity_id) {
            writer.update_reader_proxy(&proxy, &data.qos);
          }
        }
      }
    }
  }

  // -----------------------------------------------------------------------
  // Local endpoints

  /// Announces a local writer over SEDP and matches it with the remote
  /// readers already known.
  pub fn add_local_writer(&mut self, mut data: WriterProxyData, writers: &mut Writers) {
    if data.unicast_locators.is_empty() && data.multicast_locators.is_empty() {
      let (unicast, multicast) = self.local_data.default_locators();
      data.unicast_locators = unicast;
      data.multicast_locators = multicast;
    }
    publish(
      writers,
      EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      ChangeKind::Alive,
      &data.key(),
      data.to_pl_cdr_bytes(DISCOVERY_ENDIANNESS),
    );
    if let Some(writer) = writers.get_mut(&data.writer_guid.entity_id) {
      for remote in self.db.remote_readers() {
        match check_match(&data, remote) {
          Err(MatchFailure::DifferentTopic) => continue,
          Ok(()) | Err(MatchFailure::IncompatibleQos(_)) => {
            let proxy = remote.to_reader_proxy(&self.db.default_locators(remote.reader_guid.prefix));
            writer.update_reader_proxy(&proxy, &remote.qos);
          }
        }
      }
    }
    self.db.update_local_writer(data);
    self.update_automatic_assertion();
  }

  /// Announces a local reader over SEDP and matches it with the remote
  /// writers already known.
  pub fn add_local_reader(
    &mut self,
    mut data: ReaderProxyData,
    writers: &mut Writers,
    receiver: &mut MessageReceiver,
  ) {
    if data.unicast_locators.is_empty() && data.multicast_locators.is_empty() {
      let (unicast, multicast) = self.local_data.default_locators();
      data.unicast_locators = unicast;
      data.multicast_locators = multicast;
    }
    publish(
      writers,
      EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
      ChangeKind::Alive,
      &data.key(),
      data.to_pl_cdr_bytes(DISCOVERY_ENDIANNESS),
    );
    if let Some(reader) = receiver.reader_mut(data.reader_guid.entity_id) {
      for remote in self.db.remote_writers() {
        match check_match(remote, &data) {
          Err(MatchFailure::DifferentTopic) => continue,
          Ok(()) | Err(MatchFailure::IncompatibleQos(_)) => {
            let proxy = remote.to_writer_proxy(&self.db.default_locators(remote.writer_guid.prefix));
            reader.update_writer_proxy(&proxy, &remote.qos);
          }
        }
      }
    }
    self.db.update_local_reader(data);
  }

  /// Disposes a local writer in SEDP.
  pub fn remove_local_writer(&mut self, guid: GUID, writers: &mut Writers) {
    if let Some(data) = self.db.remove_local_writer(guid) {
      publish(
        writers,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
        ChangeKind::NotAliveDisposedUnregistered,
        &data.key(),
        Ok(Bytes::new()),
      );
      self.update_automatic_assertion();
    }
  }

  /// Disposes a local reader in SEDP.
  pub fn remove_local_reader(&mut self, guid: GUID, writers: &mut Writers) {
    if let Some(data) = self.db.remove_local_reader(guid) {
      publish(
        writers,
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
        ChangeKind::NotAliveDisposedUnregistered,
        &data.key(),
        Ok(Bytes::new()),
      );
    }
  }

  // -----------------------------------------------------------------------
  // Writer liveliness protocol

  // Automatic liveliness is asserted well within the shortest finite lease
  // of the local AUTOMATIC writers. No such writers, no timer.
  fn update_automatic_assertion(&mut self) {
    let period = self
      .db
      .local_writers()
      .filter_map(|w| match w.qos.liveliness() {
        Some(l @ Liveliness::Automatic { .. }) => l.duration().to_std(),
        _ => None,
      })
      .filter(|lease| !lease.is_zero())
      .min()
      .map(|lease| lease * WLP_ASSERTION_TENTHS_OF_LEASE / 10);
    if period == self.automatic_assertion_period {
      return;
    }
    if let Some(t) = self.automatic_assertion_timer.take() {
      self.ctx.timers.cancel(t);
    }
    self.automatic_assertion_period = period;
    match period {
      Some(period) => {
        debug!("Asserting automatic liveliness every {:?}", period);
        self.automatic_assertion_timer = Some(self.ctx.schedule_after(
          period,
          TimerTarget::Participant,
          TimedEvent::AutomaticLivelinessAssertion,
        ));
      }
      None => debug!("No automatic liveliness to assert"),
    }
  }

  pub fn automatic_assertion_period(&self) -> Option<Duration> {
    self.automatic_assertion_period
  }

  /// Publishes a liveliness message of the given kind for this participant.
  pub fn write_liveliness(&mut self, writers: &mut Writers, kind: ParticipantMessageKind) {
    let msg = ParticipantMessageData::liveliness(self.ctx.guid_prefix, kind);
    trace!("Liveliness message {:?}", kind);
    publish(
      writers,
      EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER,
      ChangeKind::Alive,
      &msg.key(),
      msg.to_cdr_bytes(DISCOVERY_ENDIANNESS),
    );
  }

  fn handle_participant_message(&mut self, change: CacheChange, receiver: &mut MessageReceiver) {
    if !change.kind.is_alive() {
      return;
    }
    let msg = match ParticipantMessageData::from_cdr_bytes(&change.data_value) {
      Ok(m) => m,
      Err(e) => {
        warn!("Malformed participant message from {:?}: {}", change.writer_guid, e);
        return;
      }
    };
    if msg.guid_prefix != change.writer_guid.prefix {
      warn!(
        "Participant message about {:?} sent by {:?}. Ignored.",
        msg.guid_prefix, change.writer_guid
      );
      return;
    }
    if msg.kind == ParticipantMessageKind::UNKNOWN {
      trace!("Participant message of unknown kind from {:?}", msg.guid_prefix);
      return;
    }
    trace!("Liveliness {:?} of {:?}", msg.kind, msg.guid_prefix);
    for reader in receiver.readers_mut() {
      reader.participant_liveliness_asserted(msg.guid_prefix, msg.kind);
    }
  }

  // -----------------------------------------------------------------------
  // Queries

  pub fn participant_state(&self, guid_prefix: GuidPrefix) -> Option<ParticipantState> {
    self.db.participant_state(guid_prefix)
  }

  pub fn known_participants(&self) -> Vec<GuidPrefix> {
    self.db.participant_prefixes()
  }

  pub fn remote_participant_data(&self, guid_prefix: GuidPrefix) -> Option<&ParticipantProxyData> {
    self.db.find_participant_proxy(guid_prefix)
  }

  pub fn remote_writers(&self) -> Vec<WriterProxyData> {
    self.db.remote_writers().cloned().collect()
  }

  pub fn remote_readers(&self) -> Vec<ReaderProxyData> {
    self.db.remote_readers().cloned().collect()
  }
}

fn take_changes(receiver: &MessageReceiver, reader_id: EntityId) -> Vec<CacheChange> {
  let history = match receiver.reader(reader_id) {
    Some(r) => r.history(),
    None => return Vec::new(),
  };
  let mut history = match history.lock() {
    Ok(h) => h,
    Err(e) => {
      error!("Builtin reader history lock poisoned: {}", e);
      return Vec::new();
    }
  };
  history.take_all()
}

fn publish(
  writers: &mut Writers,
  builtin_writer: EntityId,
  kind: ChangeKind,
  key: &InstanceHandle,
  payload: crate::dds::result::Result<Bytes>,
) {
  let payload = match payload {
    Ok(p) => p,
    Err(e) => {
      error!("Cannot serialize data for {:?}: {}", builtin_writer, e);
      return;
    }
  };
  match writers.get_mut(&builtin_writer) {
    Some(w) => {
      if let Err(e) = w.new_change(kind, *key, payload, None) {
        error!("Builtin writer {:?} refused data: {:?}", builtin_writer, e);
      }
    }
    None => error!("No builtin writer {:?}", builtin_writer),
  }
}

#[cfg(test)]
mod tests {
  use std::{net::SocketAddr, rc::Rc};

  use super::*;
  use crate::{
    dds::statusevents::{status_channel, StatusEvented, StatusReceiver},
    messages::submessages::submessages::WriterSubmessage,
    network::simulated::SimulatedNetwork,
    rtps::{message::Message, timed_event::ManualClock, SubmessageBody},
    structure::{entity::RTPSEntity, guid::EntityKind, locator::Locator},
  };

  struct Fixture {
    net: SimulatedNetwork,
    clock: Rc<ManualClock>,
    ctx: ParticipantContext,
    discovery: Discovery,
    writers: Writers,
    receiver: MessageReceiver,
    status: StatusReceiver<DomainParticipantStatus>,
  }

  fn spdp_locator() -> Locator {
    Locator::from("239.255.0.1:7400".parse::<SocketAddr>().unwrap())
  }

  fn fixture() -> Fixture {
    let net = SimulatedNetwork::new();
    let clock = Rc::new(ManualClock::new());
    let prefix = GuidPrefix::new([0xAA; 12]);
    let ctx = ParticipantContext::new(prefix, clock.clone(), net.transport());
    let config = ParticipantConfig::default();
    let mut local = ParticipantProxyData::new(prefix, config.lease_duration);
    local.metatraffic_multicast_locators = vec![spdp_locator()];
    let (status_tx, status) = status_channel();
    let discovery = Discovery::new(ctx.clone(), &config, local, status_tx);
    let mut writers = Writers::new();
    for w in discovery.create_builtin_writers() {
      writers.insert(w.guid().entity_id, w);
    }
    let mut receiver = MessageReceiver::new(prefix);
    for r in discovery.create_builtin_readers() {
      receiver.add_reader(r);
    }
    Fixture {
      net,
      clock,
      ctx,
      discovery,
      writers,
      receiver,
      status,
    }
  }

  impl Fixture {
    fn receive(&mut self, bytes: &Bytes) {
      let out = self.receiver.handle_received_packet(bytes);
      for prefix in out.spdp_liveness {
        self.discovery.participant_is_alive(prefix);
      }
      self
        .discovery
        .process_builtin_readers(&mut self.writers, &mut self.receiver);
    }

    fn run_timers(&mut self) {
      while let Some((target, event)) = self.ctx.timers.pop_expired(self.ctx.now()) {
        match target {
          TimerTarget::Participant => {
            self
              .discovery
              .handle_timed_event(event, &mut self.writers, &mut self.receiver)
          }
          TimerTarget::Writer(id) => {
            if let Some(w) = self.writers.get_mut(&id) {
              w.handle_timed_event(event);
            }
          }
          TimerTarget::Reader(id) => {
            if let Some(r) = self.receiver.reader_mut(id) {
              r.handle_timed_event(event);
            }
          }
        }
      }
    }

    fn spdp_sends(&self) -> usize {
      let mut n = 0;
      while let Some((locator, _)) = self.net.pop() {
        if locator == spdp_locator() {
          n += 1;
        }
      }
      n
    }
  }

  // SPDP announcement of a Fast-DDS participant, as captured with Wireshark.
  const FASTRTPS_SPDP: [u8; 204] = [
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
  ];

  fn fastrtps_prefix() -> GuidPrefix {
    GuidPrefix::new([
      0x01, 0x0f, 0x99, 0x06, 0x78, 0x34, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    ])
  }

  #[test]
  fn announcements_follow_initial_then_regular_period() {
    let mut f = fixture();
    f.discovery.start(&mut f.writers);
    assert_eq!(f.spdp_sends(), 1);
    for _ in 0..4 {
      f.clock.advance(Duration::from_millis(100));
      f.run_timers();
      assert_eq!(f.spdp_sends(), 1);
    }
    // Initial burst is over: nothing until the regular period.
    f.clock.advance(Duration::from_millis(2900));
    f.run_timers();
    assert_eq!(f.spdp_sends(), 0);
    f.clock.advance(Duration::from_millis(100));
    f.run_timers();
    assert_eq!(f.spdp_sends(), 1);
  }

  #[test]
  fn announcement_is_parseable_participant_data() {
    let mut f = fixture();
    f.discovery.start(&mut f.writers);
    let (_, bytes) = f.net.pop().unwrap();
    let msg = Message::read_from_buffer(&bytes).unwrap();
    assert_eq!(msg.header.guid_prefix, GuidPrefix::new([0xAA; 12]));
    let payload = msg
      .submessages
      .iter()
      .find_map(|s| match &s.body {
        SubmessageBody::Writer(WriterSubmessage::Data(d, _)) => d.serialized_payload.clone(),
        _ => None,
      })
      .unwrap();
    let data = ParticipantProxyData::from_pl_cdr_bytes(&payload).unwrap();
    assert_eq!(data.guid_prefix(), GuidPrefix::new([0xAA; 12]));
    assert_eq!(data.lease_duration_std(), Some(Duration::from_secs(20)));
  }

  #[test]
  fn fastrtps_participant_is_discovered_and_matched() {
    let mut f = fixture();
    f.receive(&Bytes::from_static(&FASTRTPS_SPDP));
    let prefix = fastrtps_prefix();
    assert_eq!(
      f.discovery.participant_state(prefix),
      Some(ParticipantState::Discovered)
    );
    let data = f.discovery.remote_participant_data(prefix).unwrap();
    assert_eq!(data.lease_duration_std(), Some(Duration::from_secs(20)));
    assert_eq!(data.entity_name.as_deref(), Some("fastrtpsParticipant"));
    assert_eq!(data.metatraffic_unicast_locators[0].port(), 7412);
    assert_eq!(
      f.status.try_recv_status(),
      Some(DomainParticipantStatus::ParticipantDiscovered {
        guid_prefix: prefix,
        state: ParticipantState::Discovered,
      })
    );

    let sedp_pub_writer = &f.writers[&EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER];
    assert_eq!(
      sedp_pub_writer.matched_readers(),
      vec![GUID::new(prefix, EntityId::SEDP_BUILTIN_PUBLICATIONS_READER)]
    );
    let sedp_sub_reader = f
      .receiver
      .reader(EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER)
      .unwrap();
    assert_eq!(
      sedp_sub_reader.matched_writers(),
      vec![GUID::new(prefix, EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER)]
    );

    // The same announcement again only renews the lease.
    f.receive(&Bytes::from_static(&FASTRTPS_SPDP));
    assert_eq!(f.status.try_recv_status(), None);
  }

  #[test]
  fn fastrtps_participant_gets_liveliness_endpoints_matched() {
    let mut f = fixture();
    f.receive(&Bytes::from_static(&FASTRTPS_SPDP));
    let prefix = fastrtps_prefix();
    assert_eq!(
      f.writers[&EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER].matched_readers(),
      vec![GUID::new(prefix, EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_READER)]
    );
    let wlp_reader = f
      .receiver
      .reader(EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_READER)
      .unwrap();
    assert_eq!(
      wlp_reader.matched_writers(),
      vec![GUID::new(prefix, EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER)]
    );
  }

  #[test]
  fn automatic_liveliness_is_asserted_while_writers_need_it() {
    let mut f = fixture();
    let writer = |key: u8, lease_secs: i32| {
      let guid = GUID::new(
        GuidPrefix::new([0xAA; 12]),
        EntityId::new([0, 0, key], EntityKind::WRITER_NO_KEY_USER_DEFINED),
      );
      let qos = QosPolicies::builder()
        .liveliness(Liveliness::Automatic {
          lease_duration: DdsDuration::from_secs(lease_secs),
        })
        .build();
      WriterProxyData::new(guid, "T", "Type", qos)
    };
    let slow = writer(1, 10);
    let fast = writer(2, 1);
    f.discovery.add_local_writer(slow.clone(), &mut f.writers);
    assert_eq!(
      f.discovery.automatic_assertion_period(),
      Some(Duration::from_secs(7))
    );
    f.discovery.add_local_writer(fast.clone(), &mut f.writers);
    assert_eq!(
      f.discovery.automatic_assertion_period(),
      Some(Duration::from_millis(700))
    );

    let wlp_changes = |f: &Fixture| -> Vec<(i64, ParticipantMessageData)> {
      f.writers[&EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER]
        .history()
        .iter()
        .map(|c| {
          (
            i64::from(c.sequence_number),
            ParticipantMessageData::from_cdr_bytes(&c.data_value).unwrap(),
          )
        })
        .collect()
    };
    f.clock.advance(Duration::from_millis(700));
    f.run_timers();
    f.clock.advance(Duration::from_millis(700));
    f.run_timers();
    // one instance per kind, the latest assertion kept
    assert_eq!(
      wlp_changes(&f),
      vec![(
        2,
        ParticipantMessageData::liveliness(
          GuidPrefix::new([0xAA; 12]),
          ParticipantMessageKind::AUTOMATIC_LIVELINESS_UPDATE
        )
      )]
    );

    f.discovery.remove_local_writer(fast.writer_guid, &mut f.writers);
    assert_eq!(
      f.discovery.automatic_assertion_period(),
      Some(Duration::from_secs(7))
    );
    f.discovery.remove_local_writer(slow.writer_guid, &mut f.writers);
    assert_eq!(f.discovery.automatic_assertion_period(), None);
    f.clock.advance(Duration::from_secs(30));
    f.run_timers();
    assert_eq!(wlp_changes(&f)[0].0, 2);
  }

  #[test]
  fn silent_participant_is_dropped() {
    let mut f = fixture();
    f.discovery.start(&mut f.writers);
    f.receive(&Bytes::from_static(&FASTRTPS_SPDP));
    let prefix = fastrtps_prefix();
    let _ = f.status.try_recv_status();

    f.clock.advance(Duration::from_secs(15));
    f.receive(&Bytes::from_static(&FASTRTPS_SPDP));
    f.run_timers();
    assert!(f.discovery.participant_state(prefix).is_some());

    f.clock.advance(Duration::from_secs(21));
    f.run_timers();
    assert_eq!(f.discovery.participant_state(prefix), None);
    assert!(f.writers[&EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER]
      .matched_readers()
      .is_empty());
    assert_eq!(
      f.status.try_recv_status(),
      Some(DomainParticipantStatus::ParticipantLost {
        guid_prefix: prefix,
        state: ParticipantState::Dropped,
      })
    );

    // It comes back with the very same announcement.
    f.receive(&Bytes::from_static(&FASTRTPS_SPDP));
    assert_eq!(
      f.discovery.participant_state(prefix),
      Some(ParticipantState::Discovered)
    );
  }
}
