use std::{
  collections::BTreeMap,
  rc::Rc,
  sync::{Arc, Mutex},
  time::{Duration, Instant},
};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
  dds::{
    qos::{policy::Liveliness, QosPolicies},
    result::{Error, Result, WriteError, WriteResult},
    statusevents::{DomainParticipantStatus, StatusChannelSender},
  },
  discovery::{
    discovery::Discovery,
    endpoint_proxy_data::{ReaderProxyData, WriterProxyData},
    participant_message::ParticipantMessageKind,
    participant_proxy_data::ParticipantProxyData,
  },
  history::{change_pool::CacheChangePool, reader_history::ReaderHistory, writer_history::AddChangeError},
  network::{
    constant::{
      spdp_well_known_multicast_port, spdp_well_known_unicast_port, user_traffic_multicast_port,
      user_traffic_unicast_port,
    },
    transport::Transport,
    util::{get_local_multicast_locators, get_local_unicast_locators},
  },
  rtps::{
    constant::{
      PARTICIPANT_LEASE_DURATION, SPDP_ANNOUNCEMENT_PERIOD, SPDP_INITIAL_ANNOUNCEMENT_COUNT,
      SPDP_INITIAL_ANNOUNCEMENT_PERIOD,
    },
    context::{ParticipantContext, DEFAULT_MTU},
    message_receiver::MessageReceiver,
    persistence::PersistenceService,
    reader::{Reader, ReaderIngredients, ReaderTimes},
    timed_event::{Clock, TimedEvent, TimerTarget},
    writer::{Writer, WriterIngredients, WriterTimes},
  },
  structure::{
    cache_change::ChangeKind,
    entity::RTPSEntity,
    guid::{EntityId, EntityKind, GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    locator::Locator,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// How often remote participant leases are checked.
pub const PARTICIPANT_CLEANUP_PERIOD: Duration = Duration::from_secs(2);

/// SPDP announcements sent right after start, before settling to the
/// regular announcement period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialAnnouncements {
  pub count: u32,
  pub period: Duration,
}

impl Default for InitialAnnouncements {
  fn default() -> Self {
    Self {
      count: SPDP_INITIAL_ANNOUNCEMENT_COUNT,
      period: SPDP_INITIAL_ANNOUNCEMENT_PERIOD,
    }
  }
}

/// Participant wide settings. Missing fields take their defaults when
/// deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
  pub domain_id: u16,
  pub participant_id: u16,
  /// How long remote participants consider us alive without hearing from us.
  pub lease_duration: Duration,
  pub announcement_period: Duration,
  pub initial_announcements: InitialAnnouncements,
  /// Period of the remote participant lease check.
  pub lease_check_period: Duration,
  pub builtin_writer_times: WriterTimes,
  pub builtin_reader_times: ReaderTimes,
  /// Defaults for user endpoints.
  pub writer_times: WriterTimes,
  pub reader_times: ReaderTimes,
  pub mtu: usize,
  /// Largest serialized payload accepted by user endpoint histories.
  /// 0 means unlimited.
  pub payload_max_size: usize,
  /// Largest number of changes in one user endpoint history. 0 means
  /// unlimited.
  pub change_pool_max_size: usize,
  pub entity_name: Option<String>,
}

impl Default for ParticipantConfig {
  fn default() -> Self {
    Self {
      domain_id: 0,
      participant_id: 0,
      lease_duration: PARTICIPANT_LEASE_DURATION,
      announcement_period: SPDP_ANNOUNCEMENT_PERIOD,
      initial_announcements: InitialAnnouncements::default(),
      lease_check_period: PARTICIPANT_CLEANUP_PERIOD,
      builtin_writer_times: WriterTimes::sedp(),
      builtin_reader_times: ReaderTimes::sedp(),
      writer_times: WriterTimes::default(),
      reader_times: ReaderTimes::default(),
      mtu: DEFAULT_MTU,
      payload_max_size: 0,
      change_pool_max_size: 0,
      entity_name: None,
    }
  }
}

/// Where a participant listens. Announced in SPDP.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantLocators {
  pub metatraffic_unicast: Vec<Locator>,
  pub metatraffic_multicast: Vec<Locator>,
  pub default_unicast: Vec<Locator>,
  pub default_multicast: Vec<Locator>,
}

impl ParticipantLocators {
  /// Standard UDP port mapping on every local interface.
  pub fn udp(domain_id: u16, participant_id: u16) -> Self {
    Self {
      metatraffic_unicast: get_local_unicast_locators(spdp_well_known_unicast_port(
        domain_id,
        participant_id,
      )),
      metatraffic_multicast: get_local_multicast_locators(spdp_well_known_multicast_port(domain_id)),
      default_unicast: get_local_unicast_locators(user_traffic_unicast_port(
        domain_id,
        participant_id,
      )),
      default_multicast: get_local_multicast_locators(user_traffic_multicast_port(domain_id)),
    }
  }

  pub fn listens_on(&self, locator: &Locator) -> bool {
    self
      .metatraffic_unicast
      .iter()
      .chain(&self.metatraffic_multicast)
      .chain(&self.default_unicast)
      .chain(&self.default_multicast)
      .any(|l| l == locator)
  }
}

/// The RTPS participant: owns all local writers and readers, the message
/// receiver and discovery, and drives them.
///
/// It does no I/O of its own except sending through the transport.
/// Whoever owns it feeds received datagrams to
/// [`handle_received_packet`](Self::handle_received_packet) and calls
/// [`handle_timers`](Self::handle_timers) at
/// [`next_timer_deadline`](Self::next_timer_deadline).
pub struct RtpsParticipant {
  ctx: ParticipantContext,
  config: ParticipantConfig,
  locators: ParticipantLocators,
  writers: BTreeMap<EntityId, Writer>,
  message_receiver: MessageReceiver,
  discovery: Discovery,
  entity_id_counter: u32,
  persistence: Option<Arc<dyn PersistenceService>>,
  stopped: bool,
}

impl RtpsParticipant {
  pub fn new(
    config: ParticipantConfig,
    guid_prefix: GuidPrefix,
    clock: Rc<dyn Clock>,
    transport: Rc<dyn Transport>,
    locators: ParticipantLocators,
    status_sender: StatusChannelSender<DomainParticipantStatus>,
  ) -> Self {
    let ctx = ParticipantContext::new(guid_prefix, clock, transport).with_mtu(config.mtu);

    let mut local_data = ParticipantProxyData::new(guid_prefix, config.lease_duration);
    local_data.metatraffic_unicast_locators = locators.metatraffic_unicast.clone();
    local_data.metatraffic_multicast_locators = locators.metatraffic_multicast.clone();
    local_data.default_unicast_locators = locators.default_unicast.clone();
    local_data.default_multicast_locators = locators.default_multicast.clone();
    local_data.entity_name = config.entity_name.clone();

    let discovery = Discovery::new(ctx.clone(), &config, local_data, status_sender);
    let mut writers = BTreeMap::new();
    for w in discovery.create_builtin_writers() {
      writers.insert(w.guid().entity_id, w);
    }
    let mut message_receiver = MessageReceiver::new(guid_prefix);
    for r in discovery.create_builtin_readers() {
      message_receiver.add_reader(r);
    }
    info!("New participant {:?}", guid_prefix);

    Self {
      ctx,
      config,
      locators,
      writers,
      message_receiver,
      discovery,
      entity_id_counter: 0,
      persistence: None,
      stopped: false,
    }
  }

  /// Storage for TRANSIENT and PERSISTENT endpoints created after this.
  pub fn set_persistence_service(&mut self, service: Arc<dyn PersistenceService>) {
    self.persistence = Some(service);
  }

  /// Sends the first SPDP announcement and starts the discovery timers.
  pub fn start(&mut self) {
    self.discovery.start(&mut self.writers);
  }

  pub fn config(&self) -> &ParticipantConfig {
    &self.config
  }

  pub fn locators(&self) -> &ParticipantLocators {
    &self.locators
  }

  pub fn discovery(&self) -> &Discovery {
    &self.discovery
  }

  pub fn now(&self) -> Instant {
    self.ctx.now()
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped
  }

  // -----------------------------------------------------------------------
  // Driving

  /// Processes one datagram received from the network.
  pub fn handle_received_packet(&mut self, bytes: &Bytes) {
    if self.stopped {
      return;
    }
    let output = self.message_receiver.handle_received_packet(bytes);
    for received in output.acknacks {
      let writer_id = received.acknack.writer_id;
      match self.writers.get_mut(&writer_id) {
        Some(writer) => writer.handle_ack_nack(
          received.reader_guid_prefix,
          &received.acknack,
          received.final_flag,
        ),
        None => debug!(
          "ACKNACK for unknown writer {:?} from {:?}",
          writer_id, received.reader_guid_prefix
        ),
      }
    }
    for received in output.nack_frags {
      let writer_id = received.nack_frag.writer_id;
      match self.writers.get_mut(&writer_id) {
        Some(writer) => writer.handle_nack_frag(received.reader_guid_prefix, &received.nack_frag),
        None => debug!(
          "NACK_FRAG for unknown writer {:?} from {:?}",
          writer_id, received.reader_guid_prefix
        ),
      }
    }
    for prefix in output.spdp_liveness {
      self.discovery.participant_is_alive(prefix);
    }
    self
      .discovery
      .process_builtin_readers(&mut self.writers, &mut self.message_receiver);
  }

  pub fn next_timer_deadline(&self) -> Option<Instant> {
    self.ctx.timers.next_deadline()
  }

  /// Dispatches every timer that has expired by now, one at a time.
  pub fn handle_timers(&mut self) {
    while let Some((target, event)) = self.ctx.timers.pop_expired(self.ctx.now()) {
      self.dispatch_timed_event(target, event);
    }
  }

  fn dispatch_timed_event(&mut self, target: TimerTarget, event: TimedEvent) {
    match target {
      TimerTarget::Participant => {
        self
          .discovery
          .handle_timed_event(event, &mut self.writers, &mut self.message_receiver)
      }
      TimerTarget::Writer(entity_id) => match self.writers.get_mut(&entity_id) {
        Some(writer) => writer.handle_timed_event(event),
        None => error!("Timed event {:?} for unknown writer {:?}", event, entity_id),
      },
      TimerTarget::Reader(entity_id) => match self.message_receiver.reader_mut(entity_id) {
        Some(reader) => reader.handle_timed_event(event),
        None => error!("Timed event {:?} for unknown reader {:?}", event, entity_id),
      },
    }
  }

  // -----------------------------------------------------------------------
  // Local endpoints

  fn next_entity_id(&mut self, kind: EntityKind) -> EntityId {
    self.entity_id_counter += 1;
    let [_, b1, b2, b3] = self.entity_id_counter.to_be_bytes();
    EntityId::new([b1, b2, b3], kind)
  }

  fn pool(&self) -> CacheChangePool {
    CacheChangePool::new(self.config.change_pool_max_size, self.config.payload_max_size)
  }

  /// Ingredients of a new user writer, with a fresh GUID and the configured
  /// timing and resource limits. Adjust before [`add_writer`](Self::add_writer).
  pub fn writer_ingredients(
    &mut self,
    topic_name: &str,
    qos: QosPolicies,
    with_key: bool,
  ) -> WriterIngredients {
    let kind = if with_key {
      EntityKind::WRITER_WITH_KEY_USER_DEFINED
    } else {
      EntityKind::WRITER_NO_KEY_USER_DEFINED
    };
    let guid = GUID::new(self.ctx.guid_prefix, self.next_entity_id(kind));
    let mut i = WriterIngredients::new(guid, topic_name, qos);
    i.times = self.config.writer_times;
    i.pool = self.pool();
    i.persistence = self.persistence.clone();
    i
  }

  /// Ingredients of a new user reader. See
  /// [`writer_ingredients`](Self::writer_ingredients).
  pub fn reader_ingredients(
    &mut self,
    topic_name: &str,
    qos: QosPolicies,
    with_key: bool,
  ) -> ReaderIngredients {
    let kind = if with_key {
      EntityKind::READER_WITH_KEY_USER_DEFINED
    } else {
      EntityKind::READER_NO_KEY_USER_DEFINED
    };
    let guid = GUID::new(self.ctx.guid_prefix, self.next_entity_id(kind));
    let mut i = ReaderIngredients::new(guid, topic_name, qos);
    i.times = self.config.reader_times;
    i.history = Arc::new(Mutex::new(ReaderHistory::new(
      &i.qos_policies,
      self.pool(),
    )));
    i.persistence = self.persistence.clone();
    i
  }

  /// Creates a writer and announces it in SEDP.
  pub fn add_writer(&mut self, ingredients: WriterIngredients, type_name: &str) -> Result<GUID> {
    let guid = ingredients.guid;
    if guid.prefix != self.ctx.guid_prefix || !guid.entity_id.kind().is_writer() {
      return Error::bad_parameter("Writer GUID does not belong to this participant");
    }
    if self.writers.contains_key(&guid.entity_id) {
      return Error::precondition_not_met("Writer already exists");
    }
    let data = WriterProxyData::new(
      guid,
      &ingredients.topic_name,
      type_name,
      ingredients.qos_policies.clone(),
    );
    let writer = Writer::new(ingredients, self.ctx.clone());
    debug!("Add writer {:?} topic={:?}", guid, writer.topic_name());
    self.writers.insert(guid.entity_id, writer);
    self.discovery.add_local_writer(data, &mut self.writers);
    Ok(guid)
  }

  /// Creates a reader and announces it in SEDP.
  pub fn add_reader(&mut self, ingredients: ReaderIngredients, type_name: &str) -> Result<GUID> {
    let guid = ingredients.guid;
    if guid.prefix != self.ctx.guid_prefix || !guid.entity_id.kind().is_reader() {
      return Error::bad_parameter("Reader GUID does not belong to this participant");
    }
    if self.message_receiver.reader(guid.entity_id).is_some() {
      return Error::precondition_not_met("Reader already exists");
    }
    let data = ReaderProxyData::new(
      guid,
      &ingredients.topic_name,
      type_name,
      ingredients.qos_policies.clone(),
    );
    let reader = Reader::new(ingredients, self.ctx.clone());
    debug!("Add reader {:?} topic={:?}", guid, reader.topic_name());
    self.message_receiver.add_reader(reader);
    self
      .discovery
      .add_local_reader(data, &mut self.writers, &mut self.message_receiver);
    Ok(guid)
  }

  /// Disposes the writer in SEDP, cancels its timers and drops it.
  pub fn remove_writer(&mut self, guid: GUID) -> Result<()> {
    if guid.entity_id.kind().is_built_in() {
      return Error::bad_parameter("Builtin writers cannot be removed");
    }
    match self.writers.remove(&guid.entity_id) {
      Some(mut writer) => {
        writer.cancel_timers();
        self.discovery.remove_local_writer(guid, &mut self.writers);
        debug!("Removed writer {:?}", guid);
        Ok(())
      }
      None => Error::bad_parameter("No such writer"),
    }
  }

  /// Disposes the reader in SEDP, cancels its timers and drops it.
  pub fn remove_reader(&mut self, guid: GUID) -> Result<()> {
    if guid.entity_id.kind().is_built_in() {
      return Error::bad_parameter("Builtin readers cannot be removed");
    }
    match self.message_receiver.remove_reader(guid) {
      Some(mut reader) => {
        reader.cancel_timers();
        self.discovery.remove_local_reader(guid, &mut self.writers);
        debug!("Removed reader {:?}", guid);
        Ok(())
      }
      None => Error::bad_parameter("No such reader"),
    }
  }

  /// Writes a sample. A full history hands the payload back in
  /// `WriteError::WouldBlock`.
  pub fn write(
    &mut self,
    writer: EntityId,
    kind: ChangeKind,
    instance_handle: InstanceHandle,
    payload: Bytes,
    source_timestamp: Option<Timestamp>,
  ) -> WriteResult<SequenceNumber, Bytes> {
    let w = match self.writers.get_mut(&writer) {
      Some(w) if !writer.kind().is_built_in() => w,
      _ => {
        return Err(WriteError::Dds(Error::BadParameter {
          reason: format!("No such writer {:?}", writer),
        }))
      }
    };
    match w.new_change(kind, instance_handle, payload.clone(), source_timestamp) {
      Ok(sn) => Ok(sn),
      Err(AddChangeError::WouldBlock) => Err(WriteError::WouldBlock { data: payload }),
      Err(AddChangeError::OutOfResources) => Err(WriteError::Dds(Error::OutOfResources)),
    }
  }

  /// Manual liveliness assertion of a writer. Asserting a
  /// MANUAL_BY_PARTICIPANT writer asserts the whole participant.
  pub fn assert_liveliness(&mut self, writer: EntityId) -> Result<()> {
    let by_participant = match self.writers.get(&writer) {
      Some(w) => is_manual_by_participant(w),
      None => return Error::bad_parameter("No such writer"),
    };
    if by_participant {
      self.assert_participant_liveliness();
    } else if let Some(w) = self.writers.get_mut(&writer) {
      w.assert_liveliness();
    }
    Ok(())
  }

  /// Renews the lease of every MANUAL_BY_PARTICIPANT writer and tells the
  /// remote readers with one participant message.
  pub fn assert_participant_liveliness(&mut self) {
    for w in self.writers.values_mut() {
      if is_manual_by_participant(w) {
        w.liveliness_asserted();
      }
    }
    self.discovery.write_liveliness(
      &mut self.writers,
      ParticipantMessageKind::MANUAL_LIVELINESS_UPDATE,
    );
  }

  pub fn writer(&self, entity_id: EntityId) -> Option<&Writer> {
    self.writers.get(&entity_id)
  }

  pub fn reader(&self, entity_id: EntityId) -> Option<&Reader> {
    self.message_receiver.reader(entity_id)
  }

  // -----------------------------------------------------------------------
  // Teardown

  /// Announces our departure, then cancels every timer. Received packets
  /// and timers are ignored afterwards.
  pub fn stop(&mut self) {
    if self.stopped {
      return;
    }
    info!("Stopping participant {:?}", self.ctx.guid_prefix);
    let local_writers: Vec<GUID> = self
      .writers
      .values()
      .map(RTPSEntity::guid)
      .filter(|g| g.entity_id.kind().is_user_defined())
      .collect();
    for guid in local_writers {
      let _ = self.remove_writer(guid);
    }
    let local_readers: Vec<GUID> = self
      .message_receiver
      .available_readers
      .values()
      .map(RTPSEntity::guid)
      .filter(|g| g.entity_id.kind().is_user_defined())
      .collect();
    for guid in local_readers {
      let _ = self.remove_reader(guid);
    }
    self.discovery.dispose_participant(&mut self.writers);
    for writer in self.writers.values_mut() {
      writer.cancel_timers();
    }
    for reader in self.message_receiver.readers_mut() {
      reader.cancel_timers();
    }
    self.ctx.timers.cancel_all(TimerTarget::Participant);
    self.stopped = true;
  }
}

fn is_manual_by_participant(writer: &Writer) -> bool {
  matches!(
    writer.qos().liveliness(),
    Some(Liveliness::ManualByParticipant { .. })
  )
}

impl RTPSEntity for RtpsParticipant {
  fn guid(&self) -> GUID {
    GUID::new(self.ctx.guid_prefix, EntityId::PARTICIPANT)
  }
}

#[cfg(test)]
mod tests {
  use std::net::SocketAddr;

  use super::*;
  use crate::{
    dds::{
      qos::policy::{Durability, History, Reliability},
      statusevents::status_channel,
    },
    network::simulated::SimulatedNetwork,
    rtps::timed_event::ManualClock,
    structure::duration::Duration as DdsDuration,
  };

  fn loc(s: &str) -> Locator {
    Locator::from(s.parse::<SocketAddr>().unwrap())
  }

  fn participant(net: &SimulatedNetwork, clock: Rc<ManualClock>, id: u8) -> RtpsParticipant {
    let locators = ParticipantLocators {
      metatraffic_unicast: vec![loc(&format!("10.0.0.{}:7410", id))],
      metatraffic_multicast: vec![loc("239.255.0.1:7400")],
      default_unicast: vec![loc(&format!("10.0.0.{}:7411", id))],
      default_multicast: vec![],
    };
    RtpsParticipant::new(
      ParticipantConfig::default(),
      GuidPrefix::new([id; 12]),
      clock,
      net.transport(),
      locators,
      StatusChannelSender::disconnected(),
    )
  }

  fn reliable_qos() -> QosPolicies {
    QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: DdsDuration::from_millis(100),
      })
      .durability(Durability::Volatile)
      .history(History::KeepLast { depth: 10 })
      .build()
  }

  #[test]
  fn config_defaults() {
    let c = ParticipantConfig::default();
    assert_eq!(c.lease_duration, Duration::from_secs(20));
    assert_eq!(c.announcement_period, Duration::from_secs(3));
    assert_eq!(c.initial_announcements.count, 5);
    assert_eq!(c.initial_announcements.period, Duration::from_millis(100));
    assert_eq!(c.mtu, 65000);
    assert_eq!(c.builtin_writer_times.heartbeat_period, Duration::from_secs(1));
  }

  #[test]
  fn entity_ids_are_unique_and_typed() {
    let net = SimulatedNetwork::new();
    let mut p = participant(&net, Rc::new(ManualClock::new()), 1);
    let w = p.writer_ingredients("t", reliable_qos(), true);
    let r = p.reader_ingredients("t", reliable_qos(), false);
    assert_ne!(w.guid.entity_id.entity_key, r.guid.entity_id.entity_key);
    assert_eq!(w.guid.entity_id.kind(), EntityKind::WRITER_WITH_KEY_USER_DEFINED);
    assert_eq!(r.guid.entity_id.kind(), EntityKind::READER_NO_KEY_USER_DEFINED);
    assert_eq!(w.guid.prefix, GuidPrefix::new([1; 12]));
  }

  #[test]
  fn add_write_remove() {
    let net = SimulatedNetwork::new();
    let mut p = participant(&net, Rc::new(ManualClock::new()), 1);
    p.start();
    let i = p.writer_ingredients("t", reliable_qos(), false);
    let guid = p.add_writer(i, "T").unwrap();
    assert!(p.writer(guid.entity_id).is_some());

    let sn = p
      .write(
        guid.entity_id,
        ChangeKind::Alive,
        InstanceHandle::default(),
        Bytes::from_static(&[0, 1, 0, 0, 7]),
        None,
      )
      .unwrap();
    assert_eq!(sn, SequenceNumber::new(1));

    p.remove_writer(guid).unwrap();
    assert!(p.writer(guid.entity_id).is_none());
    assert!(p.remove_writer(guid).is_err());
    assert!(matches!(
      p.write(
        guid.entity_id,
        ChangeKind::Alive,
        InstanceHandle::default(),
        Bytes::new(),
        None
      ),
      Err(WriteError::Dds(Error::BadParameter { .. }))
    ));
  }

  #[test]
  fn builtin_endpoints_cannot_be_removed_or_written() {
    let net = SimulatedNetwork::new();
    let mut p = participant(&net, Rc::new(ManualClock::new()), 1);
    let sedp = GUID::new(p.guid_prefix(), EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER);
    assert!(p.remove_writer(sedp).is_err());
    assert!(p
      .write(
        EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
        ChangeKind::Alive,
        InstanceHandle::default(),
        Bytes::new(),
        None
      )
      .is_err());
  }

  #[test]
  fn stop_cancels_all_timers() {
    let net = SimulatedNetwork::new();
    let clock = Rc::new(ManualClock::new());
    let mut p = participant(&net, clock.clone(), 1);
    p.start();
    let i = p.writer_ingredients("t", reliable_qos(), false);
    p.add_writer(i, "T").unwrap();
    assert!(p.next_timer_deadline().is_some());

    p.stop();
    assert!(p.is_stopped());
    assert_eq!(p.next_timer_deadline(), None);
    clock.advance(Duration::from_secs(60));
    net.clear();
    p.handle_timers();
    assert_eq!(net.in_flight(), 0);
  }

  #[test]
  fn two_participants_match_user_endpoints() {
    let net = SimulatedNetwork::new();
    let clock = Rc::new(ManualClock::new());
    let mut parts = vec![
      participant(&net, clock.clone(), 1),
      participant(&net, clock.clone(), 2),
    ];
    for p in parts.iter_mut() {
      p.start();
    }
    let wi = parts[0].writer_ingredients("Square", reliable_qos(), false);
    let writer = parts[0].add_writer(wi, "ShapeType").unwrap();
    let ri = parts[1].reader_ingredients("Square", reliable_qos(), false);
    let reader = parts[1].add_reader(ri, "ShapeType").unwrap();

    for _ in 0..200 {
      while let Some((locator, bytes)) = net.pop() {
        for p in parts.iter_mut() {
          if p.locators().listens_on(&locator) {
            p.handle_received_packet(&bytes);
          }
        }
      }
      clock.advance(Duration::from_millis(10));
      for p in parts.iter_mut() {
        p.handle_timers();
      }
    }
    assert_eq!(
      parts[0].writer(writer.entity_id).unwrap().matched_readers(),
      vec![reader]
    );
    assert_eq!(
      parts[1].reader(reader.entity_id).unwrap().matched_writers(),
      vec![writer]
    );
  }
}
