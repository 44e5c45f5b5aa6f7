use std::{
  collections::HashMap,
  net::{IpAddr, Ipv4Addr},
  sync::{mpsc, Arc, Mutex},
  thread,
};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::Token;
use mio_extras::channel as mio_channel;

use crate::{
  dds::{
    qos::QosPolicies,
    result::{Error, Result, WriteError, WriteResult},
    serialization::{key_hash_fn, Sample, TypeSupport},
    statusevents::{
      status_channel, DataReaderStatus, DataWriterStatus, DomainParticipantStatus, StatusReceiver,
    },
  },
  history::reader_history::ReaderHistory,
  log_and_err_internal, log_and_err_precondition_not_met,
  network::{constant::*, udp_listener::UDPListener},
  rtps::{
    dp_event_loop::{DPEventLoop, EventLoopCommand, ParticipantCommand, ParticipantIngredients},
    participant::{ParticipantConfig, ParticipantLocators},
    persistence::PersistenceService,
    reader::KeyHashFn,
  },
  structure::{
    cache_change::ChangeKind,
    guid::{EntityId, GuidPrefix, GUID},
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// A user writer created through [`DomainParticipant::create_writer`].
pub struct WriterHandle {
  pub guid: GUID,
  pub status: StatusReceiver<DataWriterStatus>,
}

/// A user reader created through [`DomainParticipant::create_reader`].
///
/// The history is shared with the event loop, which adds received changes
/// to it.
pub struct ReaderHandle {
  pub guid: GUID,
  pub history: Arc<Mutex<ReaderHistory>>,
  pub status: StatusReceiver<DataReaderStatus>,
  /// Readable whenever new data has been added to the history.
  pub data_available: mio_channel::Receiver<()>,
}

impl ReaderHandle {
  /// Removes and decodes every available sample.
  pub fn take<D, SA: TypeSupport<D>>(&self) -> Result<Vec<Result<Sample<D>>>> {
    while self.data_available.try_recv().is_ok() {}
    let changes = self.history.lock()?.take_all();
    Ok(changes.iter().map(Sample::from_change::<SA>).collect())
  }
}

/// A participant running in its own event loop thread, over UDP.
///
/// Dropping it disposes the participant in SPDP and stops the thread.
pub struct DomainParticipant {
  guid_prefix: GuidPrefix,
  domain_id: u16,
  participant_id: u16,
  command_sender: mio_channel::SyncSender<ParticipantCommand>,
  stop_poll_sender: mio_channel::Sender<EventLoopCommand>,
  ev_loop_handle: Option<thread::JoinHandle<()>>,
  status_receiver: StatusReceiver<DomainParticipantStatus>,
}

impl DomainParticipant {
  pub fn new(domain_id: u16) -> Result<Self> {
    Self::with_config(ParticipantConfig {
      domain_id,
      ..ParticipantConfig::default()
    })
  }

  pub fn with_config(config: ParticipantConfig) -> Result<Self> {
    Self::build(config, None)
  }

  /// Participant whose TRANSIENT and PERSISTENT endpoints keep their state
  /// in `service`.
  pub fn with_persistence(
    config: ParticipantConfig,
    service: Arc<dyn PersistenceService>,
  ) -> Result<Self> {
    Self::build(config, Some(service))
  }

  fn build(
    mut config: ParticipantConfig,
    persistence: Option<Arc<dyn PersistenceService>>,
  ) -> Result<Self> {
    let domain_id = config.domain_id;
    if domain_id > MAX_DOMAIN_ID {
      return Error::bad_parameter("Domain id too large for the RTPS port mapping");
    }
    let guid_prefix = GuidPrefix::random_for_this_participant();
    let mut listeners = HashMap::new();

    // Multicast listeners are shared by all participants of the host.
    let group = Ipv4Addr::from(SPDP_MULTICAST_ADDRESS);
    match UDPListener::new_multicast(
      DISCOVERY_MUL_LISTENER_TOKEN,
      group,
      spdp_well_known_multicast_port(domain_id),
    ) {
      Ok(l) => {
        listeners.insert(DISCOVERY_MUL_LISTENER_TOKEN, l);
      }
      Err(e) => warn!("Cannot listen to SPDP multicast: {:?}", e),
    }
    match UDPListener::new_multicast(
      USER_TRAFFIC_MUL_LISTENER_TOKEN,
      group,
      user_traffic_multicast_port(domain_id),
    ) {
      Ok(l) => {
        listeners.insert(USER_TRAFFIC_MUL_LISTENER_TOKEN, l);
      }
      Err(e) => warn!("Cannot listen to user traffic multicast: {:?}", e),
    }

    // The first participant id whose unicast ports are free.
    let mut participant_id = config.participant_id;
    let (discovery_listener, user_listener) = loop {
      if participant_id > max_participant_id(domain_id) {
        return Err(Error::OutOfResources);
      }
      let discovery = bind_unicast(
        DISCOVERY_LISTENER_TOKEN,
        spdp_well_known_unicast_port(domain_id, participant_id),
      );
      let user = bind_unicast(
        USER_TRAFFIC_LISTENER_TOKEN,
        user_traffic_unicast_port(domain_id, participant_id),
      );
      match (discovery, user) {
        (Ok(d), Ok(u)) => break (d, u),
        _ => {
          debug!("Participant id {} is taken", participant_id);
          participant_id += 1;
        }
      }
    };
    listeners.insert(DISCOVERY_LISTENER_TOKEN, discovery_listener);
    listeners.insert(USER_TRAFFIC_LISTENER_TOKEN, user_listener);
    config.participant_id = participant_id;
    info!(
      "Participant {:?} in domain {} with participant id {}",
      guid_prefix, domain_id, participant_id
    );

    let (status_sender, status_receiver) = status_channel();
    let ingredients = ParticipantIngredients {
      locators: ParticipantLocators::udp(domain_id, participant_id),
      config,
      guid_prefix,
      status_sender,
      persistence,
    };
    let (command_sender, command_receiver) = mio_channel::sync_channel(64);
    let (stop_poll_sender, stop_poll_receiver) = mio_channel::channel();
    let (ready_sender, ready_receiver) = mpsc::sync_channel(1);

    let ev_loop_handle = thread::Builder::new()
      .name(format!("RTPS participant {}", participant_id))
      .spawn(move || {
        match DPEventLoop::new(ingredients, listeners, command_receiver, stop_poll_receiver) {
          Ok(ev_loop) => {
            let _ = ready_sender.send(Ok(()));
            ev_loop.event_loop();
          }
          Err(e) => {
            let _ = ready_sender.send(Err(e));
          }
        }
      })?;
    match ready_receiver.recv() {
      Ok(Ok(())) => {}
      Ok(Err(e)) => return Err(Error::Io(e)),
      Err(_) => {
        return Err(Error::Internal {
          reason: "Event loop thread died while starting".to_string(),
        })
      }
    }

    Ok(Self {
      guid_prefix,
      domain_id,
      participant_id,
      command_sender,
      stop_poll_sender,
      ev_loop_handle: Some(ev_loop_handle),
      status_receiver,
    })
  }

  pub fn guid(&self) -> GUID {
    GUID::new(self.guid_prefix, EntityId::PARTICIPANT)
  }

  pub fn domain_id(&self) -> u16 {
    self.domain_id
  }

  pub fn participant_id(&self) -> u16 {
    self.participant_id
  }

  /// Discovered and lost remote participants.
  pub fn status_listener(&self) -> &StatusReceiver<DomainParticipantStatus> {
    &self.status_receiver
  }

  fn request<T>(&self, make: impl FnOnce(mpsc::SyncSender<T>) -> ParticipantCommand) -> Result<T> {
    let (reply, result) = mpsc::sync_channel(1);
    if self.command_sender.send(make(reply)).is_err() {
      return log_and_err_internal!("Cannot send command to event loop");
    }
    match result.recv() {
      Ok(r) => Ok(r),
      Err(e) => log_and_err_internal!("Event loop did not reply: {:?}", e),
    }
  }

  pub fn create_writer(
    &self,
    topic_name: &str,
    type_name: &str,
    qos: &QosPolicies,
    with_key: bool,
  ) -> Result<WriterHandle> {
    let (status_sender, status) = status_channel();
    let guid = self.request(|reply| ParticipantCommand::AddWriter {
      topic_name: topic_name.to_string(),
      type_name: type_name.to_string(),
      qos: qos.clone(),
      with_key,
      status_sender,
      reply,
    })??;
    Ok(WriterHandle { guid, status })
  }

  pub fn create_reader(
    &self,
    topic_name: &str,
    type_name: &str,
    qos: &QosPolicies,
    with_key: bool,
  ) -> Result<ReaderHandle> {
    self.add_reader(topic_name, type_name, qos, with_key, None)
  }

  /// Reader of a keyed type. Instances of samples that arrive without
  /// PID_KEY_HASH are found by decoding them with `SA`.
  pub fn create_keyed_reader<D: 'static, SA: TypeSupport<D> + 'static>(
    &self,
    topic_name: &str,
    type_name: &str,
    qos: &QosPolicies,
  ) -> Result<ReaderHandle> {
    self.add_reader(topic_name, type_name, qos, true, Some(key_hash_fn::<D, SA>()))
  }

  fn add_reader(
    &self,
    topic_name: &str,
    type_name: &str,
    qos: &QosPolicies,
    with_key: bool,
    key_hash: Option<KeyHashFn>,
  ) -> Result<ReaderHandle> {
    let (status_sender, status) = status_channel();
    let (notification_sender, data_available) = mio_channel::sync_channel(1);
    let (guid, history) = self.request(|reply| ParticipantCommand::AddReader {
      topic_name: topic_name.to_string(),
      type_name: type_name.to_string(),
      qos: qos.clone(),
      with_key,
      key_hash,
      notification_sender: Some(notification_sender),
      status_sender,
      reply,
    })??;
    Ok(ReaderHandle {
      guid,
      history,
      status,
      data_available,
    })
  }

  pub fn delete_writer(&self, writer: WriterHandle) -> Result<()> {
    self.request(|reply| ParticipantCommand::RemoveWriter {
      guid: writer.guid,
      reply,
    })?
  }

  pub fn delete_reader(&self, reader: ReaderHandle) -> Result<()> {
    self.request(|reply| ParticipantCommand::RemoveReader {
      guid: reader.guid,
      reply,
    })?
  }

  /// Writes an already serialized sample.
  pub fn write_bytes(
    &self,
    writer: &WriterHandle,
    kind: ChangeKind,
    instance_handle: crate::structure::instance_handle::InstanceHandle,
    payload: Bytes,
    source_timestamp: Option<Timestamp>,
  ) -> WriteResult<SequenceNumber, Bytes> {
    self
      .request(|reply| ParticipantCommand::Write {
        writer: writer.guid.entity_id,
        kind,
        instance_handle,
        payload,
        source_timestamp,
        reply,
      })
      .map_err(WriteError::Dds)?
  }

  /// Serializes and writes a sample. On failure the sample is handed back.
  pub fn write<D, SA: TypeSupport<D>>(
    &self,
    writer: &WriterHandle,
    data: D,
    source_timestamp: Option<Timestamp>,
  ) -> WriteResult<SequenceNumber, D> {
    let payload = match SA::serialize(&data) {
      Ok(p) => p,
      Err(e) => {
        return Err(WriteError::Serialization {
          reason: e.to_string(),
          data,
        })
      }
    };
    let instance_handle = SA::key_hash(&data).unwrap_or_default();
    self
      .write_bytes(
        writer,
        ChangeKind::Alive,
        instance_handle,
        payload,
        source_timestamp,
      )
      .map_err(|e| match e {
        WriteError::WouldBlock { .. } => WriteError::WouldBlock { data },
        WriteError::Serialization { reason, .. } => WriteError::Serialization { reason, data },
        WriteError::Poisoned { reason, .. } => WriteError::Poisoned { reason, data },
        WriteError::Dds(e) => WriteError::Dds(e),
      })
  }

  /// Disposes the instance of `data`.
  pub fn dispose<D, SA: TypeSupport<D>>(
    &self,
    writer: &WriterHandle,
    data: &D,
    source_timestamp: Option<Timestamp>,
  ) -> Result<SequenceNumber> {
    let instance_handle = match SA::key_hash(data) {
      Some(h) => h,
      None => return log_and_err_precondition_not_met!("Dispose needs a keyed type"),
    };
    self
      .write_bytes(
        writer,
        ChangeKind::NotAliveDisposed,
        instance_handle,
        Bytes::new(),
        source_timestamp,
      )
      .map_err(|e| match e {
        WriteError::Dds(e) => e,
        WriteError::WouldBlock { .. } => Error::OutOfResources,
        other => Error::Internal {
          reason: other.to_string(),
        },
      })
  }

  pub fn assert_liveliness(&self, writer: &WriterHandle) -> Result<()> {
    match self
      .command_sender
      .send(ParticipantCommand::AssertLiveliness {
        writer: writer.guid.entity_id,
      }) {
      Ok(()) => Ok(()),
      Err(_) => log_and_err_internal!("Cannot send command to event loop"),
    }
  }

  /// Asserts liveliness of all MANUAL_BY_PARTICIPANT writers of this
  /// participant.
  pub fn assert_participant_liveliness(&self) -> Result<()> {
    match self
      .command_sender
      .send(ParticipantCommand::AssertParticipantLiveliness)
    {
      Ok(()) => Ok(()),
      Err(_) => log_and_err_internal!("Cannot send command to event loop"),
    }
  }
}

fn bind_unicast(token: Token, port: u16) -> std::io::Result<UDPListener> {
  UDPListener::try_bind(token, IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

impl Drop for DomainParticipant {
  fn drop(&mut self) {
    debug!("Dropping DomainParticipant {:?}", self.guid_prefix);
    if let Err(e) = self.stop_poll_sender.send(EventLoopCommand::PrepareStop) {
      error!("Failed to send PrepareStop to event loop: {:?}", e);
    }
    if let Err(e) = self.stop_poll_sender.send(EventLoopCommand::Stop) {
      error!("Failed to send Stop to event loop: {:?}", e);
    }
    if let Some(handle) = self.ev_loop_handle.take() {
      if handle.join().is_err() {
        error!("Event loop thread panicked");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::{Duration, Instant};

  use speedy::{Readable, Writable};

  use super::*;
  use crate::{
    dds::{
      qos::policy::{Durability, History, Reliability},
      serialization::{Keyed, SpeedyCdrWithKey},
    },
    structure::duration::Duration as DdsDuration,
  };

  #[derive(Debug, Clone, PartialEq, Readable, Writable)]
  struct Shape {
    id: u32,
    x: i32,
  }

  impl Keyed for Shape {
    type K = u32;
    fn key(&self) -> u32 {
      self.id
    }
  }

  fn qos() -> QosPolicies {
    QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: DdsDuration::from_millis(100),
      })
      .durability(Durability::TransientLocal)
      .history(History::KeepLast { depth: 5 })
      .build()
  }

  // Uses real sockets on the loopback and the SPDP multicast group.
  #[test]
  #[ignore]
  fn two_participants_over_udp() {
    let _ = env_logger::try_init();
    let domain_id = 17;
    let p1 = DomainParticipant::new(domain_id).unwrap();
    let p2 = DomainParticipant::new(domain_id).unwrap();
    assert_ne!(p1.participant_id(), p2.participant_id());

    let writer = p1.create_writer("Square", "Shape", &qos(), true).unwrap();
    let reader = p2
      .create_keyed_reader::<Shape, SpeedyCdrWithKey<Shape>>("Square", "Shape", &qos())
      .unwrap();
    p1.write::<Shape, SpeedyCdrWithKey<Shape>>(&writer, Shape { id: 1, x: 5 }, None)
      .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received = Vec::new();
    while received.is_empty() && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(100));
      received = reader.take::<Shape, SpeedyCdrWithKey<Shape>>().unwrap();
    }
    assert_eq!(received.len(), 1);
    let sample = received.remove(0).unwrap();
    assert_eq!(sample.value, Some(Shape { id: 1, x: 5 }));
    assert_eq!(sample.writer_guid, writer.guid);
  }

  #[test]
  fn oversized_domain_is_rejected() {
    assert!(matches!(
      DomainParticipant::new(MAX_DOMAIN_ID + 1),
      Err(Error::BadParameter { .. })
    ));
  }
}
