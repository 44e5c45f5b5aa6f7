use std::{
  collections::HashMap,
  rc::Rc,
  sync::{mpsc::TryRecvError, Arc, Mutex},
  time::{Duration, Instant},
};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::{Events, Poll, PollOpt, Ready, Token};
use mio_extras::channel as mio_channel;

use crate::{
  dds::{
    qos::QosPolicies,
    result::{Result, WriteResult},
    statusevents::{
      DataReaderStatus, DataWriterStatus, DomainParticipantStatus, StatusChannelSender,
    },
  },
  history::reader_history::ReaderHistory,
  network::{constant::*, udp_listener::UDPListener, udp_sender::UDPSender},
  rtps::{
    participant::{ParticipantConfig, ParticipantLocators, RtpsParticipant},
    persistence::PersistenceService,
    reader::KeyHashFn,
    timed_event::SystemClock,
  },
  structure::{
    cache_change::ChangeKind,
    guid::{EntityId, GuidPrefix, GUID},
    instance_handle::InstanceHandle,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

// Longest sleep in poll when no timer is due sooner.
const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug)]
pub(crate) enum EventLoopCommand {
  Stop,
  PrepareStop,
}

/// Reply channel of a command. The application thread blocks on it.
pub(crate) type Reply<T> = std::sync::mpsc::SyncSender<T>;

/// Requests from application threads to the event loop, which owns every
/// endpoint.
pub(crate) enum ParticipantCommand {
  AddWriter {
    topic_name: String,
    type_name: String,
    qos: QosPolicies,
    with_key: bool,
    status_sender: StatusChannelSender<DataWriterStatus>,
    reply: Reply<Result<GUID>>,
  },
  AddReader {
    topic_name: String,
    type_name: String,
    qos: QosPolicies,
    with_key: bool,
    key_hash: Option<KeyHashFn>,
    notification_sender: Option<mio_channel::SyncSender<()>>,
    status_sender: StatusChannelSender<DataReaderStatus>,
    reply: Reply<Result<(GUID, Arc<Mutex<ReaderHistory>>)>>,
  },
  RemoveWriter {
    guid: GUID,
    reply: Reply<Result<()>>,
  },
  RemoveReader {
    guid: GUID,
    reply: Reply<Result<()>>,
  },
  Write {
    writer: EntityId,
    kind: ChangeKind,
    instance_handle: InstanceHandle,
    payload: Bytes,
    source_timestamp: Option<Timestamp>,
    reply: Reply<WriteResult<SequenceNumber, Bytes>>,
  },
  AssertLiveliness {
    writer: EntityId,
  },
  AssertParticipantLiveliness,
}

/// Everything the event loop thread needs to build its participant.
/// Sendable, unlike the participant itself.
pub(crate) struct ParticipantIngredients {
  pub config: ParticipantConfig,
  pub guid_prefix: GuidPrefix,
  pub locators: ParticipantLocators,
  pub status_sender: StatusChannelSender<DomainParticipantStatus>,
  pub persistence: Option<Arc<dyn PersistenceService>>,
}

/// The thread of one participant: polls its sockets and command channels
/// and runs its timers.
pub(crate) struct DPEventLoop {
  poll: Poll,
  participant: RtpsParticipant,
  udp_listeners: HashMap<Token, UDPListener>,
  command_receiver: mio_channel::Receiver<ParticipantCommand>,
  stop_poll_receiver: mio_channel::Receiver<EventLoopCommand>,
}

impl DPEventLoop {
  // Called in the event loop thread.
  pub(crate) fn new(
    ingredients: ParticipantIngredients,
    udp_listeners: HashMap<Token, UDPListener>,
    command_receiver: mio_channel::Receiver<ParticipantCommand>,
    stop_poll_receiver: mio_channel::Receiver<EventLoopCommand>,
  ) -> std::io::Result<Self> {
    let poll = Poll::new()?;
    let mut udp_listeners = udp_listeners;
    for (token, listener) in &mut udp_listeners {
      poll.register(
        listener.mio_socket(),
        *token,
        Ready::readable(),
        PollOpt::edge(),
      )?;
    }
    poll.register(
      &command_receiver,
      PARTICIPANT_COMMAND_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    poll.register(
      &stop_poll_receiver,
      STOP_POLL_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;

    // port number 0 means OS chooses an available port number.
    let udp_sender = UDPSender::new_with_random_port()?;
    let mut participant = RtpsParticipant::new(
      ingredients.config,
      ingredients.guid_prefix,
      Rc::new(SystemClock),
      Rc::new(udp_sender),
      ingredients.locators,
      ingredients.status_sender,
    );
    if let Some(service) = ingredients.persistence {
      participant.set_persistence_service(service);
    }

    Ok(Self {
      poll,
      participant,
      udp_listeners,
      command_receiver,
      stop_poll_receiver,
    })
  }

  pub fn event_loop(self) {
    let mut events = Events::with_capacity(16); // too small capacity just delays events to next poll
    let mut ev_wrapper = self;
    let mut preparing_to_stop = false;
    ev_wrapper.participant.start();

    loop {
      let timeout = match ev_wrapper.participant.next_timer_deadline() {
        Some(deadline) => deadline
          .saturating_duration_since(Instant::now())
          .min(MAX_POLL_TIMEOUT),
        None => MAX_POLL_TIMEOUT,
      };
      if let Err(e) = ev_wrapper.poll.poll(&mut events, Some(timeout)) {
        if e.kind() == std::io::ErrorKind::Interrupted {
          continue;
        }
        error!("Failed in waiting of poll: {:?}. Stopping event loop.", e);
        ev_wrapper.participant.stop();
        return;
      }

      for event in events.iter() {
        match event.token() {
          STOP_POLL_TOKEN => loop {
            match ev_wrapper.stop_poll_receiver.try_recv() {
              Ok(EventLoopCommand::PrepareStop) => {
                info!("dp_event_loop preparing to stop.");
                preparing_to_stop = true;
              }
              Ok(EventLoopCommand::Stop) => {
                info!("Stopping dp_event_loop");
                ev_wrapper.participant.stop();
                return;
              }
              Err(TryRecvError::Empty) => break,
              Err(TryRecvError::Disconnected) => {
                error!("Application thread has exited abnormally. Stopping event loop.");
                ev_wrapper.participant.stop();
                return;
              }
            }
          },
          DISCOVERY_LISTENER_TOKEN
          | DISCOVERY_MUL_LISTENER_TOKEN
          | USER_TRAFFIC_LISTENER_TOKEN
          | USER_TRAFFIC_MUL_LISTENER_TOKEN => {
            let udp_messages = ev_wrapper
              .udp_listeners
              .get_mut(&event.token())
              .map_or_else(
                || {
                  error!("No listener with token {:?}", &event.token());
                  vec![]
                },
                UDPListener::get_messages,
              );
            for packet in udp_messages {
              ev_wrapper.participant.handle_received_packet(&packet);
            }
          }
          PARTICIPANT_COMMAND_TOKEN => {
            while let Ok(command) = ev_wrapper.command_receiver.try_recv() {
              if preparing_to_stop {
                debug!("Ignoring a command while preparing to stop.");
                continue;
              }
              ev_wrapper.handle_command(command);
            }
          }
          other => error!("Unknown event.token {:?}", other),
        }
      }

      ev_wrapper.participant.handle_timers();
    }
  }

  fn handle_command(&mut self, command: ParticipantCommand) {
    let p = &mut self.participant;
    // A reply fails only if the requester gave up waiting.
    match command {
      ParticipantCommand::AddWriter {
        topic_name,
        type_name,
        qos,
        with_key,
        status_sender,
        reply,
      } => {
        let mut i = p.writer_ingredients(&topic_name, qos, with_key);
        i.status_sender = status_sender;
        let _ = reply.send(p.add_writer(i, &type_name));
      }
      ParticipantCommand::AddReader {
        topic_name,
        type_name,
        qos,
        with_key,
        key_hash,
        notification_sender,
        status_sender,
        reply,
      } => {
        let mut i = p.reader_ingredients(&topic_name, qos, with_key);
        i.key_hash = key_hash;
        i.notification_sender = notification_sender;
        i.status_sender = status_sender;
        let history = i.history.clone();
        let _ = reply.send(p.add_reader(i, &type_name).map(|guid| (guid, history)));
      }
      ParticipantCommand::RemoveWriter { guid, reply } => {
        let _ = reply.send(p.remove_writer(guid));
      }
      ParticipantCommand::RemoveReader { guid, reply } => {
        let _ = reply.send(p.remove_reader(guid));
      }
      ParticipantCommand::Write {
        writer,
        kind,
        instance_handle,
        payload,
        source_timestamp,
        reply,
      } => {
        let _ = reply.send(p.write(writer, kind, instance_handle, payload, source_timestamp));
      }
      ParticipantCommand::AssertLiveliness { writer } => {
        if let Err(e) = p.assert_liveliness(writer) {
          warn!("assert_liveliness: {}", e);
        }
      }
      ParticipantCommand::AssertParticipantLiveliness => p.assert_participant_liveliness(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::mpsc,
    thread,
  };

  use super::*;
  use crate::{
    dds::qos::policy::Reliability,
    structure::{duration::Duration as DdsDuration, locator::Locator},
  };

  fn start_loop(
    port: u16,
  ) -> (
    mio_channel::SyncSender<ParticipantCommand>,
    mio_channel::Sender<EventLoopCommand>,
    thread::JoinHandle<()>,
  ) {
    let listener =
      UDPListener::try_bind(DISCOVERY_LISTENER_TOKEN, IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        .unwrap();
    let mut listeners = HashMap::new();
    listeners.insert(DISCOVERY_LISTENER_TOKEN, listener);
    let (command_sender, command_receiver) = mio_channel::sync_channel(10);
    let (stop_sender, stop_receiver) = mio_channel::channel();
    let ingredients = ParticipantIngredients {
      config: ParticipantConfig::default(),
      guid_prefix: GuidPrefix::new([5; 12]),
      locators: ParticipantLocators {
        metatraffic_unicast: vec![Locator::from(SocketAddr::new(
          IpAddr::V4(Ipv4Addr::LOCALHOST),
          port,
        ))],
        ..ParticipantLocators::default()
      },
      status_sender: StatusChannelSender::disconnected(),
      persistence: None,
    };
    let handle = thread::spawn(move || {
      DPEventLoop::new(ingredients, listeners, command_receiver, stop_receiver)
        .unwrap()
        .event_loop()
    });
    (command_sender, stop_sender, handle)
  }

  #[test]
  fn commands_are_answered_and_stop_ends_the_loop() {
    let (commands, stop, handle) = start_loop(10021);

    let (reply, result) = mpsc::sync_channel(1);
    commands
      .send(ParticipantCommand::AddWriter {
        topic_name: "t".to_string(),
        type_name: "T".to_string(),
        qos: QosPolicies::builder()
          .reliability(Reliability::Reliable {
            max_blocking_time: DdsDuration::from_millis(100),
          })
          .build(),
        with_key: false,
        status_sender: StatusChannelSender::disconnected(),
        reply,
      })
      .unwrap();
    let guid = result.recv().unwrap().unwrap();
    assert_eq!(guid.prefix, GuidPrefix::new([5; 12]));

    let (reply, result) = mpsc::sync_channel(1);
    commands
      .send(ParticipantCommand::Write {
        writer: guid.entity_id,
        kind: ChangeKind::Alive,
        instance_handle: InstanceHandle::default(),
        payload: Bytes::from_static(&[0, 1, 0, 0]),
        source_timestamp: None,
        reply,
      })
      .unwrap();
    assert_eq!(result.recv().unwrap().unwrap(), SequenceNumber::new(1));

    let (reply, result) = mpsc::sync_channel(1);
    commands
      .send(ParticipantCommand::RemoveWriter { guid, reply })
      .unwrap();
    assert!(result.recv().unwrap().is_ok());

    stop.send(EventLoopCommand::Stop).unwrap();
    handle.join().unwrap();
  }
}
