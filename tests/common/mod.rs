#![allow(dead_code)]

use std::{net::SocketAddr, rc::Rc, time::Duration};

use bytes::Bytes;
use rtps_core::{
  dds::statusevents::{status_channel, DomainParticipantStatus, StatusReceiver},
  network::simulated::SimulatedNetwork,
  policy::{Durability, History, Reliability},
  rtps::{
    participant::{ParticipantConfig, ParticipantLocators, RtpsParticipant},
    persistence::PersistenceService,
    timed_event::ManualClock,
  },
  structure::{cache_change::ChangeKind, instance_handle::InstanceHandle, locator::Locator},
  GuidPrefix, QosPolicies, QosPolicyBuilder, SequenceNumber, GUID,
};

pub const STEP: Duration = Duration::from_millis(10);

pub fn locator(s: &str) -> Locator {
  Locator::from(s.parse::<SocketAddr>().unwrap_or_else(|e| panic!("{}: {}", s, e)))
}

pub fn prefix(id: u8) -> GuidPrefix {
  GuidPrefix::new([id; 12])
}

pub fn qos(reliability: Reliability, durability: Durability, history: History) -> QosPolicies {
  QosPolicyBuilder::new()
    .reliability(reliability)
    .durability(durability)
    .history(history)
    .build()
}

pub fn reliable() -> Reliability {
  Reliability::Reliable {
    max_blocking_time: rtps_core::Duration::from_millis(100),
  }
}

pub fn payload(n: u8) -> Bytes {
  Bytes::from(vec![0x00, 0x01, 0x00, 0x00, n, 0, 0, 0])
}

/// Participants on one simulated network, sharing a manual clock.
pub struct Domain {
  pub net: SimulatedNetwork,
  pub clock: Rc<ManualClock>,
  pub participants: Vec<RtpsParticipant>,
  pub statuses: Vec<StatusReceiver<DomainParticipantStatus>>,
}

impl Domain {
  pub fn new() -> Self {
    let _ = env_logger::try_init();
    Self {
      net: SimulatedNetwork::new(),
      clock: Rc::new(ManualClock::new()),
      participants: Vec::new(),
      statuses: Vec::new(),
    }
  }

  /// Adds and starts a participant with addresses 10.0.0.`id`.
  pub fn add_participant(&mut self, id: u8) -> usize {
    self.add_participant_with(id, ParticipantConfig::default(), None)
  }

  pub fn add_participant_with(
    &mut self,
    id: u8,
    config: ParticipantConfig,
    persistence: Option<std::sync::Arc<dyn PersistenceService>>,
  ) -> usize {
    let locators = ParticipantLocators {
      metatraffic_unicast: vec![locator(&format!("10.0.0.{}:7410", id))],
      metatraffic_multicast: vec![locator("239.255.0.1:7400")],
      default_unicast: vec![locator(&format!("10.0.0.{}:7411", id))],
      default_multicast: vec![],
    };
    let (status_sender, status_receiver) = status_channel();
    let mut p = RtpsParticipant::new(
      config,
      prefix(id),
      self.clock.clone(),
      self.net.transport(),
      locators,
      status_sender,
    );
    if let Some(service) = persistence {
      p.set_persistence_service(service);
    }
    p.start();
    self.participants.push(p);
    self.statuses.push(status_receiver);
    self.participants.len() - 1
  }

  /// Hands every datagram in flight to the participants listening on its
  /// destination, until the network is quiet.
  pub fn deliver(&mut self) {
    while let Some((locator, bytes)) = self.net.pop() {
      for p in self.participants.iter_mut() {
        if p.locators().listens_on(&locator) {
          p.handle_received_packet(&bytes);
        }
      }
    }
  }

  pub fn step(&mut self) {
    self.deliver();
    self.clock.advance(STEP);
    for p in self.participants.iter_mut() {
      p.handle_timers();
    }
    self.deliver();
  }

  pub fn run_for(&mut self, duration: Duration) {
    let steps = duration.as_millis() / STEP.as_millis();
    for _ in 0..steps {
      self.step();
    }
  }

  /// Steps until `done` holds, at most `limit` of simulated time.
  pub fn run_until<F>(&mut self, limit: Duration, mut done: F) -> bool
  where
    F: FnMut(&Domain) -> bool,
  {
    let steps = limit.as_millis() / STEP.as_millis();
    for _ in 0..steps {
      if done(self) {
        return true;
      }
      self.step();
    }
    done(self)
  }

  pub fn add_writer(&mut self, p: usize, topic: &str, qos: QosPolicies) -> GUID {
    let i = self.participants[p].writer_ingredients(topic, qos, false);
    self.participants[p]
      .add_writer(i, "TestType")
      .unwrap_or_else(|e| panic!("add_writer: {}", e))
  }

  pub fn add_reader(&mut self, p: usize, topic: &str, qos: QosPolicies) -> GUID {
    let i = self.participants[p].reader_ingredients(topic, qos, false);
    self.participants[p]
      .add_reader(i, "TestType")
      .unwrap_or_else(|e| panic!("add_reader: {}", e))
  }

  pub fn write(&mut self, p: usize, writer: GUID, n: u8) -> SequenceNumber {
    self.participants[p]
      .write(
        writer.entity_id,
        ChangeKind::Alive,
        InstanceHandle::default(),
        payload(n),
        None,
      )
      .unwrap_or_else(|e| panic!("write: {}", e))
  }

  /// Sequence numbers and first payload byte of everything the reader has.
  pub fn take(&mut self, p: usize, reader: GUID) -> Vec<(i64, u8)> {
    let history = self.participants[p]
      .reader(reader.entity_id)
      .map(|r| r.history())
      .unwrap_or_else(|| panic!("no reader {:?}", reader));
    let mut history = history.lock().unwrap_or_else(|e| panic!("{}", e));
    history
      .take_all()
      .into_iter()
      .map(|c| (i64::from(c.sequence_number), c.data_value[4]))
      .collect()
  }

  pub fn matched(&self, writer: (usize, GUID), reader: (usize, GUID)) -> bool {
    let w = self.participants[writer.0].writer(writer.1.entity_id);
    let r = self.participants[reader.0].reader(reader.1.entity_id);
    match (w, r) {
      (Some(w), Some(r)) => {
        w.matched_readers().contains(&reader.1) && r.matched_writers().contains(&writer.1)
      }
      _ => false,
    }
  }

  pub fn participant_events(&mut self, p: usize) -> Vec<DomainParticipantStatus> {
    self.statuses[p].by_ref().collect()
  }
}
