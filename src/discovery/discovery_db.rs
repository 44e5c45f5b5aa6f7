use std::{
  collections::BTreeMap,
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::statusevents::ParticipantState,
  discovery::{
    endpoint_proxy_data::{ReaderProxyData, WriterProxyData},
    participant_proxy_data::ParticipantProxyData,
  },
  structure::{
    guid::{EntityId, GuidPrefix, GUID},
    locator::Locator,
  },
};

// How much longer to wait than lease duration before pronouncing lost.
const PARTICIPANT_LEASE_DURATION_TOLERANCE: Duration = Duration::from_secs(0);

struct RemoteParticipant {
  data: ParticipantProxyData,
  state: ParticipantState,
  last_life_sign: Instant,
}

/// What discovery knows: remote participants with their leases, and the
/// endpoints announced by both sides.
pub(crate) struct DiscoveryDB {
  my_prefix: GuidPrefix,
  participants: BTreeMap<GuidPrefix, RemoteParticipant>,

  local_writers: BTreeMap<GUID, WriterProxyData>,
  local_readers: BTreeMap<GUID, ReaderProxyData>,

  // remote readers and writers (via SEDP)
  remote_writers: BTreeMap<GUID, WriterProxyData>,
  remote_readers: BTreeMap<GUID, ReaderProxyData>,
}

impl DiscoveryDB {
  pub fn new(my_prefix: GuidPrefix) -> Self {
    Self {
      my_prefix,
      participants: BTreeMap::new(),
      local_writers: BTreeMap::new(),
      local_readers: BTreeMap::new(),
      remote_writers: BTreeMap::new(),
      remote_readers: BTreeMap::new(),
    }
  }

  // -----------------------------------------------------------------------
  // Participants

  /// Records received participant data. Returns the new state of the
  /// participant, or `None` if nothing but the lease changed.
  pub fn update_participant(
    &mut self,
    data: &ParticipantProxyData,
    now: Instant,
  ) -> Option<ParticipantState> {
    let guid = data.participant_guid;
    if guid.entity_id != EntityId::PARTICIPANT {
      warn!(
        "Discovered participant GUID entity_id is not for participant: {:?}",
        guid
      );
      return None;
    }
    if guid.prefix == self.my_prefix {
      trace!("Participant data from myself. Skipping.");
      return None;
    }

    match self.participants.get_mut(&guid.prefix) {
      None => {
        info!("New remote participant: {:?}", guid.prefix);
        debug!("Participant data: {:?}", data);
        self.participants.insert(
          guid.prefix,
          RemoteParticipant {
            data: data.clone(),
            state: ParticipantState::Discovered,
            last_life_sign: now,
          },
        );
        Some(ParticipantState::Discovered)
      }
      Some(p) => {
        p.last_life_sign = now;
        if p.data == *data {
          None
        } else {
          debug!("Participant {:?} changed its data", guid.prefix);
          p.data = data.clone();
          p.state = ParticipantState::ChangedQos;
          Some(ParticipantState::ChangedQos)
        }
      }
    }
  }

  pub fn participant_is_alive(&mut self, guid_prefix: GuidPrefix, now: Instant) {
    match self.participants.get_mut(&guid_prefix) {
      Some(p) => p.last_life_sign = now,
      None => trace!(
        "Participant alive update for unknown {:?}. This is normal, if the message does not repeat.",
        guid_prefix
      ),
    }
  }

  /// Forgets a participant together with every endpoint it announced.
  pub fn remove_participant(&mut self, guid_prefix: GuidPrefix) -> Option<ParticipantProxyData> {
    let removed = self.participants.remove(&guid_prefix)?;
    info!("removing participant {:?}", guid_prefix);
    self
      .remote_readers
      .retain(|guid, _| guid.prefix != guid_prefix);
    self
      .remote_writers
      .retain(|guid, _| guid.prefix != guid_prefix);
    Some(removed.data)
  }

  /// Removes participants we have not heard of within their lease duration
  /// and returns them.
  pub fn participant_cleanup(&mut self, now: Instant) -> Vec<GuidPrefix> {
    let expired: Vec<GuidPrefix> = self
      .participants
      .iter()
      .filter_map(|(prefix, p)| {
        // An infinite lease never expires.
        let lease = p.data.lease_duration_std()?;
        let elapsed = now.saturating_duration_since(p.last_life_sign);
        if elapsed > lease + PARTICIPANT_LEASE_DURATION_TOLERANCE {
          info!(
            "participant cleanup - deleting participant proxy {:?}. lease_duration = {:?} elapsed = {:?}",
            prefix, lease, elapsed
          );
          Some(*prefix)
        } else {
          None
        }
      })
      .collect();
    for prefix in &expired {
      self.remove_participant(*prefix);
    }
    expired
  }

  pub fn find_participant_proxy(&self, guid_prefix: GuidPrefix) -> Option<&ParticipantProxyData> {
    self.participants.get(&guid_prefix).map(|p| &p.data)
  }

  pub fn participant_state(&self, guid_prefix: GuidPrefix) -> Option<ParticipantState> {
    self.participants.get(&guid_prefix).map(|p| p.state)
  }

  pub fn participant_prefixes(&self) -> Vec<GuidPrefix> {
    self.participants.keys().copied().collect()
  }

  /// Default user traffic locators of a remote participant, empty if unknown.
  pub fn default_locators(&self, guid_prefix: GuidPrefix) -> (Vec<Locator>, Vec<Locator>) {
    match self.find_participant_proxy(guid_prefix) {
      Some(pp) => pp.default_locators(),
      None => {
        // This is normal, since we might not know about the participant yet.
        debug!("No remote participant known for {:?}", guid_prefix);
        (Vec::new(), Vec::new())
      }
    }
  }

  // -----------------------------------------------------------------------
  // Local endpoints

  pub fn update_local_writer(&mut self, data: WriterProxyData) {
    self.local_writers.insert(data.writer_guid, data);
  }

  pub fn update_local_reader(&mut self, data: ReaderProxyData) {
    self.local_readers.insert(data.reader_guid, data);
  }

  pub fn remove_local_writer(&mut self, guid: GUID) -> Option<WriterProxyData> {
    self.local_writers.remove(&guid)
  }

  pub fn remove_local_reader(&mut self, guid: GUID) -> Option<ReaderProxyData> {
    self.local_readers.remove(&guid)
  }

  pub fn local_writers(&self) -> impl Iterator<Item = &WriterProxyData> {
    self.local_writers.values()
  }

  pub fn local_readers(&self) -> impl Iterator<Item = &ReaderProxyData> {
    self.local_readers.values()
  }

  // -----------------------------------------------------------------------
  // Remote endpoints

  /// Returns `false` if we already knew exactly this.
  pub fn update_remote_writer(&mut self, data: &WriterProxyData) -> bool {
    match self.remote_writers.get(&data.writer_guid) {
      Some(known) if known == data => false,
      _ => {
        debug!("Remote writer: {:?}", data);
        self.remote_writers.insert(data.writer_guid, data.clone());
        true
      }
    }
  }

  /// Returns `false` if we already knew exactly this.
  pub fn update_remote_reader(&mut self, data: &ReaderProxyData) -> bool {
    match self.remote_readers.get(&data.reader_guid) {
      Some(known) if known == data => false,
      _ => {
        debug!("Remote reader: {:?}", data);
        self.remote_readers.insert(data.reader_guid, data.clone());
        true
      }
    }
  }

  pub fn remove_remote_writer(&mut self, guid: GUID) -> Option<WriterProxyData> {
    self.remote_writers.remove(&guid)
  }

  pub fn remove_remote_reader(&mut self, guid: GUID) -> Option<ReaderProxyData> {
    self.remote_readers.remove(&guid)
  }

  pub fn remote_writers(&self) -> impl Iterator<Item = &WriterProxyData> {
    self.remote_writers.values()
  }

  pub fn remote_readers(&self) -> impl Iterator<Item = &ReaderProxyData> {
    self.remote_readers.values()
  }
}
