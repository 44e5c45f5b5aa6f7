use std::collections::{BTreeMap, BTreeSet};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::qos::{policy, QosPolicies},
  rtps::timed_event::TimerId,
  structure::{
    count::Count,
    guid::{EntityId, GUID},
    locator::Locator,
    sequence_number::{FragmentNumber, SequenceNumber},
  },
};

/// State of one change with respect to one matched reader.
/// RTPS spec 8.4.8.1.1, with UNDERWAY as in 8.4.9.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeForReaderStatus {
  Unsent,
  Unacknowledged,
  Requested,
  Underway,
  Acknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeForReader {
  pub status: ChangeForReaderStatus,
  /// Irrelevant changes are sent as GAP instead of DATA.
  pub is_relevant: bool,
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// ReaderProxy class represents the information an RTPS StatefulWriter
/// maintains on each matched RTPS Reader
pub struct RtpsReaderProxy {
  /// Identifies the remote matched RTPS Reader that is represented by the
  /// ReaderProxy
  pub remote_reader_guid: GUID,
  /// Identifies the group to which the matched Reader belongs
  pub remote_group_entity_id: EntityId,
  /// List of unicast locators (transport, address, port combinations) that can
  /// be used to send messages to the matched RTPS Reader. The list may be empty
  pub unicast_locator_list: Vec<Locator>,
  /// List of multicast locators (transport, address, port combinations) that
  /// can be used to send messages to the matched RTPS Reader. The list may be
  /// empty
  pub multicast_locator_list: Vec<Locator>,

  /// Specifies whether the remote matched RTPS Reader expects in-line QoS to be
  /// sent along with any data.
  expects_in_line_qos: bool,
  /// Specifies whether the remote Reader is responsive to the Writer
  pub is_active: bool,
  qos: QosPolicies,

  // Reader has positively acked all SequenceNumbers _before_ this.
  // This is directly the same as readerSNState.base in ACKNACK submessage.
  all_acked_before: SequenceNumber,

  // Only changes at or above all_acked_before, none of them Acknowledged.
  changes: BTreeMap<SequenceNumber, ChangeForReader>,
  // REQUESTED changes of which only these fragments are to be resent.
  frags_requested: BTreeMap<SequenceNumber, BTreeSet<FragmentNumber>>,

  last_acknack_count: Option<Count>,
  last_nack_frag_count: Option<Count>,

  pub(crate) repair_timer: Option<TimerId>,
  pub(crate) nack_suppression_timer: Option<TimerId>,
}

impl RtpsReaderProxy {
  pub fn new(remote_reader_guid: GUID, qos: QosPolicies, expects_in_line_qos: bool) -> Self {
    Self {
      remote_reader_guid,
      remote_group_entity_id: EntityId::UNKNOWN,
      unicast_locator_list: Vec::default(),
      multicast_locator_list: Vec::default(),
      expects_in_line_qos,
      is_active: true,
      qos,
      all_acked_before: SequenceNumber::new(1),
      changes: BTreeMap::new(),
      frags_requested: BTreeMap::new(),
      last_acknack_count: None,
      last_nack_frag_count: None,
      repair_timer: None,
      nack_suppression_timer: None,
    }
  }

  #[must_use]
  pub fn with_locators(mut self, unicast: Vec<Locator>, multicast: Vec<Locator>) -> Self {
    self.unicast_locator_list = unicast;
    self.multicast_locator_list = multicast;
    self
  }

  // We get a (discovery) update on the properties of this remote Reader.
  // Update those properties that Discovery tells us, but keep run-time data.
  pub fn update(&mut self, update: &Self) {
    if self.remote_reader_guid != update.remote_reader_guid {
      error!("Update tried to change ReaderProxy GUID!");
      return;
    }
    if self.unicast_locator_list != update.unicast_locator_list
      || self.multicast_locator_list != update.multicast_locator_list
    {
      info!("Update changes Locators in ReaderProxy.");
      self
        .unicast_locator_list
        .clone_from(&update.unicast_locator_list);
      self
        .multicast_locator_list
        .clone_from(&update.multicast_locator_list);
    }
    self.remote_group_entity_id = update.remote_group_entity_id;
    self.expects_in_line_qos = update.expects_in_line_qos;
    if self.qos != update.qos {
      debug!("Update changes QoS in ReaderProxy.");
      self.qos = update.qos.clone();
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    &self.qos
  }

  pub fn expects_inline_qos(&self) -> bool {
    self.expects_in_line_qos
  }

  pub fn is_reliable(&self) -> bool {
    self.qos.is_reliable()
  }

  pub fn durability(&self) -> policy::Durability {
    self.qos.durability_or_default()
  }

  /// Whether changes written before the match are of interest to the reader.
  pub fn wants_historical_data(&self) -> bool {
    self.durability() >= policy::Durability::TransientLocal
  }

  /// Where to send data. Unicast when the reader has unicast locators.
  pub fn locators(&self) -> &[Locator] {
    if self.unicast_locator_list.is_empty() {
      &self.multicast_locator_list
    } else {
      &self.unicast_locator_list
    }
  }

  pub fn all_acked_before(&self) -> SequenceNumber {
    self.all_acked_before
  }

  /// Changes below this may be removed from the writer's history as far as
  /// this reader is concerned. Best-effort readers never hold anything back.
  pub fn acked_below(&self) -> Option<SequenceNumber> {
    if self.is_reliable() {
      Some(self.all_acked_before)
    } else {
      None
    }
  }

  pub fn status_of(&self, sn: SequenceNumber) -> Option<ChangeForReaderStatus> {
    if sn < self.all_acked_before {
      Some(ChangeForReaderStatus::Acknowledged)
    } else {
      self.changes.get(&sn).map(|c| c.status)
    }
  }

  pub fn is_acked(&self, sn: SequenceNumber) -> bool {
    self.status_of(sn) == Some(ChangeForReaderStatus::Acknowledged)
  }

  /// Whether some change still waits to reach this reader.
  pub fn has_unacked_changes(&self) -> bool {
    !self.changes.is_empty()
  }

  pub fn has_unsent_changes(&self) -> bool {
    self
      .changes
      .values()
      .any(|c| c.status == ChangeForReaderStatus::Unsent)
  }

  pub fn has_underway_changes(&self) -> bool {
    self
      .changes
      .values()
      .any(|c| c.status == ChangeForReaderStatus::Underway)
  }

  pub fn add_change(&mut self, sn: SequenceNumber, is_relevant: bool) {
    if sn < self.all_acked_before {
      return;
    }
    self.changes.insert(
      sn,
      ChangeForReader {
        status: ChangeForReaderStatus::Unsent,
        is_relevant,
      },
    );
  }

  /// The change is gone from the history before this reader acknowledged it.
  /// Unsent changes are dropped for best-effort readers, everyone else gets
  /// a GAP for it.
  pub fn set_irrelevant(&mut self, sn: SequenceNumber) {
    if !self.is_reliable() {
      self.changes.remove(&sn);
    } else if let Some(c) = self.changes.get_mut(&sn) {
      c.is_relevant = false;
    }
  }

  /// (sequence number, is_relevant) of every UNSENT change, in order.
  pub fn unsent_changes(&self) -> Vec<(SequenceNumber, bool)> {
    self.changes_with_status(ChangeForReaderStatus::Unsent)
  }

  /// (sequence number, is_relevant) of every REQUESTED change, in order.
  pub fn requested_changes(&self) -> Vec<(SequenceNumber, bool)> {
    self.changes_with_status(ChangeForReaderStatus::Requested)
  }

  fn changes_with_status(&self, status: ChangeForReaderStatus) -> Vec<(SequenceNumber, bool)> {
    self
      .changes
      .iter()
      .filter(|(_, c)| c.status == status)
      .map(|(sn, c)| (*sn, c.is_relevant))
      .collect()
  }

  /// DATA or GAP for `sn` went out to this reader. With a zero
  /// nack_suppression_duration the change is UNACKNOWLEDGED right away,
  /// otherwise UNDERWAY.
  pub fn change_sent(&mut self, sn: SequenceNumber, nack_suppressed: bool) {
    self.frags_requested.remove(&sn);
    if !self.is_reliable() {
      self.changes.remove(&sn);
      return;
    }
    if let Some(c) = self.changes.get_mut(&sn) {
      c.status = if nack_suppressed {
        ChangeForReaderStatus::Underway
      } else {
        ChangeForReaderStatus::Unacknowledged
      };
    }
  }

  /// End of nack suppression. Returns true if something changed state.
  pub fn underway_to_unacknowledged(&mut self) -> bool {
    let mut changed = false;
    for c in self.changes.values_mut() {
      if c.status == ChangeForReaderStatus::Underway {
        c.status = ChangeForReaderStatus::Unacknowledged;
        changed = true;
      }
    }
    changed
  }

  /// Everything below `base` is acknowledged.
  pub fn acked_changes_set(&mut self, base: SequenceNumber) {
    if base <= self.all_acked_before {
      return;
    }
    self.all_acked_before = base;
    self.changes = self.changes.split_off(&base);
    self.frags_requested = self.frags_requested.split_off(&base);
  }

  /// Marks the changes NACKed by the reader as REQUESTED. UNDERWAY changes
  /// are not touched: they were sent too recently. Sequence numbers the proxy
  /// does not track (e.g. written before the match and already gone) are
  /// requested as irrelevant. Returns true if anything became REQUESTED.
  pub fn requested_changes_set(
    &mut self,
    sns: impl IntoIterator<Item = SequenceNumber>,
    last_available: SequenceNumber,
  ) -> bool {
    let mut any = false;
    for sn in sns {
      if sn < self.all_acked_before || sn > last_available || sn <= SequenceNumber::ZERO {
        trace!(
          "Reader {:?} requested {:?} outside of [{:?}..{:?}]",
          self.remote_reader_guid,
          sn,
          self.all_acked_before,
          last_available
        );
        continue;
      }
      let c = self.changes.entry(sn).or_insert(ChangeForReader {
        status: ChangeForReaderStatus::Unacknowledged,
        is_relevant: false,
      });
      if c.status == ChangeForReaderStatus::Unacknowledged {
        c.status = ChangeForReaderStatus::Requested;
        any = true;
      }
      if c.status == ChangeForReaderStatus::Requested {
        // the whole change, not just some fragments
        self.frags_requested.remove(&sn);
      }
    }
    any
  }

  /// NACK_FRAG: the reader misses some fragments of `sn`. An UNACKNOWLEDGED
  /// change becomes REQUESTED with only those fragments to resend. Returns
  /// true if the change became REQUESTED.
  pub fn requested_fragments_set(
    &mut self,
    sn: SequenceNumber,
    fragments: impl IntoIterator<Item = FragmentNumber>,
    last_available: SequenceNumber,
  ) -> bool {
    if sn < self.all_acked_before || sn > last_available {
      trace!(
        "Reader {:?} requested fragments of {:?} outside of [{:?}..{:?}]",
        self.remote_reader_guid,
        sn,
        self.all_acked_before,
        last_available
      );
      return false;
    }
    let fragments: BTreeSet<FragmentNumber> = fragments.into_iter().collect();
    if fragments.is_empty() {
      return false;
    }
    match self.changes.get_mut(&sn) {
      Some(c) if c.status == ChangeForReaderStatus::Unacknowledged => {
        c.status = ChangeForReaderStatus::Requested;
        self.frags_requested.insert(sn, fragments);
        true
      }
      Some(c) if c.status == ChangeForReaderStatus::Requested => {
        // Already requested. Widen a fragment request, keep a whole one.
        if let Some(frags) = self.frags_requested.get_mut(&sn) {
          frags.extend(fragments);
        }
        false
      }
      _ => false,
    }
  }

  /// Fragments to resend of a REQUESTED change. None means all of it.
  pub fn requested_fragments(&self, sn: SequenceNumber) -> Option<&BTreeSet<FragmentNumber>> {
    self.frags_requested.get(&sn)
  }

  /// Returns false for a duplicate or stale NACK_FRAG.
  pub fn nack_frag_is_newer(&mut self, count: Count) -> bool {
    match self.last_nack_frag_count {
      Some(last) if count <= last => false,
      _ => {
        self.last_nack_frag_count = Some(count);
        true
      }
    }
  }

  /// Returns false for a duplicate or stale ACKNACK.
  pub fn acknack_is_newer(&mut self, count: Count) -> bool {
    match self.last_acknack_count {
      Some(last) if count <= last => false,
      _ => {
        self.last_acknack_count = Some(count);
        true
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    dds::qos::policy::{Durability, Reliability},
    structure::{duration::Duration, guid::GuidPrefix},
  };

  fn sn(n: i64) -> SequenceNumber {
    SequenceNumber::new(n)
  }

  fn reliable_proxy() -> RtpsReaderProxy {
    let qos = QosPolicies::builder()
      .reliability(Reliability::Reliable {
        max_blocking_time: Duration::from_millis(100),
      })
      .durability(Durability::TransientLocal)
      .build();
    RtpsReaderProxy::new(
      GUID::new(GuidPrefix::new([5; 12]), EntityId::SEDP_BUILTIN_PUBLICATIONS_READER),
      qos,
      false,
    )
  }

  fn best_effort_proxy() -> RtpsReaderProxy {
    RtpsReaderProxy::new(
      GUID::new(GuidPrefix::new([6; 12]), EntityId::UNKNOWN),
      QosPolicies::builder()
        .reliability(Reliability::BestEffort)
        .build(),
      false,
    )
  }

  #[test]
  fn reliable_change_lifecycle() {
    let mut rp = reliable_proxy();
    for n in 1..=3 {
      rp.add_change(sn(n), true);
    }
    assert_eq!(rp.unsent_changes().len(), 3);
    for n in 1..=3 {
      rp.change_sent(sn(n), true);
    }
    assert_eq!(rp.status_of(sn(2)), Some(ChangeForReaderStatus::Underway));

    // NACK of an underway change is suppressed
    assert!(!rp.requested_changes_set(vec![sn(2)], sn(3)));
    assert!(rp.underway_to_unacknowledged());
    assert!(rp.requested_changes_set(vec![sn(2)], sn(3)));
    assert_eq!(rp.requested_changes(), vec![(sn(2), true)]);

    rp.acked_changes_set(sn(2));
    assert!(rp.is_acked(sn(1)));
    assert_eq!(rp.acked_below(), Some(sn(2)));
    rp.acked_changes_set(sn(4));
    assert!(!rp.has_unacked_changes());
  }

  #[test]
  fn best_effort_send_means_acknowledged() {
    let mut rp = best_effort_proxy();
    rp.add_change(sn(1), true);
    rp.change_sent(sn(1), false);
    assert!(!rp.has_unacked_changes());
    assert_eq!(rp.acked_below(), None);
    assert!(!rp.wants_historical_data());
  }

  #[test]
  fn acknack_count_must_increase() {
    let mut rp = reliable_proxy();
    assert!(rp.acknack_is_newer(Count::new(1)));
    assert!(!rp.acknack_is_newer(Count::new(1)));
    assert!(!rp.acknack_is_newer(Count::new(0)));
    assert!(rp.acknack_is_newer(Count::new(2)));
  }

  #[test]
  fn untracked_request_becomes_irrelevant() {
    let mut rp = reliable_proxy();
    assert!(rp.requested_changes_set(vec![sn(1), sn(9)], sn(5)));
    assert_eq!(rp.requested_changes(), vec![(sn(1), false)]);
  }

  #[test]
  fn evicted_change_is_gapped_or_dropped() {
    let mut rp = reliable_proxy();
    rp.add_change(sn(1), true);
    rp.set_irrelevant(sn(1));
    assert_eq!(rp.unsent_changes(), vec![(sn(1), false)]);

    let mut be = best_effort_proxy();
    be.add_change(sn(1), true);
    be.set_irrelevant(sn(1));
    assert!(be.unsent_changes().is_empty());
  }

  #[test]
  fn nack_frag_requests_only_missing_fragments() {
    let fragments = |v: &[u32]| v.iter().map(|&n| FragmentNumber::new(n)).collect::<Vec<_>>();
    let mut rp = reliable_proxy();
    rp.add_change(sn(1), true);
    rp.add_change(sn(2), true);
    // not sent yet: the whole change goes out anyway
    assert!(!rp.requested_fragments_set(sn(1), fragments(&[2]), sn(2)));
    rp.change_sent(sn(1), false);
    rp.change_sent(sn(2), false);

    assert!(rp.requested_fragments_set(sn(1), fragments(&[2, 5]), sn(2)));
    assert!(!rp.requested_fragments_set(sn(1), fragments(&[7]), sn(2)));
    assert_eq!(
      rp.requested_fragments(sn(1)).unwrap().iter().copied().collect::<Vec<_>>(),
      fragments(&[2, 5, 7])
    );
    assert_eq!(rp.requested_changes(), vec![(sn(1), true)]);

    // ACKNACK asking for the whole change wins
    rp.requested_changes_set(vec![sn(1)], sn(2));
    assert!(rp.requested_fragments(sn(1)).is_none());

    assert!(rp.requested_fragments_set(sn(2), fragments(&[1]), sn(2)));
    rp.change_sent(sn(2), false);
    assert!(rp.requested_fragments(sn(2)).is_none());
    assert!(!rp.requested_fragments_set(sn(3), fragments(&[1]), sn(2)));
  }

  #[test]
  fn nack_frag_count_must_increase() {
    let mut rp = reliable_proxy();
    assert!(rp.nack_frag_is_newer(Count::new(1)));
    assert!(!rp.nack_frag_is_newer(Count::new(1)));
    // independent of the ACKNACK count
    assert!(rp.acknack_is_newer(Count::new(1)));
  }
}
