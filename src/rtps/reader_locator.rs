use std::collections::BTreeSet;

use crate::structure::{locator::Locator, sequence_number::SequenceNumber};

/// Valuetype used by the RTPS StatelessWriter to keep track
/// of the locators of all matching remote Readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderLocator {
  /// Unicast or multicast locator through which the readers
  /// represented by this ReaderLocator can be reached
  pub locator: Locator,

  /// Specifies whether the readers represented by this ReaderLocator
  /// expect inline QoS to be sent with every Data Message
  pub expects_inline_qos: bool,

  /// Changes in the writer's history that have not been sent yet to this
  /// ReaderLocator
  unsent_changes: BTreeSet<SequenceNumber>,

  /// Changes requested by remote readers at this locator
  requested_changes: BTreeSet<SequenceNumber>,
}

impl ReaderLocator {
  pub fn new(locator: Locator, expects_inline_qos: bool) -> Self {
    Self {
      locator,
      expects_inline_qos,
      unsent_changes: BTreeSet::new(),
      requested_changes: BTreeSet::new(),
    }
  }

  pub fn add_change(&mut self, sn: SequenceNumber) {
    self.unsent_changes.insert(sn);
  }

  /// A change left the history before it was sent.
  pub fn remove_change(&mut self, sn: SequenceNumber) {
    self.unsent_changes.remove(&sn);
    self.requested_changes.remove(&sn);
  }

  pub fn next_unsent_change(&mut self) -> Option<SequenceNumber> {
    let sn = *self.unsent_changes.iter().next()?;
    self.unsent_changes.remove(&sn);
    Some(sn)
  }

  pub fn next_requested_change(&mut self) -> Option<SequenceNumber> {
    let sn = *self.requested_changes.iter().next()?;
    self.requested_changes.remove(&sn);
    Some(sn)
  }

  pub fn unsent_changes(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
    self.unsent_changes.iter().copied()
  }

  pub fn has_unsent_changes(&self) -> bool {
    !self.unsent_changes.is_empty()
  }

  pub fn requested_changes_set(&mut self, sns: impl IntoIterator<Item = SequenceNumber>) {
    self.requested_changes.extend(sns);
  }

  /// Everything in `history` is to be sent again. Used for periodic
  /// announcements.
  pub fn unsent_changes_reset(&mut self, history: impl IntoIterator<Item = SequenceNumber>) {
    self.unsent_changes = history.into_iter().collect();
  }
}
