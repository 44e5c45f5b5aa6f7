use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dds::result::Result,
  structure::{cache_change::CacheChange, guid::GUID, sequence_number::SequenceNumber},
};

/// Storage backend for TRANSIENT / PERSISTENT endpoints.
///
/// Writers store every change they keep in their history and remove it when
/// the history drops it. Readers store the last sequence number they
/// delivered from each writer, so that a restarted reader does not deliver
/// the same sample twice.
pub trait PersistenceService: Send + Sync {
  /// Changes of `writer` in sequence number order.
  fn load_writer_changes(&self, writer: GUID) -> Result<Vec<CacheChange>>;

  fn add_writer_change(&self, change: &CacheChange) -> Result<()>;

  fn remove_writer_change(&self, writer: GUID, sn: SequenceNumber) -> Result<()>;

  /// Highest sequence number the writer ever used, also for changes that are
  /// no longer stored.
  fn writer_last_sequence_number(&self, writer: GUID) -> Result<SequenceNumber>;

  fn update_reader_last_notified(
    &self,
    reader: GUID,
    writer: GUID,
    sn: SequenceNumber,
  ) -> Result<()>;

  /// Last notified sequence number per writer.
  fn reader_last_notified(&self, reader: GUID) -> Result<BTreeMap<GUID, SequenceNumber>>;
}

#[derive(Default)]
struct InMemoryInner {
  writer_changes: BTreeMap<GUID, BTreeMap<SequenceNumber, CacheChange>>,
  writer_last_sn: BTreeMap<GUID, SequenceNumber>,
  reader_notified: BTreeMap<GUID, BTreeMap<GUID, SequenceNumber>>,
}

/// Keeps everything in memory. Survives endpoint re-creation within one
/// process, which is what the tests need.
#[derive(Default)]
pub struct InMemoryPersistence {
  inner: Mutex<InMemoryInner>,
}

impl InMemoryPersistence {
  pub fn new() -> Self {
    Self::default()
  }
}

impl PersistenceService for InMemoryPersistence {
  fn load_writer_changes(&self, writer: GUID) -> Result<Vec<CacheChange>> {
    let inner = self.inner.lock()?;
    Ok(
      inner
        .writer_changes
        .get(&writer)
        .map(|m| m.values().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn add_writer_change(&self, change: &CacheChange) -> Result<()> {
    let mut inner = self.inner.lock()?;
    let last = inner
      .writer_last_sn
      .entry(change.writer_guid)
      .or_insert(SequenceNumber::ZERO);
    if change.sequence_number > *last {
      *last = change.sequence_number;
    }
    inner
      .writer_changes
      .entry(change.writer_guid)
      .or_default()
      .insert(change.sequence_number, change.clone());
    Ok(())
  }

  fn remove_writer_change(&self, writer: GUID, sn: SequenceNumber) -> Result<()> {
    let mut inner = self.inner.lock()?;
    if let Some(changes) = inner.writer_changes.get_mut(&writer) {
      changes.remove(&sn);
    }
    Ok(())
  }

  fn writer_last_sequence_number(&self, writer: GUID) -> Result<SequenceNumber> {
    let inner = self.inner.lock()?;
    Ok(
      inner
        .writer_last_sn
        .get(&writer)
        .copied()
        .unwrap_or(SequenceNumber::ZERO),
    )
  }

  fn update_reader_last_notified(
    &self,
    reader: GUID,
    writer: GUID,
    sn: SequenceNumber,
  ) -> Result<()> {
    let mut inner = self.inner.lock()?;
    inner
      .reader_notified
      .entry(reader)
      .or_default()
      .insert(writer, sn);
    Ok(())
  }

  fn reader_last_notified(&self, reader: GUID) -> Result<BTreeMap<GUID, SequenceNumber>> {
    let inner = self.inner.lock()?;
    Ok(inner.reader_notified.get(&reader).cloned().unwrap_or_default())
  }
}

/// Binds a service to one endpoint. Storage failures are logged and
/// otherwise ignored: the endpoint keeps working as if it were volatile.
#[derive(Clone)]
pub struct PersistenceDecorator {
  service: Arc<dyn PersistenceService>,
  guid: GUID,
}

impl PersistenceDecorator {
  pub fn new(service: Arc<dyn PersistenceService>, guid: GUID) -> Self {
    Self { service, guid }
  }

  pub fn guid(&self) -> GUID {
    self.guid
  }

  /// Stored changes and the last used sequence number.
  pub fn load_writer_history(&self) -> (Vec<CacheChange>, SequenceNumber) {
    let changes = self
      .service
      .load_writer_changes(self.guid)
      .unwrap_or_else(|e| {
        error!("Cannot load history of {:?}: {}", self.guid, e);
        Vec::new()
      });
    let last = self
      .service
      .writer_last_sequence_number(self.guid)
      .unwrap_or(SequenceNumber::ZERO);
    debug!(
      "Loaded {} changes for {:?}, last {:?}",
      changes.len(),
      self.guid,
      last
    );
    (changes, last)
  }

  pub fn add_change(&self, change: &CacheChange) {
    if let Err(e) = self.service.add_writer_change(change) {
      error!("Cannot persist {:?}: {}", change.sequence_number, e);
    }
  }

  pub fn remove_change(&self, sn: SequenceNumber) {
    if let Err(e) = self.service.remove_writer_change(self.guid, sn) {
      error!("Cannot remove persisted {:?}: {}", sn, e);
    }
  }

  pub fn last_notified(&self) -> BTreeMap<GUID, SequenceNumber> {
    self
      .service
      .reader_last_notified(self.guid)
      .unwrap_or_else(|e| {
        error!("Cannot load notified state of {:?}: {}", self.guid, e);
        BTreeMap::new()
      })
  }

  pub fn set_last_notified(&self, writer: GUID, sn: SequenceNumber) {
    if let Err(e) = self.service.update_reader_last_notified(self.guid, writer, sn) {
      error!("Cannot persist notified state of {:?}: {}", self.guid, e);
    }
  }
}
