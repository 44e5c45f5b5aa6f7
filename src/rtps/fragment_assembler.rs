use std::collections::{BTreeMap, BTreeSet};

use bytes::BytesMut;
use log::{debug, trace, warn};

use crate::{
  messages::submessages::{
    submessage_elements::parameter_list::ParameterList,
    submessages::{Data, DataFrag},
  },
  rtps::constant::{MAX_FRAGMENTED_SAMPLE_SIZE, MAX_PARTIAL_SAMPLES},
  structure::{
    guid::EntityId,
    sequence_number::{FragmentNumber, FragmentNumberSet, SequenceNumber, NUMBER_SET_MAX_BITS},
  },
};

// One sample being put together from DATA_FRAGs.
#[derive(Debug, Clone)]
struct Assembly {
  reader_id: EntityId,
  writer_id: EntityId,
  data_size: u32,
  fragment_size: u16,
  inline_qos: Option<ParameterList>,
  buffer: BytesMut,
  received: Vec<bool>,
  received_count: u32,
}

impl Assembly {
  fn new(frag: &DataFrag) -> Self {
    let total = frag.total_fragments() as usize;
    Self {
      reader_id: frag.reader_id,
      writer_id: frag.writer_id,
      data_size: frag.data_size,
      fragment_size: frag.fragment_size,
      inline_qos: None,
      buffer: BytesMut::from(vec![0u8; frag.data_size as usize].as_slice()),
      received: vec![false; total],
      received_count: 0,
    }
  }

  fn matches(&self, frag: &DataFrag) -> bool {
    self.data_size == frag.data_size && self.fragment_size == frag.fragment_size
  }

  fn total(&self) -> u32 {
    self.received.len() as u32
  }

  fn is_complete(&self) -> bool {
    self.received_count == self.total()
  }

  // Returns false if nothing new was learned.
  fn add(&mut self, frag: &DataFrag) -> bool {
    let offset = frag.payload_offset();
    let end = offset + frag.serialized_payload.len();
    if end > self.buffer.len() {
      warn!(
        "DATA_FRAG {:?} {:?} overruns the sample size {}",
        frag.writer_sn, frag.fragment_starting_num, self.data_size
      );
      return false;
    }
    let first = u32::from(frag.fragment_starting_num) - 1;
    let mut fresh = false;
    for i in first..first + u32::from(frag.fragments_in_submessage) {
      if let Some(r) = self.received.get_mut(i as usize) {
        if !*r {
          *r = true;
          self.received_count += 1;
          fresh = true;
        }
      }
    }
    if fresh {
      self.buffer[offset..end].copy_from_slice(&frag.serialized_payload);
      if self.inline_qos.is_none() {
        self.inline_qos = frag.inline_qos.clone();
      }
    }
    fresh
  }

  // Missing fragments not beyond `last`, as much as fits one NACK_FRAG.
  fn missing(&self, last: u32) -> Option<FragmentNumberSet> {
    let last = last.min(self.total());
    let mut missing = (1..=last).filter(|n| !self.received[*n as usize - 1]);
    let base = missing.next()?;
    let window_end = base + NUMBER_SET_MAX_BITS - 1;
    let set: BTreeSet<FragmentNumber> = std::iter::once(base)
      .chain(missing.take_while(|n| *n <= window_end))
      .map(FragmentNumber::new)
      .collect();
    Some(FragmentNumberSet::from_base_and_set(
      FragmentNumber::new(base),
      &set,
    ))
  }

  fn into_data(self, writer_sn: SequenceNumber) -> Data {
    Data {
      reader_id: self.reader_id,
      writer_id: self.writer_id,
      writer_sn,
      inline_qos: self.inline_qos,
      serialized_payload: Some(self.buffer.freeze()),
    }
  }
}

/// Reassembles DATA_FRAGs of one writer into DATA.
///
/// At most `max_partial` samples are kept incomplete at a time. A new sample
/// beyond that pushes out the highest partial one, unless it is itself the
/// highest. Samples larger than `max_sample_size` are refused.
#[derive(Debug, Clone)]
pub struct FragmentAssembler {
  max_partial: usize,
  max_sample_size: u32,
  partial: BTreeMap<SequenceNumber, Assembly>,
}

impl Default for FragmentAssembler {
  fn default() -> Self {
    Self::new(MAX_PARTIAL_SAMPLES, MAX_FRAGMENTED_SAMPLE_SIZE)
  }
}

impl FragmentAssembler {
  pub fn new(max_partial: usize, max_sample_size: u32) -> Self {
    Self {
      max_partial,
      max_sample_size,
      partial: BTreeMap::new(),
    }
  }

  /// Adds the fragments of one DATA_FRAG. Returns the whole sample as DATA
  /// when this completed it.
  pub fn new_datafrag(&mut self, frag: &DataFrag) -> Option<Data> {
    let sn = frag.writer_sn;
    if frag.data_size > self.max_sample_size {
      warn!(
        "{:?} from {:?} is {} bytes, larger than the {} bytes that are reassembled",
        sn, frag.writer_id, frag.data_size, self.max_sample_size
      );
      return None;
    }
    if let Some(a) = self.partial.get(&sn) {
      if !a.matches(frag) {
        debug!(
          "{:?} changed size or fragmentation from {}/{} to {}/{}. Starting over.",
          sn, a.data_size, a.fragment_size, frag.data_size, frag.fragment_size
        );
        self.partial.remove(&sn);
      }
    }
    if !self.partial.contains_key(&sn) && self.partial.len() >= self.max_partial {
      match self.partial.keys().next_back().copied() {
        Some(highest) if sn < highest => {
          debug!("Dropping partial {:?} to make room for {:?}", highest, sn);
          self.partial.remove(&highest);
        }
        _ => {
          debug!(
            "Dropping DATA_FRAG of {:?}: {} samples are already being reassembled",
            sn,
            self.partial.len()
          );
          return None;
        }
      }
    }
    let assembly = self
      .partial
      .entry(sn)
      .or_insert_with(|| Assembly::new(frag));
    if !assembly.add(frag) {
      trace!("Duplicate DATA_FRAG {:?} {:?}", sn, frag.fragment_starting_num);
    }
    if assembly.is_complete() {
      self.partial.remove(&sn).map(|a| a.into_data(sn))
    } else {
      None
    }
  }

  pub fn is_partial(&self, sn: SequenceNumber) -> bool {
    self.partial.contains_key(&sn)
  }

  /// Sequence numbers with some but not all fragments received.
  pub fn partial_sequence_numbers(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
    self.partial.keys().copied()
  }

  /// Fragments of a partially received sample that are still missing.
  pub fn missing_fragments(&self, sn: SequenceNumber) -> Option<FragmentNumberSet> {
    self.missing_fragments_up_to(sn, FragmentNumber::new(u32::MAX))
  }

  /// As `missing_fragments`, ignoring fragments after `last`.
  pub fn missing_fragments_up_to(
    &self,
    sn: SequenceNumber,
    last: FragmentNumber,
  ) -> Option<FragmentNumberSet> {
    self.partial.get(&sn)?.missing(u32::from(last))
  }

  /// Forgets a sample, e.g. because it arrived whole or was declared lost.
  pub fn discard(&mut self, sn: SequenceNumber) {
    self.partial.remove(&sn);
  }

  /// Forgets every sample below `sn`.
  pub fn discard_below(&mut self, sn: SequenceNumber) {
    self.partial = self.partial.split_off(&sn);
  }

  pub fn len(&self) -> usize {
    self.partial.len()
  }

  pub fn is_empty(&self) -> bool {
    self.partial.is_empty()
  }
}
