use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::{
    submessage::WriterSubmessage, submessage_flag::{endianness_flag, GAP_Flags},
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{
    guid::EntityId,
    sequence_number::{SequenceNumber, SequenceNumberSet, SEQUENCE_NUMBER_SET_MAX_BITS},
  },
};

/// This Submessage is sent from an RTPS Writer to an RTPS Reader and
/// indicates to the RTPS Reader that a range of sequence numbers
/// is no longer relevant. The set may be a contiguous range of
/// sequence numbers or a specific set of sequence numbers.
///
/// Irrelevant are all SNs in `[gap_start, gap_list.base)` plus the members
/// of `gap_list`.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct Gap {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub gap_start: SequenceNumber,
  pub gap_list: SequenceNumberSet,
}

impl Gap {
  pub fn is_valid(&self) -> bool {
    self.gap_start.is_valid()
      && self.gap_list.is_valid()
      && self.gap_list.base() >= self.gap_start
  }

  pub fn contains(&self, sn: SequenceNumber) -> bool {
    (sn >= self.gap_start && sn < self.gap_list.base()) || self.gap_list.contains(sn)
  }

  /// Gap covering the smallest members of `irrelevant`: the contiguous run
  /// from the minimum, then whatever fits the 256-bit list after it.
  pub fn from_irrelevant(
    reader_id: EntityId,
    writer_id: EntityId,
    irrelevant: &std::collections::BTreeSet<SequenceNumber>,
  ) -> Option<Self> {
    let gap_start = *irrelevant.iter().next()?;
    // The contiguous run from gap_start goes into the range part.
    let mut base = gap_start;
    while irrelevant.contains(&base) {
      base = base.next();
    }
    let window: std::collections::BTreeSet<SequenceNumber> = irrelevant
      .range(base..base.plus(i64::from(SEQUENCE_NUMBER_SET_MAX_BITS)))
      .copied()
      .collect();
    Some(Self {
      reader_id,
      writer_id,
      gap_start,
      gap_list: SequenceNumberSet::from_base_and_set(base, &window),
    })
  }

  /// As many GAPs as needed to cover every member of `irrelevant`.
  pub fn cover_all(
    reader_id: EntityId,
    writer_id: EntityId,
    irrelevant: &std::collections::BTreeSet<SequenceNumber>,
  ) -> Vec<Self> {
    let mut remaining = irrelevant.clone();
    let mut gaps = Vec::new();
    while let Some(gap) = Self::from_irrelevant(reader_id, writer_id, &remaining) {
      remaining.retain(|sn| !gap.contains(*sn));
      gaps.push(gap);
    }
    gaps
  }

  pub fn create_submessage(self, flags: BitFlags<GAP_Flags>) -> Option<Submessage> {
    let content_length = match self.write_to_vec_with_ctx(endianness_flag(flags.bits())) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write GAP to bytes: {}", e);
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::GAP,
        flags: flags.bits(),
        content_length,
      },
      body: SubmessageBody::Writer(WriterSubmessage::Gap(self, flags)),
    })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use super::*;

  serialization_test!( type = Gap,
  {
      gap,
      Gap {
          reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
          gap_start: SequenceNumber::from(42),
          gap_list: SequenceNumberSet::new_empty(SequenceNumber::from(43))
      },
      le = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x2A, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x2B, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x2A,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x2B,
            0x00, 0x00, 0x00, 0x00]
  });

  #[test]
  fn irrelevant_set_to_gap() {
    let set: BTreeSet<SequenceNumber> = [2, 3, 4, 7]
      .iter()
      .map(|&i| SequenceNumber::from(i as i64))
      .collect();
    let gap = Gap::from_irrelevant(EntityId::UNKNOWN, EntityId::UNKNOWN, &set).unwrap();
    assert_eq!(gap.gap_start, SequenceNumber::from(2));
    assert_eq!(gap.gap_list.base(), SequenceNumber::from(5));
    for i in 1..10 {
      let sn = SequenceNumber::from(i as i64);
      assert_eq!(gap.contains(sn), set.contains(&sn), "{:?}", sn);
    }
    assert!(gap.is_valid());
  }

  #[test]
  fn wide_set_needs_several_gaps() {
    let set: BTreeSet<SequenceNumber> = [1, 3, 1000]
      .iter()
      .map(|&i| SequenceNumber::from(i as i64))
      .collect();
    let gaps = Gap::cover_all(EntityId::UNKNOWN, EntityId::UNKNOWN, &set);
    assert_eq!(gaps.len(), 2);
    for sn in &set {
      assert!(gaps.iter().any(|g| g.contains(*sn)));
    }
  }
}
