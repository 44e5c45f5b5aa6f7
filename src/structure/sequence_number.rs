use std::{
  cmp::{max, min},
  collections::BTreeSet,
  fmt,
  hash::Hash,
  mem::size_of,
  ops::{Bound, RangeBounds},
};

use log::error;
use num_derive::{FromPrimitive, NumOps, ToPrimitive};
use serde::{Deserialize, Serialize};
use speedy::{Context, Readable, Reader, Writable, Writer};

/// RTPS Specification v2.3 Section "8.3.5.4 SequenceNumber"
#[derive(
  Copy,
  Clone,
  Hash,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  NumOps,
  FromPrimitive,
  ToPrimitive,
  Serialize,
  Deserialize,
)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
  pub const SEQUENCENUMBER_UNKNOWN: Self = Self((std::u32::MAX as i64) << 32);
  pub const ZERO: Self = Self(0);
  /// Largest sequence number accepted off the wire. Leaves room for any
  /// 32-bit offset on top of it.
  pub const MAX: Self = Self(((i32::MAX as i64) << 32) - 1);

  pub const fn new(value: i64) -> Self {
    Self(value)
  }

  pub const fn zero() -> Self {
    Self(0)
  }

  #[must_use]
  pub fn next(self) -> Self {
    Self(self.0.saturating_add(1))
  }

  #[must_use]
  pub fn prev(self) -> Self {
    Self(self.0.saturating_sub(1))
  }

  #[must_use]
  pub fn plus(self, n: i64) -> Self {
    Self(self.0.saturating_add(n))
  }

  /// In `1 ..= MAX`, as required of sequence numbers naming changes.
  pub fn is_valid(self) -> bool {
    self >= Self(1) && self <= Self::MAX
  }

  /// Saturating subtraction, never below zero.
  #[must_use]
  pub fn sub_or_zero(self, rhs: Self) -> Self {
    Self(max(self.0.saturating_sub(rhs.0), 0))
  }

  pub fn range_inclusive(begin: Self, end: Self) -> SequenceNumberRange {
    SequenceNumberRange::new(begin, end)
  }
}

impl fmt::Debug for SequenceNumber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SN({})", self.0)
  }
}

impl From<i64> for SequenceNumber {
  fn from(value: i64) -> Self {
    Self(value)
  }
}

impl From<i32> for SequenceNumber {
  fn from(value: i32) -> Self {
    Self(value.into())
  }
}

impl From<usize> for SequenceNumber {
  fn from(value: usize) -> Self {
    Self(value as i64)
  }
}

impl From<SequenceNumber> for i64 {
  fn from(sequence_number: SequenceNumber) -> Self {
    sequence_number.0
  }
}

impl Default for SequenceNumber {
  fn default() -> Self {
    Self(1)
  }
}

mod sequence_number_checked {
  use super::SequenceNumber;
  checked_impl!(CheckedAdd, checked_add, SequenceNumber);
  checked_impl!(CheckedSub, checked_sub, SequenceNumber);
}

/// Inclusive range of sequence numbers, iterable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceNumberRange {
  begin: SequenceNumber,
  end: SequenceNumber,
}

impl SequenceNumberRange {
  pub fn new(begin: SequenceNumber, end: SequenceNumber) -> Self {
    Self { begin, end }
  }

  pub fn is_empty(&self) -> bool {
    self.begin > self.end
  }
}

impl Iterator for SequenceNumberRange {
  type Item = SequenceNumber;
  fn next(&mut self) -> Option<Self::Item> {
    if self.begin > self.end {
      None
    } else {
      let b = self.begin;
      self.begin = b.next();
      Some(b)
    }
  }
}

impl RangeBounds<SequenceNumber> for SequenceNumberRange {
  fn start_bound(&self) -> Bound<&SequenceNumber> {
    Bound::Included(&self.begin)
  }
  fn end_bound(&self) -> Bound<&SequenceNumber> {
    Bound::Included(&self.end)
  }
}

// SequenceNumber serialization:
//
// RTPS Spec v2.3 Section 9.4.2.5:
// SequenceNumber is serialized 32 bit high word first, then low 32 bits,
// regardless of endianness. Within those 32 bit words the encoding
// endianness is followed.
// E.g. SequenceNumber(1) is encoded in 8 little-endian bytes as:
// 00 00 00 00 01 00 00 00
impl<'a, C: Context> Readable<'a, C> for SequenceNumber {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let high: i32 = reader.read_value()?;
    let low: u32 = reader.read_value()?;

    Ok(Self((i64::from(high) << 32) + i64::from(low)))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    size_of::<Self>()
  }
}

impl<C: Context> Writable<C> for SequenceNumber {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_i32((self.0 >> 32) as i32)?;
    writer.write_u32(self.0 as u32)?;
    Ok(())
  }
}

// ---------------------------------------------------------------

/// RTPS spec 8.3.5.5 FragmentNumber. Numbering starts from 1.
#[derive(
  Copy,
  Clone,
  Hash,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Readable,
  Writable,
  NumOps,
  FromPrimitive,
  ToPrimitive,
)]
pub struct FragmentNumber(u32);

impl FragmentNumber {
  pub const fn new(value: u32) -> Self {
    Self(value)
  }

  #[must_use]
  pub fn next(self) -> Self {
    Self(self.0.saturating_add(1))
  }
}

impl Default for FragmentNumber {
  fn default() -> Self {
    Self(1)
  }
}

impl fmt::Debug for FragmentNumber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "FN({})", self.0)
  }
}

impl From<u32> for FragmentNumber {
  fn from(value: u32) -> Self {
    Self(value)
  }
}

impl From<FragmentNumber> for u32 {
  fn from(fragment_number: FragmentNumber) -> Self {
    fragment_number.0
  }
}

mod fragment_number_checked {
  use super::FragmentNumber;
  checked_impl!(CheckedAdd, checked_add, FragmentNumber);
  checked_impl!(CheckedSub, checked_sub, FragmentNumber);
}

// ---------------------------------------------------------------

/// Number types that can be members of a [`NumberSet`].
pub trait NumberSetMember: Copy + Ord + Hash + fmt::Debug {
  /// `self + n`, saturating at the top of the type.
  fn offset(self, n: u32) -> Self;
  /// Bit position of `self` in a set based at `base`. Zero when below it.
  fn distance_from(self, base: Self) -> u64;
  /// Can be the base of a received set.
  fn is_valid_base(self) -> bool;
}

impl NumberSetMember for SequenceNumber {
  fn offset(self, n: u32) -> Self {
    self.plus(i64::from(n))
  }
  fn distance_from(self, base: Self) -> u64 {
    i64::from(self.sub_or_zero(base)) as u64
  }
  fn is_valid_base(self) -> bool {
    self.is_valid()
  }
}

impl NumberSetMember for FragmentNumber {
  fn offset(self, n: u32) -> Self {
    Self(self.0.saturating_add(n))
  }
  fn distance_from(self, base: Self) -> u64 {
    u64::from(self.0.saturating_sub(base.0))
  }
  fn is_valid_base(self) -> bool {
    self.0 >= 1
  }
}

pub type SequenceNumberSet = NumberSet<SequenceNumber>;
pub type FragmentNumberSet = NumberSet<FragmentNumber>;

/// Maximum number of bits in a SequenceNumberSet or FragmentNumberSet
/// bitmap.
pub const NUMBER_SET_MAX_BITS: u32 = 256;
pub const SEQUENCE_NUMBER_SET_MAX_BITS: u32 = NUMBER_SET_MAX_BITS;

/// RTPS spec 9.4.2.6 SequenceNumberSet and 9.4.2.8 FragmentNumberSet
///
/// Bitmap bits are numbered from MSB to LSB. Bit 0 (MSB of bitmap[0])
/// represents `bitmap_base`, bit 31 (LSB of bitmap[0]) represents
/// `bitmap_base + 31`. Empty sets still carry a meaningful base.
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct NumberSet<N: NumberSetMember> {
  bitmap_base: N,
  num_bits: u32,
  bitmap: Vec<u32>, // .len() == (num_bits+31)/32
}

impl<N: NumberSetMember> NumberSet<N> {
  pub fn new(bitmap_base: N, num_bits: u32) -> Self {
    let num_bits = min(num_bits, NUMBER_SET_MAX_BITS);
    let word_count = (num_bits + 31) / 32;
    Self {
      bitmap_base,
      num_bits,
      bitmap: vec![0; word_count as usize],
    }
  }

  pub fn new_empty(bitmap_base: N) -> Self {
    Self::new(bitmap_base, 0)
  }

  pub fn base(&self) -> N {
    self.bitmap_base
  }

  pub fn num_bits(&self) -> u32 {
    self.num_bits
  }

  pub fn is_empty(&self) -> bool {
    self.num_bits == 0 || self.iter().next().is_none()
  }

  /// Well-formedness as required of received sets: RTPS spec 8.3.5.5
  pub fn is_valid(&self) -> bool {
    self.bitmap_base.is_valid_base()
      && self.num_bits <= NUMBER_SET_MAX_BITS
      && self.bitmap.len() == ((self.num_bits + 31) / 32) as usize
  }

  fn in_window(&self, n: N) -> bool {
    n >= self.bitmap_base && n.distance_from(self.bitmap_base) < u64::from(self.num_bits)
  }

  pub fn contains(&self, n: N) -> bool {
    if !self.in_window(n) {
      return false;
    }
    let bit_pos = n.distance_from(self.bitmap_base) as u32;
    self.bitmap[(bit_pos / 32) as usize] & (1u32 << (31 - bit_pos % 32)) != 0
  }

  pub fn insert(&mut self, n: N) {
    if !self.in_window(n) {
      error!("out of bounds .insert({:?}) to {:?}", n, self);
    } else {
      let bit_pos = n.distance_from(self.bitmap_base) as u32;
      self.bitmap[(bit_pos / 32) as usize] |= 1u32 << (31 - bit_pos % 32);
    }
  }

  /// Builds a set with the given base. Members that do not fit into the
  /// 256-bit window starting from `base` are dropped; so are members below
  /// `base`.
  pub fn from_base_and_set(base: N, set: &BTreeSet<N>) -> Self {
    let window_end = base.offset(NUMBER_SET_MAX_BITS - 1);
    let members: Vec<N> = set.range(base..=window_end).copied().collect();
    match members.last() {
      Some(&last) => {
        let num_bits = last.distance_from(base) as u32 + 1;
        let mut set_out = Self::new(base, num_bits);
        for n in members {
          set_out.insert(n);
        }
        if set.iter().next_back().map_or(false, |&l| l > window_end) {
          error!(
            "from_base_and_set: set does not fit 256 bits from base {:?}, truncated",
            base
          );
        }
        set_out
      }
      None => Self::new_empty(base),
    }
  }

  pub fn iter(&self) -> NumberSetIter<'_, N> {
    NumberSetIter {
      seq: self,
      at_bit: 0,
      rev_at_bit: self.num_bits,
    }
  }
}

impl<N: NumberSetMember> fmt::Debug for NumberSet<N> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Set base={:?} bits={} {{", self.bitmap_base, self.num_bits)?;
    for n in self.iter() {
      write!(f, " {:?}", n)?;
    }
    write!(f, " }}")
  }
}

impl<'a, C: Context, N> Readable<'a, C> for NumberSet<N>
where
  N: NumberSetMember + Readable<'a, C>,
{
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let bitmap_base: N = reader.read_value()?;
    let num_bits: u32 = reader.read_value()?;
    if num_bits > NUMBER_SET_MAX_BITS {
      return Err(speedy::Error::custom(format!("NumberSet with {} bits", num_bits)).into());
    }
    let word_count = (num_bits + 31) / 32;
    let mut bitmap: Vec<u32> = Vec::with_capacity(word_count as usize);
    for _ in 0..word_count {
      bitmap.push(reader.read_value()?);
    }
    Ok(Self {
      bitmap_base,
      num_bits,
      bitmap,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    size_of::<N>() + size_of::<u32>()
  }
}

impl<C: Context, N> Writable<C> for NumberSet<N>
where
  N: NumberSetMember + Writable<C>,
{
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.bitmap_base)?;
    writer.write_u32(self.num_bits)?;
    let word_count = (self.num_bits + 31) / 32;
    if self.bitmap.len() as u32 != word_count {
      error!(
        "NumberSet bitmap.len() = {} but word_count = {}",
        self.bitmap.len(),
        word_count
      );
    }
    for i in 0..min(word_count, self.bitmap.len() as u32) {
      writer.write_u32(self.bitmap[i as usize])?;
    }
    Ok(())
  }
}

pub struct NumberSetIter<'a, N: NumberSetMember> {
  seq: &'a NumberSet<N>,
  at_bit: u32,
  rev_at_bit: u32,
}

impl<'a, N: NumberSetMember> NumberSetIter<'a, N> {
  fn bit(&self, pos: u32) -> bool {
    // bit indexing formula from RTPS spec v2.3 Section 9.4.2.6
    self
      .seq
      .bitmap
      .get((pos / 32) as usize)
      .map_or(false, |word| word & (1 << (31 - pos % 32)) != 0)
  }
}

impl<'a, N: NumberSetMember> Iterator for NumberSetIter<'a, N> {
  type Item = N;

  fn next(&mut self) -> Option<Self::Item> {
    while self.at_bit < self.rev_at_bit {
      let pos = self.at_bit;
      self.at_bit += 1;
      if self.bit(pos) {
        return Some(self.seq.bitmap_base.offset(pos));
      }
    }
    None
  }
}

impl<'a, N: NumberSetMember> DoubleEndedIterator for NumberSetIter<'a, N> {
  fn next_back(&mut self) -> Option<Self::Item> {
    while self.at_bit < self.rev_at_bit {
      self.rev_at_bit -= 1;
      if self.bit(self.rev_at_bit) {
        return Some(self.seq.bitmap_base.offset(self.rev_at_bit));
      }
    }
    None
  }
}

/// Highest of two optional sequence numbers.
pub fn max_sn(a: Option<SequenceNumber>, b: Option<SequenceNumber>) -> Option<SequenceNumber> {
  match (a, b) {
    (Some(a), Some(b)) => Some(max(a, b)),
    (a, None) => a,
    (None, b) => b,
  }
}
