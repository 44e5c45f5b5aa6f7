#![allow(non_camel_case_types)]

use enumflags2::{bitflags, BitFlags};
use speedy::Endianness;

/// Bit 0 of every submessage flags octet: set means little endian.
pub fn endianness_flag(flags: u8) -> Endianness {
  if (flags & 0x01) != 0 {
    Endianness::LittleEndian
  } else {
    Endianness::BigEndian
  }
}

/// Flag types that carry the endianness bit can be built from an
/// `Endianness`.
pub trait FromEndianness {
  fn from_endianness(end: Endianness) -> Self;
}

macro_rules! impl_from_endianness {
  ($flagtype:ident) => {
    impl FromEndianness for BitFlags<$flagtype> {
      fn from_endianness(end: Endianness) -> Self {
        if end == Endianness::LittleEndian {
          $flagtype::Endianness.into()
        } else {
          Self::empty()
        }
      }
    }
  };
}

/// RTPS spec 9.4.5.3 AckNack
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ACKNACK_Flags {
  Endianness = 0b01,
  Final = 0b10,
}
impl_from_endianness!(ACKNACK_Flags);

/// RTPS spec 9.4.5.3 Data
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DATA_Flags {
  Endianness = 0b00001,
  InlineQos = 0b00010,
  Data = 0b00100,
  Key = 0b01000,
  NonStandardPayload = 0b10000,
}
impl_from_endianness!(DATA_Flags);

/// RTPS spec 9.4.5.4 DataFrag
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DATAFRAG_Flags {
  Endianness = 0b0001,
  InlineQos = 0b0010,
  Key = 0b0100,
  NonStandardPayload = 0b1000,
}
impl_from_endianness!(DATAFRAG_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GAP_Flags {
  Endianness = 0b01,
}
impl_from_endianness!(GAP_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HEARTBEAT_Flags {
  Endianness = 0b001,
  Final = 0b010,
  Liveliness = 0b100,
}
impl_from_endianness!(HEARTBEAT_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HEARTBEATFRAG_Flags {
  Endianness = 0b01,
}
impl_from_endianness!(HEARTBEATFRAG_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NACKFRAG_Flags {
  Endianness = 0b01,
}
impl_from_endianness!(NACKFRAG_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum INFODESTINATION_Flags {
  Endianness = 0b01,
}
impl_from_endianness!(INFODESTINATION_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum INFOSOURCE_Flags {
  Endianness = 0b01,
}
impl_from_endianness!(INFOSOURCE_Flags);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum INFOTIMESTAMP_Flags {
  Endianness = 0b01,
  Invalidate = 0b10,
}
impl_from_endianness!(INFOTIMESTAMP_Flags);
