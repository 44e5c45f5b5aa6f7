use std::{
  fmt,
  net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
};

use serde::{Deserialize, Serialize};
use speedy::{Context, Readable, Reader, Writable, Writer};

/// RTPS spec 9.3.2 Locator_t
///
/// UDPv4 addresses are carried in the last 4 bytes of the 16-byte address
/// field, the first 12 bytes being zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Locator {
  Invalid,
  Reserved,
  UdpV4(SocketAddrV4),
  UdpV6(SocketAddrV6),
  Other {
    kind: i32,
    port: u32,
    address: [u8; 16],
  },
}

pub type LocatorList = Vec<Locator>;

impl Locator {
  pub const LOCATOR_KIND_INVALID: i32 = -1;
  pub const LOCATOR_KIND_RESERVED: i32 = 0;
  pub const LOCATOR_KIND_UDP_V4: i32 = 1;
  pub const LOCATOR_KIND_UDP_V6: i32 = 2;

  pub const LOCATOR_ADDRESS_INVALID: [u8; 16] = [0x00; 16];
  pub const LOCATOR_PORT_INVALID: u32 = 0;

  pub fn kind(&self) -> i32 {
    match self {
      Self::Invalid => Self::LOCATOR_KIND_INVALID,
      Self::Reserved => Self::LOCATOR_KIND_RESERVED,
      Self::UdpV4(_) => Self::LOCATOR_KIND_UDP_V4,
      Self::UdpV6(_) => Self::LOCATOR_KIND_UDP_V6,
      Self::Other { kind, .. } => *kind,
    }
  }

  pub fn port(&self) -> u32 {
    match self {
      Self::Invalid | Self::Reserved => Self::LOCATOR_PORT_INVALID,
      Self::UdpV4(sa) => u32::from(sa.port()),
      Self::UdpV6(sa) => u32::from(sa.port()),
      Self::Other { port, .. } => *port,
    }
  }

  pub fn address(&self) -> [u8; 16] {
    match self {
      Self::Invalid | Self::Reserved => Self::LOCATOR_ADDRESS_INVALID,
      Self::UdpV4(sa) => {
        let mut a = [0; 16];
        a[12..].copy_from_slice(&sa.ip().octets());
        a
      }
      Self::UdpV6(sa) => sa.ip().octets(),
      Self::Other { address, .. } => *address,
    }
  }

  pub fn is_udp(&self) -> bool {
    matches!(self, Self::UdpV4(_) | Self::UdpV6(_))
  }

  pub fn is_multicast(&self) -> bool {
    match self {
      Self::UdpV4(sa) => sa.ip().is_multicast(),
      Self::UdpV6(sa) => sa.ip().is_multicast(),
      _ => false,
    }
  }

  pub fn is_loopback(&self) -> bool {
    match self {
      Self::UdpV4(sa) => sa.ip().is_loopback(),
      Self::UdpV6(sa) => sa.ip().is_loopback(),
      _ => false,
    }
  }

  pub fn to_socket_address(self) -> Option<SocketAddr> {
    match self {
      Self::UdpV4(sa) => Some(SocketAddr::V4(sa)),
      Self::UdpV6(sa) => Some(SocketAddr::V6(sa)),
      _ => None,
    }
  }

  /// Same address with another port. Non-UDP locators are returned as-is.
  #[must_use]
  pub fn with_port(self, port: u16) -> Self {
    match self {
      Self::UdpV4(sa) => Self::UdpV4(SocketAddrV4::new(*sa.ip(), port)),
      Self::UdpV6(sa) => Self::UdpV6(SocketAddrV6::new(*sa.ip(), port, 0, 0)),
      other => other,
    }
  }

  fn from_kind_port_address(kind: i32, port: u32, address: [u8; 16]) -> Self {
    match kind {
      Self::LOCATOR_KIND_INVALID => Self::Invalid,
      Self::LOCATOR_KIND_RESERVED => Self::Reserved,
      Self::LOCATOR_KIND_UDP_V4 if port <= u32::from(u16::MAX) => Self::UdpV4(SocketAddrV4::new(
        Ipv4Addr::new(address[12], address[13], address[14], address[15]),
        port as u16,
      )),
      Self::LOCATOR_KIND_UDP_V6 if port <= u32::from(u16::MAX) => Self::UdpV6(SocketAddrV6::new(
        Ipv6Addr::from(address),
        port as u16,
        0,
        0,
      )),
      _ => Self::Other {
        kind,
        port,
        address,
      },
    }
  }
}

impl Default for Locator {
  fn default() -> Self {
    Self::Invalid
  }
}

impl fmt::Debug for Locator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Invalid => f.write_str("Locator::Invalid"),
      Self::Reserved => f.write_str("Locator::Reserved"),
      Self::UdpV4(sa) => write!(f, "udpv4://{}", sa),
      Self::UdpV6(sa) => write!(f, "udpv6://{}", sa),
      Self::Other {
        kind,
        port,
        address,
      } => write!(f, "Locator({}:{:02x?}:{})", kind, address, port),
    }
  }
}

impl From<SocketAddr> for Locator {
  fn from(socket_address: SocketAddr) -> Self {
    match socket_address {
      SocketAddr::V4(sa) => Self::UdpV4(sa),
      SocketAddr::V6(sa) => Self::UdpV6(sa),
    }
  }
}

impl From<(IpAddr, u16)> for Locator {
  fn from((ip, port): (IpAddr, u16)) -> Self {
    Self::from(SocketAddr::new(ip, port))
  }
}

impl<'a, C: Context> Readable<'a, C> for Locator {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let kind: i32 = reader.read_value()?;
    let port: u32 = reader.read_value()?;
    let mut address = [0; 16];
    for a in address.iter_mut() {
      *a = reader.read_u8()?;
    }
    Ok(Self::from_kind_port_address(kind, port, address))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    24
  }
}

impl<C: Context> Writable<C> for Locator {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_i32(self.kind())?;
    writer.write_u32(self.port())?;
    for elem in &self.address() {
      writer.write_u8(*elem)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn udp_v4_address_is_in_last_four_bytes() {
    let loc = Locator::from(SocketAddr::new("192.168.1.2".parse().unwrap(), 7410));
    assert_eq!(loc.kind(), Locator::LOCATOR_KIND_UDP_V4);
    assert_eq!(&loc.address()[12..], &[192, 168, 1, 2]);
    assert_eq!(&loc.address()[..12], &[0; 12]);
    assert_eq!(loc.port(), 7410);
  }

  #[test]
  fn multicast_detection() {
    let mc = Locator::from(SocketAddr::new("239.255.0.1".parse().unwrap(), 7400));
    let uc = Locator::from(SocketAddr::new("10.0.0.1".parse().unwrap(), 7400));
    assert!(mc.is_multicast());
    assert!(!uc.is_multicast());
    assert_eq!(uc.with_port(7411).port(), 7411);
  }

  #[test]
  fn unknown_kind_survives_round_trip() {
    use speedy::Endianness;
    let loc = Locator::Other {
      kind: 16,
      port: 99,
      address: [7; 16],
    };
    let bytes = loc.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(bytes.len(), 24);
    assert_eq!(
      loc,
      Locator::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).unwrap()
    );
  }

  serialization_test!( type = Locator,
  {
      locator_invalid,
      Locator::Invalid,
      le = [0xFF, 0xFF, 0xFF, 0xFF,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
      be = [0xFF, 0xFF, 0xFF, 0xFF,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
  },
  {
      locator_udpv4_from_wireshark,
      Locator::from(SocketAddr::new("192.168.0.148".parse().unwrap(), 7412)),
      le = [0x01, 0x00, 0x00, 0x00,
            0xf4, 0x1c, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0xc0, 0xa8, 0x00, 0x94],
      be = [0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x1c, 0xf4,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0xc0, 0xa8, 0x00, 0x94]
  });
}
