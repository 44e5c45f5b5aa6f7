use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::error;

use crate::{
  network::constant::SPDP_MULTICAST_ADDRESS,
  structure::locator::{Locator, LocatorList},
};

pub fn get_local_multicast_locators(port: u16) -> LocatorList {
  let saddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(SPDP_MULTICAST_ADDRESS)), port);
  vec![Locator::from(saddr)]
}

/// Unicast locators of all non-loopback IPv4 interfaces. Falls back to the
/// loopback address when nothing else is found.
pub fn get_local_unicast_locators(port: u16) -> LocatorList {
  let mut locators: LocatorList = match get_if_addrs::get_if_addrs() {
    Ok(ifaces) => ifaces
      .iter()
      .filter(|ip| !ip.is_loopback())
      .map(|ip| ip.ip())
      .filter(IpAddr::is_ipv4)
      .map(|ip| Locator::from(SocketAddr::new(ip, port)))
      .collect(),
    Err(e) => {
      error!("Cannot get local network interfaces: get_if_addrs() : {:?}", e);
      vec![]
    }
  };
  if locators.is_empty() {
    locators.push(Locator::from(SocketAddr::new(
      IpAddr::V4(Ipv4Addr::LOCALHOST),
      port,
    )));
  }
  locators
}
