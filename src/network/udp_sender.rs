use std::{
  io,
  net::{IpAddr, Ipv4Addr, SocketAddr},
};

use log::{debug, trace};
use mio::net::UdpSocket;

use crate::{network::transport::Transport, structure::locator::Locator};

/// UDP transport for outgoing traffic. One socket is used for unicast and
/// multicast destinations alike.
#[derive(Debug)]
pub struct UDPSender {
  socket: UdpSocket,
}

impl UDPSender {
  pub fn new(sender_port: u16) -> io::Result<Self> {
    let saddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), sender_port);
    let socket = UdpSocket::bind(&saddr)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(Self { socket })
  }

  pub fn new_with_random_port() -> io::Result<Self> {
    Self::new(0)
  }

  pub fn local_port(&self) -> u16 {
    self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
  }
}

impl Transport for UDPSender {
  fn send(&self, buffer: &[u8], locator: &Locator) -> io::Result<()> {
    match locator.to_socket_address() {
      Some(address) => {
        let n = self.socket.send_to(buffer, &address)?;
        trace!("sent {} bytes to {:?}", n, address);
        if n < buffer.len() {
          debug!("Short send to {:?}: {} of {} bytes", address, n, buffer.len());
        }
        Ok(())
      }
      None => Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Not an UDP locator: {:?}", locator),
      )),
    }
  }
}
