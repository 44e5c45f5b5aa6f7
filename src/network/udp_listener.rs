use std::{
  io,
  net::{IpAddr, Ipv4Addr, SocketAddr},
};

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use mio::{net::UdpSocket, Token};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

const MAX_MESSAGE_SIZE: usize = 64 * 1024; // This is max we can get from UDP.
const MESSAGE_BUFFER_ALLOCATION_CHUNK: usize = 256 * 1024; // must be >= MAX_MESSAGE_SIZE

/// Listens to messages coming to specified host port combination.
#[derive(Debug)]
pub struct UDPListener {
  socket: UdpSocket,
  token: Token,
  receive_buffer: BytesMut,
}

impl UDPListener {
  /// Binds a nonblocking socket. SO_REUSEADDR is set so that other
  /// participants on this host can bind to the same multicast port.
  pub fn try_bind(token: Token, host: IpAddr, port: u16) -> io::Result<Self> {
    let address = SocketAddr::new(host, port);
    let domain = if host.is_ipv4() {
      Domain::ipv4()
    } else {
      Domain::ipv6()
    };
    let raw_socket = Socket::new(domain, Type::dgram(), Some(Protocol::udp()))?;

    // To have an effect on bind, this must be done before bind call, so must be
    // done below Rust std::net::UdpSocket level.
    raw_socket.set_reuse_address(true)?;
    raw_socket.bind(&SockAddr::from(address))?;

    let std_socket = raw_socket.into_udp_socket();
    std_socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_socket(std_socket)?;
    debug!("UDPListener::try_bind with address {:?}", socket.local_addr());

    Ok(Self {
      socket,
      token,
      receive_buffer: BytesMut::with_capacity(MESSAGE_BUFFER_ALLOCATION_CHUNK),
    })
  }

  /// Binds to `0.0.0.0:port` and joins the multicast group.
  pub fn new_multicast(token: Token, group: Ipv4Addr, port: u16) -> io::Result<Self> {
    let listener = Self::try_bind(token, IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)?;
    listener.join_multicast(&group)?;
    Ok(listener)
  }

  pub fn token(&self) -> Token {
    self.token
  }

  pub fn mio_socket(&mut self) -> &mut UdpSocket {
    &mut self.socket
  }

  pub fn port(&self) -> u16 {
    match self.socket.local_addr() {
      Ok(add) => add.port(),
      _ => 0,
    }
  }

  fn ensure_receive_buffer_capacity(&mut self) {
    if self.receive_buffer.capacity() < MAX_MESSAGE_SIZE {
      self.receive_buffer = BytesMut::with_capacity(MESSAGE_BUFFER_ALLOCATION_CHUNK);
      debug!("ensure_receive_buffer_capacity - reallocated receive_buffer");
    }
    self.receive_buffer.resize(MAX_MESSAGE_SIZE, 0);
    trace!(
      "ensure_receive_buffer_capacity - {} bytes left",
      self.receive_buffer.capacity()
    );
  }

  /// Get all messages waiting in the socket. Polling is edge-triggered, so
  /// the socket is drained until it would block.
  pub fn get_messages(&mut self) -> Vec<Bytes> {
    let mut messages = Vec::with_capacity(4);
    self.ensure_receive_buffer_capacity();
    while let Ok(nbytes) = self.socket.recv(&mut self.receive_buffer) {
      self.receive_buffer.truncate(nbytes);
      // Pad to a multiple of 4 so that the next message starts aligned.
      while self.receive_buffer.len() % 4 != 0 {
        self.receive_buffer.extend_from_slice(&[0xCC]);
      }
      let mut message = self.receive_buffer.split_to(self.receive_buffer.len());
      self.ensure_receive_buffer_capacity();
      message.truncate(nbytes); // discard (hide) padding
      messages.push(message.freeze());
    }
    messages
  }

  pub fn join_multicast(&self, address: &Ipv4Addr) -> io::Result<()> {
    if address.is_multicast() {
      return self
        .socket
        .join_multicast_v4(address, &Ipv4Addr::UNSPECIFIED);
    }
    io::Result::Err(io::Error::new(
      io::ErrorKind::Other,
      "Not a multicast address",
    ))
  }

  pub fn leave_multicast(&self, address: &Ipv4Addr) -> io::Result<()> {
    if address.is_multicast() {
      return self
        .socket
        .leave_multicast_v4(address, &Ipv4Addr::UNSPECIFIED);
    }
    io::Result::Err(io::Error::new(
      io::ErrorKind::Other,
      "Not a multicast address",
    ))
  }
}
