use std::{cell::RefCell, collections::VecDeque, io, rc::Rc};

use bytes::Bytes;
use log::{debug, trace};

use crate::{network::transport::Transport, rtps::message::Message, structure::locator::Locator};

/// Returns `true` for messages that should be lost.
pub type DropFilter = Box<dyn FnMut(&Locator, &Message) -> bool>;

#[derive(Default)]
struct NetworkInner {
  in_flight: VecDeque<(Locator, Bytes)>,
  drop_filter: Option<DropFilter>,
  sent: usize,
  dropped: usize,
}

/// In-memory network for driving several participants in one thread.
///
/// Sent datagrams are queued with their destination locator. The owner pops
/// them and hands each one to the participants listening on that locator;
/// a multicast locator is handed to every participant that listens on it.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
  inner: Rc<RefCell<NetworkInner>>,
}

impl SimulatedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// A transport that sends into this network.
  pub fn transport(&self) -> Rc<dyn Transport> {
    Rc::new(SimulatedTransport {
      inner: self.inner.clone(),
    })
  }

  pub fn set_drop_filter<F>(&self, filter: F)
  where
    F: FnMut(&Locator, &Message) -> bool + 'static,
  {
    self.inner.borrow_mut().drop_filter = Some(Box::new(filter));
  }

  pub fn clear_drop_filter(&self) {
    self.inner.borrow_mut().drop_filter = None;
  }

  pub fn pop(&self) -> Option<(Locator, Bytes)> {
    self.inner.borrow_mut().in_flight.pop_front()
  }

  pub fn in_flight(&self) -> usize {
    self.inner.borrow().in_flight.len()
  }

  /// Drops everything in flight.
  pub fn clear(&self) {
    self.inner.borrow_mut().in_flight.clear();
  }

  pub fn sent_count(&self) -> usize {
    self.inner.borrow().sent
  }

  pub fn dropped_count(&self) -> usize {
    self.inner.borrow().dropped
  }
}

struct SimulatedTransport {
  inner: Rc<RefCell<NetworkInner>>,
}

impl Transport for SimulatedTransport {
  fn send(&self, buffer: &[u8], locator: &Locator) -> io::Result<()> {
    let bytes = Bytes::copy_from_slice(buffer);
    let mut inner = self.inner.borrow_mut();
    inner.sent += 1;
    if let Some(filter) = inner.drop_filter.as_mut() {
      if let Ok(message) = Message::read_from_buffer(&bytes) {
        if filter(locator, &message) {
          debug!("SimulatedNetwork: dropped message to {:?}", locator);
          inner.dropped += 1;
          return Ok(());
        }
      }
    }
    trace!("SimulatedNetwork: {} bytes to {:?}", bytes.len(), locator);
    inner.in_flight.push_back((*locator, bytes));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::net::SocketAddr;

  use super::*;
  use crate::{
    messages::header::Header,
    structure::guid::GuidPrefix,
  };

  fn loc(port: u16) -> Locator {
    Locator::from(SocketAddr::new("127.0.0.1".parse().unwrap(), port))
  }

  fn empty_message(prefix: [u8; 12]) -> Vec<u8> {
    use speedy::{Endianness, Writable};
    Message::new(Header::new(GuidPrefix::new(prefix)))
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .unwrap()
  }

  #[test]
  fn queues_in_send_order() {
    let net = SimulatedNetwork::new();
    let t = net.transport();
    t.send(&[1], &loc(1)).unwrap();
    t.send(&[2], &loc(2)).unwrap();
    assert_eq!(net.in_flight(), 2);
    assert_eq!(net.pop(), Some((loc(1), Bytes::from_static(&[1]))));
    assert_eq!(net.pop(), Some((loc(2), Bytes::from_static(&[2]))));
    assert_eq!(net.pop(), None);
  }

  #[test]
  fn drop_filter_sees_parsed_messages() {
    let net = SimulatedNetwork::new();
    let t = net.transport();
    net.set_drop_filter(|_, m| m.header.guid_prefix == GuidPrefix::new([7; 12]));
    t.send(&empty_message([7; 12]), &loc(1)).unwrap();
    t.send(&empty_message([8; 12]), &loc(1)).unwrap();
    assert_eq!(net.sent_count(), 2);
    assert_eq!(net.dropped_count(), 1);
    assert_eq!(net.in_flight(), 1);

    net.clear_drop_filter();
    t.send(&empty_message([7; 12]), &loc(1)).unwrap();
    assert_eq!(net.in_flight(), 2);
  }
}
