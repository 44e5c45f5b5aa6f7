use std::io;

use log::warn;

use crate::structure::locator::Locator;

/// Sends serialized RTPS messages. Inbound packets are handed to the
/// participant by whoever owns the receiving side.
pub trait Transport {
  fn send(&self, buffer: &[u8], locator: &Locator) -> io::Result<()>;

  /// Sends to each locator. Unreachable destinations are logged, not
  /// reported: reliability recovers from them.
  fn send_to_locator_list(&self, buffer: &[u8], locators: &[Locator]) {
    for locator in locators {
      if let Err(e) = self.send(buffer, locator) {
        warn!("send to {:?} failed: {:?}", locator, e);
      }
    }
  }
}
