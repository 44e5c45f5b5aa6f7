use mio::Token;
use static_assertions::const_assert;

// RTPS spec 9.6.1.1 Discovery traffic and 9.6.1.2 User traffic port mapping
pub const PB: u16 = 7400;
pub const DG: u16 = 250;
pub const PG: u16 = 2;

pub const D0: u16 = 0;
pub const D1: u16 = 10;
pub const D2: u16 = 1;
pub const D3: u16 = 11;

/// Default SPDP multicast group.
pub const SPDP_MULTICAST_ADDRESS: [u8; 4] = [239, 255, 0, 1];

/// Domain ids above this do not fit the 16-bit port space.
pub const MAX_DOMAIN_ID: u16 = 232;

const_assert!(PB as u32 + DG as u32 * MAX_DOMAIN_ID as u32 + D3 as u32 <= u16::MAX as u32);

/// Largest participant id whose ports still fit in `domain_id`.
pub fn max_participant_id(domain_id: u16) -> u16 {
  (u16::MAX - PB - DG * domain_id - D3) / PG
}

pub fn spdp_well_known_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D0
}

pub fn spdp_well_known_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D1 + PG * participant_id
}

pub fn user_traffic_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D2
}

pub fn user_traffic_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D3 + PG * participant_id
}

// Poll tokens of the participant event loop. Entity-based tokens are all
// above 0xFF.
pub const STOP_POLL_TOKEN: Token = Token(0);
pub const PARTICIPANT_COMMAND_TOKEN: Token = Token(1);

pub const DISCOVERY_LISTENER_TOKEN: Token = Token(6);
pub const DISCOVERY_MUL_LISTENER_TOKEN: Token = Token(7);
pub const USER_TRAFFIC_LISTENER_TOKEN: Token = Token(8);
pub const USER_TRAFFIC_MUL_LISTENER_TOKEN: Token = Token(9);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_domain_ports() {
    assert_eq!(spdp_well_known_multicast_port(0), 7400);
    assert_eq!(spdp_well_known_unicast_port(0, 0), 7410);
    assert_eq!(spdp_well_known_unicast_port(0, 1), 7412);
    assert_eq!(user_traffic_multicast_port(0), 7401);
    assert_eq!(user_traffic_unicast_port(0, 0), 7411);
    assert_eq!(user_traffic_unicast_port(1, 2), 7665);
  }

  #[test]
  fn last_domain_still_has_participants() {
    let max = max_participant_id(MAX_DOMAIN_ID);
    assert_eq!(max, 62);
    assert_eq!(user_traffic_unicast_port(MAX_DOMAIN_ID, max), 65535);
  }
}
