use std::time::Duration;

use crate::{discovery::builtin_endpoint::BuiltinEndpointSet, structure::guid::EntityId};

// RTPS spec Section 8.4.7.1.1  "Default Timing-Related Values", as tuned for
// user endpoints.
pub const INITIAL_HEARTBEAT_DELAY: Duration = Duration::from_millis(12);
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);
pub const NACK_RESPONSE_DELAY: Duration = Duration::from_millis(5);
pub const NACK_SUPPRESSION_DURATION: Duration = Duration::from_millis(0);

pub const INITIAL_ACKNACK_DELAY: Duration = Duration::from_millis(70);
pub const HEARTBEAT_RESPONSE_DELAY: Duration = Duration::from_millis(5);
pub const HEARTBEAT_SUPPRESSION_DURATION: Duration = Duration::from_millis(0);

/// Changes a reliable reader holds per writer while waiting for a missing
/// predecessor.
pub const MAX_OUT_OF_ORDER_CHANGES: usize = 256;

/// Fragmented samples a reader reassembles at the same time, per writer.
pub const MAX_PARTIAL_SAMPLES: usize = 16;
/// Largest sample that is reassembled from DATA_FRAGs.
pub const MAX_FRAGMENTED_SAMPLE_SIZE: u32 = 16 * 1024 * 1024;

// Builtin SEDP endpoints
pub const SEDP_HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
pub const SEDP_NACK_RESPONSE_DELAY: Duration = Duration::from_millis(100);
pub const SEDP_NACK_SUPPRESSION_DURATION: Duration = Duration::from_millis(10);
pub const SEDP_HEARTBEAT_RESPONSE_DELAY: Duration = Duration::from_millis(10);

// SPDP
pub const PARTICIPANT_LEASE_DURATION: Duration = Duration::from_secs(20);
pub const SPDP_ANNOUNCEMENT_PERIOD: Duration = Duration::from_secs(3);
pub const SPDP_INITIAL_ANNOUNCEMENT_COUNT: u32 = 5;
pub const SPDP_INITIAL_ANNOUNCEMENT_PERIOD: Duration = Duration::from_millis(100);

// WLP: automatic liveliness is asserted this many tenths into the shortest
// lease of the local writers.
pub const WLP_ASSERTION_TENTHS_OF_LEASE: u32 = 7;

// Helper list for matching remote built-in writers to local built-in readers.
// (remote writer, local reader, flag the remote must announce)
pub const STANDARD_BUILTIN_WRITERS_INIT_LIST: &[(EntityId, EntityId, u32)] = &[
  (
    EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
    EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
    BuiltinEndpointSet::PUBLICATIONS_ANNOUNCER,
  ),
  (
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
    BuiltinEndpointSet::SUBSCRIPTIONS_ANNOUNCER,
  ),
  (
    EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER,
    EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_READER,
    BuiltinEndpointSet::PARTICIPANT_MESSAGE_DATA_WRITER,
  ),
];

// Helper list for matching remote built-in readers to local built-in writers.
// (local writer, remote reader, flag the remote must announce)
pub const STANDARD_BUILTIN_READERS_INIT_LIST: &[(EntityId, EntityId, u32)] = &[
  (
    EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
    EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
    BuiltinEndpointSet::PUBLICATIONS_DETECTOR,
  ),
  (
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
    EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
    BuiltinEndpointSet::SUBSCRIPTIONS_DETECTOR,
  ),
  (
    EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER,
    EntityId::P2P_BUILTIN_PARTICIPANT_MESSAGE_READER,
    BuiltinEndpointSet::PARTICIPANT_MESSAGE_DATA_READER,
  ),
];
