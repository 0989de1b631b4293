//! Packet type to publish priority lookup.

use crate::PacketRules;

/// Priority used when a type has no configured priority.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Resolve the publish priority for `packet_type`. Never fails.
pub fn priority(packet_type: &str, rules: &PacketRules) -> u8 {
    rules
        .valid_packet_types
        .get(packet_type)
        .copied()
        .flatten()
        .unwrap_or(DEFAULT_PRIORITY)
}
