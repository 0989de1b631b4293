//! Validation inputs taken from the deployment configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The slice of configuration the validator and priority resolver read.
///
/// Site identities are optional on purpose: a deployment that forgot to
/// configure them fails per-packet validation instead of failing to load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRules {
    /// Recognized packet types mapped to their optional publish priority.
    pub valid_packet_types: BTreeMap<String, Option<u8>>,
    /// This site's name.
    pub local_site: Option<String>,
    /// The partner site's name.
    pub remote_site: Option<String>,
}

impl PacketRules {
    /// Whether `packet_type` is on the configured allow-list.
    pub fn is_valid_type(&self, packet_type: &str) -> bool {
        self.valid_packet_types.contains_key(packet_type)
    }
}
