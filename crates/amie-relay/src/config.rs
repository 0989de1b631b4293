//! Runtime settings for the relays, derived from the loaded [`Config`].

use amie_config::{Config, Folders, DEFAULT_DONE_PREFIX};
use amie_packet::PacketRules;
use std::path::Path;
use std::time::Duration;

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `attempts` failures exhaust the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }

    /// Whether a session that lived this long clears the failure count.
    pub fn is_stable(&self, lifetime: Duration) -> bool {
        lifetime >= self.max_delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Everything the inbound and outbound relays read at runtime.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub rules: PacketRules,
    pub folders: Folders,
    /// Exchange outbound packets are published to.
    pub write_exchange: String,
    /// Queue inbound packets are consumed from.
    pub read_queue: String,
    /// Routing key attached to every publish.
    pub routing_key: String,
    /// File name prefixes that end a conversation.
    pub done_prefixes: Vec<String>,
    /// Pause between outbox scans.
    pub poll_interval: Duration,
    /// Acknowledge packets that fail only because local sites are unset.
    pub ack_on_config_error: bool,
    pub reconnect: ReconnectPolicy,
}

impl RelayConfig {
    pub fn from_config(config: &Config) -> Self {
        let relay = &config.relay;
        Self {
            rules: config.packet_rules(),
            folders: config.folders(),
            write_exchange: config.amie.write_exchange.clone(),
            read_queue: config.read_queue(),
            routing_key: config.routing_key(),
            done_prefixes: config.amie.done_prefixes.clone(),
            poll_interval: Duration::from_secs(config.amie.poll_interval_secs),
            ack_on_config_error: config.amie.ack_on_config_error,
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(relay.reconnect_initial_delay_ms),
                max_delay: Duration::from_millis(relay.reconnect_max_delay_ms),
                max_attempts: relay.reconnect_max_attempts,
            },
        }
    }

    /// Settings rooted at `base` with short timings, for tests and tooling.
    pub fn under(base: &Path, rules: PacketRules) -> Self {
        Self {
            rules,
            folders: Folders::under(base),
            write_exchange: "xsede.amie".to_string(),
            read_queue: "psc.amie.queue".to_string(),
            routing_key: "xsede.amie.queue".to_string(),
            done_prefixes: vec![DEFAULT_DONE_PREFIX.to_string()],
            poll_interval: Duration::from_millis(20),
            ack_on_config_error: true,
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                max_attempts: 3,
            },
        }
    }

    /// Whether a published file goes to `done_folder` rather than `wait_folder`.
    pub fn ends_conversation(&self, file_name: &str) -> bool {
        self.done_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && file_name.starts_with(prefix.as_str()))
    }

    /// Destination folder for a file whose publish was confirmed.
    pub fn sent_folder(&self, file_name: &str) -> &Path {
        if self.ends_conversation(file_name) {
            &self.folders.done_folder
        } else {
            &self.folders.wait_folder
        }
    }
}
