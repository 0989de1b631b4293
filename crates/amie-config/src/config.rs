//! Relay configuration, loaded once from YAML at startup.

use crate::{ConfigError, ConfigResult, Folders};
use amie_packet::PacketRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default delay between outbox scans.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 4;

/// Filename prefix of packets that end a conversation.
pub const DEFAULT_DONE_PREFIX: &str = "response.";

/// Environment variable overriding `log_level`.
const LOG_LEVEL_ENV: &str = "AMIE_LOG_LEVEL";

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Site identities, folders, and exchange names.
    pub amie: AmieSettings,
    /// Broker connection parameters.
    #[serde(default)]
    pub message_queue: BrokerSettings,
    /// Recognized packet types and their publish priority.
    #[serde(default)]
    pub valid_packet_types: BTreeMap<String, Option<u8>>,
    /// Reconnect policy after a lost channel or rejected publish.
    #[serde(default)]
    pub relay: ReconnectSettings,
}

/// The `amie` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmieSettings {
    #[serde(default)]
    pub local_site: Option<String>,
    #[serde(default)]
    pub remote_site: Option<String>,

    /// Inbound staging folder.
    pub in_folder: PathBuf,
    /// Terminal store for received packets.
    pub received_folder: PathBuf,
    /// Outbox scanned by the outbound relay.
    pub out_folder: PathBuf,
    /// Outbox files that failed validation.
    pub out_failed_folder: PathBuf,
    /// Published files awaiting a correlated reply.
    pub wait_folder: PathBuf,
    /// Published files that complete a conversation.
    pub done_folder: PathBuf,
    /// Where the JSONL log file is written.
    #[serde(default)]
    pub log_folder: Option<PathBuf>,

    /// Exchange we publish to; also the routing key base.
    pub write_exchange: String,
    /// Base name of the queue we consume (`<read_exchange>.queue`).
    pub read_exchange: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Outbox filenames starting with any of these go to `done_folder`.
    #[serde(default = "default_done_prefixes")]
    pub done_prefixes: Vec<String>,
    /// Acknowledge inbound packets invalidated by missing site configuration.
    #[serde(default = "default_true")]
    pub ack_on_config_error: bool,
    /// Create missing folders at startup instead of refusing to start.
    #[serde(default)]
    pub create_folders: bool,
}

/// The `message_queue` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_credential", alias = "username")]
    pub user: String,
    #[serde(default = "default_credential", alias = "pass")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default, alias = "ssl")]
    pub tls: bool,
    /// Unacknowledged deliveries the broker may hand us at once.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    #[serde(default)]
    pub connection_name: Option<String>,
}

/// The `relay` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Consecutive failed attempts before giving up; 0 retries forever.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_done_prefixes() -> Vec<String> {
    vec![DEFAULT_DONE_PREFIX.to_string()]
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_credential() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_prefetch() -> u16 {
    1
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            user: default_credential(),
            password: default_credential(),
            vhost: default_vhost(),
            tls: false,
            prefetch: default_prefetch(),
            connection_name: None,
        }
    }
}

impl BrokerSettings {
    /// Port to dial, defaulting by scheme.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 5671 } else { 5672 })
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl Config {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without validating it.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML text without validating it.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var(LOG_LEVEL_ENV) {
            if !log_level.trim().is_empty() {
                self.log_level = log_level.trim().to_string();
            }
        }
    }

    /// Reject configurations the relay cannot run with.
    ///
    /// Missing site identities are not rejected here; see [`Config::warnings`].
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, path) in self.folders().named() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("amie.{name} is empty")));
            }
        }
        if self.amie.write_exchange.trim().is_empty() {
            return Err(ConfigError::Invalid("amie.write_exchange is empty".to_string()));
        }
        if self.amie.read_exchange.trim().is_empty() {
            return Err(ConfigError::Invalid("amie.read_exchange is empty".to_string()));
        }
        if self.valid_packet_types.is_empty() {
            return Err(ConfigError::Invalid(
                "valid_packet_types lists no packet types".to_string(),
            ));
        }
        if self.amie.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "amie.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.message_queue.prefetch == 0 {
            return Err(ConfigError::Invalid(
                "message_queue.prefetch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Non-fatal problems worth logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if is_blank(self.amie.local_site.as_deref()) {
            warnings.push(
                "amie.local_site is not configured; every packet will fail validation".to_string(),
            );
        }
        if is_blank(self.amie.remote_site.as_deref()) {
            warnings.push(
                "amie.remote_site is not configured; every packet will fail validation"
                    .to_string(),
            );
        }
        if self.amie.done_prefixes.is_empty() {
            warnings.push(
                "amie.done_prefixes is empty; every published file will wait for a reply"
                    .to_string(),
            );
        }
        warnings
    }

    /// The inputs the packet validator reads.
    pub fn packet_rules(&self) -> PacketRules {
        PacketRules {
            valid_packet_types: self.valid_packet_types.clone(),
            local_site: self.amie.local_site.clone(),
            remote_site: self.amie.remote_site.clone(),
        }
    }

    /// The six pipeline folders.
    pub fn folders(&self) -> Folders {
        Folders {
            in_folder: self.amie.in_folder.clone(),
            received_folder: self.amie.received_folder.clone(),
            out_folder: self.amie.out_folder.clone(),
            out_failed_folder: self.amie.out_failed_folder.clone(),
            wait_folder: self.amie.wait_folder.clone(),
            done_folder: self.amie.done_folder.clone(),
        }
    }

    /// Queue consumed by the inbound relay.
    pub fn read_queue(&self) -> String {
        format!("{}.queue", self.amie.read_exchange)
    }

    /// Routing key attached to every outbound publish.
    pub fn routing_key(&self) -> String {
        format!("{}.queue", self.amie.write_exchange)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |value| value.trim().is_empty())
}
