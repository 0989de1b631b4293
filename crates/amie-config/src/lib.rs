//! Configuration, folder layout, and logging bootstrap for the AMIE relay.

mod config;
mod error;
mod folders;
mod logging;

pub use config::{
    AmieSettings, BrokerSettings, Config, ReconnectSettings, DEFAULT_DONE_PREFIX,
    DEFAULT_LOG_LEVEL, DEFAULT_POLL_INTERVAL_SECS,
};
pub use error::{ConfigError, ConfigResult};
pub use folders::Folders;
pub use logging::{init_logging, LOG_FILE_NAME};
