//! Logging initialization for the relay.
//!
//! Wraps the observability crate so every relay binary writes the same
//! JSONL format to `<log_folder>/amie-relay.jsonl`.

use crate::Config;
use observability::LogConfig;

/// Log file name inside `amie.log_folder`.
pub const LOG_FILE_NAME: &str = "amie-relay.jsonl";

/// Initialize logging for `service_name`.
///
/// `level_override` (from the command line) wins over the configured level;
/// `RUST_LOG` wins over both.
pub fn init_logging(
    config: &Config,
    service_name: &str,
    level_override: Option<&str>,
) -> std::io::Result<()> {
    let level = level_override.unwrap_or(&config.log_level);

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path: config
            .amie
            .log_folder
            .as_ref()
            .map(|folder| folder.join(LOG_FILE_NAME)),
        also_stderr: true,
    })
}
