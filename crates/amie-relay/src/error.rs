//! Error types for the relay.

use std::path::PathBuf;
use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// AMQP connection, channel, or protocol error
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// IO error outside the folder store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] amie_config::ConfigError),

    /// Folder store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The broker negatively confirmed a publish
    #[error("Broker rejected publish of {}", .0.display())]
    PublishRejected(PathBuf),

    /// The broker answered outside the protocol we negotiated
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The delivery stream ended or the connection dropped
    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    /// A delivery was deliberately left unacknowledged
    #[error("Delivery {delivery_tag} left unacknowledged: {reason}")]
    DeliveryHeld { delivery_tag: u64, reason: String },

    /// Reconnect attempts ran out
    #[error("Gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Folder store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error while writing, syncing, or moving a file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The target path is already taken
    #[error("Refusing to overwrite {}", .0.display())]
    Collision(PathBuf),

    /// The path has no usable file name
    #[error("Invalid file name: {}", .0.display())]
    InvalidFileName(PathBuf),
}

/// Result type for folder store operations.
pub type StoreResult<T> = Result<T, StoreError>;
