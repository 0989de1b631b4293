//! Packet error types.

use thiserror::Error;

/// Error raised while decoding a payload into an [`crate::Envelope`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The payload is not parseable markup or has no `amie` root element.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl PacketError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }
}

/// Result type for packet operations.
pub type PacketResult<T> = Result<T, PacketError>;
