//! Packet classification and required-field validation.

use crate::{Envelope, Node, PacketError, PacketRules};
use thiserror::Error;

/// The only protocol version this relay accepts.
pub const SUPPORTED_VERSION: &str = "1.0";

/// Envelope key carrying the protocol version.
pub const VERSION_KEY: &str = "@version";

/// Packet type and version of a classified envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub packet_type: String,
    pub version: String,
}

/// Why an envelope could not be classified.
///
/// Version and type are checked independently, so one envelope can carry
/// several of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("wrong version {0}")]
    UnsupportedVersion(String),

    #[error("version marker missing")]
    MissingVersion,

    #[error("invalid type {0}")]
    UnknownType(String),

    #[error("packet type missing")]
    MissingType,

    #[error("more than one packet type: {}", .0.join(", "))]
    AmbiguousType(Vec<String>),
}

/// First required field found absent, in validation order.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    #[error("Header element missing")]
    Header,

    #[error("Originating Site Name element missing")]
    OriginatingSiteName,

    #[error("Configuration Local Site is missing")]
    LocalSite,

    #[error("Configuration Remote Site is missing")]
    RemoteSite,

    #[error("Transaction ID is missing")]
    TransactionId,

    #[error("Packet ID is missing")]
    PacketId,
}

impl MissingField {
    /// Field name as it appears in the packet or configuration.
    pub fn name(&self) -> &'static str {
        match self {
            MissingField::Header => "header",
            MissingField::OriginatingSiteName => "originating_site_name",
            MissingField::LocalSite => "local_site",
            MissingField::RemoteSite => "remote_site",
            MissingField::TransactionId => "transaction_id",
            MissingField::PacketId => "packet_id",
        }
    }

    /// Whether the gap is in local configuration rather than in the packet.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MissingField::LocalSite | MissingField::RemoteSite)
    }
}

/// A packet that passed classification and field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPacket {
    pub packet_type: String,
    pub version: String,
    pub originating_site_name: String,
    pub transaction_id: String,
    pub packet_id: String,
    pub local_site: String,
    pub remote_site: String,
}

/// Why a payload was judged invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidPacket {
    #[error("{0}")]
    Malformed(PacketError),

    #[error("type or version invalid: {}", join_errors(.0))]
    Unclassified(Vec<ClassificationError>),

    #[error("required header fields missing: {0}")]
    FieldMissing(MissingField),
}

impl InvalidPacket {
    /// Whether local misconfiguration, not the sender, caused the verdict.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, InvalidPacket::FieldMissing(field) if field.is_configuration())
    }
}

fn join_errors(errors: &[ClassificationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of [`inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketVerdict {
    Valid(ValidPacket),
    Invalid(InvalidPacket),
}

/// Parse, classify and validate a raw payload in one pass.
pub fn inspect(payload: &[u8], rules: &PacketRules) -> PacketVerdict {
    let envelope = match Envelope::parse(payload) {
        Ok(envelope) => envelope,
        Err(e) => return PacketVerdict::Invalid(InvalidPacket::Malformed(e)),
    };

    let classification = match classify(&envelope, rules) {
        Ok(classification) => classification,
        Err(errors) => return PacketVerdict::Invalid(InvalidPacket::Unclassified(errors)),
    };

    match validate_fields(&envelope, classification, rules) {
        Ok(packet) => PacketVerdict::Valid(packet),
        Err(field) => PacketVerdict::Invalid(InvalidPacket::FieldMissing(field)),
    }
}

/// Determine packet type and version from the envelope's top-level keys.
///
/// Namespace declarations (`@xmlns`, `@xmlns:*`) are not type keys.
pub fn classify(
    envelope: &Envelope,
    rules: &PacketRules,
) -> Result<Classification, Vec<ClassificationError>> {
    let mut errors = Vec::new();

    let version = match envelope.get(VERSION_KEY).map(|node| node.as_text()) {
        Some(Some(version)) if version == SUPPORTED_VERSION => Some(version.to_string()),
        Some(Some(version)) => {
            errors.push(ClassificationError::UnsupportedVersion(version.to_string()));
            None
        }
        Some(None) => {
            errors.push(ClassificationError::UnsupportedVersion(String::new()));
            None
        }
        None => {
            errors.push(ClassificationError::MissingVersion);
            None
        }
    };

    let type_keys: Vec<&str> = envelope
        .keys()
        .filter(|key| *key != VERSION_KEY && !is_namespace_declaration(key))
        .collect();

    let packet_type = match type_keys.as_slice() {
        [] => {
            errors.push(ClassificationError::MissingType);
            None
        }
        [packet_type] if rules.is_valid_type(packet_type) => Some(packet_type.to_string()),
        [packet_type] => {
            errors.push(ClassificationError::UnknownType(packet_type.to_string()));
            None
        }
        many => {
            errors.push(ClassificationError::AmbiguousType(
                many.iter().map(|key| key.to_string()).collect(),
            ));
            None
        }
    };

    match (packet_type, version) {
        (Some(packet_type), Some(version)) if errors.is_empty() => Ok(Classification {
            packet_type,
            version,
        }),
        _ => Err(errors),
    }
}

fn is_namespace_declaration(key: &str) -> bool {
    key == "@xmlns" || key.starts_with("@xmlns:")
}

/// Check required header and configuration fields, short-circuiting on the
/// first one missing.
pub fn validate_fields(
    envelope: &Envelope,
    classification: Classification,
    rules: &PacketRules,
) -> Result<ValidPacket, MissingField> {
    let header = envelope
        .get(&classification.packet_type)
        .and_then(|body| body.get("header"))
        .filter(|header| matches!(header, Node::Map(_)))
        .ok_or(MissingField::Header)?;

    let originating_site_name =
        required_text(header, "originating_site_name").ok_or(MissingField::OriginatingSiteName)?;
    let local_site = configured(rules.local_site.as_deref()).ok_or(MissingField::LocalSite)?;
    let remote_site = configured(rules.remote_site.as_deref()).ok_or(MissingField::RemoteSite)?;
    let transaction_id =
        required_text(header, "transaction_id").ok_or(MissingField::TransactionId)?;
    let packet_id = required_text(header, "packet_id").ok_or(MissingField::PacketId)?;

    Ok(ValidPacket {
        packet_type: classification.packet_type,
        version: classification.version,
        originating_site_name,
        transaction_id,
        packet_id,
        local_site,
        remote_site,
    })
}

fn required_text(header: &Node, key: &str) -> Option<String> {
    header
        .get(key)
        .and_then(Node::as_text)
        .and_then(|value| configured(Some(value)))
}

fn configured(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
