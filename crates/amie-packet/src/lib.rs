//! AMIE packet envelope parsing and validation.
//!
//! Everything in this crate is a pure function of the payload bytes and a
//! [`PacketRules`] value. Both relays call [`inspect`] on every read; no
//! packet state outlives one relay iteration.
//!
//! ```text
//! payload -> Envelope::parse -> classify -> validate_fields -> ValidPacket
//!                 |                |              |
//!             Malformed      Unclassified    FieldMissing
//! ```

mod envelope;
mod error;
mod naming;
mod priority;
mod rules;
mod validate;

pub use envelope::{Envelope, Node, ENVELOPE_ELEMENT, TEXT_KEY};
pub use error::{PacketError, PacketResult};
pub use naming::received_file_name;
pub use priority::{priority, DEFAULT_PRIORITY};
pub use rules::PacketRules;
pub use validate::{
    classify, inspect, validate_fields, Classification, ClassificationError, InvalidPacket,
    MissingField, PacketVerdict, ValidPacket, SUPPORTED_VERSION, VERSION_KEY,
};
