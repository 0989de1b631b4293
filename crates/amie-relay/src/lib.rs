//! AMIE relay: at-least-once transfer between a broker and packet folders.
//!
//! Inbound packets arrive on a queue and are written to `received_folder`
//! before they are acknowledged. Outbound packets are files in `out_folder`
//! that are relocated only after the broker confirms their publish.
//!
//! # Core Invariants
//!
//! 1. **Persist before ACK**: an inbound delivery is acknowledged only after
//!    its file is durably in `received_folder`, or when it is invalid
//! 2. **Confirm before move**: an outbox file leaves `out_folder` only after a
//!    positive publisher confirm, or when it is invalid
//! 3. **One in flight outbound**: each publish waits for its confirm before
//!    the next file is read
//! 4. **Crash-safe**: a crash at any point leaves either an unacknowledged
//!    delivery (redelivered) or a file still in `out_folder` (republished)
//!
//! # Architecture
//!
//! ```text
//!  read queue --deliver--> InboundRelay --write--> in/ --rename--> received/
//!       ^                       |
//!       |________ ack _________|
//!
//!  out/ --scan--> OutboundRelay --publish--> write exchange
//!                       |  ^________ confirm ________|
//!                       +--rename--> wait/ | done/ | out_failed/
//! ```
//!
//! Both relays share one broker channel per session. The [`Supervisor`]
//! rebuilds the session when either relay reports a lost channel or a
//! rejected publish.

pub mod amqp;
pub mod broker;
pub mod config;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod shutdown;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod tests;

pub use amqp::AmqpConnector;
pub use broker::{
    BrokerChannel, BrokerConnector, BrokerSession, Confirm, Delivery, DeliveryStream,
    DeliveryTag, Publication,
};
pub use config::{ReconnectPolicy, RelayConfig};
pub use error::{RelayError, RelayResult, StoreError, StoreResult};
pub use inbound::{InboundOutcome, InboundRelay};
pub use outbound::{OutboundOutcome, OutboundRelay, ScanSummary};
pub use shutdown::ShutdownHandle;
pub use supervisor::Supervisor;
