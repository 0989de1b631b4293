//! Behavior tests for the relay.
//!
//! - `harness.rs`   - mock broker channel, delivery feed, connector, folder tree
//! - `inbound.rs`   - persist before ack, invalid packets, held deliveries
//! - `outbound.rs`  - confirm before move, routing to wait/done/out_failed
//! - `supervisor.rs` - session breaks, reconnect backoff, shutdown

pub(crate) mod harness;
