//! Broker seam.
//!
//! The relays talk to the broker only through these traits so the
//! at-least-once rules can be exercised without a live broker. The AMQP
//! implementation lives in [`crate::amqp`].

use crate::error::RelayResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Broker-assigned identifier of a delivery on its channel.
pub type DeliveryTag = u64;

/// One message handed to us by the broker, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: DeliveryTag,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// One message to publish to the write exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub priority: u8,
}

impl Publication {
    /// Value of the `message_length` header.
    pub fn message_length(&self) -> usize {
        self.payload.len()
    }
}

/// Publisher confirm outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    Ack,
    Nack,
}

/// A confirm-mode channel shared by both relays.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Acknowledge one delivery (never multiple).
    async fn ack(&self, delivery_tag: DeliveryTag) -> RelayResult<()>;

    /// Publish and wait for the broker's confirm.
    ///
    /// `Err` means the outcome is unknown; callers must treat the message
    /// as unsent.
    async fn publish(&self, publication: Publication) -> RelayResult<Confirm>;

    /// Close the channel and its connection.
    async fn close(&self) -> RelayResult<()>;
}

/// Deliveries from the read queue, in broker order.
#[async_trait]
pub trait DeliveryStream: Send {
    /// The next delivery, or `None` once the consumer is cancelled.
    async fn next_delivery(&mut self) -> Option<RelayResult<Delivery>>;
}

/// An open channel and the consumer running on it.
pub struct BrokerSession {
    pub channel: Arc<dyn BrokerChannel>,
    pub deliveries: Box<dyn DeliveryStream>,
}

/// Opens sessions.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> RelayResult<BrokerSession>;
}
