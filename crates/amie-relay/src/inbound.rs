//! Inbound relay: read queue to `received_folder`.

use crate::broker::{BrokerChannel, Delivery, DeliveryStream};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::shutdown::{is_set, signalled};
use crate::store;
use amie_packet::{inspect, received_file_name, InvalidPacket, PacketVerdict};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// What happened to one delivery.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Written to `received_folder`, then acknowledged.
    Persisted { path: PathBuf },
    /// Invalid; acknowledged without writing anything.
    Discarded { reason: InvalidPacket },
    /// Not acknowledged; the broker redelivers it on the next session.
    Held { reason: String },
}

/// Consumes deliveries one at a time on a shared channel.
pub struct InboundRelay {
    config: Arc<RelayConfig>,
    channel: Arc<dyn BrokerChannel>,
}

impl InboundRelay {
    pub fn new(config: Arc<RelayConfig>, channel: Arc<dyn BrokerChannel>) -> Self {
        Self { config, channel }
    }

    /// Handle deliveries until `stop` is set or the session breaks.
    ///
    /// Returns `Ok` only on stop. A closed stream, a failed ack, or a held
    /// delivery end the session so the broker can redeliver.
    pub async fn run(
        &self,
        deliveries: &mut dyn DeliveryStream,
        mut stop: watch::Receiver<bool>,
    ) -> RelayResult<()> {
        info!(queue = %self.config.read_queue, "Inbound relay started");

        loop {
            if is_set(&stop) {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = signalled(&mut stop) => return Ok(()),
                next = deliveries.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(RelayError::ConnectionLost(
                        "delivery stream closed".to_string(),
                    ))
                }
            };

            let delivery_tag = delivery.delivery_tag;
            if let InboundOutcome::Held { reason } = self.handle(delivery).await? {
                return Err(RelayError::DeliveryHeld {
                    delivery_tag,
                    reason,
                });
            }
        }
    }

    /// Validate, persist, and acknowledge one delivery.
    ///
    /// `Err` means the ack itself failed; the file, if written, stays.
    pub async fn handle(&self, delivery: Delivery) -> RelayResult<InboundOutcome> {
        let Delivery {
            delivery_tag,
            payload,
            redelivered,
        } = delivery;

        let packet = match inspect(&payload, &self.config.rules) {
            PacketVerdict::Valid(packet) => packet,
            PacketVerdict::Invalid(reason) => {
                if reason.is_configuration_fault() && !self.config.ack_on_config_error {
                    error!(
                        delivery_tag,
                        reason = %reason,
                        "Local site configuration incomplete, leaving packet in message queue"
                    );
                    return Ok(InboundOutcome::Held {
                        reason: reason.to_string(),
                    });
                }

                self.channel.ack(delivery_tag).await?;
                error!(
                    delivery_tag,
                    redelivered,
                    reason = %reason,
                    configuration = reason.is_configuration_fault(),
                    "INVALID MESSAGE, acknowledged and dropped"
                );
                debug!(
                    delivery_tag,
                    payload = %String::from_utf8_lossy(&payload),
                    "Dropped payload"
                );
                return Ok(InboundOutcome::Discarded { reason });
            }
        };

        let file_name = received_file_name(&packet, chrono::Utc::now().timestamp());
        let persisted = {
            let config = self.config.clone();
            let file_name = file_name.clone();
            let payload = payload.clone();
            store::run_blocking(move || {
                store::persist_received(&config.folders, &file_name, &payload)
            })
            .await
        };
        let path = match persisted {
            Ok(path) => path,
            Err(e) => {
                error!(
                    delivery_tag,
                    file_name = %file_name,
                    error = %e,
                    "Could not write packet, leaving in message queue"
                );
                return Ok(InboundOutcome::Held {
                    reason: e.to_string(),
                });
            }
        };

        self.channel.ack(delivery_tag).await?;
        info!(
            delivery_tag,
            redelivered,
            packet_type = %packet.packet_type,
            transaction_id = %packet.transaction_id,
            packet_id = %packet.packet_id,
            path = %path.display(),
            "READ"
        );
        debug!(delivery_tag, payload = %String::from_utf8_lossy(&payload), "Received payload");

        Ok(InboundOutcome::Persisted { path })
    }
}
