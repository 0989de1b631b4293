//! Outbound relay: `out_folder` to the write exchange.

use crate::broker::{BrokerChannel, Confirm, Publication};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult, StoreResult};
use crate::shutdown::{is_set, signalled};
use crate::store;
use amie_packet::{inspect, priority, InvalidPacket, PacketVerdict};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to one outbox file.
#[derive(Debug)]
pub enum OutboundOutcome {
    /// Confirmed by the broker and moved to `wait_folder` or `done_folder`.
    Sent { destination: PathBuf },
    /// Invalid; never published. `destination` is `None` when the move to
    /// `out_failed_folder` failed and the file is still in the outbox.
    Rejected {
        reason: InvalidPacket,
        destination: Option<PathBuf>,
    },
    /// Still in `out_folder`; picked up again on a later scan.
    Deferred { reason: String },
}

/// Counts from one pass over the outbox.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub sent: usize,
    pub rejected: usize,
    pub deferred: usize,
}

impl ScanSummary {
    fn record(&mut self, outcome: &OutboundOutcome) {
        match outcome {
            OutboundOutcome::Sent { .. } => self.sent += 1,
            OutboundOutcome::Rejected { .. } => self.rejected += 1,
            OutboundOutcome::Deferred { .. } => self.deferred += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.sent + self.rejected + self.deferred
    }
}

/// Publishes outbox files one at a time, each confirmed before the next.
pub struct OutboundRelay {
    config: Arc<RelayConfig>,
    channel: Arc<dyn BrokerChannel>,
}

impl OutboundRelay {
    pub fn new(config: Arc<RelayConfig>, channel: Arc<dyn BrokerChannel>) -> Self {
        Self { config, channel }
    }

    /// Scan, then sleep `poll_interval`, until `stop` is set.
    ///
    /// Returns `Err(PublishRejected)` on a negative confirm; the file stays
    /// in the outbox for the next session.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> RelayResult<()> {
        info!(
            out_folder = %self.config.folders.out_folder.display(),
            exchange = %self.config.write_exchange,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbound relay started"
        );

        loop {
            if is_set(&stop) {
                return Ok(());
            }

            let summary = self.scan_once(&stop).await?;
            if summary.total() > 0 {
                info!(
                    sent = summary.sent,
                    rejected = summary.rejected,
                    deferred = summary.deferred,
                    "Outbox scan complete"
                );
            }

            tokio::select! {
                _ = signalled(&mut stop) => return Ok(()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Process every file currently in the outbox, checking `stop` between files.
    pub async fn scan_once(&self, stop: &watch::Receiver<bool>) -> RelayResult<ScanSummary> {
        let mut summary = ScanSummary::default();

        let out_folder = self.config.folders.out_folder.clone();
        let files = match store::run_blocking(move || store::list_outbox(&out_folder)).await {
            Ok(files) => files,
            Err(e) => {
                error!(
                    out_folder = %self.config.folders.out_folder.display(),
                    error = %e,
                    "Could not list outbox"
                );
                return Ok(summary);
            }
        };

        for path in files {
            if is_set(stop) {
                break;
            }
            let outcome = self.process_file(&path).await?;
            summary.record(&outcome);
        }

        Ok(summary)
    }

    /// Validate, publish, and relocate one file.
    pub async fn process_file(&self, path: &Path) -> RelayResult<OutboundOutcome> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read outbox file");
                return Ok(OutboundOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        };

        info!(path = %path.display(), "SENDING");
        debug!(
            path = %path.display(),
            payload = %String::from_utf8_lossy(&content),
            "Outbound payload"
        );

        let packet = match inspect(&content, &self.config.rules) {
            PacketVerdict::Valid(packet) => packet,
            PacketVerdict::Invalid(reason) => return Ok(self.reject(path, reason).await),
        };

        let publication = Publication {
            routing_key: self.config.routing_key.clone(),
            priority: priority(&packet.packet_type, &self.config.rules),
            payload: content,
        };
        let packet_priority = publication.priority;

        match self.channel.publish(publication).await {
            Ok(Confirm::Ack) => {}
            Ok(Confirm::Nack) => {
                error!(
                    path = %path.display(),
                    packet_type = %packet.packet_type,
                    "Broker rejected publish, ending session"
                );
                return Err(RelayError::PublishRejected(path.to_path_buf()));
            }
            Err(e @ RelayError::Protocol(_)) => return Err(e),
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Send error, leaving file in outbox"
                );
                return Ok(OutboundOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = self.config.sent_folder(&file_name).to_path_buf();

        match relocate(path, &target).await {
            Ok(destination) => {
                info!(
                    path = %path.display(),
                    destination = %destination.display(),
                    packet_type = %packet.packet_type,
                    priority = packet_priority,
                    "SENT"
                );
                Ok(OutboundOutcome::Sent { destination })
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    target = %target.display(),
                    error = %e,
                    "Published but could not move file, it will be sent again"
                );
                Ok(OutboundOutcome::Deferred {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn reject(&self, path: &Path, reason: InvalidPacket) -> OutboundOutcome {
        let moved = relocate(path, &self.config.folders.out_failed_folder).await;
        match &moved {
            Ok(destination) => error!(
                path = %path.display(),
                destination = %destination.display(),
                reason = %reason,
                "Did not send, invalid packet"
            ),
            Err(e) => error!(
                path = %path.display(),
                reason = %reason,
                error = %e,
                "Did not send, invalid packet, and could not move it to out_failed"
            ),
        }
        OutboundOutcome::Rejected {
            reason,
            destination: moved.ok(),
        }
    }
}

async fn relocate(path: &Path, dest_dir: &Path) -> StoreResult<PathBuf> {
    let path = path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    store::run_blocking(move || store::relocate(&path, &dest_dir)).await
}
