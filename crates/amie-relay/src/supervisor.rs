//! Session supervisor.
//!
//! Runs the inbound and outbound relays on one broker session and
//! reconnects with backoff whenever the session breaks.

use crate::broker::{
    BrokerChannel, BrokerConnector, BrokerSession, Confirm, DeliveryTag, Publication,
};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::inbound::InboundRelay;
use crate::outbound::OutboundRelay;
use crate::shutdown::{signalled, ShutdownHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

enum SessionExit {
    Shutdown,
    Broken {
        reason: RelayError,
        productive: bool,
        lifetime: Duration,
    },
}

/// Channel wrapper that notes whether the session got any work done.
struct TrackedChannel {
    inner: Arc<dyn BrokerChannel>,
    progressed: AtomicBool,
}

impl TrackedChannel {
    fn new(inner: Arc<dyn BrokerChannel>) -> Self {
        Self {
            inner,
            progressed: AtomicBool::new(false),
        }
    }

    /// An ack went through or a publish was confirmed.
    fn progressed(&self) -> bool {
        self.progressed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerChannel for TrackedChannel {
    async fn ack(&self, delivery_tag: DeliveryTag) -> RelayResult<()> {
        self.inner.ack(delivery_tag).await?;
        self.progressed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, publication: Publication) -> RelayResult<Confirm> {
        let confirm = self.inner.publish(publication).await?;
        if confirm == Confirm::Ack {
            self.progressed.store(true, Ordering::SeqCst);
        }
        Ok(confirm)
    }

    async fn close(&self) -> RelayResult<()> {
        self.inner.close().await
    }
}

/// Owns the broker connector and the shutdown flag.
pub struct Supervisor<C> {
    config: Arc<RelayConfig>,
    connector: C,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<C: BrokerConnector> Supervisor<C> {
    pub fn new(config: RelayConfig, connector: C) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            connector,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Handle that stops [`Supervisor::run`] after in-flight work.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown.clone())
    }

    /// Connect and relay until shutdown.
    ///
    /// The first connect is not retried: a broker that is unreachable or
    /// missing the exchange or queue at startup is a deployment error.
    ///
    /// Failures are counted across sessions. A session that acked or got
    /// a publish confirmed, or that lasted at least `max_delay`, clears
    /// the count; a broker that accepts connections and then drops them
    /// keeps escalating the backoff until the policy is exhausted.
    pub async fn run(&self) -> RelayResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut session = self.connector.connect().await?;
        let mut failures: u32 = 0;

        loop {
            match self.run_session(session, &mut shutdown).await {
                SessionExit::Shutdown => {
                    info!("Relay stopped");
                    return Ok(());
                }
                SessionExit::Broken {
                    reason,
                    productive,
                    lifetime,
                } => {
                    if productive || self.config.reconnect.is_stable(lifetime) {
                        failures = 0;
                    }
                    warn!(
                        error = %reason,
                        productive,
                        lifetime_ms = lifetime.as_millis() as u64,
                        failures,
                        "Broker session ended, reconnecting"
                    );
                }
            }

            session = match self.reconnect(&mut failures, &mut shutdown).await? {
                Some(session) => session,
                None => {
                    info!("Relay stopped while reconnecting");
                    return Ok(());
                }
            };
        }
    }

    async fn run_session(
        &self,
        session: BrokerSession,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionExit {
        let started = Instant::now();
        let BrokerSession {
            channel,
            mut deliveries,
        } = session;
        let tracked = Arc::new(TrackedChannel::new(channel));
        let channel: Arc<dyn BrokerChannel> = tracked.clone();
        let inbound = InboundRelay::new(self.config.clone(), channel.clone());
        let outbound = OutboundRelay::new(self.config.clone(), channel.clone());
        let (stop_tx, stop_rx) = watch::channel(false);

        // Whichever relay ends first stops its sibling at the next safe point.
        let inbound_task = async {
            let result = inbound.run(deliveries.as_mut(), stop_rx.clone()).await;
            stop_tx.send_replace(true);
            result
        };
        let outbound_task = async {
            let result = outbound.run(stop_rx.clone()).await;
            stop_tx.send_replace(true);
            result
        };
        let shutdown_task = async {
            let mut stopped = stop_rx.clone();
            tokio::select! {
                _ = signalled(shutdown) => {
                    info!("Shutdown requested, finishing in-flight work");
                    stop_tx.send_replace(true);
                    true
                }
                _ = signalled(&mut stopped) => false,
            }
        };

        let (inbound_result, outbound_result, shutdown_requested) =
            tokio::join!(inbound_task, outbound_task, shutdown_task);

        if let Err(e) = channel.close().await {
            warn!(error = %e, "Error closing broker session");
        }

        if let Err(e) = &inbound_result {
            error!(error = %e, "Inbound relay stopped");
        }
        if let Err(e) = &outbound_result {
            error!(error = %e, "Outbound relay stopped");
        }

        if shutdown_requested {
            return SessionExit::Shutdown;
        }
        let reason = match (inbound_result, outbound_result) {
            (Err(e), _) | (Ok(()), Err(e)) => e,
            (Ok(()), Ok(())) => RelayError::ConnectionLost(
                "relays stopped without a shutdown request".to_string(),
            ),
        };
        SessionExit::Broken {
            reason,
            productive: tracked.progressed(),
            lifetime: started.elapsed(),
        }
    }

    /// Retry connecting with backoff, counting each attempt in `failures`.
    /// `Ok(None)` means shutdown was requested.
    async fn reconnect(
        &self,
        failures: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RelayResult<Option<BrokerSession>> {
        let policy = self.config.reconnect;

        loop {
            if policy.is_exhausted(*failures) {
                error!(failures = *failures, "Reconnect attempts exhausted, giving up");
                return Err(RelayError::ReconnectExhausted(*failures));
            }

            *failures = failures.saturating_add(1);
            let attempt = *failures;
            let delay = policy.delay_for(attempt);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnect"
            );

            tokio::select! {
                _ = signalled(shutdown) => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connector.connect().await {
                Ok(session) => {
                    info!(attempt, "Reconnected to broker");
                    return Ok(Some(session));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect failed");
                }
            }
        }
    }
}
