//! AMIE relay binary entry point.
//!
//! Usage: amie-relay --config <path> [--log-level <level>]

use amie_config::{init_logging, Config};
use amie_relay::{AmqpConnector, RelayConfig, RelayResult, ShutdownHandle, Supervisor};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// AMIE relay: moves AMIE packets between a message broker and local folders.
#[derive(Parser, Debug)]
#[command(name = "amie-relay")]
#[command(about = "At-least-once relay between an AMQP broker and AMIE packet folders")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "AMIE_RELAY_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> RelayResult<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    init_logging(&config, "amie-relay", args.log_level.as_deref())?;

    info!(
        config = %args.config.display(),
        local_site = config.amie.local_site.as_deref().unwrap_or(""),
        remote_site = config.amie.remote_site.as_deref().unwrap_or(""),
        "AMIE relay starting"
    );
    for warning in config.warnings() {
        warn!("{warning}");
    }

    for created in config.folders().ensure(config.amie.create_folders)? {
        info!(path = %created.display(), "Created folder");
    }

    let supervisor = Supervisor::new(
        RelayConfig::from_config(&config),
        AmqpConnector::new(&config),
    );
    tokio::spawn(wait_for_signal(supervisor.shutdown_handle()));

    if let Err(e) = supervisor.run().await {
        error!(error = %e, "AMIE relay exited");
        return Err(e);
    }

    info!("AMIE relay shut down");
    Ok(())
}

async fn wait_for_signal(shutdown: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal");
    shutdown.shutdown();
}
