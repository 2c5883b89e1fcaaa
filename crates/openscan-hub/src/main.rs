//! Headless OpenScanHub daemon.
//!
//! Loads the stored configuration, activates the selected scanner, runs the
//! ADF monitor, folder watcher and FTP receiver, and stops cleanly on Ctrl-C.

use anyhow::Context;
use openscan_core::AppConfig;
use openscan_hub::ScanHub;
use tracing::{info, warn};

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,openscan=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting OpenScanHub v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env().context("loading configuration")?;
    let hub = ScanHub::start(&config)
        .await
        .context("starting scan hub")?;

    if let Some(addr) = hub.ftp_receive_addr().await {
        info!(%addr, "accepting Scan-to-FTP uploads");
    }

    match hub.active_descriptor() {
        Some(scanner) => info!(
            scanner = %scanner.id(),
            name = %scanner.display_name,
            monitor = hub.monitor_running().await,
            "scanner ready"
        ),
        None => {
            warn!("no scanner configured, searching the network");
            let found = hub.discover(hub.discovery_timeout()).await;
            if found.is_empty() {
                warn!("no scanners found");
            }
            for scanner in &found {
                info!(
                    "found {}",
                    serde_json::to_string(scanner).context("serializing descriptor")?
                );
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");
    hub.shutdown().await;
    Ok(())
}
