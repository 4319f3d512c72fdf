//! Cachet relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (generates CA state under ./certs on first run)
//! cachet-server
//!
//! # Start with an explicit configuration file
//! cachet-server --config /etc/cachet/config.yaml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cachet_bins::{BinManager, DEFAULT_CLEANUP_INTERVAL};
use cachet_pki::{CertificateAuthority, RevocationManager};
use cachet_server::{tls, AppState, Config, Server};
use cachet_vault::KeyVault;

#[derive(Parser, Debug)]
#[command(name = "cachet-server")]
#[command(version, about = "Cachet relay server - certificate-gated bin messaging")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is not set.
    #[arg(long, default_value = "cachet=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting cachet-server"
    );

    let config = Config::load(&args.config)?;
    let addr = config.server.socket_addr()?;
    let initial_mask = config.bin_manager.initial_mask()?;
    let retention = config.bin_manager.message_retention()?;

    let authority = Arc::new(CertificateAuthority::bootstrap(
        &config.ca.cert_path,
        &config.ca.key_path,
        &config.ca.organization,
    )?);
    let revocation = Arc::new(RevocationManager::new());
    let bins = Arc::new(BinManager::new(initial_mask, retention));
    let vault = Arc::new(KeyVault::new());

    let cleanup = bins.spawn_cleanup(DEFAULT_CLEANUP_INTERVAL);

    let tls_config = tls::server_tls_config(
        &authority,
        Arc::clone(&revocation),
        &[config.server.address.as_str(), "localhost", "127.0.0.1"],
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        bins: Arc::clone(&bins),
        revocation,
        authority,
        vault,
        shutdown: shutdown_rx.clone(),
    });

    let server = Server::bind(addr, tls_config, state).await?;
    info!(
        addr = %server.local_addr()?,
        mask = %format_args!("{initial_mask:#018X}"),
        retention_hours = bins.retention_hours(),
        "Relay listening"
    );

    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    server_task.await??;
    cleanup.stop().await;

    info!("Server stopped");
    Ok(())
}
