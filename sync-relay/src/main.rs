//! boxsync-relay binary entry point.
//!
//! Usage:
//! ```bash
//! boxsync-relay --config relay.toml
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use sync_relay::{Config, SyncRelay};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        tracing::warn!(
            "Config file {} not found, using defaults",
            config_path.display()
        );
        Config::default()
    };

    let relay = SyncRelay::new(config);
    let listener = relay.bind().await.context("binding listener")?;
    tracing::info!(
        "boxsync-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr()?
    );

    let server = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run(listener).await })
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            tracing::info!("Shutdown requested");
        }
        result = server => {
            result.context("accept loop panicked")??;
            return Ok(());
        }
    }

    relay.shutdown().await;
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
