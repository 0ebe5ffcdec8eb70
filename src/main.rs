use anyhow::Result;
use tokio::signal;
use tracing::info;

use starttls_relay::{Config, Relay};

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr, stdout carries the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "starttls_relay=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting {} v{}", starttls_relay::NAME, starttls_relay::VERSION);

    let config = Config::from_env()?;
    let relay = Relay::bind(config).await?;

    tokio::select! {
        result = relay.run() => result?,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
