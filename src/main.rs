//! Server binary: load config, open the credential store, serve.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridlock::{CredentialStore, GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .context("usage: gridlock-server <config.json>")?;
    let config = ServerConfig::from_file(config_path.as_str())?;

    // The store must be readable before we take the port.
    let store = CredentialStore::load(&config.user_database)
        .with_context(|| format!("opening user database {}", config.user_database.display()))?;

    let server = GameServer::bind(&config, store)
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!("gridlock server v{VERSION} starting");

    tokio::select! {
        result = server.run() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}
