//! TCP Game Server
//!
//! Accept loop and per-connection wiring. Each accepted socket gets two
//! tasks: the session task, which owns the read half and drives the
//! lobby/room state machine, and a writer task that drains the session's
//! outbound channel into the write half. Room broadcasts only ever queue
//! frames onto those channels, so a slow client cannot stall a match.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::network::auth::CredentialStore;
use crate::network::protocol::{FrameReader, ServerFrame};
use crate::network::room::RoomRegistry;
use crate::network::session::Session;

/// Outbound frames buffered per connection before broadcasts await.
const OUTBOUND_QUEUE: usize = 64;

/// Server configuration, loaded from a JSON file.
///
/// ```json
/// {
///     "port": 8002,
///     "userDatabase": "~/users.json"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Path to the credential store file. A leading `~` expands to the
    /// user's home directory.
    #[serde(rename = "userDatabase")]
    pub user_database: PathBuf,
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Config file is not valid JSON or is missing fields.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ServerConfig {
    /// Load and parse a config file, expanding `~` in the store path.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        config.user_database = expand_home(&config.user_database);
        Ok(config)
    }
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// The listening server: registry, credential store, and accept loop.
pub struct GameServer {
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    store: Arc<CredentialStore>,
}

impl GameServer {
    /// Bind the listener. The credential store must already be loaded;
    /// store problems are surfaced before the port is taken.
    pub async fn bind(config: &ServerConfig, store: CredentialStore) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        Ok(Self {
            listener,
            registry: Arc::new(RoomRegistry::new()),
            store: Arc::new(store),
        })
    }

    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> io::Result<()> {
        info!("listening on {}", self.listener.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");
                    self.spawn_connection(stream, peer);
                }
                Err(e) => error!("accept failed: {e}"),
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let registry = self.registry.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE);

            let writer = tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if write_half.write_all(frame.encode().as_bytes()).await.is_err() {
                        break;
                    }
                }
            });

            let mut session =
                Session::new(peer, FrameReader::new(read_half), tx, registry, store);
            session.run().await;

            // Session (and its room memberships) dropped their senders;
            // the writer drains what is left and exits.
            drop(session);
            let _ = writer.await;
            debug!(%peer, "connection closed");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "gridlock-config-{name}-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_config_parses_port_and_store_path() {
        let path = temp_file("ok", r#"{"port": 8002, "userDatabase": "/tmp/users.json"}"#);
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 8002);
        assert_eq!(config.user_database, PathBuf::from("/tmp/users.json"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_config_missing_field_fails() {
        let path = temp_file("missing", r#"{"port": 8002}"#);
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_config_missing_file_fails() {
        assert!(matches!(
            ServerConfig::from_file("/nonexistent/config.json"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_tilde_expansion() {
        let home = std::env::var_os("HOME").expect("HOME set in test environment");
        let expanded = expand_home(std::path::Path::new("~/users.json"));
        assert_eq!(expanded, PathBuf::from(home).join("users.json"));

        // Absolute paths pass through.
        let plain = expand_home(std::path::Path::new("/srv/users.json"));
        assert_eq!(plain, PathBuf::from("/srv/users.json"));
    }
}
