//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: an invalid initial config or an unbindable address is fatal
//! - Listeners bind last, once the route table is published

use std::io;
use std::path::Path;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::loader::{load_config, ConfigError};
use crate::config::GatewayConfig;
use crate::error::GatewayError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load configuration from {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("failed to initialize gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Load the initial configuration. Missing path means built-in defaults.
pub fn load_initial_config(path: Option<&Path>) -> Result<GatewayConfig, StartupError> {
    match path {
        Some(path) => load_config(path).map_err(|source| StartupError::Config {
            path: path.display().to_string(),
            source,
        }),
        None => Ok(GatewayConfig::default()),
    }
}

pub async fn bind_listener(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = bind_listener("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().unwrap().to_string();
        match bind_listener(&taken).await {
            Err(StartupError::Bind { address, .. }) => assert_eq!(address, taken),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_initial_config(Some(Path::new("/nope/gateway.toml"))).unwrap_err();
        assert!(matches!(err, StartupError::Config { .. }));
    }
}
