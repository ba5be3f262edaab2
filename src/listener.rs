//! TCP listener and accept loop
//!
//! Binds the service port, wraps each accepted stream as a `Connection`,
//! registers it and spawns its handler task.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::RelayConfig;
use crate::connection::Connection;
use crate::error::RelayError;
use crate::handler::handle_connection;
use crate::registry::Registry;

/// Pause after running out of file descriptors before accepting again
const EXHAUSTION_BACKOFF: Duration = Duration::from_millis(100);

/// How the accept loop should react to an accept error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptFailure {
    /// The pending connection went away; try the next one
    Transient,
    /// Out of descriptors or buffers; back off, then continue
    Exhausted,
    /// The listening socket is no longer usable
    Fatal,
}

impl AcceptFailure {
    /// Classify an accept error
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut => AcceptFailure::Transient,
            io::ErrorKind::OutOfMemory => AcceptFailure::Exhausted,
            _ => match err.raw_os_error() {
                // ENOMEM, ENFILE, EMFILE
                Some(12) | Some(23) | Some(24) => AcceptFailure::Exhausted,
                _ => AcceptFailure::Fatal,
            },
        }
    }
}

/// Bound listener ready to serve
pub struct Listener {
    listener: TcpListener,
    registry: Registry,
    broadcaster: Broadcaster,
    config: RelayConfig,
}

impl Listener {
    /// Validate the config and bind the listening socket
    ///
    /// A bind failure is returned as `RelayError::Bind`; nothing is left
    /// running in that case.
    pub async fn bind(config: RelayConfig, registry: Registry) -> Result<Self, RelayError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;

        Ok(Self {
            listener,
            registry,
            broadcaster: Broadcaster::new(config.echo),
            config,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listening socket fails
    pub async fn serve(self) -> Result<(), RelayError> {
        info!(
            "Relay listening on {} (self-echo: {:?})",
            self.local_addr()?,
            self.broadcaster.echo()
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    match self.admit(stream).await {
                        Ok(()) => {}
                        Err(RelayError::RegistryClosed) => {
                            error!("Registry stopped, shutting down listener");
                            return Err(RelayError::RegistryClosed);
                        }
                        Err(e) => warn!("Dropping connection from {}: {}", addr, e),
                    }
                }
                Err(e) => match AcceptFailure::classify(&e) {
                    AcceptFailure::Transient => {
                        warn!("Failed to accept connection: {}", e);
                    }
                    AcceptFailure::Exhausted => {
                        warn!(
                            "Failed to accept connection: {}, retrying in {:?}",
                            e, EXHAUSTION_BACKOFF
                        );
                        tokio::time::sleep(EXHAUSTION_BACKOFF).await;
                    }
                    AcceptFailure::Fatal => {
                        error!("Listening socket failed: {}", e);
                        return Err(RelayError::Accept(e));
                    }
                },
            }
        }
    }

    /// Wrap, register and spawn a handler for one accepted stream
    async fn admit(&self, stream: TcpStream) -> Result<(), RelayError> {
        let (connection, handle) = Connection::open(stream, &self.config)?;
        let id = connection.id();
        self.registry.add(handle).await?;

        let registry = self.registry.clone();
        let broadcaster = self.broadcaster;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(connection, registry, broadcaster).await {
                error!("Connection handler error for {}: {}", id, e);
            }
        });
        Ok(())
    }
}

/// Start a registry and serve on the configured port
///
/// Returns only on a fatal error (bind or listening socket failure).
pub async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let registry = Registry::spawn();
    Listener::bind(config, registry).await?.serve().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..RelayConfig::default()
        }
    }

    #[test]
    fn test_classify_accept_errors() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(AcceptFailure::classify(&aborted), AcceptFailure::Transient);

        let emfile = io::Error::from_raw_os_error(24);
        assert_eq!(AcceptFailure::classify(&emfile), AcceptFailure::Exhausted);

        let other = io::Error::new(io::ErrorKind::InvalidInput, "bad socket");
        assert_eq!(AcceptFailure::classify(&other), AcceptFailure::Fatal);
    }

    #[tokio::test]
    async fn test_bind_on_used_port_fails() {
        let first = Listener::bind(local_config(), Registry::spawn())
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let config = RelayConfig {
            port,
            ..local_config()
        };
        let result = Listener::bind(config, Registry::spawn()).await;
        assert!(matches!(result, Err(RelayError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = RelayConfig {
            outbound_buffer: 0,
            ..local_config()
        };
        let result = Listener::bind(config, Registry::spawn()).await;
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_accepted_connection_is_registered() {
        let registry = Registry::spawn();
        let listener = Listener::bind(local_config(), registry.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.serve());

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.len().await.unwrap() != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
