//! Per-connection handler
//!
//! Reads lines from one connection and fans each out through the
//! broadcaster. On end-of-stream, read failure, writer shutdown or
//! eviction the connection is closed and removed from the registry
//! exactly once.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::connection::{Connection, ConnectionEvent};
use crate::error::RelayError;
use crate::registry::Registry;

/// How long a closing connection may spend flushing lines already queued
const WRITER_LINGER: Duration = Duration::from_millis(500);

/// Why a handler stopped reading
#[derive(Debug)]
enum CloseReason {
    EndOfStream,
    ReadFailed(RelayError),
    WriterStopped,
    Evicted,
    RegistryClosed,
}

/// Drive one registered connection until it closes
///
/// The connection must already be in the registry.
pub async fn handle_connection(
    mut connection: Connection,
    registry: Registry,
    broadcaster: Broadcaster,
) -> Result<(), RelayError> {
    let id = connection.id();
    let peer = connection.peer();

    let reason = loop {
        match connection.next_event().await {
            ConnectionEvent::Line(line) => {
                debug!("Line from {} ({} bytes)", id, line.len());
                if let Err(e) = broadcaster.deliver(&registry, &line, id).await {
                    warn!("Broadcast from {} failed: {}", id, e);
                    break CloseReason::RegistryClosed;
                }
            }
            ConnectionEvent::EndOfStream => break CloseReason::EndOfStream,
            ConnectionEvent::ReadFailed(e) => break CloseReason::ReadFailed(e),
            ConnectionEvent::WriterStopped => break CloseReason::WriterStopped,
            ConnectionEvent::Evicted => break CloseReason::Evicted,
        }
    };

    match &reason {
        CloseReason::ReadFailed(e) => debug!("Read from {} failed: {}", id, e),
        other => debug!("Connection {} closing: {:?}", id, other),
    }

    connection.begin_close()?;
    connection.release_reader();

    let removal = registry.remove(id).await;
    connection.release_writer(WRITER_LINGER).await;
    connection.mark_closed()?;

    info!("Client {} ({}) disconnected", id, peer);

    match (reason, removal) {
        (CloseReason::RegistryClosed, _) | (_, Err(_)) => Err(RelayError::RegistryClosed),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    async fn accept_one(config: &RelayConfig, registry: &Registry) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (connection, handle) = Connection::open(stream, config).unwrap();
        registry.add(handle).await.unwrap();
        (connection, client)
    }

    #[tokio::test]
    async fn test_handler_echoes_and_removes_on_eof() {
        let config = RelayConfig::default();
        let registry = Registry::spawn();
        let (connection, client) = accept_one(&config, &registry).await;

        let task = tokio::spawn(handle_connection(
            connection,
            registry.clone(),
            Broadcaster::new(config.echo),
        ));

        let (read_half, mut write_half) = client.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"echo me\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("echo me")
        );

        write_half.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(registry.is_empty().await.unwrap());
        // Relay side has shut its write half down as well
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handler_closes_when_writer_stops() {
        let config = RelayConfig::default();
        let registry = Registry::spawn();
        let (connection, _client) = accept_one(&config, &registry).await;
        let id = connection.id();

        let task = tokio::spawn(handle_connection(
            connection,
            registry.clone(),
            Broadcaster::default(),
        ));

        // Dropping the registry's handle stops the writer
        assert!(registry.remove(id).await.unwrap());
        task.await.unwrap().unwrap();
        assert!(registry.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_evicted_connection_closes_without_write_timeout() {
        let config = RelayConfig {
            write_timeout: None,
            ..RelayConfig::default()
        };
        let registry = Registry::spawn();
        let (connection, client) = accept_one(&config, &registry).await;

        let task = tokio::spawn(handle_connection(
            connection,
            registry.clone(),
            Broadcaster::default(),
        ));

        let members = registry.snapshot().await.unwrap();
        members[0].evict();
        drop(members);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("evicted handler kept running")
            .unwrap()
            .unwrap();
        assert!(registry.is_empty().await.unwrap());

        // Relay side is gone: the client reads end-of-stream
        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
