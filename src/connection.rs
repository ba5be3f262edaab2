//! Connection wrapper
//!
//! A `Connection` owns one accepted TCP stream: the read half is decoded
//! into lines for the handler, the write half lives in a writer task fed
//! through a bounded queue. The registry and the broadcaster only ever
//! see a `ConnectionHandle`: the sending end of that queue plus an
//! eviction token the handler listens on.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::RelayConfig;
use crate::error::{DeliveryError, RelayError};
use crate::message::Line;
use crate::types::ConnectionId;

/// Connection lifecycle
///
/// `Open` → `Closing` → `Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal step
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Open, ConnectionState::Closing)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }
}

/// Shared, non-owning reference to a connection's write path
///
/// Cloned into the registry and into broadcast snapshots.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Line>,
    eviction: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle around an outbound queue with its own eviction token
    pub fn new(id: ConnectionId, sender: mpsc::Sender<Line>) -> Self {
        Self::with_eviction(id, sender, CancellationToken::new())
    }

    /// Create a handle whose eviction is observed through `eviction`
    pub fn with_eviction(
        id: ConnectionId,
        sender: mpsc::Sender<Line>,
        eviction: CancellationToken,
    ) -> Self {
        Self {
            id,
            sender,
            eviction,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a line for this connection without waiting
    ///
    /// Fails with `Full` when the peer is not draining its queue and with
    /// `Closed` once the writer task has gone away.
    pub fn write(&self, line: Line) -> Result<(), DeliveryError> {
        self.sender.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Check if the writer has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Tell the owning handler its write path failed and it must close
    pub fn evict(&self) {
        self.eviction.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.eviction.is_cancelled()
    }
}

/// What the handler observes on its connection
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete line arrived
    Line(Line),
    /// Peer closed its sending side
    EndOfStream,
    /// Reading or decoding failed
    ReadFailed(RelayError),
    /// Writer task finished (write failure or timeout)
    WriterStopped,
    /// A broadcast could not queue a line for this connection
    Evicted,
}

/// One accepted client stream, exclusively owned by its handler
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: ConnectionState,
    lines: Option<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: Option<JoinHandle<()>>,
    eviction: CancellationToken,
}

impl Connection {
    /// Wrap an accepted stream and start its writer task
    ///
    /// Returns the connection (for the handler) and the handle to register.
    pub fn open(
        stream: TcpStream,
        config: &RelayConfig,
    ) -> Result<(Self, ConnectionHandle), RelayError> {
        let peer = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let id = ConnectionId::new();
        let (read_half, write_half) = stream.into_split();

        let lines = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(config.max_line_length),
        );
        let sink = FramedWrite::new(write_half, LinesCodec::new());

        let (tx, rx) = mpsc::channel(config.outbound_buffer);
        let writer = tokio::spawn(write_loop(id, sink, rx, config.write_timeout));
        let eviction = CancellationToken::new();

        let connection = Self {
            id,
            peer,
            state: ConnectionState::Open,
            lines: Some(lines),
            writer: Some(writer),
            eviction: eviction.clone(),
        };
        Ok((connection, ConnectionHandle::with_eviction(id, tx, eviction)))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Wait for the next line, end-of-stream, writer shutdown or eviction
    ///
    /// Eviction wins over a line that is already readable, so an evicted
    /// connection never relays another line.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        let (Some(lines), Some(writer)) = (self.lines.as_mut(), self.writer.as_mut()) else {
            return ConnectionEvent::EndOfStream;
        };
        let eviction = &self.eviction;

        let event = tokio::select! {
            biased;
            _ = eviction.cancelled() => ConnectionEvent::Evicted,
            next = lines.next() => match next {
                Some(Ok(text)) => ConnectionEvent::Line(Line::from(text)),
                Some(Err(e)) => ConnectionEvent::ReadFailed(e.into()),
                None => ConnectionEvent::EndOfStream,
            },
            _ = writer => ConnectionEvent::WriterStopped,
        };

        // A finished JoinHandle must not be polled again
        if matches!(event, ConnectionEvent::WriterStopped) {
            self.writer = None;
        }
        event
    }

    /// Open → Closing
    pub fn begin_close(&mut self) -> Result<(), RelayError> {
        self.transition(ConnectionState::Closing)
    }

    /// Drop the read half; the peer sees no more reads from us
    pub fn release_reader(&mut self) {
        self.lines.take();
    }

    /// Let the writer flush what is already queued, then release the write half
    ///
    /// The writer only finishes on its own once every handle is gone, so
    /// this must run after the connection has left the registry.
    pub async fn release_writer(&mut self, linger: Duration) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if tokio::time::timeout(linger, &mut writer).await.is_err() {
            debug!("Writer for {} still busy after {:?}, aborting", self.id, linger);
            writer.abort();
        }
    }

    /// Closing → Closed, once the transport is released
    pub fn mark_closed(&mut self) -> Result<(), RelayError> {
        self.transition(ConnectionState::Closed)?;
        self.release_reader();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        Ok(())
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), RelayError> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        trace!("Connection {} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// Writer task: drain the outbound queue into the socket
///
/// Ends when every handle is dropped, on the first write error, or when a
/// single write exceeds `write_timeout`. Dropping the write half shuts the
/// socket's sending side down.
async fn write_loop(
    id: ConnectionId,
    mut sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut rx: mpsc::Receiver<Line>,
    write_timeout: Option<Duration>,
) {
    while let Some(line) = rx.recv().await {
        let result = match write_timeout {
            Some(limit) => match tokio::time::timeout(limit, sink.send(line)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Write to {} timed out after {:?}", id, limit);
                    break;
                }
            },
            None => sink.send(line).await,
        };

        if let Err(e) = result {
            debug!("Write to {} failed: {}", id, e);
            break;
        }
    }
    debug!("Write task ended for {}", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;

        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Open.can_transition_to(Closed));
        assert!(!Closing.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Open.can_transition_to(Open));
    }

    #[tokio::test]
    async fn test_handle_write_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);

        assert_eq!(handle.write(Line::from("a")), Ok(()));
        assert_eq!(handle.write(Line::from("b")), Err(DeliveryError::Full));

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.write(Line::from("c")), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_connection_reads_and_writes_lines() {
        let (server, client) = socket_pair().await;
        let (mut connection, handle) = Connection::open(server, &RelayConfig::default()).unwrap();
        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(connection.id(), handle.id());

        let (client_read, mut client_write) = client.into_split();
        let mut client_lines = BufReader::new(client_read).lines();

        handle.write(Line::from("from relay")).unwrap();
        let received = client_lines.next_line().await.unwrap();
        assert_eq!(received.as_deref(), Some("from relay"));

        client_write.write_all(b"from client\r\n").await.unwrap();
        match connection.next_event().await {
            ConnectionEvent::Line(line) => assert_eq!(line.as_str(), "from client"),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(client_write);
        assert!(matches!(
            connection.next_event().await,
            ConnectionEvent::EndOfStream
        ));
    }

    #[tokio::test]
    async fn test_oversized_line_is_read_failure() {
        let (server, mut client) = socket_pair().await;
        let config = RelayConfig {
            max_line_length: 8,
            ..RelayConfig::default()
        };
        let (mut connection, _handle) = Connection::open(server, &config).unwrap();

        client.write_all(b"this line is far too long\n").await.unwrap();
        assert!(matches!(
            connection.next_event().await,
            ConnectionEvent::ReadFailed(RelayError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_evicted_connection_stops_before_pending_line() {
        let (server, mut client) = socket_pair().await;
        let (mut connection, handle) = Connection::open(server, &RelayConfig::default()).unwrap();

        client.write_all(b"already sent\n").await.unwrap();
        handle.evict();
        assert!(handle.is_evicted());

        assert!(matches!(
            connection.next_event().await,
            ConnectionEvent::Evicted
        ));
    }

    #[tokio::test]
    async fn test_eviction_is_shared_between_clones() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);
        let copy = handle.clone();

        copy.evict();
        assert!(handle.is_evicted());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_writer() {
        let (server, _client) = socket_pair().await;
        let (mut connection, handle) = Connection::open(server, &RelayConfig::default()).unwrap();

        drop(handle);
        assert!(matches!(
            connection.next_event().await,
            ConnectionEvent::WriterStopped
        ));
    }

    #[tokio::test]
    async fn test_close_sequence() {
        let (server, _client) = socket_pair().await;
        let (mut connection, handle) = Connection::open(server, &RelayConfig::default()).unwrap();

        assert!(connection.mark_closed().is_err());

        connection.begin_close().unwrap();
        assert_eq!(connection.state(), ConnectionState::Closing);
        assert!(connection.begin_close().is_err());

        connection.release_reader();
        drop(handle);
        connection.release_writer(Duration::from_secs(1)).await;
        connection.mark_closed().unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.begin_close().is_err());
    }
}
