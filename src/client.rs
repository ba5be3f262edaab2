//! Client side of the relay
//!
//! The capability pair front ends build on: `connect` yields an
//! `Outgoing` line writer and an `Incoming` stream of received lines.
//! Any formatting (names, timestamps) is the front end's business and is
//! already part of the line by the time it gets here.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::error::RelayError;

/// Sending half: one call, one line on the wire
#[derive(Debug)]
pub struct Outgoing {
    sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl Outgoing {
    /// Send one line (a newline is appended)
    pub async fn write(&mut self, line: &str) -> Result<(), RelayError> {
        self.sink.send(line).await?;
        Ok(())
    }

    /// Shut down the sending side; the relay sees end-of-stream
    ///
    /// Every `write` already flushed, so nothing is buffered here.
    pub async fn close(self) -> Result<(), RelayError> {
        let mut write_half = self.sink.into_inner();
        write_half.shutdown().await?;
        Ok(())
    }
}

/// Receiving half: lines until the relay goes away
///
/// Ends (`None`) on disconnection; it cannot be restarted.
#[derive(Debug)]
pub struct Incoming {
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
}

impl Incoming {
    /// Next received line, or `None` once disconnected
    pub async fn next_line(&mut self) -> Option<Result<String, RelayError>> {
        self.next().await
    }
}

impl Stream for Incoming {
    type Item = Result<String, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.lines)
            .poll_next(cx)
            .map(|item| item.map(|result| result.map_err(RelayError::from)))
    }
}

/// Connect to a relay
///
/// Fails with `RelayError::Io` when the relay refuses or is unreachable.
pub async fn connect(addr: impl ToSocketAddrs) -> Result<(Outgoing, Incoming), RelayError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();

    let outgoing = Outgoing {
        sink: FramedWrite::new(write_half, LinesCodec::new()),
    };
    let incoming = Incoming {
        lines: FramedRead::new(read_half, LinesCodec::new()),
    };
    Ok((outgoing, incoming))
}
