//! Line Relay Server - Entry Point
//!
//! Parses flags, starts the registry actor and the TCP accept loop.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use line_relay::config::{
    DEFAULT_HOST, DEFAULT_MAX_LINE_LENGTH, DEFAULT_OUTBOUND_BUFFER, DEFAULT_PORT,
};
use line_relay::{serve, EchoPolicy, RelayConfig};

/// Line-oriented TCP broadcast relay
#[derive(Parser, Debug)]
#[command(name = "line-relay", about = "Relays every received line to all connected clients")]
struct Cli {
    /// Host to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Lines queued per client before it is considered stuck and dropped
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    outbound_buffer: usize,

    /// Longest accepted line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// Per-write deadline in seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    write_timeout_secs: u64,

    /// Do not send a client's own lines back to it
    #[arg(long)]
    no_echo: bool,
}

impl From<Cli> for RelayConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            outbound_buffer: cli.outbound_buffer,
            max_line_length: cli.max_line_length,
            write_timeout: (cli.write_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.write_timeout_secs)),
            echo: if cli.no_echo {
                EchoPolicy::Exclude
            } else {
                EchoPolicy::Include
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_relay=info")),
        )
        .init();

    let config = RelayConfig::from(Cli::parse());

    // Only fatal errors come back: bind failure or a dead listening socket
    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Relay stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
