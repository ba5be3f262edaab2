//! Console front end for the relay
//!
//! Stdin lines go out as-is, or as `[HH:MM] name: text` when a name is
//! given; everything the relay sends is printed.

use std::io::BufRead;
use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use line_relay::config::DEFAULT_PORT;
use line_relay::connect;

#[derive(Parser, Debug)]
#[command(name = "relay-console", about = "Chat through a line relay from the terminal")]
struct Cli {
    /// Relay host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Relay port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Prefix each line with a timestamp and this name
    #[arg(short, long)]
    name: Option<String>,
}

/// Presentation-side framing; the relay itself never looks at it
fn format_line(name: Option<&str>, text: &str) -> String {
    match name {
        Some(name) => format!("[{}] {}: {}", Local::now().format("%H:%M"), name, text),
        None => text.to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let name = cli
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let (mut outgoing, mut incoming) = match connect((cli.host.as_str(), cli.port)).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("Cannot connect to {}:{}: {}", cli.host, cli.port, e);
            return ExitCode::FAILURE;
        }
    };
    println!("Connected to server!");

    // Receiving task
    let mut receiver = tokio::spawn(async move {
        while let Some(result) = incoming.next_line().await {
            match result {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    debug!("Receive failed: {}", e);
                    break;
                }
            }
        }
        println!("Server disconnected.");
    });

    // Sending: stdin is read on a plain thread so a pending read never
    // keeps the runtime alive after the relay hangs up
    let (input_tx, mut input_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(text) => {
                    let line = format_line(name.as_deref(), &text);
                    if let Err(e) = outgoing.write(&line).await {
                        error!("Send failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = &mut receiver => return ExitCode::SUCCESS,
        }
    }

    // Stdin is done: hang up and let the relay close our side
    if let Err(e) = outgoing.close().await {
        debug!("Close failed: {}", e);
    }
    let _ = receiver.await;

    ExitCode::SUCCESS
}
