//! Relay configuration
//!
//! Everything besides the listening port has a default that suits a
//! local chat relay; the binaries fill this from command-line flags.

use std::time::Duration;

use crate::error::RelayError;

/// Default listening port
pub const DEFAULT_PORT: u16 = 5000;

/// Default listening host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default per-connection outbound queue capacity, in lines
pub const DEFAULT_OUTBOUND_BUFFER: usize = 1024;

/// Default maximum accepted line length, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default deadline for a single socket write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a sender receives its own lines back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// Sender is part of its own fan-out (confirmation echo)
    #[default]
    Include,
    /// Sender is skipped during its own fan-out
    Exclude,
}

/// Runtime configuration for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host or IP to bind
    pub host: String,
    /// Port to bind (0 picks a free port)
    pub port: u16,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Longest line a client may send before it is disconnected
    pub max_line_length: usize,
    /// Deadline for one socket write; `None` waits forever
    pub write_timeout: Option<Duration>,
    /// Self-echo policy, fixed for the lifetime of the relay
    pub echo: EchoPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            echo: EchoPolicy::Include,
        }
    }
}

impl RelayConfig {
    /// `host:port` string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.host.trim().is_empty() {
            return Err(RelayError::Config("host must not be empty".to_string()));
        }
        if self.outbound_buffer == 0 {
            return Err(RelayError::Config(
                "outbound buffer must hold at least one line".to_string(),
            ));
        }
        if self.max_line_length == 0 {
            return Err(RelayError::Config(
                "max line length must be positive".to_string(),
            ));
        }
        if self.write_timeout == Some(Duration::ZERO) {
            return Err(RelayError::Config(
                "write timeout must be positive (use None to disable)".to_string(),
            ));
        }
        Ok(())
    }
}
