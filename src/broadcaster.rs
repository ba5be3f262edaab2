//! Broadcast fan-out
//!
//! Delivers one line to every connection in a registry snapshot. Writes
//! only enqueue onto each connection's outbound queue, so a slow peer
//! never holds up the rest of the fan-out or the registry itself.

use tracing::{trace, warn};

use crate::config::EchoPolicy;
use crate::error::RelayError;
use crate::message::Line;
use crate::registry::Registry;
use crate::types::ConnectionId;

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients the line was queued for
    pub delivered: usize,
    /// Recipients whose write path failed and were removed
    pub evicted: Vec<ConnectionId>,
}

/// Fan-out engine with a fixed self-echo policy
#[derive(Debug, Clone, Copy, Default)]
pub struct Broadcaster {
    echo: EchoPolicy,
}

impl Broadcaster {
    pub fn new(echo: EchoPolicy) -> Self {
        Self { echo }
    }

    pub fn echo(&self) -> EchoPolicy {
        self.echo
    }

    /// Deliver `line` from `origin` to every registered connection
    ///
    /// Takes exactly one snapshot. A recipient whose queue is full or closed
    /// is signalled to close, removed from the registry and skipped; the
    /// remaining recipients still get the line. Fails only if the registry
    /// itself is gone.
    pub async fn deliver(
        &self,
        registry: &Registry,
        line: &Line,
        origin: ConnectionId,
    ) -> Result<DeliveryReport, RelayError> {
        let recipients = registry.snapshot().await?;
        let mut report = DeliveryReport::default();

        for recipient in &recipients {
            let id = recipient.id();
            if id == origin && self.echo == EchoPolicy::Exclude {
                continue;
            }

            match recipient.write(line.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Evicting connection {}: {}", id, e);
                    recipient.evict();
                    report.evicted.push(id);
                }
            }
        }

        for id in &report.evicted {
            registry.remove(*id).await?;
        }

        trace!(
            "Line from {} ({} bytes) delivered to {}/{} recipients",
            origin,
            line.len(),
            report.delivered,
            recipients.len()
        );
        Ok(report)
    }
}
