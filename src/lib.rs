//! Line-oriented TCP Broadcast Relay Library
//!
//! Every line a client sends is forwarded to every connected client,
//! the sender included. Lines are opaque: no envelope, no parsing.
//!
//! # Components
//! - `Listener` accepts TCP streams and wraps each as a `Connection`
//! - `Registry` is the shared membership set, owned by a single actor task
//! - `handle_connection` runs one task per connection, reading lines
//! - `Broadcaster` fans each line out to a registry snapshot
//! - `client::connect` is the line-in/line-out pair front ends use
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels for membership:
//! - add, remove and snapshot are commands processed one at a time
//! - fan-out happens outside the actor, on a copied snapshot
//! - socket writes happen in per-connection writer tasks, so a slow peer
//!   only fills its own queue (and is evicted when it overflows)
//!
//! # Example
//! ```ignore
//! use line_relay::{serve, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), line_relay::RelayError> {
//!     serve(RelayConfig::default()).await
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use broadcaster::{Broadcaster, DeliveryReport};
pub use client::{connect, Incoming, Outgoing};
pub use config::{EchoPolicy, RelayConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionState};
pub use error::{DeliveryError, RelayError};
pub use handler::handle_connection;
pub use listener::{serve, AcceptFailure, Listener};
pub use message::Line;
pub use registry::{Registry, RegistryActor, RegistryCommand};
pub use types::ConnectionId;
