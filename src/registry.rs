//! Registry actor implementation
//!
//! The single owner of the membership set. Handlers, the listener and the
//! broadcaster talk to it through a cloneable `Registry` handle; every
//! request is a command processed one at a time, so add, remove and
//! snapshot never interleave.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::error::RelayError;
use crate::types::ConnectionId;

/// Channel buffer size for registry commands
pub const REGISTRY_CHANNEL_SIZE: usize = 256;

/// Commands sent to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a newly accepted connection
    Add {
        handle: ConnectionHandle,
        reply: oneshot::Sender<()>,
    },
    /// Deregister a connection (no-op if absent)
    Remove {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    /// Copy out the current membership
    Snapshot {
        reply: oneshot::Sender<Vec<ConnectionHandle>>,
    },
    /// Current membership count
    Len { reply: oneshot::Sender<usize> },
}

/// The registry actor
///
/// Owns the membership map and runs until every `Registry` handle is dropped.
pub struct RegistryActor {
    /// Open connections: ConnectionId -> ConnectionHandle
    members: HashMap<ConnectionId, ConnectionHandle>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl RegistryActor {
    /// Create a new actor with the given command receiver
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            members: HashMap::new(),
            receiver,
        }
    }

    /// Run the actor loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        debug!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("Registry shutting down with {} members", self.members.len());
    }

    /// Process a single command
    ///
    /// Replies are best effort: a caller that stopped waiting is not an error.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Add { handle, reply } => {
                let id = handle.id();
                if self.members.insert(id, handle).is_some() {
                    debug!("Connection {} re-registered", id);
                }
                info!("Connection {} registered ({} open)", id, self.members.len());
                let _ = reply.send(());
            }
            RegistryCommand::Remove { id, reply } => {
                let removed = self.members.remove(&id).is_some();
                if removed {
                    info!("Connection {} removed ({} open)", id, self.members.len());
                }
                let _ = reply.send(removed);
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.members.values().cloned().collect());
            }
            RegistryCommand::Len { reply } => {
                let _ = reply.send(self.members.len());
            }
        }
    }
}

/// Cloneable handle to the registry actor
#[derive(Debug, Clone)]
pub struct Registry {
    sender: mpsc::Sender<RegistryCommand>,
}

impl Registry {
    /// Wrap an existing command channel
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Start a registry actor on the current runtime and return its handle
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(REGISTRY_CHANNEL_SIZE);
        tokio::spawn(RegistryActor::new(rx).run());
        Self::new(tx)
    }

    /// Register a connection
    pub async fn add(&self, handle: ConnectionHandle) -> Result<(), RelayError> {
        self.request(|reply| RegistryCommand::Add { handle, reply }).await
    }

    /// Deregister a connection; `false` if it was already gone
    pub async fn remove(&self, id: ConnectionId) -> Result<bool, RelayError> {
        self.request(|reply| RegistryCommand::Remove { id, reply }).await
    }

    /// Immutable copy of the current membership
    pub async fn snapshot(&self) -> Result<Vec<ConnectionHandle>, RelayError> {
        self.request(|reply| RegistryCommand::Snapshot { reply }).await
    }

    /// Number of registered connections
    pub async fn len(&self) -> Result<usize, RelayError> {
        self.request(|reply| RegistryCommand::Len { reply }).await
    }

    /// Whether no connection is registered
    pub async fn is_empty(&self) -> Result<bool, RelayError> {
        Ok(self.len().await? == 0)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RelayError::RegistryClosed)?;
        reply_rx.await.map_err(|_| RelayError::RegistryClosed)
    }
}
