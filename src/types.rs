//! Connection identity
//!
//! Every accepted stream gets a `ConnectionId` at accept time. The registry
//! is keyed by it, and a broadcast compares it with the line's origin to
//! apply the self-echo policy. Lifecycle logs are tagged with it too.

use uuid::Uuid;

/// Opaque identity of one accepted connection
///
/// Random (UUID v4), so ids are never reused after a connection closes and
/// a late `remove` for a dead connection can never hit a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Fresh id for a newly accepted stream
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
