//! Basic type definitions for the chat relay
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based identity of one connection handle
//! - `Message`: one relay unit, the bytes of a single read

use bytes::Bytes;
use uuid::Uuid;

/// Identity of a connection handle (newtype pattern)
///
/// Wraps a UUID v4. Two handles are the same connection if and only if
/// their ids are equal. Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
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

/// One relay unit: exactly the bytes returned by a single read.
///
/// There is no framing. An application-level line may arrive split across
/// several messages, or several lines may be coalesced into one.
pub type Message = Bytes;

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
    fn test_connection_id_display_matches_uuid() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
