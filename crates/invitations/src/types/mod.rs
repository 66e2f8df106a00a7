//! Shared types and interfaces for the invitation system.
//!
//! This module contains the identity handles, signal and bus event types,
//! and error definitions used across the crate.

pub mod errors;
pub mod events;
pub mod signals;

pub use errors::{InvitationError, InvitationResult};
pub use events::*;
pub use signals::*;

use serde::{Deserialize, Serialize};

// Common type aliases
pub type InvitationId = uuid::Uuid;
pub type RequestId = u64;

/// One participant's live endpoint on the signaling session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: String,
    /// Opaque metadata the transport attaches to the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Connection {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            data: None,
        }
    }

    /// Whether both handles name the same endpoint
    pub fn same_endpoint(&self, other: &Connection) -> bool {
        self.connection_id == other.connection_id
    }
}

/// A remote user as resolved by the user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub name: String,
    pub connection: Connection,
}

impl RemoteUser {
    pub fn new(name: impl Into<String>, connection: Connection) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }
}
