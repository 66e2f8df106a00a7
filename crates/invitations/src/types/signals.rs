//! Signal types exchanged over the signaling session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Connection, InvitationError};

/// The named signals this system sends and listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Invitation,
    CancelInvitation,
    AcceptInvitation,
    DeclineInvitation,
}

impl SignalKind {
    /// Wire name carried in the signal's `type` field
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Invitation => "invitation",
            SignalKind::CancelInvitation => "cancelInvitation",
            SignalKind::AcceptInvitation => "acceptInvitation",
            SignalKind::DeclineInvitation => "declineInvitation",
        }
    }

    /// Every kind the coordinator subscribes to
    pub fn all() -> [SignalKind; 4] {
        [
            SignalKind::Invitation,
            SignalKind::CancelInvitation,
            SignalKind::AcceptInvitation,
            SignalKind::DeclineInvitation,
        ]
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = InvitationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalKind::all()
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| InvitationError::invalid_payload(format!("unknown signal type: {s}")))
    }
}

/// A signal addressed to one remote connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub to: Connection,
    pub data: String,
}

impl OutboundSignal {
    pub fn new(kind: SignalKind, to: Connection, data: impl Into<String>) -> Self {
        Self {
            kind,
            to,
            data: data.into(),
        }
    }
}

/// A signal delivered by the session from a remote connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub from: Connection,
    pub data: String,
}
