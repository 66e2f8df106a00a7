//! The signaling transport the coordinator sends and receives through.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{Connection, InvitationResult, OutboundSignal, SignalEvent};

/// Shared handle to a connected signaling session
pub type SessionHandle = Arc<dyn SignalingSession>;

/// A live signaling session.
///
/// Sends are fire-and-forget from the caller's point of view: each call
/// resolves once the transport accepted or rejected that one signal, and
/// concurrent calls are allowed.
#[async_trait]
pub trait SignalingSession: Send + Sync + fmt::Debug {
    /// The local endpoint of this session
    fn connection(&self) -> &Connection;

    /// Deliver one signal to the connection it is addressed to
    async fn signal(&self, signal: OutboundSignal) -> InvitationResult<()>;

    /// Receive every signal addressed to this session's connection
    fn subscribe(&self) -> broadcast::Receiver<SignalEvent>;
}
