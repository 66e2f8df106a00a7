//! In-process signaling for running several peers in one process.
//!
//! A [`LoopbackHub`] routes signals between the [`LoopbackSession`]s it hands
//! out, keyed by connection id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use huddle_invitations::{
    Connection, InvitationError, InvitationResult, OutboundSignal, SignalEvent, SignalingSession,
};
use tokio::sync::broadcast;
use tracing::debug;

const INBOX_CAPACITY: usize = 64;
const LISTENER_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inboxes: Arc<RwLock<HashMap<String, broadcast::Sender<SignalEvent>>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under `connection_id`, replacing any earlier one
    pub fn connect(&self, connection_id: impl Into<String>) -> Arc<LoopbackSession> {
        let connection = Connection::new(connection_id);
        let (inbox, _) = broadcast::channel(INBOX_CAPACITY);

        self.inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.connection_id.clone(), inbox.clone());
        debug!(connection_id = %connection.connection_id, "loopback session connected");

        Arc::new(LoopbackSession {
            connection,
            hub: self.clone(),
            inbox,
        })
    }

    pub fn disconnect(&self, connection_id: &str) -> bool {
        self.inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id)
            .is_some()
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(connection_id)
    }

    fn route(&self, from: &Connection, signal: OutboundSignal) -> InvitationResult<()> {
        let inbox = self
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&signal.to.connection_id)
            .cloned()
            .ok_or_else(|| InvitationError::unknown_connection(&signal.to.connection_id))?;

        let kind = signal.kind;
        let event = SignalEvent {
            kind,
            from: from.clone(),
            data: signal.data,
        };

        inbox
            .send(event)
            .map_err(|_| InvitationError::signal_send(kind, "recipient is not listening"))?;
        debug!(signal = %kind, from = %from.connection_id, to = %signal.to.connection_id, "signal routed");
        Ok(())
    }
}

/// One endpoint on a [`LoopbackHub`]
#[derive(Debug)]
pub struct LoopbackSession {
    connection: Connection,
    hub: LoopbackHub,
    inbox: broadcast::Sender<SignalEvent>,
}

impl LoopbackSession {
    /// Number of subscribers currently listening for inbound signals
    pub fn listener_count(&self) -> usize {
        self.inbox.receiver_count()
    }

    /// Wait until something subscribes to this session, giving up after `within`
    pub async fn wait_for_listener(&self, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            while self.listener_count() == 0 {
                tokio::time::sleep(LISTENER_POLL).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl SignalingSession for LoopbackSession {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn signal(&self, signal: OutboundSignal) -> InvitationResult<()> {
        self.hub.route(&self.connection, signal)
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.inbox.subscribe()
    }
}
