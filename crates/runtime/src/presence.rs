//! Fixed presence and user directory answering dispatcher queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use huddle_invitations::{BusEvent, Dispatcher, QueryKind, RemoteUser};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Answers availability and remote-user queries from a fixed directory
#[derive(Debug, Clone)]
pub struct StaticPresence {
    available: Arc<AtomicBool>,
    users: HashMap<String, RemoteUser>,
}

impl StaticPresence {
    pub fn new(available: bool) -> Self {
        Self {
            available: Arc::new(AtomicBool::new(available)),
            users: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: RemoteUser) -> Self {
        self.users
            .insert(user.connection.connection_id.clone(), user);
        self
    }

    /// Flip availability for a responder that is already running
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn lookup(&self, connection_id: &str) -> Option<RemoteUser> {
        self.users.get(connection_id).cloned()
    }

    /// Answer queries on `dispatcher` until the returned task is aborted
    pub fn spawn(self, dispatcher: Dispatcher) -> JoinHandle<()> {
        let mut events = dispatcher.subscribe();
        let registrations = [
            dispatcher.register_responder(QueryKind::UserAvailability),
            dispatcher.register_responder(QueryKind::RemoteUser),
        ];
        tokio::spawn(async move {
            let _registrations = registrations;
            loop {
                match events.recv().await {
                    Ok(BusEvent::GetUserAvailability { request_id }) => {
                        let available = self.available.load(Ordering::Relaxed);
                        if !dispatcher.respond_user_availability(request_id, available).await {
                            debug!(request_id, "availability reply was not awaited");
                        }
                    }
                    Ok(BusEvent::GetRemoteUser {
                        request_id,
                        connection,
                    }) => {
                        let user = self.lookup(&connection.connection_id);
                        if !dispatcher.respond_remote_user(request_id, user).await {
                            debug!(request_id, "remote user reply was not awaited");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "presence responder lagged behind the dispatcher");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
