//! In-process event broker shared by the invitation components.
//!
//! Events are fanned out to every subscriber over a tokio broadcast channel.
//! Queries that need an answer (the local user's availability, the remote
//! user behind a connection) go out as events tagged with a request id; the
//! answering component replies through [`Dispatcher::respond_user_availability`]
//! or [`Dispatcher::respond_remote_user`], and each reply slot fires at most once.
//!
//! A component that answers a query holds a [`ResponderRegistration`] for it.
//! Queries with no registered responder fail with `NoReply` at once; otherwise
//! the configured reply timeout bounds the wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use huddle_config::DispatcherConfig;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::types::{
    BusEvent, Connection, InvitationError, InvitationResult, RemoteUser, RequestId,
};

type ReplySlots<T> = Mutex<HashMap<RequestId, oneshot::Sender<T>>>;

/// The queries a component can register to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    UserAvailability,
    RemoteUser,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::UserAvailability => "user availability",
            QueryKind::RemoteUser => "remote user",
        }
    }

    fn index(self) -> usize {
        match self {
            QueryKind::UserAvailability => 0,
            QueryKind::RemoteUser => 1,
        }
    }
}

/// Marks its holder as an answerer of one query kind; deregisters on drop
#[derive(Debug)]
pub struct ResponderRegistration {
    inner: Arc<DispatcherInner>,
    query: QueryKind,
}

impl Drop for ResponderRegistration {
    fn drop(&mut self) {
        self.inner.responders[self.query.index()].fetch_sub(1, Ordering::AcqRel);
        debug!(query = self.query.as_str(), "query responder deregistered");
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Debug)]
struct DispatcherInner {
    events: broadcast::Sender<BusEvent>,
    responders: [AtomicUsize; 2],
    availability_replies: ReplySlots<bool>,
    remote_user_replies: ReplySlots<Option<RemoteUser>>,
    next_request_id: AtomicU64,
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(DispatcherInner {
                events,
                responders: [AtomicUsize::new(0), AtomicUsize::new(0)],
                availability_replies: Mutex::new(HashMap::new()),
                remote_user_replies: Mutex::new(HashMap::new()),
                next_request_id: AtomicU64::new(1),
                reply_timeout: config.reply_timeout(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.events.subscribe()
    }

    /// Register the caller as an answerer of `query` for as long as the guard lives
    pub fn register_responder(&self, query: QueryKind) -> ResponderRegistration {
        self.inner.responders[query.index()].fetch_add(1, Ordering::AcqRel);
        debug!(query = query.as_str(), "query responder registered");
        ResponderRegistration {
            inner: self.inner.clone(),
            query,
        }
    }

    pub fn responder_count(&self, query: QueryKind) -> usize {
        self.inner.responders[query.index()].load(Ordering::Acquire)
    }

    /// Publish an event, returning how many subscribers will see it
    pub fn trigger(&self, event: BusEvent) -> usize {
        let event_type = event.event_type_name();
        match self.inner.events.send(event) {
            Ok(receivers) => {
                trace!(event = event_type, receivers, "event dispatched");
                receivers
            }
            Err(_) => {
                debug!(event = event_type, "event dropped, no subscribers");
                0
            }
        }
    }

    /// Ask whoever tracks the local user's presence whether they can take an invitation
    pub async fn request_user_availability(&self) -> InvitationResult<bool> {
        let request_id = self.next_request_id();
        self.request(
            &self.inner.availability_replies,
            QueryKind::UserAvailability,
            request_id,
            BusEvent::GetUserAvailability { request_id },
        )
        .await
    }

    /// Ask the user directory which remote user owns `connection`
    pub async fn request_remote_user(
        &self,
        connection: Connection,
    ) -> InvitationResult<Option<RemoteUser>> {
        let request_id = self.next_request_id();
        self.request(
            &self.inner.remote_user_replies,
            QueryKind::RemoteUser,
            request_id,
            BusEvent::GetRemoteUser {
                request_id,
                connection,
            },
        )
        .await
    }

    /// Answer a [`BusEvent::GetUserAvailability`] query.
    ///
    /// Returns `false` when the request is unknown, already answered or timed out.
    pub async fn respond_user_availability(&self, request_id: RequestId, available: bool) -> bool {
        Self::respond(&self.inner.availability_replies, request_id, available).await
    }

    /// Answer a [`BusEvent::GetRemoteUser`] query
    pub async fn respond_remote_user(
        &self,
        request_id: RequestId,
        remote_user: Option<RemoteUser>,
    ) -> bool {
        Self::respond(&self.inner.remote_user_replies, request_id, remote_user).await
    }

    fn next_request_id(&self) -> RequestId {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request<T>(
        &self,
        slots: &ReplySlots<T>,
        query: QueryKind,
        request_id: RequestId,
        event: BusEvent,
    ) -> InvitationResult<T> {
        let request = query.as_str();
        if self.responder_count(query) == 0 {
            debug!(request, "no responder registered for query");
            return Err(InvitationError::NoReply { request });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        slots.lock().await.insert(request_id, reply_tx);

        if self.trigger(event) == 0 {
            slots.lock().await.remove(&request_id);
            return Err(InvitationError::NoReply { request });
        }

        match tokio::time::timeout(self.inner.reply_timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(InvitationError::NoReply { request }),
            Err(_) => {
                slots.lock().await.remove(&request_id);
                warn!(request, request_id, "request timed out waiting for a reply");
                Err(InvitationError::NoReply { request })
            }
        }
    }

    async fn respond<T>(slots: &ReplySlots<T>, request_id: RequestId, value: T) -> bool {
        let Some(reply_tx) = slots.lock().await.remove(&request_id) else {
            debug!(request_id, "reply for unknown or settled request ignored");
            return false;
        };
        reply_tx.send(value).is_ok()
    }
}
