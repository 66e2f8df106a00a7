//! Shared fakes and helpers for the invitation integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use huddle_config::DispatcherConfig;
use huddle_invitations::{
    BusEvent, ChatApi, ChatCredentials, ChatInfo, Connection, CoordinatorHandle, Dispatcher,
    Invitation, InvitationCoordinator, InvitationError, InvitationResult, OutboundSignal,
    QueryKind, RemoteUser, SessionHandle, SignalEvent, SignalKind, SignalingSession,
};
use tokio::sync::{broadcast, Notify};

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(150);

/// Signaling session that records what it sends and lets tests inject signals
#[derive(Debug)]
pub struct RecordingSession {
    connection: Connection,
    sent: Mutex<Vec<OutboundSignal>>,
    failing: Mutex<HashSet<SignalKind>>,
    gates: Mutex<HashMap<SignalKind, Arc<Notify>>>,
    held: Mutex<Vec<SignalKind>>,
    inbound: broadcast::Sender<SignalEvent>,
}

impl RecordingSession {
    pub fn new(connection_id: &str) -> Self {
        let (inbound, _) = broadcast::channel(32);
        Self {
            connection: Connection::new(connection_id),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            held: Mutex::new(Vec::new()),
            inbound,
        }
    }

    /// Make every send of `kind` fail from now on
    pub fn fail(&self, kind: SignalKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    /// Park the next send of `kind` until [`release`](Self::release) is called
    pub fn hold(&self, kind: SignalKind) {
        self.gates
            .lock()
            .unwrap()
            .insert(kind, Arc::new(Notify::new()));
    }

    pub fn release(&self, kind: SignalKind) {
        if let Some(gate) = self.gates.lock().unwrap().remove(&kind) {
            gate.notify_one();
        }
    }

    /// Wait until a send of `kind` is parked on its gate
    pub async fn wait_until_held(&self, kind: SignalKind) {
        eventually(move || async move { self.held.lock().unwrap().contains(&kind) }).await;
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: SignalKind) -> Vec<OutboundSignal> {
        self.sent().into_iter().filter(|s| s.kind == kind).collect()
    }

    pub fn deliver(&self, kind: SignalKind, from: &str, data: impl Into<String>) {
        self.inbound
            .send(SignalEvent {
                kind,
                from: Connection::new(from),
                data: data.into(),
            })
            .expect("coordinator should be listening for signals");
    }

    pub async fn wait_until_subscribed(&self) {
        eventually(move || async move { self.inbound.receiver_count() > 0 }).await;
    }

    pub async fn wait_for_sent(&self, kind: SignalKind, count: usize) -> Vec<OutboundSignal> {
        eventually(move || async move { self.sent_of(kind).len() >= count }).await;
        self.sent_of(kind)
    }
}

#[async_trait]
impl SignalingSession for RecordingSession {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn signal(&self, signal: OutboundSignal) -> InvitationResult<()> {
        let gate = self.gates.lock().unwrap().get(&signal.kind).cloned();
        if let Some(gate) = gate {
            self.held.lock().unwrap().push(signal.kind);
            gate.notified().await;
        }

        if self.failing.lock().unwrap().contains(&signal.kind) {
            return Err(InvitationError::signal_send(signal.kind, "transport refused"));
        }
        self.sent.lock().unwrap().push(signal);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.inbound.subscribe()
    }
}

/// Chat API that mints numbered credentials, or always fails
pub struct FakeChatApi {
    created: AtomicUsize,
    fail: bool,
}

impl FakeChatApi {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            created: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn create_chat(&self) -> InvitationResult<ChatCredentials> {
        if self.fail {
            return Err(InvitationError::chat_api("503 Service Unavailable"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChatCredentials {
            session_id: format!("session-{n}"),
            api_key: "key-test".to_string(),
            token: format!("token-{n}"),
        })
    }

    async fn chat_info(&self, session_id: &str) -> InvitationResult<ChatInfo> {
        Ok(ChatInfo {
            session_id: Some(session_id.to_string()),
            ..ChatInfo::default()
        })
    }
}

/// How the fake presence and directory answer queries
#[derive(Clone, Copy)]
pub struct Presence {
    pub responds: bool,
    pub available: bool,
    pub knows_users: bool,
    pub delay: Duration,
}

impl Presence {
    pub fn available() -> Self {
        Self {
            responds: true,
            available: true,
            knows_users: true,
            delay: Duration::ZERO,
        }
    }

    pub fn busy() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    pub fn unknown_users() -> Self {
        Self {
            knows_users: false,
            ..Self::available()
        }
    }

    /// Nobody answers availability or remote-user queries
    pub fn absent() -> Self {
        Self {
            responds: false,
            ..Self::available()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::available()
        }
    }
}

pub fn user_for(connection_id: &str) -> RemoteUser {
    RemoteUser::new(format!("user-{connection_id}"), Connection::new(connection_id))
}

fn spawn_presence(dispatcher: &Dispatcher, presence: Presence) {
    if !presence.responds {
        return;
    }
    let mut events = dispatcher.subscribe();
    let registrations = [
        dispatcher.register_responder(QueryKind::UserAvailability),
        dispatcher.register_responder(QueryKind::RemoteUser),
    ];
    let dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let _registrations = registrations;
        while let Ok(event) = events.recv().await {
            match event {
                BusEvent::GetUserAvailability { request_id } => {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(presence.delay).await;
                        dispatcher
                            .respond_user_availability(request_id, presence.available)
                            .await;
                    });
                }
                BusEvent::GetRemoteUser {
                    request_id,
                    connection,
                } => {
                    let user = presence
                        .knows_users
                        .then(|| user_for(&connection.connection_id));
                    dispatcher.respond_remote_user(request_id, user).await;
                }
                _ => {}
            }
        }
    });
}

/// One local user: dispatcher, coordinator, fake session and fake chat API
pub struct Peer {
    pub dispatcher: Dispatcher,
    pub handle: CoordinatorHandle,
    pub session: Arc<RecordingSession>,
    pub chat_api: Arc<FakeChatApi>,
    pub events: broadcast::Receiver<BusEvent>,
}

impl Peer {
    pub async fn start(presence: Presence) -> Self {
        Self::start_with(presence, FakeChatApi::new()).await
    }

    pub async fn start_with(presence: Presence, chat_api: FakeChatApi) -> Self {
        let dispatcher = Dispatcher::new(&DispatcherConfig {
            channel_capacity: 64,
            reply_timeout_ms: 1_000,
        });
        let events = dispatcher.subscribe();
        spawn_presence(&dispatcher, presence);

        let chat_api = Arc::new(chat_api);
        let (handle, _task) =
            InvitationCoordinator::new(dispatcher.clone(), chat_api.clone()).spawn();

        let session = Arc::new(RecordingSession::new("conn-local"));
        let session_handle: SessionHandle = session.clone();
        dispatcher.trigger(BusEvent::PresenceSessionReady(session_handle));
        session.wait_until_subscribed().await;

        Self {
            dispatcher,
            handle,
            session,
            chat_api,
            events,
        }
    }

    pub async fn pending(&self) -> Vec<Invitation> {
        self.handle.pending().await.expect("coordinator should be running")
    }

    pub async fn wait_for_pending(&self, len: usize) -> Vec<Invitation> {
        eventually(move || async move { self.pending().await.len() == len }).await;
        self.pending().await
    }

    /// Next invitation lifecycle event, skipping queries and intents
    pub async fn next_event(&mut self) -> BusEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("dispatcher closed");
                if event.invitation().is_some() {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for an invitation event")
    }

    pub async fn assert_quiet(&mut self) {
        let outcome = tokio::time::timeout(QUIET, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if event.invitation().is_some() => return event,
                    Ok(_) => continue,
                    Err(error) => panic!("dispatcher failed: {error}"),
                }
            }
        })
        .await;
        if let Ok(event) = outcome {
            panic!("unexpected invitation event: {event:?}");
        }
    }

    /// Send an outgoing invitation and wait until it is pending
    pub async fn invite(&mut self, connection_id: &str) -> Invitation {
        self.handle
            .invite_remote_user(user_for(connection_id))
            .expect("coordinator should be running");
        match self.next_event().await {
            BusEvent::InvitationSent(invitation) => invitation,
            other => panic!("expected InvitationSent, got {other:?}"),
        }
    }

    /// Receive an invitation from `connection_id` and wait until it is pending
    pub async fn receive(&mut self, connection_id: &str, session_id: &str) -> Invitation {
        self.session
            .deliver(SignalKind::Invitation, connection_id, payload(session_id));
        match self.next_event().await {
            BusEvent::InvitationReceived(invitation) => invitation,
            other => panic!("expected InvitationReceived, got {other:?}"),
        }
    }
}

pub fn payload(session_id: &str) -> String {
    serde_json::json!({ "sessionId": session_id, "apiKey": "key-remote" }).to_string()
}

/// Poll `condition` until it holds, panicking after [`WAIT`]
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {WAIT:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
