//! Coordinates the invitation lifecycle between the local user and remote peers.
//!
//! The coordinator is a single task that owns the pending set. Local intents
//! arrive through a [`CoordinatorHandle`] or the dispatcher, remote intents as
//! signals from the presence session. Anything that has to wait (chat API
//! calls, signal sends, availability and remote-user queries) runs in its own
//! task and reports back through the coordinator's inbox, so the pending set
//! is only ever touched from the coordinator task.
//!
//! The two peers keep independent pending sets and share no invitation id.
//! A remote signal is matched to a local invitation by direction, sender
//! connection and payload; a signal that matches nothing lost a race against
//! a local action and is dropped with a warning.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::entities::{Direction, Invitation};
use crate::services::ChatApi;
use crate::session::SessionHandle;
use crate::types::{
    BusEvent, Connection, InvitationError, InvitationId, InvitationResult, OutboundSignal,
    RemoteUser, SignalEvent, SignalKind,
};

/// How to pick the incoming invitation to decline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineTarget {
    /// A pending incoming invitation by its local handle
    Invitation(InvitationId),
    /// The pending incoming invitation whose inviter is on this connection
    Connection(Connection),
}

enum Message {
    Command(Command),
    Signal(SignalEvent),
    Completed(Completion),
}

enum Command {
    Invite(RemoteUser),
    Cancel(InvitationId),
    Accept(InvitationId),
    Decline(DeclineTarget),
    Snapshot(oneshot::Sender<Vec<Invitation>>),
    Shutdown,
}

/// Results of spawned work, applied back on the coordinator task
enum Completion {
    InvitationSent(Invitation),
    CancellationSent(InvitationId),
    AcceptanceSent(InvitationId),
    DeclinationSent(InvitationId),
    IncomingResolved {
        inviter: RemoteUser,
        from: Connection,
        data: String,
    },
    IncomingRefused { from: Connection, data: String },
}

/// An incoming invitation still waiting on availability and remote-user lookups
struct Resolution {
    from: Connection,
    data: String,
    withdrawn: bool,
}

/// Cloneable front door for local intents
#[derive(Clone)]
pub struct CoordinatorHandle {
    inbox: mpsc::UnboundedSender<Message>,
}

impl CoordinatorHandle {
    /// Create an outgoing invitation and send it to `remote_user`
    pub fn invite_remote_user(&self, remote_user: RemoteUser) -> InvitationResult<()> {
        self.send(Command::Invite(remote_user))
    }

    /// Withdraw an outgoing invitation
    pub fn cancel_invitation(&self, id: InvitationId) -> InvitationResult<()> {
        self.send(Command::Cancel(id))
    }

    /// Accept an incoming invitation, declining every other pending one
    pub fn accept_invitation(&self, id: InvitationId) -> InvitationResult<()> {
        self.send(Command::Accept(id))
    }

    /// Turn down a pending incoming invitation
    pub fn decline_invitation(&self, target: DeclineTarget) -> InvitationResult<()> {
        self.send(Command::Decline(target))
    }

    /// Snapshot of the pending set, in insertion order
    pub async fn pending(&self) -> InvitationResult<Vec<Invitation>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| InvitationError::CoordinatorStopped)
    }

    /// Stop the coordinator task once queued messages ahead of this one are handled
    pub fn shutdown(&self) -> InvitationResult<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> InvitationResult<()> {
        self.inbox
            .send(Message::Command(command))
            .map_err(|_| InvitationError::CoordinatorStopped)
    }
}

pub struct InvitationCoordinator {
    pending: Vec<Invitation>,
    resolving: Vec<Resolution>,
    session: Option<SessionHandle>,
    dispatcher: Dispatcher,
    bus: broadcast::Receiver<BusEvent>,
    chat_api: Arc<dyn ChatApi>,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox_rx: mpsc::UnboundedReceiver<Message>,
}

impl InvitationCoordinator {
    /// Create a coordinator listening on `dispatcher`.
    ///
    /// The bus subscription starts here, so events triggered between
    /// construction and [`run`](Self::run) are not lost.
    pub fn new(dispatcher: Dispatcher, chat_api: Arc<dyn ChatApi>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            pending: Vec::new(),
            resolving: Vec::new(),
            session: None,
            bus: dispatcher.subscribe(),
            dispatcher,
            chat_api,
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            inbox: self.inbox_tx.clone(),
        }
    }

    /// Run the coordinator on its own task
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        debug!("invitation coordinator started");
        loop {
            tokio::select! {
                message = self.inbox_rx.recv() => {
                    let Some(message) = message else { break };
                    if !self.handle_message(message) {
                        break;
                    }
                }
                event = self.bus.recv() => match event {
                    Ok(event) => self.handle_bus_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "coordinator lagged behind the dispatcher");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!(pending = self.pending.len(), "invitation coordinator stopped");
    }

    fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Command(Command::Invite(remote_user)) => self.invite_remote_user(remote_user),
            Message::Command(Command::Cancel(id)) => self.cancel_invitation(id),
            Message::Command(Command::Accept(id)) => self.accept_invitation(id),
            Message::Command(Command::Decline(target)) => self.decline_invitation(target),
            Message::Command(Command::Snapshot(reply)) => {
                let _ = reply.send(self.pending.clone());
            }
            Message::Command(Command::Shutdown) => return false,
            Message::Signal(signal) => self.handle_signal(signal),
            Message::Completed(completion) => self.handle_completion(completion),
        }
        true
    }

    fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::PresenceSessionReady(session) => self.bind_session(session),
            BusEvent::InviteRemoteUser(remote_user) => self.invite_remote_user(remote_user),
            _ => {}
        }
    }

    fn handle_signal(&mut self, signal: SignalEvent) {
        debug!(kind = %signal.kind, from = %signal.from.connection_id, "signal received");
        match signal.kind {
            SignalKind::Invitation => self.receive_invitation(signal),
            SignalKind::CancelInvitation => self.receive_cancellation(signal),
            SignalKind::AcceptInvitation => self.receive_acceptance(signal),
            SignalKind::DeclineInvitation => self.receive_declination(signal),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::InvitationSent(invitation) => {
                info!(
                    invitation_id = %invitation.id(),
                    invitee = %invitation.counterparty().name,
                    "invitation sent"
                );
                self.pending.push(invitation.clone());
                self.dispatcher.trigger(BusEvent::InvitationSent(invitation));
            }
            Completion::CancellationSent(id) => match self.remove(id) {
                Some(invitation) => {
                    info!(invitation_id = %id, "invitation cancelled");
                    self.dispatcher
                        .trigger(BusEvent::InvitationCancelled(invitation));
                }
                None => warn!(
                    invitation_id = %id,
                    "invitation was resolved remotely while its cancellation was in flight"
                ),
            },
            Completion::AcceptanceSent(id) => self.complete_acceptance(id),
            Completion::DeclinationSent(id) => {
                if self.remove(id).is_some() {
                    info!(invitation_id = %id, "invitation declined");
                } else {
                    debug!(invitation_id = %id, "declined invitation already left the pending set");
                }
            }
            Completion::IncomingResolved { inviter, from, data } => {
                self.add_incoming(inviter, from, data)
            }
            Completion::IncomingRefused { from, data } => {
                if self.take_resolution(&from, &data) {
                    self.refuse_invitation(from, data);
                }
            }
        }
    }

    fn bind_session(&mut self, session: SessionHandle) {
        if self.session.is_some() {
            warn!(
                connection_id = %session.connection().connection_id,
                "presence session already bound, ignoring"
            );
            return;
        }

        let mut signals = session.subscribe();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => {
                        if inbox.send(Message::Signal(signal)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "signal subscription lagged, signals were lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        info!(
            connection_id = %session.connection().connection_id,
            "presence session ready, listening for invitation signals"
        );
        self.session = Some(session);
    }

    fn invite_remote_user(&mut self, remote_user: RemoteUser) {
        info!(invitee = %remote_user.name, "inviting remote user");
        let Some(session) = self.session.clone() else {
            error!(
                invitee = %remote_user.name,
                error = %InvitationError::SessionNotReady,
                "cannot send invitation"
            );
            return;
        };

        let chat_api = self.chat_api.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let mut invitation = Invitation::outgoing(remote_user);
            if let Err(error) = invitation.establish_as_outgoing(chat_api.as_ref()).await {
                error!(
                    invitee = %invitation.counterparty().name,
                    %error,
                    "failed to create a chat session for the invitation"
                );
                return;
            }

            let signal = match outbound(SignalKind::Invitation, &invitation) {
                Ok(signal) => signal,
                Err(error) => {
                    error!(%error, "failed to encode invitation");
                    return;
                }
            };

            if let Err(error) = session.signal(signal).await {
                error!(
                    invitee = %invitation.counterparty().name,
                    %error,
                    "failed to send invitation"
                );
                return;
            }

            let _ = inbox.send(Message::Completed(Completion::InvitationSent(invitation)));
        });
    }

    fn cancel_invitation(&mut self, id: InvitationId) {
        let Some(invitation) = self.find(id) else {
            warn!(error = %InvitationError::invitation_not_found(id), "cannot cancel invitation");
            return;
        };
        if invitation.is_incoming() {
            warn!(invitation_id = %id, "only outgoing invitations can be cancelled");
            return;
        }

        self.send_for(
            SignalKind::CancelInvitation,
            invitation,
            Some(Completion::CancellationSent(id)),
        );
    }

    fn accept_invitation(&mut self, id: InvitationId) {
        let Some(invitation) = self.find(id) else {
            warn!(error = %InvitationError::invitation_not_found(id), "cannot accept invitation");
            return;
        };
        if !invitation.is_incoming() {
            warn!(invitation_id = %id, "only incoming invitations can be accepted");
            return;
        }

        self.send_for(
            SignalKind::AcceptInvitation,
            invitation,
            Some(Completion::AcceptanceSent(id)),
        );
    }

    fn complete_acceptance(&mut self, id: InvitationId) {
        let Some(accepted) = self.remove(id) else {
            warn!(
                invitation_id = %id,
                "invitation was cancelled while its acceptance was in flight"
            );
            return;
        };

        // Only one chat at a time: everything else still pending gets turned down.
        let others = self.pending.clone();
        for other in &others {
            match other.direction() {
                Direction::Incoming => self.send_for(
                    SignalKind::DeclineInvitation,
                    other,
                    Some(Completion::DeclinationSent(other.id())),
                ),
                Direction::Outgoing => self.send_for(
                    SignalKind::CancelInvitation,
                    other,
                    Some(Completion::CancellationSent(other.id())),
                ),
            }
        }

        info!(
            invitation_id = %id,
            inviter = %accepted.counterparty().name,
            turned_down = others.len(),
            "invitation accepted"
        );
        self.dispatcher.trigger(BusEvent::InvitationAccepted(accepted));
    }

    fn decline_invitation(&mut self, target: DeclineTarget) {
        let invitation = match &target {
            DeclineTarget::Invitation(id) => self.find(*id).filter(|i| i.is_incoming()),
            DeclineTarget::Connection(connection) => self
                .pending
                .iter()
                .find(|i| i.is_incoming() && i.counterparty().connection.same_endpoint(connection)),
        };
        let Some(invitation) = invitation else {
            let error = match &target {
                DeclineTarget::Invitation(id) => InvitationError::invitation_not_found(id),
                DeclineTarget::Connection(connection) => InvitationError::invitation_not_found(
                    format!("from {}", connection.connection_id),
                ),
            };
            warn!(%error, "cannot decline invitation");
            return;
        };

        let id = invitation.id();
        self.send_for(
            SignalKind::DeclineInvitation,
            invitation,
            Some(Completion::DeclinationSent(id)),
        );
    }

    fn receive_invitation(&mut self, signal: SignalEvent) {
        info!(from = %signal.from.connection_id, "invitation received");
        self.resolving.push(Resolution {
            from: signal.from.clone(),
            data: signal.data.clone(),
            withdrawn: false,
        });

        let dispatcher = self.dispatcher.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let SignalEvent { from, data, .. } = signal;
            let completion = match resolve_inviter(&dispatcher, &from).await {
                Some(inviter) => Completion::IncomingResolved {
                    inviter,
                    from,
                    data,
                },
                None => Completion::IncomingRefused { from, data },
            };
            let _ = inbox.send(Message::Completed(completion));
        });
    }

    fn add_incoming(&mut self, inviter: RemoteUser, from: Connection, data: String) {
        if !self.take_resolution(&from, &data) {
            info!(
                inviter = %inviter.name,
                "invitation was cancelled before the local user could see it"
            );
            return;
        }

        let mut invitation = Invitation::incoming(inviter);
        if let Err(error) = invitation.apply_signal_payload(&data) {
            warn!(inviter = %invitation.counterparty().name, %error, "dropping malformed invitation");
            return;
        }

        info!(
            invitation_id = %invitation.id(),
            inviter = %invitation.counterparty().name,
            "invitation pending"
        );
        self.pending.push(invitation.clone());
        self.dispatcher
            .trigger(BusEvent::InvitationReceived(invitation));
    }

    /// Decline straight back to the sender without ever listing the invitation
    fn refuse_invitation(&self, from: Connection, data: String) {
        info!(from = %from.connection_id, "declining invitation, local user is unavailable");
        self.spawn_signal(
            OutboundSignal::new(SignalKind::DeclineInvitation, from, data),
            None,
        );
    }

    fn receive_cancellation(&mut self, signal: SignalEvent) {
        if let Some(index) = self.position(Direction::Incoming, &signal) {
            let invitation = self.pending.remove(index);
            info!(invitation_id = %invitation.id(), "invitation cancelled by inviter");
            return;
        }

        if let Some(resolution) = self
            .resolving
            .iter_mut()
            .find(|r| !r.withdrawn && r.from.same_endpoint(&signal.from) && r.data == signal.data)
        {
            resolution.withdrawn = true;
            info!(from = %signal.from.connection_id, "invitation cancelled while still being resolved");
            return;
        }

        // e.g. the local user declined before the cancellation arrived
        warn!(
            from = %signal.from.connection_id,
            "receive_cancellation could not find an invitation to cancel"
        );
    }

    fn receive_acceptance(&mut self, signal: SignalEvent) {
        let Some(index) = self.position(Direction::Outgoing, &signal) else {
            // e.g. the local user cancelled before the acceptance arrived
            warn!(
                from = %signal.from.connection_id,
                "receive_acceptance could not find an invitation to accept"
            );
            return;
        };

        let invitation = self.pending.remove(index);
        info!(invitation_id = %invitation.id(), "invitation accepted by invitee");
        self.dispatcher
            .trigger(BusEvent::InvitationAccepted(invitation));
    }

    fn receive_declination(&mut self, signal: SignalEvent) {
        let Some(index) = self.position(Direction::Outgoing, &signal) else {
            warn!(
                from = %signal.from.connection_id,
                "receive_declination could not find an invitation to decline"
            );
            return;
        };

        let invitation = self.pending.remove(index);
        info!(invitation_id = %invitation.id(), "invitation declined by invitee");
        self.dispatcher
            .trigger(BusEvent::InvitationDeclined(invitation));
    }

    fn send_for(&self, kind: SignalKind, invitation: &Invitation, on_sent: Option<Completion>) {
        match outbound(kind, invitation) {
            Ok(signal) => self.spawn_signal(signal, on_sent),
            Err(error) => error!(%kind, invitation_id = %invitation.id(), %error, "failed to encode signal"),
        }
    }

    fn spawn_signal(&self, signal: OutboundSignal, on_sent: Option<Completion>) {
        let Some(session) = self.session.clone() else {
            error!(
                kind = %signal.kind,
                error = %InvitationError::SessionNotReady,
                "cannot send signal"
            );
            return;
        };

        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let kind = signal.kind;
            let to = signal.to.connection_id.clone();
            match session.signal(signal).await {
                Ok(()) => {
                    debug!(%kind, to = %to, "signal sent");
                    if let Some(completion) = on_sent {
                        let _ = inbox.send(Message::Completed(completion));
                    }
                }
                Err(error) => error!(%kind, to = %to, %error, "failed to send signal"),
            }
        });
    }

    fn find(&self, id: InvitationId) -> Option<&Invitation> {
        self.pending.iter().find(|invitation| invitation.id() == id)
    }

    fn position(&self, direction: Direction, signal: &SignalEvent) -> Option<usize> {
        self.pending
            .iter()
            .position(|invitation| invitation.matches_signal(direction, &signal.from, &signal.data))
    }

    fn remove(&mut self, id: InvitationId) -> Option<Invitation> {
        let index = self.pending.iter().position(|invitation| invitation.id() == id)?;
        Some(self.pending.remove(index))
    }

    /// Drop the resolution for this sender and payload, reporting whether it is still wanted
    fn take_resolution(&mut self, from: &Connection, data: &str) -> bool {
        match self
            .resolving
            .iter()
            .position(|r| r.from.same_endpoint(from) && r.data == data)
        {
            Some(index) => !self.resolving.remove(index).withdrawn,
            None => true,
        }
    }
}

fn outbound(kind: SignalKind, invitation: &Invitation) -> InvitationResult<OutboundSignal> {
    Ok(OutboundSignal::new(
        kind,
        invitation.counterparty().connection.clone(),
        invitation.to_signal_payload()?,
    ))
}

/// The inviter behind `from`, or `None` when the invitation should be refused
async fn resolve_inviter(dispatcher: &Dispatcher, from: &Connection) -> Option<RemoteUser> {
    match dispatcher.request_user_availability().await {
        Ok(true) => {}
        Ok(false) => {
            info!(from = %from.connection_id, "local user unavailable");
            return None;
        }
        Err(error) => {
            warn!(from = %from.connection_id, %error, "could not determine local availability");
            return None;
        }
    }

    match dispatcher.request_remote_user(from.clone()).await {
        Ok(Some(inviter)) => Some(inviter),
        Ok(None) => {
            warn!(from = %from.connection_id, "no remote user known for connection");
            None
        }
        Err(error) => {
            warn!(from = %from.connection_id, %error, "could not resolve remote user");
            None
        }
    }
}
