//! Event types carried on the dispatcher.

use crate::entities::Invitation;
use crate::session::SessionHandle;

use super::{Connection, RemoteUser, RequestId};

/// Everything that travels over the dispatcher
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// The signaling session finished connecting
    PresenceSessionReady(SessionHandle),

    /// The local user asked to invite someone
    InviteRemoteUser(RemoteUser),

    /// Query for the local user's availability, answered through the dispatcher
    GetUserAvailability { request_id: RequestId },

    /// Query for the remote user behind a connection, answered through the dispatcher
    GetRemoteUser {
        request_id: RequestId,
        connection: Connection,
    },

    /// An incoming invitation was added to the pending set
    InvitationReceived(Invitation),

    /// An outgoing invitation reached the invitee
    InvitationSent(Invitation),

    /// The local user withdrew an outgoing invitation
    InvitationCancelled(Invitation),

    /// Either side accepted; the invitation is ready to become a chat
    InvitationAccepted(Invitation),

    /// The invitee turned down an outgoing invitation
    InvitationDeclined(Invitation),
}

impl BusEvent {
    /// The invitation this event reports on, if any
    pub fn invitation(&self) -> Option<&Invitation> {
        match self {
            BusEvent::InvitationReceived(invitation)
            | BusEvent::InvitationSent(invitation)
            | BusEvent::InvitationCancelled(invitation)
            | BusEvent::InvitationAccepted(invitation)
            | BusEvent::InvitationDeclined(invitation) => Some(invitation),
            BusEvent::PresenceSessionReady(_)
            | BusEvent::InviteRemoteUser(_)
            | BusEvent::GetUserAvailability { .. }
            | BusEvent::GetRemoteUser { .. } => None,
        }
    }

    /// Get event type name for logging
    pub fn event_type_name(&self) -> &'static str {
        match self {
            BusEvent::PresenceSessionReady(_) => "presence_session_ready",
            BusEvent::InviteRemoteUser(_) => "invite_remote_user",
            BusEvent::GetUserAvailability { .. } => "get_user_availability",
            BusEvent::GetRemoteUser { .. } => "get_remote_user",
            BusEvent::InvitationReceived(_) => "invitation_received",
            BusEvent::InvitationSent(_) => "invitation_sent",
            BusEvent::InvitationCancelled(_) => "invitation_cancelled",
            BusEvent::InvitationAccepted(_) => "invitation_accepted",
            BusEvent::InvitationDeclined(_) => "invitation_declined",
        }
    }
}
