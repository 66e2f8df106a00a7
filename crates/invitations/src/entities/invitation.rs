use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::ChatApi;
use crate::types::{Connection, InvitationError, InvitationId, InvitationResult, RemoteUser};

/// Which side of the invitation the local user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Someone invited the local user
    Incoming,
    /// The local user invited someone
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// Represents one invitation to join a chat session
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    /// Local handle, never sent over the wire
    id: InvitationId,
    direction: Direction,
    /// Inviter for incoming invitations, invitee for outgoing ones
    counterparty: RemoteUser,
    session_id: Option<String>,
    api_key: Option<String>,
    /// Stays local; only the session id and api key cross the wire
    token: Option<String>,
    created_at: DateTime<Utc>,
}

/// Credentials issued by the chat API for a new session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCredentials {
    pub session_id: String,
    pub api_key: String,
    pub token: String,
}

/// Chat metadata as returned by a lookup; absent fields leave the invitation untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// The data field of every invitation signal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SignalPayload {
    pub fn parse(data: &str) -> InvitationResult<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

impl Invitation {
    /// Create a new invitation without credentials
    pub fn new(direction: Direction, counterparty: RemoteUser) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            counterparty,
            session_id: None,
            api_key: None,
            token: None,
            created_at: Utc::now(),
        }
    }

    /// An invitation the local user is about to send
    pub fn outgoing(invitee: RemoteUser) -> Self {
        Self::new(Direction::Outgoing, invitee)
    }

    /// An invitation the local user received
    pub fn incoming(inviter: RemoteUser) -> Self {
        Self::new(Direction::Incoming, inviter)
    }

    pub fn id(&self) -> InvitationId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == Direction::Incoming
    }

    pub fn counterparty(&self) -> &RemoteUser {
        &self.counterparty
    }

    /// The inviting user, for incoming invitations only
    pub fn inviter(&self) -> Option<&RemoteUser> {
        self.is_incoming().then_some(&self.counterparty)
    }

    /// The invited user, for outgoing invitations only
    pub fn invitee(&self) -> Option<&RemoteUser> {
        (!self.is_incoming()).then_some(&self.counterparty)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True once session id, api key and token are all known
    pub fn is_ready_for_chat(&self) -> bool {
        self.session_id.is_some() && self.api_key.is_some() && self.token.is_some()
    }

    pub fn apply_credentials(&mut self, credentials: ChatCredentials) {
        self.session_id = Some(credentials.session_id);
        self.api_key = Some(credentials.api_key);
        self.token = Some(credentials.token);
    }

    pub fn merge_chat_info(&mut self, info: ChatInfo) {
        if let Some(session_id) = info.session_id {
            self.session_id = Some(session_id);
        }
        if let Some(api_key) = info.api_key {
            self.api_key = Some(api_key);
        }
        if let Some(token) = info.token {
            self.token = Some(token);
        }
    }

    /// Ask the chat API for a fresh session and take on its credentials
    pub async fn establish_as_outgoing(&mut self, api: &dyn ChatApi) -> InvitationResult<()> {
        if self.is_incoming() {
            return Err(InvitationError::InvalidDirection {
                expected: Direction::Outgoing.as_str(),
            });
        }

        let credentials = api.create_chat().await?;
        self.apply_credentials(credentials);
        Ok(())
    }

    /// Refresh chat metadata for the session this invitation points at
    pub async fn load_chat_info(&mut self, api: &dyn ChatApi) -> InvitationResult<()> {
        let session_id = self
            .session_id
            .clone()
            .ok_or(InvitationError::MissingSessionId)?;

        let info = api.chat_info(&session_id).await?;
        self.merge_chat_info(info);
        Ok(())
    }

    pub fn signal_payload(&self) -> SignalPayload {
        SignalPayload {
            session_id: self.session_id.clone(),
            api_key: self.api_key.clone(),
        }
    }

    /// Serialize the wire payload: session id and api key, never the token
    pub fn to_signal_payload(&self) -> InvitationResult<String> {
        Ok(serde_json::to_string(&self.signal_payload())?)
    }

    /// Merge a received payload into this invitation
    pub fn apply_signal_payload(&mut self, data: &str) -> InvitationResult<()> {
        let payload = SignalPayload::parse(data)?;
        if let Some(session_id) = payload.session_id {
            self.session_id = Some(session_id);
        }
        if let Some(api_key) = payload.api_key {
            self.api_key = Some(api_key);
        }
        Ok(())
    }

    /// Structural comparison of signal data with this invitation's payload
    pub fn matches_payload(&self, data: &str) -> bool {
        SignalPayload::parse(data)
            .map(|payload| payload == self.signal_payload())
            .unwrap_or(false)
    }

    /// Whether a signal from `from` carrying `data` refers to this invitation
    pub fn matches_signal(&self, direction: Direction, from: &Connection, data: &str) -> bool {
        self.direction == direction
            && self.counterparty.connection.same_endpoint(from)
            && self.matches_payload(data)
    }
}
