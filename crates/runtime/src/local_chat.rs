//! Chat API that issues sessions in-process, for offline runs and demos.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use huddle_invitations::{ChatApi, ChatCredentials, ChatInfo, InvitationError, InvitationResult};
use tracing::info;

#[derive(Debug, Default)]
pub struct LocalChatApi {
    sessions: RwLock<HashMap<String, ChatCredentials>>,
}

impl LocalChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ChatApi for LocalChatApi {
    async fn create_chat(&self) -> InvitationResult<ChatCredentials> {
        let credentials = ChatCredentials {
            session_id: cuid2::create_id(),
            api_key: cuid2::create_id(),
            token: cuid2::create_id(),
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credentials.session_id.clone(), credentials.clone());
        info!(session_id = %credentials.session_id, "local chat session created");

        Ok(credentials)
    }

    async fn chat_info(&self, session_id: &str) -> InvitationResult<ChatInfo> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let credentials = sessions
            .get(session_id)
            .ok_or_else(|| InvitationError::chat_api(format!("unknown chat session {session_id}")))?;

        Ok(ChatInfo {
            session_id: Some(credentials.session_id.clone()),
            api_key: Some(credentials.api_key.clone()),
            token: Some(credentials.token.clone()),
        })
    }
}
