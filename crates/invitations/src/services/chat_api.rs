//! Chat API client used to back invitations with real chat sessions.

use async_trait::async_trait;
use huddle_config::ChatApiConfig;
use reqwest::Client;
use tracing::{debug, info};

use crate::entities::{ChatCredentials, ChatInfo};
use crate::types::InvitationResult;

/// Creates chat sessions and looks them up
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Create a new chat session and return its credentials
    async fn create_chat(&self) -> InvitationResult<ChatCredentials>;

    /// Fetch metadata for an existing chat session
    async fn chat_info(&self, session_id: &str) -> InvitationResult<ChatInfo>;
}

/// [`ChatApi`] over HTTP: `POST /chats` and `GET /chats?sessionId=`
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(config: &ChatApiConfig) -> InvitationResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chats_url(&self) -> String {
        format!("{}/chats", self.base_url)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn create_chat(&self) -> InvitationResult<ChatCredentials> {
        let response = self
            .client
            .post(self.chats_url())
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;

        let credentials: ChatCredentials = response.json().await?;
        info!(session_id = %credentials.session_id, "chat session created");
        Ok(credentials)
    }

    async fn chat_info(&self, session_id: &str) -> InvitationResult<ChatInfo> {
        let response = self
            .client
            .get(self.chats_url())
            .query(&[("sessionId", session_id)])
            .send()
            .await?
            .error_for_status()?;

        let info: ChatInfo = response.json().await?;
        debug!(session_id, "chat info fetched");
        Ok(info)
    }
}
