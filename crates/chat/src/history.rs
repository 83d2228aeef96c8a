//! Conversation history retrieval over the marketplace REST API.
//!
//! History is an external collaborator: the realtime core only needs
//! "give me the ordered messages for this conversation". The default
//! implementation talks to the REST endpoint with the same bearer token
//! the socket uses.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use pawcare_shared::{
    try_problem_detail, ApiError, ChatMessage, ConversationContext, MessagePayload,
};

/// Source of conversation history, consulted once per context after the
/// first successful connect.
#[async_trait]
pub trait HistoryProvider: Send + Sync + 'static {
    async fn fetch_conversation(
        &self,
        context: &ConversationContext,
        token: &str,
    ) -> Result<Vec<ChatMessage>, ApiError>;
}

/// REST-backed history client.
#[derive(Debug, Clone)]
pub struct RestHistoryClient {
    client: Client,
    base_url: String,
}

impl RestHistoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn conversation_url(&self, context: &ConversationContext) -> String {
        format!(
            "{}/api/conversations/{}/{}/messages",
            self.base_url.trim_end_matches('/'),
            context.recipient_kind.as_str(),
            urlencoding::encode(&context.recipient_id)
        )
    }

    /// Make a bearer-authenticated GET request, mapping RFC7807 error
    /// bodies into readable failures.
    async fn get_json<TRes: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<TRes, ApiError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            let body = try_problem_detail(&text).unwrap_or(text);
            return Err(ApiError::Http { status, body });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

#[async_trait]
impl HistoryProvider for RestHistoryClient {
    async fn fetch_conversation(
        &self,
        context: &ConversationContext,
        token: &str,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let url = self.conversation_url(context);
        let page: Vec<MessagePayload> = self.get_json(&url, token).await?;
        Ok(page.into_iter().map(ChatMessage::from).collect())
    }
}
