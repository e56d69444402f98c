//! HTTP client for the conversation backend (http://127.0.0.1:8000 by default).
//! Single attempt per call, no retries.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{
    ChatRequest, ChatResponse, ConversationDetail, ConversationSummary, ConversationsEnvelope,
    CreatedConversation, ModelInfo, ModelsEnvelope, NewConversationRequest, SettingsUpdate,
};

/// Any failed backend call. All variants are network errors from the caller's point of view.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// The backend operations the store and controller depend on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// GET /api/models
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError>;
    /// GET /api/conversations
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError>;
    /// POST /api/conversations
    async fn create_conversation(&self, title: &str) -> Result<CreatedConversation, ApiError>;
    /// GET /api/conversations/{id}
    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError>;
    /// DELETE /api/conversations/{id}
    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;
    /// PUT /api/conversations/{id}/settings
    async fn update_settings(&self, id: &str, update: &SettingsUpdate) -> Result<(), ApiError>;
    /// POST /api/chat
    async fn send_chat(&self, conversation_id: &str, message: &str) -> Result<ChatResponse, ApiError>;
}

/// Client for the backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build `{base}/seg/seg/...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<url::Url, ApiError> {
        let mut url =
            url::Url::parse(&self.base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Perform one JSON request and return the decoded JSON body.
    /// Fails on transport errors and on any non-success status; the error body is not parsed.
    pub async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<serde_json::Value, ApiError> {
        let url = self.endpoint(segments)?;
        log::debug!("{} {}", method, url);
        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }
        let res = req.send().await.map_err(|e| {
            log::error!("{} {} failed: {}", method, url, e);
            ApiError::Transport(e)
        })?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            log::error!("{} {} returned {}: {}", method, url, status, text);
            return Err(ApiError::Status(status.as_u16()));
        }
        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn call_as<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let value = self.call(method, segments, body).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

const NO_BODY: Option<&()> = None;

#[async_trait]
impl Backend for ApiClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let data: ModelsEnvelope = self.call_as(Method::GET, &["api", "models"], NO_BODY).await?;
        Ok(data.models)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let data: ConversationsEnvelope = self
            .call_as(Method::GET, &["api", "conversations"], NO_BODY)
            .await?;
        Ok(data.conversations)
    }

    async fn create_conversation(&self, title: &str) -> Result<CreatedConversation, ApiError> {
        let body = NewConversationRequest { title };
        self.call_as(Method::POST, &["api", "conversations"], Some(&body))
            .await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        self.call_as(Method::GET, &["api", "conversations", id], NO_BODY)
            .await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.call(Method::DELETE, &["api", "conversations", id], NO_BODY)
            .await?;
        Ok(())
    }

    async fn update_settings(&self, id: &str, update: &SettingsUpdate) -> Result<(), ApiError> {
        self.call(
            Method::PUT,
            &["api", "conversations", id, "settings"],
            Some(update),
        )
        .await?;
        Ok(())
    }

    async fn send_chat(&self, conversation_id: &str, message: &str) -> Result<ChatResponse, ApiError> {
        let body = ChatRequest {
            conversation_id,
            message,
        };
        self.call_as(Method::POST, &["api", "chat"], Some(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_and_encodes_segments() {
        let client = ApiClient::new("http://127.0.0.1:8000/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8000");
        let url = client.endpoint(&["api", "conversations", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/api/conversations/a%20b%2Fc");
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let client = ApiClient::new("http://host.test/chat");
        let url = client.endpoint(&["api", "models"]).unwrap();
        assert_eq!(url.as_str(), "http://host.test/chat/api/models");
    }

    #[test]
    fn bad_base_url_is_reported() {
        let client = ApiClient::new("not a url");
        assert!(matches!(
            client.endpoint(&["api"]),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn status_error_text() {
        assert_eq!(ApiError::Status(404).to_string(), "API error: 404");
    }
}
