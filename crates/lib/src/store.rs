//! Conversation store: the conversation list, the model catalogue and the single current
//! conversation together with its transcript.
//!
//! State changes go through the synchronous `apply_*` methods so a front end can run the
//! network part elsewhere and hand the result back. The async methods combine both for
//! callers that can simply await. A failed fetch never leaves partially applied state.

use crate::api::{
    ApiError, Backend, ConversationDetail, ConversationSummary, CreatedConversation, Message,
    ModelInfo, Settings, SettingsUpdate,
};
use crate::config::Config;
use crate::render::Transcript;

/// The conversation the user is looking at.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentConversation {
    pub id: String,
    pub title: String,
    /// Empty until known (a freshly created conversation reports no model).
    pub model: String,
    pub settings: Settings,
}

/// Short model name for badges: the part after the first `/`, or the whole id.
pub fn model_badge(model: &str) -> &str {
    model.split('/').nth(1).filter(|s| !s.is_empty()).unwrap_or(model)
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Vec<ConversationSummary>,
    models: Vec<ModelInfo>,
    current: Option<CurrentConversation>,
    transcript: Transcript,
    default_title: String,
    default_settings: Settings,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new("New Chat", Settings::default())
    }
}

impl ConversationStore {
    pub fn new(default_title: impl Into<String>, default_settings: Settings) -> Self {
        Self {
            conversations: Vec::new(),
            models: Vec::new(),
            current: None,
            transcript: Transcript::new(),
            default_title: default_title.into(),
            default_settings,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.chat.default_title.clone(),
            Settings::from(&config.chat.default_settings),
        )
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn current(&self) -> Option<&CurrentConversation> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.id.as_str())
    }

    pub fn is_current(&self, id: &str) -> bool {
        self.current_id() == Some(id)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn default_title(&self) -> &str {
        &self.default_title
    }

    /// Title to display: the current conversation's, or the default for a new chat.
    pub fn title(&self) -> &str {
        self.current
            .as_ref()
            .map(|c| c.title.as_str())
            .unwrap_or(&self.default_title)
    }

    /// Settings to display: the current conversation's, or the configured defaults.
    pub fn settings(&self) -> &Settings {
        self.current
            .as_ref()
            .map(|c| &c.settings)
            .unwrap_or(&self.default_settings)
    }

    /// Badge text for the current model, if one is known.
    pub fn model_badge(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|c| c.model.as_str())
            .filter(|m| !m.is_empty())
            .map(model_badge)
    }

    pub fn set_models(&mut self, models: Vec<ModelInfo>) {
        self.models = models;
    }

    /// Replace the conversation list. Fills in the current model when the list knows it.
    pub fn set_conversations(&mut self, conversations: Vec<ConversationSummary>) {
        if let Some(cur) = self.current.as_mut() {
            if let Some(summary) = conversations.iter().find(|c| c.id == cur.id) {
                if cur.model.is_empty() {
                    if let Some(m) = &summary.model {
                        cur.model = m.clone();
                    }
                }
                if !summary.title.is_empty() {
                    cur.title = summary.title.clone();
                }
            }
        }
        self.conversations = conversations;
    }

    fn current_from_created(&self, created: CreatedConversation) -> CurrentConversation {
        let model = self
            .conversations
            .iter()
            .find(|c| c.id == created.id)
            .and_then(|c| c.model.clone())
            .unwrap_or_default();
        CurrentConversation {
            id: created.id,
            title: if created.title.is_empty() {
                self.default_title.clone()
            } else {
                created.title
            },
            model,
            settings: self.default_settings.clone(),
        }
    }

    /// A newly created conversation becomes current with an empty transcript.
    pub fn apply_created(&mut self, created: CreatedConversation) -> &CurrentConversation {
        let current = self.current_from_created(created);
        self.transcript.reset(Some(current.id.clone()));
        self.current.insert(current)
    }

    /// A conversation created while sending becomes current; the transcript (already showing
    /// the outgoing message) is kept and bound to it.
    pub fn adopt_created(&mut self, created: CreatedConversation) {
        let current = self.current_from_created(created);
        self.transcript.rebind(Some(current.id.clone()));
        self.current = Some(current);
    }

    /// Replace current id, title, model, settings and transcript in one step.
    pub fn apply_loaded(&mut self, detail: ConversationDetail) {
        let settings = detail
            .settings
            .unwrap_or_else(|| self.default_settings.clone());
        self.transcript.replace(detail.id.clone(), &detail.messages);
        self.current = Some(CurrentConversation {
            id: detail.id,
            title: detail.title,
            model: detail.model,
            settings,
        });
    }

    /// Forget the conversation locally. Returns true when it was the current one.
    pub fn apply_deleted(&mut self, id: &str) -> bool {
        self.conversations.retain(|c| c.id != id);
        if self.is_current(id) {
            self.current = None;
            self.transcript.reset(None);
            true
        } else {
            false
        }
    }

    /// Drop the current conversation and show an empty transcript.
    pub fn clear_current(&mut self) {
        self.current = None;
        self.transcript.reset(None);
    }

    /// Apply a settings change locally and return the request to send, or None when no
    /// conversation is current (nothing changes then).
    pub fn stage_settings(&mut self, update: SettingsUpdate) -> Option<(String, SettingsUpdate)> {
        let cur = self.current.as_mut()?;
        if update.is_empty() {
            return None;
        }
        if let Some(m) = &update.model {
            cur.model = m.clone();
        }
        if let Some(t) = update.temperature {
            cur.settings.temperature = t;
        }
        if let Some(n) = update.max_tokens {
            cur.settings.max_tokens = n;
        }
        if let Some(p) = &update.system_prompt {
            cur.settings.system_prompt = p.clone();
        }
        Some((cur.id.clone(), update))
    }

    /// Append a message to the visible transcript.
    pub fn push_message(&mut self, message: &Message) {
        self.transcript.append(message);
    }

    /// Empty the transcript before an implicit new conversation is started.
    pub(crate) fn reset_transcript_if_detached(&mut self) {
        if self.current.is_none() && !self.transcript.is_empty() {
            self.transcript.reset(None);
        }
    }

    /// Fetch the conversation list (always fresh) and store it.
    pub async fn list_conversations(
        &mut self,
        backend: &dyn Backend,
    ) -> Result<&[ConversationSummary], ApiError> {
        let list = backend.list_conversations().await?;
        self.set_conversations(list);
        Ok(&self.conversations)
    }

    /// Background refresh: failures are logged and the old list is kept.
    pub async fn refresh_conversations(&mut self, backend: &dyn Backend) -> bool {
        match backend.list_conversations().await {
            Ok(list) => {
                self.set_conversations(list);
                true
            }
            Err(e) => {
                log::warn!("failed to load conversations: {}", e);
                false
            }
        }
    }

    /// Background model catalogue load: failures are logged.
    pub async fn load_models(&mut self, backend: &dyn Backend) -> bool {
        match backend.list_models().await {
            Ok(models) => {
                self.set_models(models);
                true
            }
            Err(e) => {
                log::warn!("failed to load models: {}", e);
                false
            }
        }
    }

    /// Create a conversation (default title when None), make it current, refresh the list.
    pub async fn create_conversation(
        &mut self,
        backend: &dyn Backend,
        title: Option<&str>,
    ) -> Result<&CurrentConversation, ApiError> {
        let title = title.unwrap_or(&self.default_title).to_string();
        let created = backend.create_conversation(&title).await?;
        log::info!("created conversation {}", created.id);
        // Refresh first; the model is taken from the listed entry.
        self.refresh_conversations(backend).await;
        Ok(self.apply_created(created))
    }

    /// Load a conversation. On failure the current state is left as it was.
    pub async fn load_conversation(&mut self, backend: &dyn Backend, id: &str) -> Result<(), ApiError> {
        let detail = backend.get_conversation(id).await?;
        log::debug!("loaded conversation {} ({} messages)", detail.id, detail.messages.len());
        self.apply_loaded(detail);
        Ok(())
    }

    /// Delete a conversation, reset current when it was the one deleted, then refresh the list.
    pub async fn delete_conversation(&mut self, backend: &dyn Backend, id: &str) -> Result<(), ApiError> {
        let result = backend.delete_conversation(id).await;
        if result.is_ok() {
            log::info!("deleted conversation {}", id);
            self.apply_deleted(id);
        }
        self.refresh_conversations(backend).await;
        result
    }

    /// Send a partial settings update for the current conversation. No-op without one.
    /// Failures are logged, not returned. Returns true when the backend accepted it.
    pub async fn update_settings(&mut self, backend: &dyn Backend, update: SettingsUpdate) -> bool {
        let Some((id, update)) = self.stage_settings(update) else {
            return false;
        };
        match backend.update_settings(&id, &update).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("failed to update settings for {}: {}", id, e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{ChatResponse, Role};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory backend that counts calls and can be switched to fail.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub conversations: Mutex<Vec<ConversationDetail>>,
        pub fail: AtomicBool,
        pub next_id: AtomicUsize,
        pub calls: Mutex<HashMap<&'static str, usize>>,
        pub reply: Mutex<Option<String>>,
        pub settings_updates: Mutex<Vec<(String, SettingsUpdate)>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                reply: Mutex::new(Some("hi".to_string())),
                ..Self::default()
            }
        }

        pub fn calls(&self, name: &str) -> usize {
            self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
        }

        fn hit(&self, name: &'static str) -> Result<(), ApiError> {
            *self.calls.lock().unwrap().entry(name).or_insert(0) += 1;
            if self.fail.load(Ordering::SeqCst) {
                Err(ApiError::Status(500))
            } else {
                Ok(())
            }
        }

        pub fn seed(&self, id: &str, title: &str, messages: Vec<Message>) {
            self.conversations.lock().unwrap().push(ConversationDetail {
                id: id.to_string(),
                title: title.to_string(),
                model: "anthropic/claude-sonnet-4".to_string(),
                settings: Some(Settings {
                    temperature: 0.5,
                    max_tokens: 1000,
                    system_prompt: "be brief".to_string(),
                }),
                messages,
            });
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
            self.hit("list_models")?;
            Ok(vec![ModelInfo {
                id: "google/gemini-3-pro".into(),
                name: "Gemini 3 Pro".into(),
                provider: "Google".into(),
            }])
        }

        async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
            self.hit("list_conversations")?;
            Ok(self
                .conversations
                .lock()
                .unwrap()
                .iter()
                .map(|c| ConversationSummary {
                    id: c.id.clone(),
                    title: c.title.clone(),
                    updated_at: None,
                    model: Some(c.model.clone()),
                    message_count: Some(c.messages.len()),
                })
                .collect())
        }

        async fn create_conversation(&self, title: &str) -> Result<CreatedConversation, ApiError> {
            self.hit("create_conversation")?;
            let id = format!("conv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.seed(&id, title, Vec::new());
            Ok(CreatedConversation {
                id,
                title: title.to_string(),
                created_at: None,
            })
        }

        async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
            self.hit("get_conversation")?;
            self.conversations
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or(ApiError::Status(404))
        }

        async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
            self.hit("delete_conversation")?;
            let mut g = self.conversations.lock().unwrap();
            let before = g.len();
            g.retain(|c| c.id != id);
            if g.len() == before {
                return Err(ApiError::Status(404));
            }
            Ok(())
        }

        async fn update_settings(&self, id: &str, update: &SettingsUpdate) -> Result<(), ApiError> {
            self.hit("update_settings")?;
            self.settings_updates
                .lock()
                .unwrap()
                .push((id.to_string(), update.clone()));
            Ok(())
        }

        async fn send_chat(&self, conversation_id: &str, message: &str) -> Result<ChatResponse, ApiError> {
            self.hit("send_chat")?;
            let reply = self.reply.lock().unwrap().clone();
            let mut g = self.conversations.lock().unwrap();
            let conv = g
                .iter_mut()
                .find(|c| c.id == conversation_id)
                .ok_or(ApiError::Status(404))?;
            conv.messages.push(Message::user(message));
            if let Some(r) = &reply {
                conv.messages.push(Message::assistant(r.clone()));
            }
            Ok(ChatResponse {
                response: reply,
                conversation_id: Some(conversation_id.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn create_makes_current_and_clears_transcript() {
        let backend = FakeBackend::new();
        let mut store = ConversationStore::default();
        store.push_message(&Message::user("leftover"));
        let cur = store.create_conversation(&backend, None).await.unwrap();
        assert_eq!(cur.id, "conv-0");
        assert_eq!(cur.title, "New Chat");
        assert!(store.transcript().is_empty());
        assert_eq!(store.transcript().conversation_id(), store.current_id());
        assert_eq!(store.conversations().len(), 1);
        // model learned from the refreshed list
        assert_eq!(store.model_badge(), Some("claude-sonnet-4"));
    }

    #[test]
    fn apply_created_returns_the_new_current() {
        let mut store = ConversationStore::default();
        store.push_message(&Message::user("leftover"));
        let cur = store.apply_created(CreatedConversation {
            id: "c9".to_string(),
            title: String::new(),
            created_at: None,
        });
        assert_eq!(cur.id, "c9");
        assert_eq!(cur.title, "New Chat");
        assert_eq!(store.current_id(), Some("c9"));
        assert!(store.transcript().is_empty());
    }

    #[tokio::test]
    async fn load_replaces_everything() {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", vec![Message::user("q"), Message::assistant("**a**")]);
        let mut store = ConversationStore::default();
        store.load_conversation(&backend, "a").await.unwrap();
        let cur = store.current().unwrap();
        assert_eq!(cur.title, "Alpha");
        assert_eq!(cur.settings.system_prompt, "be brief");
        assert_eq!(store.transcript().len(), 2);
        assert_eq!(store.transcript().entries()[1].role, Role::Assistant);
        assert_eq!(store.transcript().conversation_id(), Some("a"));
    }

    #[tokio::test]
    async fn failed_load_leaves_state_unchanged() {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", vec![Message::user("q")]);
        let mut store = ConversationStore::default();
        store.load_conversation(&backend, "a").await.unwrap();

        assert!(store.load_conversation(&backend, "missing").await.is_err());
        backend.fail.store(true, Ordering::SeqCst);
        assert!(store.load_conversation(&backend, "a").await.is_err());

        assert_eq!(store.current_id(), Some("a"));
        assert_eq!(store.transcript().len(), 1);
    }

    #[tokio::test]
    async fn deleting_current_resets_and_refreshes() {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", vec![Message::user("q")]);
        backend.seed("b", "Beta", Vec::new());
        let mut store = ConversationStore::default();
        store.load_conversation(&backend, "a").await.unwrap();
        let lists_before = backend.calls("list_conversations");

        store.delete_conversation(&backend, "a").await.unwrap();
        assert_eq!(store.current_id(), None);
        assert!(store.transcript().is_empty());
        assert_eq!(store.transcript().conversation_id(), None);
        assert_eq!(backend.calls("list_conversations"), lists_before + 1);
        assert_eq!(store.conversations().len(), 1);
        assert_eq!(store.title(), "New Chat");
    }

    #[tokio::test]
    async fn deleting_other_keeps_current() {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", vec![Message::user("q")]);
        backend.seed("b", "Beta", Vec::new());
        let mut store = ConversationStore::default();
        store.load_conversation(&backend, "a").await.unwrap();
        store.delete_conversation(&backend, "b").await.unwrap();
        assert_eq!(store.current_id(), Some("a"));
        assert_eq!(store.transcript().len(), 1);
    }

    #[tokio::test]
    async fn settings_update_without_current_is_noop() {
        let backend = FakeBackend::new();
        let mut store = ConversationStore::default();
        assert!(!store.update_settings(&backend, SettingsUpdate::temperature(0.2)).await);
        assert_eq!(backend.calls("update_settings"), 0);
    }

    #[tokio::test]
    async fn settings_update_is_partial_and_failure_is_swallowed() {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", Vec::new());
        let mut store = ConversationStore::default();
        store.load_conversation(&backend, "a").await.unwrap();

        assert!(store.update_settings(&backend, SettingsUpdate::max_tokens(64)).await);
        assert_eq!(store.settings().max_tokens, 64);
        assert_eq!(
            backend.settings_updates.lock().unwrap()[0],
            ("a".to_string(), SettingsUpdate::max_tokens(64))
        );

        backend.fail.store(true, Ordering::SeqCst);
        assert!(!store.update_settings(&backend, SettingsUpdate::model("openai/gpt-4o")).await);
        assert_eq!(store.model_badge(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn refresh_failure_keeps_old_list() {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", Vec::new());
        let mut store = ConversationStore::default();
        assert!(store.refresh_conversations(&backend).await);
        backend.fail.store(true, Ordering::SeqCst);
        assert!(!store.refresh_conversations(&backend).await);
        assert_eq!(store.conversations().len(), 1);
        assert!(!store.load_models(&backend).await);
        assert!(store.models().is_empty());
    }

    #[tokio::test]
    async fn list_is_fetched_every_time() {
        let backend = FakeBackend::new();
        let mut store = ConversationStore::default();
        store.list_conversations(&backend).await.unwrap();
        backend.seed("x", "X", Vec::new());
        let list = store.list_conversations(&backend).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(backend.calls("list_conversations"), 2);
    }

    #[test]
    fn badge_text() {
        assert_eq!(model_badge("anthropic/claude-sonnet-4"), "claude-sonnet-4");
        assert_eq!(model_badge("local-model"), "local-model");
        assert_eq!(model_badge("odd/"), "odd/");
    }
}
