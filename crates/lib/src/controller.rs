//! Chat controller: owns all client-side state and drives the send flow.
//!
//! Send is a small state machine, Idle -> Sending -> Idle. [`ChatController::begin_send`]
//! does the synchronous part (compose, clear staging and input, show the user message),
//! [`deliver`] does the network part and [`ChatController::finish_send`] always returns to
//! Idle, rendering either the reply or an error message. A send requested while Sending is
//! dropped. A send is bound to the conversation and transcript it started on; if the user
//! has moved elsewhere by the time it finishes, nothing is rendered into the new view.

use crate::api::{ApiError, Backend, ChatResponse, CreatedConversation, Message, SettingsUpdate};
use crate::compose::compose;
use crate::config::Config;
use crate::staging::{AttachmentStaging, FileSource, LinkError, PreviewRequest};
use crate::store::ConversationStore;

const INPUT_PLACEHOLDER: &str = "Type a message or drop files here...";
const CODE_PLACEHOLDER: &str = "```python\n# Write your code here...\n```";

/// Quick-action prompts offered on an empty transcript.
pub const QUICK_ACTIONS: &[(&str, &str)] = &[
    ("🐍 Web scraper", "Write a simple web scraper in Python"),
    ("📊 Explain a concept", "Explain how HTTP caching works"),
    ("📝 README template", "Create a README template in Markdown"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending,
}

/// A composed message on its way to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// None when a conversation has to be created first.
    pub conversation_id: Option<String>,
    /// Transcript generation the user message was shown on.
    pub transcript_generation: u64,
    pub text: String,
}

/// Result of the network part of a send.
#[derive(Debug)]
pub struct Delivery {
    /// The conversation the send was bound to (None for an implicit create).
    pub conversation_id: Option<String>,
    pub transcript_generation: u64,
    /// Conversation created on the way, if there was no current one.
    pub created: Option<CreatedConversation>,
    pub result: Result<ChatResponse, ApiError>,
}

/// What the user ended up seeing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Replied,
    /// Success without reply text.
    NoReply,
    Failed(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SendOutcome::Failed(_))
    }
}

/// Keyboard input the controller reacts to. Front ends translate their key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Enter { shift: bool, ctrl: bool },
    Escape,
    NewChat,
}

/// Work a shortcut asks the front end to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Send,
    NewChat,
}

/// Link dialog fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDraft {
    pub url: String,
    pub title: String,
}

/// Client-side application state.
#[derive(Debug, Clone)]
pub struct ChatController {
    store: ConversationStore,
    staging: AttachmentStaging,
    input: String,
    state: SendState,
    code_mode: bool,
    settings_open: bool,
    link_dialog: Option<LinkDraft>,
    /// Pending user-facing prompt (validation message).
    prompt: Option<String>,
}

impl Default for ChatController {
    fn default() -> Self {
        Self::with_store(ConversationStore::default())
    }
}

impl ChatController {
    pub fn new(config: &Config) -> Self {
        Self::with_store(ConversationStore::from_config(config))
    }

    pub fn with_store(store: ConversationStore) -> Self {
        Self {
            store,
            staging: AttachmentStaging::new(),
            input: String::new(),
            state: SendState::Idle,
            code_mode: false,
            settings_open: false,
            link_dialog: None,
            prompt: None,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn staging(&self) -> &AttachmentStaging {
        &self.staging
    }

    pub fn staging_mut(&mut self) -> &mut AttachmentStaging {
        &mut self.staging
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn is_sending(&self) -> bool {
        self.state == SendState::Sending
    }

    pub fn code_mode(&self) -> bool {
        self.code_mode
    }

    pub fn toggle_code_mode(&mut self) -> bool {
        self.code_mode = !self.code_mode;
        self.code_mode
    }

    pub fn input_placeholder(&self) -> &'static str {
        if self.code_mode {
            CODE_PLACEHOLDER
        } else {
            INPUT_PLACEHOLDER
        }
    }

    pub fn settings_open(&self) -> bool {
        self.settings_open
    }

    pub fn toggle_settings(&mut self) {
        self.settings_open = !self.settings_open;
    }

    /// Take the pending user prompt, if any.
    pub fn take_prompt(&mut self) -> Option<String> {
        self.prompt.take()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    // ---------- Attachments ----------

    pub fn add_files(&mut self, files: impl IntoIterator<Item = FileSource>, is_media: bool) -> Vec<PreviewRequest> {
        self.staging.add_files(files, is_media)
    }

    pub fn add_dropped(&mut self, files: impl IntoIterator<Item = FileSource>, text: Option<&str>) -> Vec<PreviewRequest> {
        self.staging.add_dropped(files, text)
    }

    /// Stage a link; an invalid one sets the prompt and stages nothing.
    pub fn add_link(&mut self, url: &str, title: &str) -> Result<(), LinkError> {
        self.staging.add_link(url, title).map_err(|e| {
            log::debug!("link rejected: {}", e);
            self.prompt = Some(e.to_string());
            e
        })
    }

    pub fn link_dialog(&self) -> Option<&LinkDraft> {
        self.link_dialog.as_ref()
    }

    pub fn link_dialog_mut(&mut self) -> Option<&mut LinkDraft> {
        self.link_dialog.as_mut()
    }

    pub fn open_link_dialog(&mut self) {
        self.link_dialog = Some(LinkDraft::default());
    }

    /// Dismissing the dialog stages nothing.
    pub fn close_link_dialog(&mut self) {
        self.link_dialog = None;
    }

    /// Validate the dialog's link. On success the dialog closes; on failure it stays open.
    pub fn submit_link_dialog(&mut self) -> Result<(), LinkError> {
        let Some(draft) = self.link_dialog.clone() else {
            return Ok(());
        };
        self.add_link(&draft.url, &draft.title)?;
        self.link_dialog = None;
        Ok(())
    }

    // ---------- Keyboard ----------

    /// React to a shortcut. Escape is handled here; send and new chat are returned for the
    /// front end to run.
    pub fn shortcut(&mut self, key: Shortcut) -> Option<Command> {
        match key {
            Shortcut::Enter { shift: false, .. } | Shortcut::Enter { ctrl: true, .. } => {
                Some(Command::Send)
            }
            Shortcut::Enter { .. } => None,
            Shortcut::Escape => {
                self.link_dialog = None;
                self.settings_open = false;
                None
            }
            Shortcut::NewChat => Some(Command::NewChat),
        }
    }

    // ---------- Send flow ----------

    /// Compose and enter Sending. Returns None (changing nothing) when already Sending or
    /// when there is nothing to send.
    pub fn begin_send(&mut self) -> Option<OutgoingMessage> {
        if self.is_sending() {
            log::debug!("send ignored: a send is already in flight");
            return None;
        }
        let text = compose(
            self.input.trim(),
            self.staging.files(),
            self.staging.links(),
        )?;
        self.staging.clear_all();
        self.input.clear();
        self.store.reset_transcript_if_detached();
        self.store.push_message(&Message::user(text.clone()));
        self.state = SendState::Sending;
        Some(OutgoingMessage {
            conversation_id: self.store.current_id().map(str::to_string),
            transcript_generation: self.store.transcript().generation(),
            text,
        })
    }

    /// True while the view still shows what the send started on.
    fn still_bound(&self, delivery: &Delivery) -> bool {
        self.store.transcript().generation() == delivery.transcript_generation
            && self.store.current_id() == delivery.conversation_id.as_deref()
    }

    /// Leave Sending, showing the reply or the error. Always ends Idle.
    ///
    /// When the user loaded, created or deleted a conversation in the meantime, the result is
    /// only logged: the reply is stored by the backend and shows up when its conversation is
    /// loaded again.
    pub fn finish_send(&mut self, delivery: Delivery) -> SendOutcome {
        let bound = self.still_bound(&delivery);
        if !bound {
            log::info!(
                "conversation changed while sending to {}; result not shown",
                delivery
                    .created
                    .as_ref()
                    .map(|c| c.id.as_str())
                    .or(delivery.conversation_id.as_deref())
                    .unwrap_or("a new conversation")
            );
        }
        if let Some(created) = delivery.created {
            if bound {
                self.store.adopt_created(created);
            }
        }
        let outcome = match delivery.result {
            Ok(response) => match response.reply() {
                Some(reply) => {
                    if bound {
                        self.store.push_message(&Message::assistant(reply));
                    }
                    SendOutcome::Replied
                }
                None => SendOutcome::NoReply,
            },
            Err(e) => {
                log::error!("failed to send message: {}", e);
                let reason = e.to_string();
                if bound {
                    self.store
                        .push_message(&Message::assistant(format!("❌ Error: {}", reason)));
                }
                SendOutcome::Failed(reason)
            }
        };
        self.state = SendState::Idle;
        outcome
    }

    /// Full send: begin, deliver, finish, then refresh the conversation list when the
    /// backend may have changed it. None when the send was dropped or empty.
    pub async fn send(&mut self, backend: &dyn Backend) -> Option<SendOutcome> {
        let outgoing = self.begin_send()?;
        let delivery = deliver(backend, &outgoing, self.store.default_title()).await;
        let created = delivery.created.is_some();
        let outcome = self.finish_send(delivery);
        if outcome.is_success() || created {
            self.store.refresh_conversations(backend).await;
        }
        Some(outcome)
    }

    /// Put a quick-action prompt in the input and send it.
    pub async fn send_quick(&mut self, backend: &dyn Backend, text: &str) -> Option<SendOutcome> {
        if self.is_sending() {
            return None;
        }
        self.set_input(text);
        self.send(backend).await
    }

    // ---------- Conversations and settings ----------

    pub async fn new_chat(&mut self, backend: &dyn Backend) -> Result<(), ApiError> {
        self.store.create_conversation(backend, None).await?;
        Ok(())
    }

    pub async fn load_conversation(&mut self, backend: &dyn Backend, id: &str) -> Result<(), ApiError> {
        self.store.load_conversation(backend, id).await
    }

    pub async fn delete_conversation(&mut self, backend: &dyn Backend, id: &str) -> Result<(), ApiError> {
        self.store.delete_conversation(backend, id).await
    }

    pub async fn update_settings(&mut self, backend: &dyn Backend, update: SettingsUpdate) -> bool {
        self.store.update_settings(backend, update).await
    }

    /// Start-up loads: models and conversation list, both best effort.
    pub async fn bootstrap(&mut self, backend: &dyn Backend) {
        self.store.load_models(backend).await;
        self.store.refresh_conversations(backend).await;
    }
}

/// Network part of a send: create a conversation when there is none, then post the message.
pub async fn deliver(backend: &dyn Backend, outgoing: &OutgoingMessage, default_title: &str) -> Delivery {
    let delivery = |created: Option<CreatedConversation>, result: Result<ChatResponse, ApiError>| Delivery {
        conversation_id: outgoing.conversation_id.clone(),
        transcript_generation: outgoing.transcript_generation,
        created,
        result,
    };
    let (conversation_id, created) = match &outgoing.conversation_id {
        Some(id) => (id.clone(), None),
        None => match backend.create_conversation(default_title).await {
            Ok(created) => (created.id.clone(), Some(created)),
            Err(e) => return delivery(None, Err(e)),
        },
    };
    let result = backend.send_chat(&conversation_id, &outgoing.text).await;
    delivery(created, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;
    use crate::store::tests::FakeBackend;
    use std::sync::atomic::Ordering;

    fn text_file(name: &str, size: u64) -> FileSource {
        FileSource {
            name: name.to_string(),
            mime: "text/plain".to_string(),
            size,
            path: None,
        }
    }

    #[tokio::test]
    async fn create_then_send_hello() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.new_chat(&backend).await.unwrap();
        c.set_input("hello");
        let outcome = c.send(&backend).await;
        assert_eq!(outcome, Some(SendOutcome::Replied));

        let entries = c.store().transcript().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].source, "hello");
        assert_eq!(entries[1].role, Role::Assistant);
        assert_eq!(entries[1].to_html(), "<p>hi</p>");
        assert_eq!(c.state(), SendState::Idle);
        assert_eq!(c.input(), "");
    }

    #[tokio::test]
    async fn second_send_while_sending_is_dropped() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.new_chat(&backend).await.unwrap();

        c.set_input("first");
        let first = c.begin_send().expect("first send starts");
        assert!(c.is_sending());

        c.set_input("second");
        assert!(c.begin_send().is_none());
        assert_eq!(c.input(), "second");

        let delivery = deliver(&backend, &first, "New Chat").await;
        c.finish_send(delivery);
        assert_eq!(backend.calls("send_chat"), 1);
        assert_eq!(c.store().transcript().len(), 2);
        assert!(!c.is_sending());
    }

    #[tokio::test]
    async fn empty_send_does_nothing() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.set_input("   ");
        assert_eq!(c.send(&backend).await, None);
        assert_eq!(c.state(), SendState::Idle);
        assert!(c.store().transcript().is_empty());
        assert_eq!(backend.calls("send_chat"), 0);
        assert_eq!(backend.calls("create_conversation"), 0);
    }

    #[tokio::test]
    async fn failure_renders_error_and_clears_staging() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.new_chat(&backend).await.unwrap();
        c.add_files(vec![text_file("a.txt", 2048)], false);
        c.add_link("https://example.com", "Example").unwrap();
        backend.fail.store(true, Ordering::SeqCst);

        c.set_input("look");
        let outcome = c.send(&backend).await.unwrap();
        assert_eq!(outcome, SendOutcome::Failed("API error: 500".to_string()));
        assert!(c.staging().is_empty());
        assert_eq!(c.state(), SendState::Idle);

        let entries = c.store().transcript().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].source.contains("🔗 Example: https://example.com"));
        assert!(entries[0].source.contains("📄 a.txt (2.0 KB)"));
        assert_eq!(entries[1].role, Role::Assistant);
        assert_eq!(entries[1].source, "❌ Error: API error: 500");
    }

    #[tokio::test]
    async fn attachments_alone_are_sent() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.new_chat(&backend).await.unwrap();
        c.add_link("https://example.com", "").unwrap();
        let outgoing = c.begin_send().unwrap();
        assert_eq!(
            outgoing.text,
            "📎 Links to analyze:\n🔗 https://example.com: https://example.com"
        );
        assert!(c.staging().is_empty());
    }

    #[tokio::test]
    async fn send_without_conversation_creates_one() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.set_input("hello");
        assert_eq!(c.send(&backend).await, Some(SendOutcome::Replied));
        assert_eq!(backend.calls("create_conversation"), 1);
        let id = c.store().current_id().expect("conversation created").to_string();
        assert_eq!(c.store().transcript().conversation_id(), Some(id.as_str()));
        assert_eq!(c.store().transcript().len(), 2);
        assert_eq!(c.store().conversations().len(), 1);
    }

    #[tokio::test]
    async fn missing_reply_renders_nothing() {
        let backend = FakeBackend::new();
        *backend.reply.lock().unwrap() = None;
        let mut c = ChatController::default();
        c.new_chat(&backend).await.unwrap();
        c.set_input("hello");
        assert_eq!(c.send(&backend).await, Some(SendOutcome::NoReply));
        assert_eq!(c.store().transcript().len(), 1);
    }

    #[tokio::test]
    async fn delete_open_conversation() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.new_chat(&backend).await.unwrap();
        c.set_input("hello");
        c.send(&backend).await;
        let id = c.store().current_id().unwrap().to_string();
        let lists = backend.calls("list_conversations");

        c.delete_conversation(&backend, &id).await.unwrap();
        assert_eq!(c.store().current_id(), None);
        assert!(c.store().transcript().is_empty());
        assert_eq!(backend.calls("list_conversations"), lists + 1);
    }

    fn sources(c: &ChatController) -> Vec<String> {
        c.store()
            .transcript()
            .entries()
            .iter()
            .map(|e| e.source.clone())
            .collect()
    }

    fn two_conversations() -> FakeBackend {
        let backend = FakeBackend::new();
        backend.seed("a", "Alpha", vec![Message::user("old a question")]);
        backend.seed("b", "Beta", vec![Message::user("old b question")]);
        *backend.reply.lock().unwrap() = Some("hello back".to_string());
        backend
    }

    #[tokio::test]
    async fn reply_after_loading_another_conversation_stays_with_its_own() {
        let backend = two_conversations();
        let mut c = ChatController::default();
        c.load_conversation(&backend, "a").await.unwrap();
        c.set_input("hi");
        let outgoing = c.begin_send().unwrap();
        c.load_conversation(&backend, "b").await.unwrap();

        let delivery = deliver(&backend, &outgoing, "New Chat").await;
        assert_eq!(c.finish_send(delivery), SendOutcome::Replied);
        assert_eq!(c.state(), SendState::Idle);
        assert_eq!(c.store().current_id(), Some("b"));
        assert_eq!(sources(&c), vec!["old b question"]);

        c.load_conversation(&backend, "a").await.unwrap();
        assert_eq!(sources(&c), vec!["old a question", "hi", "hello back"]);
    }

    #[tokio::test]
    async fn implicit_create_does_not_take_over_a_loaded_conversation() {
        let backend = two_conversations();
        let mut c = ChatController::default();
        c.set_input("hi");
        let outgoing = c.begin_send().unwrap();
        assert_eq!(outgoing.conversation_id, None);
        c.load_conversation(&backend, "b").await.unwrap();

        let delivery = deliver(&backend, &outgoing, "New Chat").await;
        assert_eq!(delivery.created.as_ref().map(|d| d.id.as_str()), Some("conv-0"));
        assert_eq!(c.finish_send(delivery), SendOutcome::Replied);
        assert_eq!(c.store().current_id(), Some("b"));
        assert_eq!(c.store().transcript().conversation_id(), Some("b"));
        assert_eq!(sources(&c), vec!["old b question"]);

        c.store_mut().refresh_conversations(&backend).await;
        assert!(c.store().conversations().iter().any(|s| s.id == "conv-0"));
    }

    #[tokio::test]
    async fn new_chat_during_implicit_create_keeps_the_new_chat_empty() {
        let backend = FakeBackend::new();
        let mut c = ChatController::default();
        c.set_input("hi");
        let outgoing = c.begin_send().unwrap();
        c.new_chat(&backend).await.unwrap();
        let fresh = c.store().current_id().unwrap().to_string();

        let delivery = deliver(&backend, &outgoing, "New Chat").await;
        c.finish_send(delivery);
        assert_eq!(c.store().current_id(), Some(fresh.as_str()));
        assert!(c.store().transcript().is_empty());
        assert_eq!(backend.calls("create_conversation"), 2);
    }

    #[tokio::test]
    async fn error_after_switching_is_not_rendered_elsewhere() {
        let backend = two_conversations();
        let mut c = ChatController::default();
        c.load_conversation(&backend, "a").await.unwrap();
        c.set_input("hi");
        let outgoing = c.begin_send().unwrap();
        c.load_conversation(&backend, "b").await.unwrap();

        backend.fail.store(true, Ordering::SeqCst);
        let delivery = deliver(&backend, &outgoing, "New Chat").await;
        assert_eq!(
            c.finish_send(delivery),
            SendOutcome::Failed("API error: 500".to_string())
        );
        assert_eq!(sources(&c), vec!["old b question"]);
        assert!(!c.is_sending());
    }

    #[tokio::test]
    async fn deleting_the_current_conversation_while_sending() {
        let backend = two_conversations();
        let mut c = ChatController::default();
        c.load_conversation(&backend, "a").await.unwrap();
        c.set_input("hi");
        let outgoing = c.begin_send().unwrap();
        c.delete_conversation(&backend, "a").await.unwrap();
        assert_eq!(c.store().current_id(), None);

        let delivery = deliver(&backend, &outgoing, "New Chat").await;
        assert_eq!(
            c.finish_send(delivery),
            SendOutcome::Failed("API error: 404".to_string())
        );
        assert_eq!(c.state(), SendState::Idle);
        assert_eq!(c.store().current_id(), None);
        assert!(c.store().transcript().is_empty());
    }

    #[tokio::test]
    async fn deleting_another_conversation_keeps_the_send_bound() {
        let backend = two_conversations();
        let mut c = ChatController::default();
        c.load_conversation(&backend, "a").await.unwrap();
        c.set_input("hi");
        let outgoing = c.begin_send().unwrap();
        c.delete_conversation(&backend, "b").await.unwrap();

        let delivery = deliver(&backend, &outgoing, "New Chat").await;
        assert_eq!(c.finish_send(delivery), SendOutcome::Replied);
        assert_eq!(sources(&c), vec!["old a question", "hi", "hello back"]);
    }

    #[test]
    fn invalid_link_prompts_and_stages_nothing() {
        let mut c = ChatController::default();
        c.open_link_dialog();
        c.link_dialog_mut().unwrap().url = "not a url".to_string();
        assert!(c.submit_link_dialog().is_err());
        assert!(c.link_dialog().is_some());
        assert!(c.take_prompt().unwrap().starts_with("Please enter a valid URL"));
        assert_eq!(c.staging().links().len(), 0);

        c.link_dialog_mut().unwrap().url = "https://ok.test".to_string();
        c.submit_link_dialog().unwrap();
        assert!(c.link_dialog().is_none());
        assert_eq!(c.staging().links().len(), 1);
    }

    #[test]
    fn shortcuts() {
        let mut c = ChatController::default();
        assert_eq!(c.shortcut(Shortcut::Enter { shift: false, ctrl: false }), Some(Command::Send));
        assert_eq!(c.shortcut(Shortcut::Enter { shift: true, ctrl: false }), None);
        assert_eq!(c.shortcut(Shortcut::Enter { shift: true, ctrl: true }), Some(Command::Send));
        assert_eq!(c.shortcut(Shortcut::NewChat), Some(Command::NewChat));

        c.toggle_settings();
        c.open_link_dialog();
        assert_eq!(c.shortcut(Shortcut::Escape), None);
        assert!(!c.settings_open());
        assert!(c.link_dialog().is_none());
    }

    #[test]
    fn code_mode_only_changes_presentation() {
        let mut c = ChatController::default();
        assert!(c.toggle_code_mode());
        assert!(c.input_placeholder().starts_with("```"));
        c.set_input("let x = 1;");
        let out = c.begin_send().unwrap();
        assert_eq!(out.text, "let x = 1;");
        assert!(!c.toggle_code_mode());
    }

    #[tokio::test]
    async fn bootstrap_tolerates_backend_failure() {
        let backend = FakeBackend::new();
        backend.fail.store(true, Ordering::SeqCst);
        let mut c = ChatController::default();
        c.bootstrap(&backend).await;
        assert!(c.store().models().is_empty());
        backend.fail.store(false, Ordering::SeqCst);
        c.bootstrap(&backend).await;
        assert_eq!(c.store().models().len(), 1);
    }
}
