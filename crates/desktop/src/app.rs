//! Huddle Desktop: egui app state and UI.
//!
//! All client state lives in the [`ChatController`]. Backend calls run on the tokio runtime
//! and report back as [`BackendEvent`]s, which are applied at the start of each frame.

use eframe::egui;
use lib::api::{
    ApiClient, ApiError, Backend, ConversationDetail, ConversationSummary, CreatedConversation,
    ModelInfo, SettingsUpdate,
};
use lib::controller::{ChatController, Command, Delivery, Shortcut, QUICK_ACTIONS};
use lib::render::{Block, RenderedMessage, Span};
use lib::staging::{FileSource, PreviewRequest};
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};

const CHAT_INPUT_ROWS: usize = 4;
const LOG_BUFFER_MAX_LINES: usize = 2000;

/// Ring buffer of log lines for the Logs screen.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES. Our own crates log at debug, dependencies at info.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
            || metadata.target().starts_with("lib")
            || metadata.target().starts_with("desktop")
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        push_log_line(format!(
            "{} [{}] {}: {}",
            clock_time(),
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// UTC wall clock as HH:MM:SS.mmm.
fn clock_time() -> String {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = t.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        t.subsec_millis()
    )
}

static LOGGER: DesktopLogger = DesktopLogger;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    Logs,
}

/// Result of a background backend call.
enum BackendEvent {
    Models(Result<Vec<ModelInfo>, ApiError>),
    Conversations(Result<Vec<ConversationSummary>, ApiError>),
    Created(Result<CreatedConversation, ApiError>),
    Loaded(String, Result<ConversationDetail, ApiError>),
    Deleted(String, Result<(), ApiError>),
    Delivered(Delivery),
    SettingsSaved(String, Result<(), ApiError>),
    Preview(String, std::io::Result<String>),
}

/// Something the user did this frame; run after drawing.
enum UiAction {
    NewChat,
    Load(String),
    AskDelete(String),
    ConfirmDelete,
    CancelDelete,
    Send,
    Quick(&'static str),
    RemoveFile(String),
    RemoveLink(usize),
    AttachPath { media: bool },
    OpenLinkDialog,
    SubmitLink,
    CloseLinkDialog,
    ToggleCode,
    ToggleSettings,
    Settings(SettingsUpdate),
}

pub struct HuddleApp {
    runtime: tokio::runtime::Runtime,
    client: ApiClient,
    ctx: egui::Context,
    events_tx: mpsc::Sender<BackendEvent>,
    events_rx: mpsc::Receiver<BackendEvent>,
    controller: ChatController,
    current_screen: Screen,
    /// Conversation whose load is in flight; older load results are ignored.
    pending_load: Option<String>,
    /// Create in flight (New chat button).
    creating: bool,
    /// Conversation awaiting delete confirmation.
    pending_delete: Option<String>,
    /// Path (or dropped URL) typed into the attach field.
    attach_path: String,
    /// Last user-facing error or validation message.
    notice: Option<String>,
    /// Transcript revision we last scrolled for.
    seen_scroll_revision: u64,
    temperature_draft: Option<f64>,
    system_prompt_draft: Option<String>,
}

impl HuddleApp {
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(cc: &eframe::CreationContext<'_>, runtime: tokio::runtime::Runtime) -> Self {
        let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);

        let config = match lib::config::load_config(None) {
            Ok((config, path)) => {
                log::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("using default config: {}", e);
                lib::config::Config::default()
            }
        };
        let base_url = lib::config::resolve_base_url(&config);
        log::info!("desktop started, backend {}", base_url);

        let (events_tx, events_rx) = mpsc::channel();
        let app = Self {
            runtime,
            client: ApiClient::new(base_url),
            ctx: cc.egui_ctx.clone(),
            events_tx,
            events_rx,
            controller: ChatController::new(&config),
            current_screen: Screen::default(),
            pending_load: None,
            creating: false,
            pending_delete: None,
            attach_path: String::new(),
            notice: None,
            seen_scroll_revision: 0,
            temperature_draft: None,
            system_prompt_draft: None,
        };
        app.load_models();
        app.refresh_conversations();
        app
    }

    /// Run a backend call on the runtime and deliver its event to the UI thread.
    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = BackendEvent> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let ctx = self.ctx.clone();
        self.runtime.spawn(async move {
            let event = work.await;
            let _ = tx.send(event);
            ctx.request_repaint();
        });
    }

    fn load_models(&self) {
        let client = self.client.clone();
        self.spawn(async move { BackendEvent::Models(client.list_models().await) });
    }

    fn refresh_conversations(&self) {
        let client = self.client.clone();
        self.spawn(async move { BackendEvent::Conversations(client.list_conversations().await) });
    }

    fn new_chat(&mut self) {
        if self.creating {
            return;
        }
        self.creating = true;
        let client = self.client.clone();
        let title = self.controller.store().default_title().to_string();
        self.spawn(async move { BackendEvent::Created(client.create_conversation(&title).await) });
    }

    fn load_conversation(&mut self, id: String) {
        if self.controller.store().is_current(&id) && self.pending_load.is_none() {
            return;
        }
        self.pending_load = Some(id.clone());
        let client = self.client.clone();
        self.spawn(async move {
            let result = client.get_conversation(&id).await;
            BackendEvent::Loaded(id, result)
        });
    }

    fn delete_conversation(&mut self, id: String) {
        let client = self.client.clone();
        self.spawn(async move {
            let result = client.delete_conversation(&id).await;
            BackendEvent::Deleted(id, result)
        });
    }

    /// Start a send. Ignored while one is in flight.
    fn start_send(&mut self) {
        let Some(outgoing) = self.controller.begin_send() else {
            return;
        };
        self.notice = None;
        let client = self.client.clone();
        let title = self.controller.store().default_title().to_string();
        self.spawn(async move {
            BackendEvent::Delivered(lib::controller::deliver(&client, &outgoing, &title).await)
        });
    }

    fn send_quick(&mut self, prompt: &str) {
        if self.controller.is_sending() {
            return;
        }
        self.controller.set_input(prompt);
        self.start_send();
    }

    fn update_settings(&mut self, update: SettingsUpdate) {
        let Some((id, update)) = self.controller.store_mut().stage_settings(update) else {
            return;
        };
        let client = self.client.clone();
        self.spawn(async move {
            let result = client.update_settings(&id, &update).await;
            BackendEvent::SettingsSaved(id, result)
        });
    }

    fn request_previews(&self, requests: Vec<PreviewRequest>) {
        for req in requests {
            self.spawn(async move {
                let result = lib::staging::load_preview(&req).await;
                BackendEvent::Preview(req.id, result)
            });
        }
    }

    fn attach_from_field(&mut self, media: bool) {
        let text = self.attach_path.trim().to_string();
        if text.is_empty() {
            return;
        }
        if text.starts_with("http://") || text.starts_with("https://") {
            self.controller.add_dropped(Vec::new(), Some(&text));
            self.attach_path.clear();
            return;
        }
        match FileSource::from_path(&PathBuf::from(&text)) {
            Ok(source) => {
                let previews = self.controller.add_files(vec![source], media);
                self.request_previews(previews);
                self.attach_path.clear();
            }
            Err(e) => {
                log::warn!("cannot attach {}: {}", text, e);
                self.notice = Some(format!("Cannot attach {}: {}", text, e));
            }
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if dropped.is_empty() {
            return;
        }
        let mut sources = Vec::new();
        for file in dropped {
            match &file.path {
                Some(path) => match FileSource::from_path(path) {
                    Ok(source) => sources.push(source),
                    Err(e) => log::warn!("ignoring dropped {}: {}", path.display(), e),
                },
                None => sources.push(FileSource {
                    name: file.name.clone(),
                    mime: "application/octet-stream".to_string(),
                    size: file.bytes.as_ref().map(|b| b.len() as u64).unwrap_or(0),
                    path: None,
                }),
            }
        }
        let previews = self.controller.add_dropped(sources, None);
        self.request_previews(previews);
    }

    /// Apply finished background work. Call each frame.
    fn poll_backend_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Models(Ok(models)) => self.controller.store_mut().set_models(models),
            BackendEvent::Models(Err(e)) => log::warn!("failed to load models: {}", e),
            BackendEvent::Conversations(Ok(list)) => {
                self.controller.store_mut().set_conversations(list)
            }
            BackendEvent::Conversations(Err(e)) => {
                log::warn!("failed to load conversations: {}", e)
            }
            BackendEvent::Created(result) => {
                self.creating = false;
                match result {
                    Ok(created) => {
                        log::info!("created conversation {}", created.id);
                        self.controller.store_mut().apply_created(created);
                        self.reset_drafts();
                        self.refresh_conversations();
                    }
                    Err(e) => {
                        log::error!("failed to create conversation: {}", e);
                        self.notice = Some(format!("Could not create a conversation: {}", e));
                    }
                }
            }
            BackendEvent::Loaded(id, result) => {
                if self.pending_load.as_deref() != Some(id.as_str()) {
                    log::debug!("dropping stale load of {}", id);
                    return;
                }
                self.pending_load = None;
                match result {
                    Ok(detail) => {
                        self.controller.store_mut().apply_loaded(detail);
                        self.reset_drafts();
                    }
                    Err(e) => {
                        log::error!("failed to load conversation {}: {}", id, e);
                        self.notice = Some(format!("Could not load the conversation: {}", e));
                    }
                }
            }
            BackendEvent::Deleted(id, result) => {
                match result {
                    Ok(()) => {
                        log::info!("deleted conversation {}", id);
                        if self.controller.store_mut().apply_deleted(&id) {
                            self.reset_drafts();
                        }
                    }
                    Err(e) => {
                        log::error!("failed to delete conversation {}: {}", id, e);
                        self.notice = Some(format!("Could not delete the conversation: {}", e));
                    }
                }
                self.refresh_conversations();
            }
            BackendEvent::Delivered(delivery) => {
                let created = delivery.created.is_some();
                let outcome = self.controller.finish_send(delivery);
                if outcome.is_success() || created {
                    self.refresh_conversations();
                }
            }
            BackendEvent::SettingsSaved(id, Ok(())) => log::debug!("settings saved for {}", id),
            BackendEvent::SettingsSaved(id, Err(e)) => {
                log::warn!("failed to update settings for {}: {}", id, e)
            }
            BackendEvent::Preview(id, Ok(uri)) => {
                if !self.controller.staging_mut().set_preview(&id, uri) {
                    log::debug!("preview for removed file {}", id);
                }
            }
            BackendEvent::Preview(id, Err(e)) => log::warn!("no preview for {}: {}", id, e),
        }
    }

    fn reset_drafts(&mut self) {
        self.temperature_draft = None;
        self.system_prompt_draft = None;
    }

    /// Global shortcuts: Escape closes dialogs and the settings panel, Ctrl+N starts a chat.
    fn handle_global_keys(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        if ctx.input_mut(|i| i.consume_key(egui::Modifiers::NONE, egui::Key::Escape)) {
            self.pending_delete = None;
            self.controller.shortcut(Shortcut::Escape);
        }
        if ctx.input_mut(|i| i.consume_key(egui::Modifiers::COMMAND, egui::Key::N))
            && self.controller.shortcut(Shortcut::NewChat) == Some(Command::NewChat)
        {
            actions.push(UiAction::NewChat);
        }
    }

    fn run_action(&mut self, action: UiAction) {
        match action {
            UiAction::NewChat => self.new_chat(),
            UiAction::Load(id) => self.load_conversation(id),
            UiAction::AskDelete(id) => self.pending_delete = Some(id),
            UiAction::ConfirmDelete => {
                if let Some(id) = self.pending_delete.take() {
                    self.delete_conversation(id);
                }
            }
            UiAction::CancelDelete => self.pending_delete = None,
            UiAction::Send => self.start_send(),
            UiAction::Quick(prompt) => self.send_quick(prompt),
            UiAction::RemoveFile(id) => {
                self.controller.staging_mut().remove_file(&id);
            }
            UiAction::RemoveLink(index) => {
                self.controller.staging_mut().remove_link(index);
            }
            UiAction::AttachPath { media } => self.attach_from_field(media),
            UiAction::OpenLinkDialog => self.controller.open_link_dialog(),
            UiAction::SubmitLink => {
                if self.controller.submit_link_dialog().is_err() {
                    self.notice = self.controller.take_prompt();
                }
            }
            UiAction::CloseLinkDialog => {
                self.controller.close_link_dialog();
                self.controller.take_prompt();
            }
            UiAction::ToggleCode => {
                self.controller.toggle_code_mode();
            }
            UiAction::ToggleSettings => self.controller.toggle_settings(),
            UiAction::Settings(update) => self.update_settings(update),
        }
    }

    fn ui_sidebar(&self, ui: &mut egui::Ui, screen: &mut Screen, actions: &mut Vec<UiAction>) {
        ui.add_space(24.0);
        ui.horizontal(|ui| {
            if ui.selectable_label(*screen == Screen::Chat, "Chat").clicked() {
                *screen = Screen::Chat;
            }
            if ui.selectable_label(*screen == Screen::Logs, "Logs").clicked() {
                *screen = Screen::Logs;
            }
        });
        ui.add_space(12.0);
        if ui
            .add_enabled(!self.creating, egui::Button::new("➕ New chat"))
            .on_hover_text("Ctrl+N")
            .clicked()
        {
            actions.push(UiAction::NewChat);
        }
        ui.add_space(12.0);
        ui.separator();

        let store = self.controller.store();
        egui::ScrollArea::vertical()
            .id_source("conversation_list")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                if store.conversations().is_empty() {
                    ui.label(egui::RichText::new("No conversations yet.").weak());
                }
                for c in store.conversations() {
                    ui.horizontal(|ui| {
                        let title = if c.title.is_empty() {
                            store.default_title()
                        } else {
                            c.title.as_str()
                        };
                        let loading = self.pending_load.as_deref() == Some(c.id.as_str());
                        let label = if loading {
                            format!("⏳ {}", title)
                        } else {
                            title.to_string()
                        };
                        let response = ui.selectable_label(store.is_current(&c.id), label);
                        let mut hover = Vec::new();
                        if let Some(model) = &c.model {
                            hover.push(lib::store::model_badge(model).to_string());
                        }
                        if let Some(n) = c.message_count {
                            hover.push(format!("{} messages", n));
                        }
                        if let Some(at) = &c.updated_at {
                            hover.push(format!("updated {}", at));
                        }
                        let response = if hover.is_empty() {
                            response
                        } else {
                            response.on_hover_text(hover.join("\n"))
                        };
                        if response.clicked() {
                            actions.push(UiAction::Load(c.id.clone()));
                        }
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.small_button("🗑").on_hover_text("Delete").clicked() {
                                actions.push(UiAction::AskDelete(c.id.clone()));
                            }
                        });
                    });
                }
            });
    }

    fn render_spans(ui: &mut egui::Ui, spans: &[Span]) {
        ui.horizontal_wrapped(|ui| {
            ui.spacing_mut().item_spacing.x = 0.0;
            for span in spans {
                if let Some(url) = &span.link {
                    ui.hyperlink_to(span.text.as_str(), url);
                    continue;
                }
                let mut text = egui::RichText::new(&span.text);
                if span.bold {
                    text = text.strong();
                }
                if span.italic {
                    text = text.italics();
                }
                if span.strike {
                    text = text.strikethrough();
                }
                if span.code {
                    text = text.code();
                }
                ui.label(text);
            }
        });
    }

    fn render_block(ui: &mut egui::Ui, block: &Block) {
        match block {
            Block::Literal(text) => {
                ui.label(text.as_str());
            }
            Block::Heading { level, spans } => {
                let size = match level {
                    1 => 22.0,
                    2 => 19.0,
                    3 => 17.0,
                    _ => 15.0,
                };
                let text: String = spans.iter().map(|s| s.text.as_str()).collect();
                ui.label(egui::RichText::new(text).strong().size(size));
            }
            Block::Paragraph(spans) => Self::render_spans(ui, spans),
            Block::List { start, items } => {
                for (i, item) in items.iter().enumerate() {
                    let marker = match start {
                        Some(n) => format!("{}.", n + i as u64),
                        None => "•".to_string(),
                    };
                    ui.horizontal(|ui| {
                        ui.add_space(12.0);
                        ui.label(marker);
                        ui.vertical(|ui| {
                            for inner in item {
                                Self::render_block(ui, inner);
                            }
                        });
                    });
                }
            }
            Block::Quote(inner) => {
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new("▎").weak());
                    ui.vertical(|ui| {
                        for b in inner {
                            Self::render_block(ui, b);
                        }
                    });
                });
            }
            Block::Table { header, rows } => {
                egui::Grid::new(ui.next_auto_id())
                    .striped(true)
                    .show(ui, |ui| {
                        for cell in header {
                            let text: String = cell.iter().map(|s| s.text.as_str()).collect();
                            ui.label(egui::RichText::new(text).strong());
                        }
                        ui.end_row();
                        for row in rows {
                            for cell in row {
                                Self::render_spans(ui, cell);
                            }
                            ui.end_row();
                        }
                    });
            }
            Block::Rule => {
                ui.separator();
            }
            Block::Code {
                language,
                detected,
                code,
                highlighted,
            } => {
                egui::Frame::none()
                    .fill(ui.style().visuals.extreme_bg_color)
                    .rounding(egui::Rounding::same(6.0))
                    .inner_margin(egui::Margin::same(8.0))
                    .show(ui, |ui| {
                        ui.horizontal(|ui| {
                            let label = match (language, detected) {
                                (Some(l), true) => format!("{} (detected)", l),
                                (Some(l), false) => l.clone(),
                                (None, _) => "code".to_string(),
                            };
                            ui.label(egui::RichText::new(label).small().weak());
                            ui.with_layout(
                                egui::Layout::right_to_left(egui::Align::Center),
                                |ui| {
                                    if ui.small_button("Copy").clicked() {
                                        ui.output_mut(|o| o.copied_text = code.clone());
                                    }
                                },
                            );
                        });
                        match highlighted {
                            Some(lines) => {
                                let mut job = egui::text::LayoutJob::default();
                                for run in lines.iter().flatten() {
                                    let [r, g, b] = run.color;
                                    job.append(
                                        &run.text,
                                        0.0,
                                        egui::TextFormat {
                                            font_id: egui::FontId::monospace(13.0),
                                            color: egui::Color32::from_rgb(r, g, b),
                                            ..Default::default()
                                        },
                                    );
                                }
                                ui.label(job);
                            }
                            None => {
                                ui.label(egui::RichText::new(code.trim_end_matches('\n')).monospace());
                            }
                        }
                    });
            }
        }
    }

    fn render_message(ui: &mut egui::Ui, m: &RenderedMessage) {
        let is_user = m.is_user();
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.label(egui::RichText::new(m.avatar()).size(16.0));
            for block in &m.blocks {
                Self::render_block(ui, block);
            }
        });
    }

    fn ui_welcome(ui: &mut egui::Ui, sending: bool, actions: &mut Vec<UiAction>) {
        ui.add_space(48.0);
        ui.vertical_centered(|ui| {
            ui.heading("How can I help you today?");
            ui.add_space(8.0);
            ui.label(
                egui::RichText::new("Ask a question, drop files here or attach a link.").weak(),
            );
            ui.add_space(16.0);
            for (label, prompt) in QUICK_ACTIONS {
                if ui
                    .add_enabled(!sending, egui::Button::new(*label))
                    .on_hover_text(*prompt)
                    .clicked()
                {
                    actions.push(UiAction::Quick(*prompt));
                }
                ui.add_space(6.0);
            }
        });
    }

    fn ui_attachments(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        let staging = self.controller.staging();
        if staging.is_empty() {
            return;
        }
        ui.horizontal_wrapped(|ui| {
            if let Some(badge) = staging.badge() {
                ui.label(egui::RichText::new(badge).strong());
            }
            for f in staging.files() {
                let mut text = format!(
                    "{} {} ({})",
                    f.kind().icon(),
                    f.name,
                    lib::compose::format_file_size(f.size)
                );
                if f.is_media {
                    text.push_str(" · media");
                }
                let response = ui.label(text);
                if f.preview.is_some() {
                    response.on_hover_text("Preview loaded");
                }
                if ui.small_button("✖").clicked() {
                    actions.push(UiAction::RemoveFile(f.id.clone()));
                }
            }
            for (i, l) in staging.links().iter().enumerate() {
                ui.label(format!("🔗 {}", l.label())).on_hover_text(l.url.as_str());
                if ui.small_button("✖").clicked() {
                    actions.push(UiAction::RemoveLink(i));
                }
            }
        });
        ui.add_space(4.0);
    }

    fn ui_chat(&mut self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        let sending = self.controller.is_sending();

        ui.add_space(16.0);
        ui.horizontal(|ui| {
            ui.heading(self.controller.store().title());
            if let Some(badge) = self.controller.store().model_badge() {
                ui.label(egui::RichText::new(badge).small().code());
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui
                    .selectable_label(self.controller.settings_open(), "⚙ Settings")
                    .clicked()
                {
                    actions.push(UiAction::ToggleSettings);
                }
            });
        });
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let revision = self.controller.store().transcript().scroll_revision();
        let scroll_now = revision != self.seen_scroll_revision;
        self.seen_scroll_revision = revision;

        let bottom_height = 200.0;
        let messages_height = (ui.available_height() - bottom_height).max(80.0);
        egui::ScrollArea::vertical()
            .id_source("transcript")
            .max_height(messages_height)
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                let transcript = self.controller.store().transcript();
                if transcript.is_empty() && !sending {
                    Self::ui_welcome(ui, sending, actions);
                }
                for m in transcript.entries() {
                    Self::render_message(ui, m);
                    ui.add_space(8.0);
                }
                if sending {
                    ui.horizontal(|ui| {
                        ui.add(egui::Spinner::new());
                        ui.label(egui::RichText::new("Thinking...").weak());
                    });
                }
                if scroll_now {
                    ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                }
            });

        ui.add_space(8.0);
        if ui.ctx().input(|i| !i.raw.hovered_files.is_empty()) {
            ui.label(egui::RichText::new("Drop to attach").strong());
        }
        self.ui_attachments(ui, actions);

        // Enter sends, Shift+Enter inserts a newline, Ctrl+Enter always sends.
        let input_id = egui::Id::new("chat_input");
        if ui.memory(|m| m.has_focus(input_id)) {
            if ui.input_mut(|i| i.consume_key(egui::Modifiers::NONE, egui::Key::Enter))
                && self.controller.shortcut(Shortcut::Enter { shift: false, ctrl: false })
                    == Some(Command::Send)
            {
                actions.push(UiAction::Send);
            }
            if ui.input_mut(|i| i.consume_key(egui::Modifiers::COMMAND, egui::Key::Enter))
                && self.controller.shortcut(Shortcut::Enter { shift: false, ctrl: true })
                    == Some(Command::Send)
            {
                actions.push(UiAction::Send);
            }
        }

        let placeholder = self.controller.input_placeholder();
        let code_mode = self.controller.code_mode();
        let mut edit = egui::TextEdit::multiline(self.controller.input_mut())
            .id(input_id)
            .hint_text(placeholder)
            .desired_rows(CHAT_INPUT_ROWS)
            .desired_width(f32::INFINITY);
        if code_mode {
            edit = edit.code_editor();
        }
        ui.add(edit);

        ui.add_space(6.0);
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.attach_path)
                    .hint_text("File path or URL")
                    .desired_width(220.0),
            );
            if ui.button("📎 File").clicked() {
                actions.push(UiAction::AttachPath { media: false });
            }
            if ui.button("🖼 Media").clicked() {
                actions.push(UiAction::AttachPath { media: true });
            }
            if ui.button("🔗 Link").clicked() {
                actions.push(UiAction::OpenLinkDialog);
            }
            if ui.selectable_label(code_mode, "</> Code").clicked() {
                actions.push(UiAction::ToggleCode);
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.add_enabled(!sending, egui::Button::new("Send")).clicked() {
                    actions.push(UiAction::Send);
                }
                if sending {
                    ui.add(egui::Spinner::new());
                }
            });
        });

        if let Some(notice) = &self.notice {
            ui.add_space(6.0);
            ui.colored_label(egui::Color32::RED, notice.as_str());
        }
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_settings_panel(&mut self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        ui.add_space(24.0);
        ui.heading("Settings");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let store = self.controller.store();
        let Some(current) = store.current() else {
            ui.label("Open or start a conversation to change its settings.");
            return;
        };

        ui.label("Model");
        let selected = store
            .models()
            .iter()
            .find(|m| m.id == current.model)
            .map(|m| m.label())
            .unwrap_or_else(|| {
                if current.model.is_empty() {
                    "—".to_string()
                } else {
                    current.model.clone()
                }
            });
        egui::ComboBox::from_id_source("model_select")
            .selected_text(selected)
            .width(ui.available_width())
            .show_ui(ui, |ui| {
                for m in store.models() {
                    if ui
                        .selectable_label(m.id == current.model, m.label())
                        .clicked()
                    {
                        actions.push(UiAction::Settings(SettingsUpdate::model(m.id.clone())));
                    }
                }
            });
        ui.add_space(12.0);

        ui.label("Temperature");
        let mut temperature = self
            .temperature_draft
            .unwrap_or(current.settings.temperature);
        let response = ui.add(egui::Slider::new(&mut temperature, 0.0..=2.0).step_by(0.1));
        if response.changed() {
            self.temperature_draft = Some(temperature);
        }
        if response.drag_released() || (response.changed() && !response.dragged()) {
            self.temperature_draft = None;
            actions.push(UiAction::Settings(SettingsUpdate::temperature(temperature)));
        }
        ui.add_space(12.0);

        ui.label("Max tokens");
        let mut max_tokens = current.settings.max_tokens;
        let response = ui.add(
            egui::DragValue::new(&mut max_tokens)
                .clamp_range(1..=200_000)
                .speed(16.0),
        );
        if response.changed() && max_tokens != current.settings.max_tokens {
            actions.push(UiAction::Settings(SettingsUpdate::max_tokens(max_tokens)));
        }
        ui.add_space(12.0);

        ui.label("System prompt");
        let draft = self
            .system_prompt_draft
            .get_or_insert_with(|| current.settings.system_prompt.clone());
        let response = ui.add(
            egui::TextEdit::multiline(draft)
                .desired_rows(6)
                .desired_width(f32::INFINITY),
        );
        if response.lost_focus() {
            if *draft != current.settings.system_prompt {
                actions.push(UiAction::Settings(SettingsUpdate::system_prompt(
                    draft.clone(),
                )));
            }
            self.system_prompt_draft = None;
        }
    }

    fn ui_link_dialog(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let notice = self.notice.clone();
        let Some(draft) = self.controller.link_dialog_mut() else {
            return;
        };
        egui::Window::new("Attach link")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label("URL");
                let url = ui.add(
                    egui::TextEdit::singleline(&mut draft.url)
                        .hint_text("https://")
                        .desired_width(320.0),
                );
                ui.label("Title (optional)");
                ui.add(egui::TextEdit::singleline(&mut draft.title).desired_width(320.0));
                if let Some(n) = &notice {
                    ui.colored_label(egui::Color32::RED, n.as_str());
                }
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    let enter = url.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Attach").clicked() || enter {
                        actions.push(UiAction::SubmitLink);
                    }
                    if ui.button("Cancel").clicked() {
                        actions.push(UiAction::CloseLinkDialog);
                    }
                });
            });
    }

    fn ui_delete_dialog(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let Some(id) = &self.pending_delete else {
            return;
        };
        let title = self
            .controller
            .store()
            .conversations()
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.title.clone())
            .unwrap_or_else(|| id.clone());
        egui::Window::new("Delete conversation")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(format!("Delete \"{}\"? This cannot be undone.", title));
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        actions.push(UiAction::ConfirmDelete);
                    }
                    if ui.button("Cancel").clicked() {
                        actions.push(UiAction::CancelDelete);
                    }
                });
            });
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }
}

impl eframe::App for HuddleApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_backend_events();
        self.handle_dropped_files(ctx);

        let mut actions = Vec::new();
        self.handle_global_keys(ctx, &mut actions);

        let mut screen = self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(240.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(12.0, 0.0))
                    .show(ui, |ui| {
                        self.ui_sidebar(ui, &mut screen, &mut actions);
                    });
            });
        self.current_screen = screen;

        if self.current_screen == Screen::Chat && self.controller.settings_open() {
            egui::SidePanel::right("settings_panel")
                .resizable(false)
                .exact_width(260.0)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .inner_margin(egui::Margin::symmetric(12.0, 0.0))
                        .show(ui, |ui| {
                            self.ui_settings_panel(ui, &mut actions);
                        });
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Chat => self.ui_chat(ui, &mut actions),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });

        self.ui_link_dialog(ctx, &mut actions);
        self.ui_delete_dialog(ctx, &mut actions);

        for action in actions {
            self.run_action(action);
        }
    }
}
