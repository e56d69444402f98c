//! Chat rendering as a pure view-model.
//!
//! Assistant text is parsed as CommonMark (with GFM tables, strikethrough and task lists)
//! into [`Block`]s. Fenced code keeps its declared language or gets one detected, and is
//! highlighted with syntect when the language is known. User text is kept literal and only
//! ever escaped, never interpreted. Front ends draw the blocks; [`RenderedMessage::to_html`]
//! is the HTML form.

use std::iter::Peekable;
use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::api::{Message, Role};

const CODE_THEME: &str = "base16-ocean.dark";

/// Inline run of text with its emphasis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub strike: bool,
    pub code: bool,
    pub link: Option<String>,
}

/// A run of highlighted code in one colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRun {
    pub text: String,
    pub color: [u8; 3],
}

/// One block of a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Literal user text; never parsed.
    Literal(String),
    Heading { level: u8, spans: Vec<Span> },
    /// Paragraph; single newlines inside are line breaks.
    Paragraph(Vec<Span>),
    /// `start` is the first number of an ordered list. Items hold blocks, so lists nest.
    List {
        start: Option<u64>,
        items: Vec<Vec<Block>>,
    },
    Quote(Vec<Block>),
    Table {
        header: Vec<Vec<Span>>,
        rows: Vec<Vec<Vec<Span>>>,
    },
    Rule,
    Code {
        language: Option<String>,
        /// True when the language was guessed rather than declared on the fence.
        detected: bool,
        code: String,
        /// Coloured lines, present when the language is one syntect knows.
        highlighted: Option<Vec<Vec<CodeRun>>>,
    },
}

/// A message ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub role: Role,
    pub source: String,
    pub blocks: Vec<Block>,
}

impl RenderedMessage {
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn avatar(&self) -> &'static str {
        match self.role {
            Role::User => "👤",
            Role::Assistant => "🤖",
        }
    }

    /// HTML for the message body.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            block_html(block, &mut out);
        }
        out
    }
}

/// Render one message: markdown for the assistant, literal text for the user.
pub fn render_message(message: &Message) -> RenderedMessage {
    let blocks = match message.role {
        Role::User => vec![Block::Literal(message.content.clone())],
        Role::Assistant => parse_markdown(&message.content),
    };
    RenderedMessage {
        role: message.role,
        source: message.content.clone(),
        blocks,
    }
}

/// Escape the five HTML-special characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn syntaxes() -> &'static SyntaxSet {
    static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn code_theme() -> Option<&'static Theme> {
    static THEMES: OnceLock<ThemeSet> = OnceLock::new();
    THEMES
        .get_or_init(ThemeSet::load_defaults)
        .themes
        .get(CODE_THEME)
}

/// Short lowercase label for a syntax: its name when that is one word, else its first extension.
fn syntax_label(syntax: &SyntaxReference) -> String {
    if !syntax.name.contains(char::is_whitespace) {
        return syntax.name.to_lowercase();
    }
    syntax
        .file_extensions
        .first()
        .cloned()
        .unwrap_or_else(|| syntax.name.to_lowercase())
}

/// Language guess for an undeclared code fence: valid JSON, then syntect's first-line
/// rules (shebangs, `<?php`, `<?xml`, doctypes, editor modelines).
pub fn detect_language(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return None;
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some("json".to_string());
    }
    let first_line = trimmed.lines().next()?;
    syntaxes()
        .find_syntax_by_first_line(first_line)
        .map(syntax_label)
}

/// Colour `code` as `language` (a fence token, extension or syntax name).
/// None when the language is unknown to syntect.
pub fn highlight_code(code: &str, language: &str) -> Option<Vec<Vec<CodeRun>>> {
    let set = syntaxes();
    let syntax = set.find_syntax_by_token(language)?;
    let theme = code_theme()?;
    let mut highlighter = HighlightLines::new(syntax, theme);
    let mut lines = Vec::new();
    for line in LinesWithEndings::from(code) {
        let ranges = match highlighter.highlight_line(line, set) {
            Ok(ranges) => ranges,
            Err(e) => {
                log::debug!("highlighting {} failed: {}", language, e);
                return None;
            }
        };
        lines.push(
            ranges
                .into_iter()
                .map(|(style, text)| CodeRun {
                    text: text.to_string(),
                    color: [style.foreground.r, style.foreground.g, style.foreground.b],
                })
                .collect(),
        );
    }
    Some(lines)
}

fn markdown_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Parse assistant markdown into blocks.
pub fn parse_markdown(text: &str) -> Vec<Block> {
    let mut events = Parser::new_ext(text, markdown_options()).peekable();
    blocks(&mut events)
}

/// Inline markdown of a short text, flattened to spans (block structure is dropped).
pub fn parse_inline(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    for block in parse_markdown(text) {
        match block {
            Block::Paragraph(s) | Block::Heading { spans: s, .. } => spans.extend(s),
            _ => {}
        }
    }
    spans
}

#[derive(Debug, Clone, Default, PartialEq)]
struct InlineStyle {
    bold: bool,
    italic: bool,
    strike: bool,
    link: Option<String>,
}

#[derive(Default)]
struct InlineBuilder {
    spans: Vec<Span>,
    styles: Vec<InlineStyle>,
}

impl InlineBuilder {
    fn style(&self) -> InlineStyle {
        self.styles.last().cloned().unwrap_or_default()
    }

    fn open(&mut self, tag: Tag<'_>) {
        let mut style = self.style();
        match tag {
            Tag::Emphasis => style.italic = true,
            Tag::Strong => style.bold = true,
            Tag::Strikethrough => style.strike = true,
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                style.link = Some(dest_url.to_string())
            }
            _ => {}
        }
        self.styles.push(style);
    }

    fn close(&mut self) {
        self.styles.pop();
    }

    fn push(&mut self, text: &str, code: bool) {
        let style = self.style();
        if !code {
            if let Some(last) = self.spans.last_mut() {
                let same = !last.code
                    && last.bold == style.bold
                    && last.italic == style.italic
                    && last.strike == style.strike
                    && last.link == style.link;
                if same {
                    last.text.push_str(text);
                    return;
                }
            }
        }
        self.spans.push(Span {
            text: text.to_string(),
            bold: style.bold,
            italic: style.italic,
            strike: style.strike,
            code,
            link: style.link,
        });
    }
}

fn is_inline_start(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Emphasis | Tag::Strong | Tag::Strikethrough | Tag::Link { .. } | Tag::Image { .. }
    )
}

/// Consume inline events into spans. Stops before the first block-level start, or at the
/// end tag of the enclosing container, which is consumed only when `consume_end` is set.
fn inline_run<'a, I>(events: &mut Peekable<I>, consume_end: bool) -> Vec<Span>
where
    I: Iterator<Item = Event<'a>>,
{
    let mut builder = InlineBuilder::default();
    let mut depth = 0usize;
    loop {
        match events.peek() {
            None => break,
            Some(Event::End(_)) if depth == 0 => {
                if consume_end {
                    events.next();
                }
                break;
            }
            Some(Event::Start(tag)) if !is_inline_start(tag) => break,
            Some(Event::Rule) => break,
            _ => {}
        }
        let Some(event) = events.next() else { break };
        match event {
            Event::Start(tag) => {
                depth += 1;
                builder.open(tag);
            }
            Event::End(_) => {
                depth -= 1;
                builder.close();
            }
            Event::Text(t) | Event::Html(t) | Event::InlineHtml(t) => builder.push(&t, false),
            Event::Code(t) => builder.push(&t, true),
            Event::SoftBreak | Event::HardBreak => builder.push("\n", false),
            Event::TaskListMarker(done) => builder.push(if done { "☑ " } else { "☐ " }, false),
            Event::FootnoteReference(r) => builder.push(&format!("[{}]", r), false),
            _ => {}
        }
    }
    builder.spans
}

/// Consume block events until the end tag of the enclosing container.
fn blocks<'a, I>(events: &mut Peekable<I>) -> Vec<Block>
where
    I: Iterator<Item = Event<'a>>,
{
    let mut out = Vec::new();
    loop {
        match events.peek() {
            None => break,
            Some(Event::End(_)) => {
                events.next();
                break;
            }
            Some(Event::Start(tag)) if !is_inline_start(tag) => {}
            Some(Event::Rule) => {}
            // Loose inline content, as in tight list items.
            Some(_) => {
                let spans = inline_run(events, false);
                if !spans.is_empty() {
                    out.push(Block::Paragraph(spans));
                }
                continue;
            }
        }
        let Some(event) = events.next() else { break };
        match event {
            Event::Rule => out.push(Block::Rule),
            Event::Start(Tag::Paragraph) => out.push(Block::Paragraph(inline_run(events, true))),
            Event::Start(Tag::Heading { level, .. }) => out.push(Block::Heading {
                level: level as u8,
                spans: inline_run(events, true),
            }),
            Event::Start(Tag::BlockQuote { .. }) => out.push(Block::Quote(blocks(events))),
            Event::Start(Tag::CodeBlock(kind)) => {
                let declared = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                out.push(code_block(declared, code_text(events)));
            }
            Event::Start(Tag::List(start)) => out.push(Block::List {
                start,
                items: list_items(events),
            }),
            Event::Start(Tag::Table(_)) => out.push(table(events)),
            // Html blocks, footnote definitions, stray items: keep their content.
            Event::Start(_) => out.extend(blocks(events)),
            _ => {}
        }
    }
    out
}

fn code_text<'a, I>(events: &mut Peekable<I>) -> String
where
    I: Iterator<Item = Event<'a>>,
{
    let mut code = String::new();
    for event in events.by_ref() {
        match event {
            Event::Text(t) => code.push_str(&t),
            Event::End(_) => break,
            _ => {}
        }
    }
    if code.ends_with('\n') {
        code.pop();
    }
    code
}

fn code_block(declared: Option<String>, code: String) -> Block {
    let (language, detected) = match declared {
        Some(lang) => (Some(lang), false),
        None => (detect_language(&code), true),
    };
    let highlighted = language
        .as_deref()
        .and_then(|lang| highlight_code(&code, lang));
    Block::Code {
        language,
        detected,
        code,
        highlighted,
    }
}

fn list_items<'a, I>(events: &mut Peekable<I>) -> Vec<Vec<Block>>
where
    I: Iterator<Item = Event<'a>>,
{
    let mut items = Vec::new();
    while let Some(event) = events.next() {
        match event {
            Event::Start(Tag::Item) => items.push(blocks(events)),
            Event::End(_) => break,
            _ => {}
        }
    }
    items
}

fn table_cells<'a, I>(events: &mut Peekable<I>) -> Vec<Vec<Span>>
where
    I: Iterator<Item = Event<'a>>,
{
    let mut cells = Vec::new();
    while let Some(event) = events.next() {
        match event {
            Event::Start(Tag::TableCell) => cells.push(inline_run(events, true)),
            Event::End(_) => break,
            _ => {}
        }
    }
    cells
}

fn table<'a, I>(events: &mut Peekable<I>) -> Block
where
    I: Iterator<Item = Event<'a>>,
{
    let mut header = Vec::new();
    let mut rows = Vec::new();
    while let Some(event) = events.next() {
        match event {
            Event::Start(Tag::TableHead) => header = table_cells(events),
            Event::Start(Tag::TableRow) => rows.push(table_cells(events)),
            Event::End(_) => break,
            _ => {}
        }
    }
    Block::Table { header, rows }
}

fn spans_html(spans: &[Span], out: &mut String) {
    for s in spans {
        let mut inner = escape_html(&s.text).replace('\n', "<br>");
        if s.code {
            inner = format!("<code>{}</code>", inner);
        }
        if s.strike {
            inner = format!("<del>{}</del>", inner);
        }
        if s.italic {
            inner = format!("<em>{}</em>", inner);
        }
        if s.bold {
            inner = format!("<strong>{}</strong>", inner);
        }
        if let Some(href) = &s.link {
            inner = format!("<a href=\"{}\">{}</a>", escape_html(href), inner);
        }
        out.push_str(&inner);
    }
}

fn row_html(cells: &[Vec<Span>], tag: &str, out: &mut String) {
    out.push_str("<tr>");
    for cell in cells {
        out.push_str(&format!("<{}>", tag));
        spans_html(cell, out);
        out.push_str(&format!("</{}>", tag));
    }
    out.push_str("</tr>");
}

fn block_html(block: &Block, out: &mut String) {
    match block {
        Block::Literal(text) => out.push_str(&escape_html(text)),
        Block::Heading { level, spans } => {
            out.push_str(&format!("<h{}>", level));
            spans_html(spans, out);
            out.push_str(&format!("</h{}>", level));
        }
        Block::Paragraph(spans) => {
            out.push_str("<p>");
            spans_html(spans, out);
            out.push_str("</p>");
        }
        Block::List { start, items } => {
            let close = match start {
                Some(1) => {
                    out.push_str("<ol>");
                    "</ol>"
                }
                Some(n) => {
                    out.push_str(&format!("<ol start=\"{}\">", n));
                    "</ol>"
                }
                None => {
                    out.push_str("<ul>");
                    "</ul>"
                }
            };
            for item in items {
                out.push_str("<li>");
                for inner in item {
                    match inner {
                        Block::Paragraph(spans) => spans_html(spans, out),
                        other => block_html(other, out),
                    }
                }
                out.push_str("</li>");
            }
            out.push_str(close);
        }
        Block::Quote(inner) => {
            out.push_str("<blockquote>");
            for b in inner {
                block_html(b, out);
            }
            out.push_str("</blockquote>");
        }
        Block::Table { header, rows } => {
            out.push_str("<table><thead>");
            row_html(header, "th", out);
            out.push_str("</thead><tbody>");
            for row in rows {
                row_html(row, "td", out);
            }
            out.push_str("</tbody></table>");
        }
        Block::Rule => out.push_str("<hr>"),
        Block::Code { language, code, .. } => {
            match language {
                Some(lang) => out.push_str(&format!(
                    "<pre><code class=\"language-{}\">",
                    escape_html(lang)
                )),
                None => out.push_str("<pre><code>"),
            }
            out.push_str(&escape_html(code));
            out.push_str("</code></pre>");
        }
    }
}

/// The visible transcript for one conversation. Append-only between clears.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    conversation_id: Option<String>,
    entries: Vec<RenderedMessage>,
    /// Bumped on every append; a front end scrolls to the bottom when it changes.
    scroll_revision: u64,
    /// Bumped whenever the entries are cleared; a pending send only lands on the generation it started on.
    generation: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn entries(&self) -> &[RenderedMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scroll_revision(&self) -> u64 {
        self.scroll_revision
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Render and append one message.
    pub fn append(&mut self, message: &Message) {
        self.entries.push(render_message(message));
        self.scroll_revision += 1;
    }

    /// Empty the transcript and bind it to `conversation_id`.
    pub fn reset(&mut self, conversation_id: Option<String>) {
        self.conversation_id = conversation_id;
        self.entries.clear();
        self.scroll_revision += 1;
        self.generation += 1;
    }

    /// Bind to a conversation without touching the entries (used when a send creates one).
    pub(crate) fn rebind(&mut self, conversation_id: Option<String>) {
        self.conversation_id = conversation_id;
    }

    /// Replace all entries with a loaded conversation's messages, in order.
    pub fn replace(&mut self, conversation_id: String, messages: &[Message]) {
        self.reset(Some(conversation_id));
        for m in messages {
            self.append(m);
        }
    }
}
