use clap::{Parser, Subcommand};
use lib::api::{ApiClient, Backend, SettingsUpdate};
use lib::controller::{ChatController, SendOutcome, QUICK_ACTIONS};
use lib::render::{Block, RenderedMessage, Span};
use lib::staging::FileSource;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "huddle")]
#[command(about = "Huddle chat client", long_about = None)]
struct Cli {
    /// Config file path (default: HUDDLE_CONFIG_PATH or ~/.huddle/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides HUDDLE_API_URL and the config file)
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init,

    /// List the models the backend offers.
    Models,

    /// List conversations.
    List,

    /// Create a conversation and print its id.
    New {
        /// Title (default from config, "New Chat")
        #[arg(long)]
        title: Option<String>,
    },

    /// Print a conversation's transcript.
    Show { id: String },

    /// Delete a conversation.
    Delete {
        id: String,

        /// Do not ask for confirmation.
        #[arg(long, short)]
        yes: bool,
    },

    /// Change settings of a conversation. Only the given fields are sent.
    Settings {
        id: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// Send one message, with optional attachments, and print the reply.
    Send {
        /// Conversation to send to (a new one is created when omitted).
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Attach a file (repeatable).
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,

        /// Attach an image or video (repeatable).
        #[arg(long = "media", value_name = "PATH")]
        media: Vec<PathBuf>,

        /// Attach a link as "URL" or "URL TITLE" (repeatable).
        #[arg(long = "link", value_name = "URL [TITLE]")]
        links: Vec<String>,

        text: Vec<String>,
    },

    /// Interactive chat. Type /help for commands.
    Chat {
        /// Existing conversation to continue.
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = cli.config;
    let api_url = cli.api_url;

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("huddle {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config),
        Some(Commands::Models) => match connect(config, api_url) {
            Ok((_, client)) => run_models(&client).await,
            Err(e) => Err(e),
        },
        Some(Commands::List) => match connect(config, api_url) {
            Ok((ctl, client)) => run_list(ctl, &client).await,
            Err(e) => Err(e),
        },
        Some(Commands::New { title }) => match connect(config, api_url) {
            Ok((ctl, client)) => run_new(ctl, &client, title).await,
            Err(e) => Err(e),
        },
        Some(Commands::Show { id }) => match connect(config, api_url) {
            Ok((ctl, client)) => run_show(ctl, &client, &id).await,
            Err(e) => Err(e),
        },
        Some(Commands::Delete { id, yes }) => match connect(config, api_url) {
            Ok((ctl, client)) => run_delete(ctl, &client, &id, yes).await,
            Err(e) => Err(e),
        },
        Some(Commands::Settings {
            id,
            model,
            temperature,
            max_tokens,
            system_prompt,
        }) => {
            let update = SettingsUpdate {
                model,
                temperature,
                max_tokens,
                system_prompt,
            };
            match connect(config, api_url) {
                Ok(_) if update.is_empty() => Err(anyhow::anyhow!("no settings given")),
                Ok((_, client)) => run_settings(&client, &id, &update).await,
                Err(e) => Err(e),
            }
        }
        Some(Commands::Send {
            conversation,
            files,
            media,
            links,
            text,
        }) => match connect(config, api_url) {
            Ok((ctl, client)) => {
                let staged = Staged { files, media, links };
                run_send(ctl, &client, conversation, staged, text.join(" ")).await
            }
            Err(e) => Err(e),
        },
        Some(Commands::Chat { conversation }) => match connect(config, api_url) {
            Ok((ctl, client)) => run_chat(ctl, &client, conversation).await,
            Err(e) => Err(e),
        },
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// Load config and build the controller and API client.
fn connect(
    config_path: Option<PathBuf>,
    api_url: Option<String>,
) -> anyhow::Result<(ChatController, ApiClient)> {
    let (config, path) = lib::config::load_config(config_path)?;
    let base_url = api_url.unwrap_or_else(|| lib::config::resolve_base_url(&config));
    log::debug!("config {} backend {}", path.display(), base_url);
    Ok((ChatController::new(&config), ApiClient::new(base_url)))
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_models(client: &ApiClient) -> anyhow::Result<()> {
    let models = client.list_models().await?;
    if models.is_empty() {
        println!("no models");
    }
    for m in models {
        println!("{}\t{}", m.id, m.label());
    }
    Ok(())
}

async fn run_list(mut ctl: ChatController, client: &ApiClient) -> anyhow::Result<()> {
    let list = ctl.store_mut().list_conversations(client).await?;
    print_conversations(list);
    Ok(())
}

async fn run_new(
    mut ctl: ChatController,
    client: &ApiClient,
    title: Option<String>,
) -> anyhow::Result<()> {
    let current = ctl
        .store_mut()
        .create_conversation(client, title.as_deref())
        .await?;
    println!("{}", current.id);
    Ok(())
}

async fn run_show(mut ctl: ChatController, client: &ApiClient, id: &str) -> anyhow::Result<()> {
    ctl.load_conversation(client, id).await?;
    print_header(&ctl);
    for entry in ctl.store().transcript().entries() {
        print_entry(entry);
    }
    Ok(())
}

async fn run_delete(
    mut ctl: ChatController,
    client: &ApiClient,
    id: &str,
    yes: bool,
) -> anyhow::Result<()> {
    if !yes && !confirm(&format!("Delete conversation {}?", id))? {
        println!("cancelled");
        return Ok(());
    }
    ctl.delete_conversation(client, id).await?;
    println!("deleted {}", id);
    Ok(())
}

async fn run_settings(client: &ApiClient, id: &str, update: &SettingsUpdate) -> anyhow::Result<()> {
    client.update_settings(id, update).await?;
    println!("updated {}", id);
    Ok(())
}

/// Attachments given on the command line.
struct Staged {
    files: Vec<PathBuf>,
    media: Vec<PathBuf>,
    links: Vec<String>,
}

async fn run_send(
    mut ctl: ChatController,
    client: &ApiClient,
    conversation: Option<String>,
    staged: Staged,
    text: String,
) -> anyhow::Result<()> {
    if let Some(id) = conversation {
        ctl.load_conversation(client, &id).await?;
    }
    for path in &staged.files {
        stage_path(&mut ctl, path, false).await?;
    }
    for path in &staged.media {
        stage_path(&mut ctl, path, true).await?;
    }
    for arg in &staged.links {
        let (url, title) = split_link_arg(arg);
        ctl.add_link(url, title)?;
    }
    ctl.set_input(text);
    let before = ctl.store().transcript().len();
    let Some(outcome) = ctl.send(client).await else {
        anyhow::bail!("nothing to send: give text, --file, --media or --link");
    };
    for entry in ctl.store().transcript().entries().iter().skip(before) {
        if !entry.is_user() {
            print_entry(entry);
        }
    }
    if let Some(id) = ctl.store().current_id() {
        log::info!("conversation {}", id);
    }
    match outcome {
        SendOutcome::Failed(reason) => Err(anyhow::anyhow!(reason)),
        SendOutcome::NoReply => {
            println!("(no reply)");
            Ok(())
        }
        SendOutcome::Replied => Ok(()),
    }
}

/// Stage one file; media gets a data-URI preview the way a front end would show it.
async fn stage_path(ctl: &mut ChatController, path: &std::path::Path, is_media: bool) -> anyhow::Result<()> {
    let source = FileSource::from_path(path)
        .map_err(|e| anyhow::anyhow!("cannot attach {}: {}", path.display(), e))?;
    for req in ctl.add_files(vec![source], is_media) {
        match lib::staging::load_preview(&req).await {
            Ok(uri) => {
                log::debug!("preview for {} ({} bytes)", req.id, uri.len());
                ctl.staging_mut().set_preview(&req.id, uri);
            }
            Err(e) => log::warn!("no preview for {}: {}", path.display(), e),
        }
    }
    Ok(())
}

/// "URL" or "URL TITLE".
fn split_link_arg(arg: &str) -> (&str, &str) {
    let arg = arg.trim();
    match arg.split_once(char::is_whitespace) {
        Some((url, title)) => (url, title.trim()),
        None => (arg, ""),
    }
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{} [y/N] ", question)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "Yes"))
}

const HELP: &str = "\
/new                 start a new conversation
/list                list conversations
/load <id>           open a conversation
/delete <id>         delete a conversation
/file <path>         attach a file
/media <path>        attach an image or video
/link <url> [title]  attach a link
/unfile <n>          remove attached file n
/unlink <n>          remove attached link n
/staged              show attachments
/clear               remove all attachments
/code                toggle code mode (multi-line input, blank line sends)
/model <id>          set the model
/temp <value>        set the temperature (0-2)
/tokens <n>          set max tokens
/system <text>       set the system prompt
/help                show this help
/quit                exit";

async fn run_chat(
    mut ctl: ChatController,
    client: &ApiClient,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    ctl.bootstrap(client).await;
    if let Some(id) = conversation {
        ctl.load_conversation(client, &id).await?;
        print_header(&ctl);
        for entry in ctl.store().transcript().entries() {
            print_entry(entry);
        }
    } else {
        print_welcome();
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        let prompt = match ctl.staging().badge() {
            Some(badge) if ctl.code_mode() => format!("[{}] code> ", badge),
            Some(badge) => format!("[{}] > ", badge),
            None if ctl.code_mode() => "code> ".to_string(),
            None => "> ".to_string(),
        };
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim_end_matches(['\r', '\n']);
        if input.trim().is_empty() {
            continue;
        }

        if let Some(command) = input.trim().strip_prefix('/') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match slash_command(&mut ctl, client, name, arg).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    eprintln!("error: {}", e);
                    continue;
                }
            }
        }

        let text = if ctl.code_mode() {
            read_code_block(input)?
        } else {
            input.to_string()
        };
        ctl.set_input(text);
        send_and_print(&mut ctl, client).await;
    }

    Ok(())
}

/// In code mode, keep reading lines until a blank one.
fn read_code_block(first: &str) -> anyhow::Result<String> {
    let mut text = first.to_string();
    let stdin = io::stdin();
    loop {
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        text.push('\n');
        text.push_str(line);
    }
    Ok(text)
}

async fn send_and_print(ctl: &mut ChatController, client: &ApiClient) {
    let before = ctl.store().transcript().len();
    match ctl.send(client).await {
        None => println!("nothing to send"),
        Some(outcome) => {
            // skip the echoed user message
            for entry in ctl.store().transcript().entries().iter().skip(before + 1) {
                print_entry(entry);
            }
            if outcome == SendOutcome::NoReply {
                println!("(no reply)");
            }
        }
    }
}

/// Run one slash command. Ok(false) ends the loop.
async fn slash_command(
    ctl: &mut ChatController,
    client: &ApiClient,
    name: &str,
    arg: &str,
) -> anyhow::Result<bool> {
    match name {
        "quit" | "exit" => return Ok(false),
        "help" => println!("{}", HELP),
        "new" => {
            ctl.new_chat(client).await?;
            print_header(ctl);
            print_welcome();
        }
        "list" => {
            ctl.store_mut().list_conversations(client).await?;
            print_conversations(ctl.store().conversations());
        }
        "load" => {
            let id = required(arg, "/load <id>")?;
            ctl.load_conversation(client, id).await?;
            print_header(ctl);
            for entry in ctl.store().transcript().entries() {
                print_entry(entry);
            }
        }
        "delete" => {
            let id = required(arg, "/delete <id>")?;
            if confirm(&format!("Delete conversation {}?", id))? {
                ctl.delete_conversation(client, id).await?;
                println!("deleted {}", id);
            }
        }
        "file" | "media" => {
            let path = required(arg, "/file <path>")?;
            stage_path(ctl, std::path::Path::new(path), name == "media").await?;
            print_staged(ctl);
        }
        "link" => {
            let link = required(arg, "/link <url> [title]")?;
            let (url, title) = split_link_arg(link);
            ctl.add_link(url, title)?;
            print_staged(ctl);
        }
        "unfile" => {
            let index = parse_index(arg)?;
            let id = ctl
                .staging()
                .files()
                .get(index)
                .map(|f| f.id.clone())
                .ok_or_else(|| anyhow::anyhow!("no attached file {}", index + 1))?;
            ctl.staging_mut().remove_file(&id);
            print_staged(ctl);
        }
        "unlink" => {
            let index = parse_index(arg)?;
            ctl.staging_mut()
                .remove_link(index)
                .ok_or_else(|| anyhow::anyhow!("no attached link {}", index + 1))?;
            print_staged(ctl);
        }
        "staged" => print_staged(ctl),
        "clear" => {
            ctl.staging_mut().clear_all();
            println!("attachments cleared");
        }
        "code" => {
            let on = ctl.toggle_code_mode();
            println!("code mode {}", if on { "on" } else { "off" });
        }
        "model" => {
            let model = required(arg, "/model <id>")?;
            settings(ctl, client, SettingsUpdate::model(model)).await?;
        }
        "temp" => {
            let t: f64 = required(arg, "/temp <value>")?.parse()?;
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("temperature must be between 0 and 2");
            }
            settings(ctl, client, SettingsUpdate::temperature(t)).await?;
        }
        "tokens" => {
            let n: u32 = required(arg, "/tokens <n>")?.parse()?;
            settings(ctl, client, SettingsUpdate::max_tokens(n)).await?;
        }
        "system" => {
            settings(ctl, client, SettingsUpdate::system_prompt(arg)).await?;
        }
        other => {
            let quick = other
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| QUICK_ACTIONS.get(i));
            match quick {
                Some((_, prompt)) => {
                    println!("> {}", prompt);
                    let before = ctl.store().transcript().len();
                    if ctl.send_quick(client, prompt).await.is_some() {
                        for entry in ctl.store().transcript().entries().iter().skip(before + 1) {
                            print_entry(entry);
                        }
                    }
                }
                None => println!("unknown command /{}; try /help", other),
            }
        }
    }
    Ok(true)
}

async fn settings(ctl: &mut ChatController, client: &ApiClient, update: SettingsUpdate) -> anyhow::Result<()> {
    if ctl.store().current_id().is_none() {
        anyhow::bail!("no conversation open; settings apply to the current conversation");
    }
    if ctl.update_settings(client, update).await {
        let s = ctl.store().settings();
        println!(
            "model {} | temperature {} | max tokens {}",
            ctl.store().model_badge().unwrap_or("-"),
            s.temperature,
            s.max_tokens
        );
    } else {
        println!("settings not saved (see log)");
    }
    Ok(())
}

fn required<'a>(arg: &'a str, usage: &str) -> anyhow::Result<&'a str> {
    if arg.is_empty() {
        anyhow::bail!("usage: {}", usage);
    }
    Ok(arg)
}

/// 1-based index as shown by /staged.
fn parse_index(arg: &str) -> anyhow::Result<usize> {
    let n: usize = required(arg, "<n>")?.parse()?;
    n.checked_sub(1)
        .ok_or_else(|| anyhow::anyhow!("indexes start at 1"))
}

fn print_conversations(list: &[lib::api::ConversationSummary]) {
    if list.is_empty() {
        println!("no conversations");
    }
    for c in list {
        let badge = c.model.as_deref().map(lib::store::model_badge).unwrap_or("");
        let count = c.message_count.map(|n| format!("{} msgs", n)).unwrap_or_default();
        let updated = c.updated_at.as_deref().unwrap_or("");
        println!("{}\t{}\t{}\t{}\t{}", c.id, c.title, badge, count, updated);
    }
}

fn print_header(ctl: &ChatController) {
    match ctl.store().model_badge() {
        Some(badge) => println!("== {} [{}] ==", ctl.store().title(), badge),
        None => println!("== {} ==", ctl.store().title()),
    }
}

fn print_welcome() {
    println!("Start a conversation, or pick a quick action:");
    for (i, (label, _)) in QUICK_ACTIONS.iter().enumerate() {
        println!("  /{}  {}", i + 1, label);
    }
}

fn print_staged(ctl: &ChatController) {
    let staging = ctl.staging();
    if staging.is_empty() {
        println!("nothing attached");
        return;
    }
    for (i, f) in staging.files().iter().enumerate() {
        println!(
            "  file {}: {} {} ({})",
            i + 1,
            f.kind().icon(),
            f.name,
            lib::compose::format_file_size(f.size)
        );
    }
    for (i, l) in staging.links().iter().enumerate() {
        println!("  link {}: 🔗 {} {}", i + 1, l.label(), l.url);
    }
    if let Some(badge) = staging.badge() {
        println!("  {}", badge);
    }
}

fn print_entry(entry: &RenderedMessage) {
    println!("{}", entry.avatar());
    for block in &entry.blocks {
        println!("{}", block_text(block));
    }
    println!();
}

fn spans_text(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|s| match (&s.link, s.code) {
            (Some(url), _) if url != &s.text => format!("{} <{}>", s.text, url),
            (_, true) => format!("`{}`", s.text),
            _ => s.text.clone(),
        })
        .collect()
}

/// Plain terminal text for one block.
fn block_text(block: &Block) -> String {
    match block {
        Block::Literal(text) => text.clone(),
        Block::Heading { level, spans } => {
            format!("{} {}", "#".repeat(*level as usize), spans_text(spans))
        }
        Block::Paragraph(spans) => spans_text(spans),
        Block::List { start, items } => {
            let mut lines = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let marker = match start {
                    Some(n) => format!("{}.", n + i as u64),
                    None => "•".to_string(),
                };
                for (j, inner) in item.iter().enumerate() {
                    for (k, line) in block_text(inner).lines().enumerate() {
                        if j == 0 && k == 0 {
                            lines.push(format!("{} {}", marker, line));
                        } else {
                            lines.push(format!("  {}", line));
                        }
                    }
                }
            }
            lines.join("\n")
        }
        Block::Quote(inner) => inner
            .iter()
            .flat_map(|b| {
                block_text(b)
                    .lines()
                    .map(|l| format!("│ {}", l))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Block::Table { header, rows } => {
            let row = |cells: &[Vec<Span>]| {
                cells
                    .iter()
                    .map(|c| spans_text(c))
                    .collect::<Vec<_>>()
                    .join(" │ ")
            };
            let mut lines = vec![row(header), "─".repeat(8)];
            lines.extend(rows.iter().map(|r| row(r)));
            lines.join("\n")
        }
        Block::Rule => "────────".to_string(),
        Block::Code { language, code, .. } => {
            let label = language.as_deref().unwrap_or("");
            format!("┌─ {}\n{}\n└─", label, code.trim_end_matches('\n'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_argument_splits_on_first_space() {
        assert_eq!(split_link_arg("https://a.test"), ("https://a.test", ""));
        assert_eq!(
            split_link_arg(" https://a.test  The A site "),
            ("https://a.test", "The A site")
        );
    }

    #[test]
    fn code_block_keeps_language_label() {
        let block = Block::Code {
            language: Some("rust".to_string()),
            detected: false,
            code: "fn main() {}\n".to_string(),
            highlighted: None,
        };
        assert_eq!(block_text(&block), "┌─ rust\nfn main() {}\n└─");
    }

    #[test]
    fn nested_lists_are_indented() {
        let blocks = lib::render::parse_markdown("1. one\n   - inner\n2. two");
        assert_eq!(block_text(&blocks[0]), "1. one\n  • inner\n2. two");
    }

    #[test]
    fn index_is_one_based() {
        assert_eq!(parse_index("1").unwrap(), 0);
        assert!(parse_index("0").is_err());
        assert!(parse_index("").is_err());
    }

    #[test]
    fn cli_parses_send_with_attachments() {
        let cli = Cli::try_parse_from([
            "huddle",
            "--api-url",
            "http://localhost:9000",
            "send",
            "--file",
            "a.txt",
            "--link",
            "https://a.test A",
            "hello",
            "world",
        ])
        .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://localhost:9000"));
        match cli.command {
            Some(Commands::Send { files, links, text, .. }) => {
                assert_eq!(files, vec![PathBuf::from("a.txt")]);
                assert_eq!(links, vec!["https://a.test A".to_string()]);
                assert_eq!(text.join(" "), "hello world");
            }
            _ => panic!("expected send"),
        }
    }
}
