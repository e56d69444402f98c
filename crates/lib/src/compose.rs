//! Merge typed text and staged attachments into the single outgoing message string.

use crate::staging::{StagedFile, StagedLink};

const LINK_ICON: &str = "🔗";
const FILE_ICON: &str = "📄";
const BLOCK_ICON: &str = "📎";

/// Human-readable size: bytes below 1024 as "N B", otherwise the largest of KB/MB/GB whose
/// quotient is at least 1, with one decimal place.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn link_line(link: &StagedLink) -> String {
    format!("{} {}: {}", LINK_ICON, link.label(), link.url)
}

fn file_line(file: &StagedFile) -> String {
    format!("{} {} ({})", FILE_ICON, file.name, format_file_size(file.size))
}

/// Append `lines` under a header. The header depends on whether anything precedes the block.
fn append_block(message: &mut String, attached_header: &str, analyze_header: &str, lines: Vec<String>) {
    let body = lines.join("\n");
    if message.is_empty() {
        *message = format!("{} {}:\n{}", BLOCK_ICON, analyze_header, body);
    } else {
        message.push_str(&format!("\n\n{} {}:\n{}", BLOCK_ICON, attached_header, body));
    }
}

/// Build the outgoing message. Returns None when there is neither text nor any attachment.
///
/// Links come first, then files. Each block sits under "Attached ..." when something precedes
/// it, or "... to analyze" when it opens the message.
pub fn compose(text: &str, files: &[StagedFile], links: &[StagedLink]) -> Option<String> {
    let mut message = if text.trim().is_empty() {
        String::new()
    } else {
        text.to_string()
    };
    if !links.is_empty() {
        append_block(
            &mut message,
            "Attached links",
            "Links to analyze",
            links.iter().map(link_line).collect(),
        );
    }
    if !files.is_empty() {
        append_block(
            &mut message,
            "Attached files",
            "Files to analyze",
            files.iter().map(file_line).collect(),
        );
    }
    (!message.is_empty()).then_some(message)
}
