//! Attachment staging: files and links picked by the user but not yet sent.
//!
//! Image files get a base64 data-URI preview loaded off the main flow; callers receive a
//! [`PreviewRequest`] per image and report back with [`AttachmentStaging::set_preview`].
//! A file whose preview has not arrived yet is still fully staged.

use base64::Engine as _;
use std::path::{Path, PathBuf};

/// Unique id of a staged file within one staging session.
pub type FileId = String;

/// Coarse file category derived from the MIME type (used for list icons).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Pdf,
    Document,
    Spreadsheet,
    Archive,
    Text,
    Other,
}

impl FileKind {
    pub fn from_mime(mime: &str) -> Self {
        let m = mime.to_ascii_lowercase();
        if m.starts_with("image/") {
            FileKind::Image
        } else if m.starts_with("video/") {
            FileKind::Video
        } else if m.starts_with("audio/") {
            FileKind::Audio
        } else if m.contains("pdf") {
            FileKind::Pdf
        } else if m.contains("word") || m.contains("document") {
            FileKind::Document
        } else if m.contains("excel") || m.contains("spreadsheet") {
            FileKind::Spreadsheet
        } else if m.contains("zip") || m.contains("rar") || m.contains("tar") {
            FileKind::Archive
        } else if m.contains("text")
            || m.contains("json")
            || m.contains("javascript")
            || m.contains("python")
        {
            FileKind::Text
        } else {
            FileKind::Other
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            FileKind::Image => "🖼",
            FileKind::Video => "🎬",
            FileKind::Audio => "🎵",
            FileKind::Pdf => "📕",
            FileKind::Document => "📘",
            FileKind::Spreadsheet => "📗",
            FileKind::Archive => "📦",
            FileKind::Text => "📄",
            FileKind::Other => "📎",
        }
    }
}

/// A file offered for staging (from a picker, a CLI flag or a drop).
#[derive(Debug, Clone, PartialEq)]
pub struct FileSource {
    pub name: String,
    pub mime: String,
    pub size: u64,
    /// Where the content can be read for previews. None for content that is not on disk.
    pub path: Option<PathBuf>,
}

impl FileSource {
    /// Describe a file on disk: name from the final path component, MIME guessed from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(Self {
            name,
            mime,
            size: meta.len(),
            path: Some(path.to_path_buf()),
        })
    }
}

/// A staged file.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub id: FileId,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub path: Option<PathBuf>,
    /// `data:<mime>;base64,...` once loaded; images only.
    pub preview: Option<String>,
    pub is_media: bool,
}

impl StagedFile {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(&self.mime)
    }
}

/// A staged link.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedLink {
    pub url: String,
    pub title: Option<String>,
}

impl StagedLink {
    /// The title when one was given, otherwise the URL.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.url)
    }
}

/// Rejected link input. The message is shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Please enter a URL")]
    Empty,
    #[error("Please enter a valid URL ({0})")]
    Invalid(String),
}

/// Work item for loading one image preview.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRequest {
    pub id: FileId,
    pub path: PathBuf,
    pub mime: String,
}

/// Files and links waiting to be sent with the next message.
#[derive(Debug, Clone, Default)]
pub struct AttachmentStaging {
    files: Vec<StagedFile>,
    links: Vec<StagedLink>,
}

/// Time-based prefix plus random suffix.
fn new_file_id() -> FileId {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), &random[..12])
}

impl AttachmentStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn links(&self) -> &[StagedLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.links.is_empty()
    }

    /// Count badge text, None when nothing is staged.
    pub fn badge(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(format!("{} attached", self.len()))
        }
    }

    /// Stage files in order. Returns one preview request per image that has a readable path.
    pub fn add_files(
        &mut self,
        files: impl IntoIterator<Item = FileSource>,
        is_media: bool,
    ) -> Vec<PreviewRequest> {
        let mut previews = Vec::new();
        for source in files {
            let staged = StagedFile {
                id: new_file_id(),
                name: source.name,
                mime: source.mime,
                size: source.size,
                path: source.path,
                preview: None,
                is_media,
            };
            if staged.kind() == FileKind::Image {
                if let Some(path) = &staged.path {
                    previews.push(PreviewRequest {
                        id: staged.id.clone(),
                        path: path.clone(),
                        mime: staged.mime.clone(),
                    });
                }
            }
            log::debug!("staged file {} ({} bytes)", staged.name, staged.size);
            self.files.push(staged);
        }
        previews
    }

    /// Remove a staged file by id. Returns false if no such file is staged.
    pub fn remove_file(&mut self, id: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.id != id);
        self.files.len() != before
    }

    /// Validate and stage a link. Nothing is staged on error.
    pub fn add_link(&mut self, url: &str, title: &str) -> Result<(), LinkError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(LinkError::Empty);
        }
        url::Url::parse(url).map_err(|e| LinkError::Invalid(e.to_string()))?;
        let title = title.trim();
        self.links.push(StagedLink {
            url: url.to_string(),
            title: (!title.is_empty()).then(|| title.to_string()),
        });
        Ok(())
    }

    /// Remove the link at `index`; out of range is a no-op.
    pub fn remove_link(&mut self, index: usize) -> Option<StagedLink> {
        (index < self.links.len()).then(|| self.links.remove(index))
    }

    /// Stage what was dropped on the input: files as non-media, plus dropped text that
    /// starts with http:// or https:// as an untitled link.
    pub fn add_dropped(
        &mut self,
        files: impl IntoIterator<Item = FileSource>,
        text: Option<&str>,
    ) -> Vec<PreviewRequest> {
        let previews = self.add_files(files, false);
        if let Some(t) = text.map(str::trim) {
            if t.starts_with("http://") || t.starts_with("https://") {
                self.links.push(StagedLink {
                    url: t.to_string(),
                    title: None,
                });
            }
        }
        previews
    }

    /// Attach a loaded preview. Returns false when the file was removed in the meantime.
    pub fn set_preview(&mut self, id: &str, data_uri: String) -> bool {
        match self.files.iter_mut().find(|f| f.id == id) {
            Some(f) => {
                f.preview = Some(data_uri);
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        self.files.clear();
        self.links.clear();
    }
}

/// `data:<mime>;base64,<content>`
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Read a file and encode it as a data URI.
pub async fn load_preview(request: &PreviewRequest) -> std::io::Result<String> {
    let bytes = tokio::fs::read(&request.path).await?;
    Ok(encode_data_uri(&request.mime, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, mime: &str, size: u64) -> FileSource {
        FileSource {
            name: name.to_string(),
            mime: mime.to_string(),
            size,
            path: Some(PathBuf::from(format!("/tmp/{}", name))),
        }
    }

    #[test]
    fn add_files_assigns_unique_ids_and_requests_image_previews() {
        let mut staging = AttachmentStaging::new();
        let previews = staging.add_files(
            vec![
                source("a.png", "image/png", 10),
                source("b.txt", "text/plain", 20),
                source("c.jpg", "image/jpeg", 30),
            ],
            false,
        );
        assert_eq!(staging.files().len(), 3);
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].id, staging.files()[0].id);
        assert_eq!(previews[1].id, staging.files()[2].id);
        let ids: std::collections::HashSet<_> = staging.files().iter().map(|f| &f.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(staging.files().iter().all(|f| f.preview.is_none()));
    }

    #[test]
    fn media_flag_is_kept() {
        let mut staging = AttachmentStaging::new();
        staging.add_files(vec![source("clip.mp4", "video/mp4", 1)], true);
        assert!(staging.files()[0].is_media);
        assert_eq!(staging.files()[0].kind(), FileKind::Video);
    }

    #[test]
    fn remove_file_by_id() {
        let mut staging = AttachmentStaging::new();
        staging.add_files(vec![source("a.txt", "text/plain", 1), source("b.txt", "text/plain", 1)], false);
        let id = staging.files()[0].id.clone();
        assert!(staging.remove_file(&id));
        assert!(!staging.remove_file(&id));
        assert_eq!(staging.files().len(), 1);
        assert_eq!(staging.files()[0].name, "b.txt");
    }

    #[test]
    fn preview_for_removed_file_is_dropped() {
        let mut staging = AttachmentStaging::new();
        let previews = staging.add_files(vec![source("a.png", "image/png", 3)], false);
        let id = previews[0].id.clone();
        assert!(staging.set_preview(&id, "data:image/png;base64,AAA".into()));
        assert_eq!(staging.files()[0].preview.as_deref(), Some("data:image/png;base64,AAA"));
        staging.remove_file(&id);
        assert!(!staging.set_preview(&id, "data:image/png;base64,BBB".into()));
    }

    #[test]
    fn invalid_link_is_not_staged() {
        let mut staging = AttachmentStaging::new();
        let err = staging.add_link("not a url", "").unwrap_err();
        assert!(matches!(err, LinkError::Invalid(_)));
        assert_eq!(staging.add_link("   ", "x"), Err(LinkError::Empty));
        assert_eq!(staging.links().len(), 0);
    }

    #[test]
    fn valid_link_keeps_optional_title() {
        let mut staging = AttachmentStaging::new();
        staging.add_link(" https://example.com/a ", "  ").unwrap();
        staging.add_link("https://rust-lang.org", "Rust").unwrap();
        assert_eq!(staging.links()[0].url, "https://example.com/a");
        assert_eq!(staging.links()[0].title, None);
        assert_eq!(staging.links()[0].label(), "https://example.com/a");
        assert_eq!(staging.links()[1].label(), "Rust");
        assert_eq!(staging.badge().as_deref(), Some("2 attached"));
    }

    #[test]
    fn remove_link_out_of_range_is_noop() {
        let mut staging = AttachmentStaging::new();
        staging.add_link("https://a.test", "").unwrap();
        assert!(staging.remove_link(5).is_none());
        assert_eq!(staging.remove_link(0).map(|l| l.url), Some("https://a.test".to_string()));
        assert!(staging.is_empty());
    }

    #[test]
    fn dropped_text_only_stages_http_links() {
        let mut staging = AttachmentStaging::new();
        staging.add_dropped(Vec::new(), Some("https://example.com"));
        staging.add_dropped(Vec::new(), Some("ftp://example.com"));
        staging.add_dropped(vec![source("n.md", "text/markdown", 4)], Some("plain words"));
        assert_eq!(staging.links().len(), 1);
        assert_eq!(staging.files().len(), 1);
        assert!(!staging.files()[0].is_media);
    }

    #[test]
    fn clear_all_is_idempotent() {
        let mut staging = AttachmentStaging::new();
        staging.add_files(vec![source("a.txt", "text/plain", 1)], false);
        staging.add_link("https://a.test", "").unwrap();
        staging.clear_all();
        assert!(staging.is_empty());
        assert_eq!(staging.badge(), None);
        staging.clear_all();
        assert!(staging.is_empty());
        assert_eq!(staging.len(), 0);
    }

    #[test]
    fn file_kinds() {
        assert_eq!(FileKind::from_mime("application/pdf"), FileKind::Pdf);
        assert_eq!(
            FileKind::from_mime("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            FileKind::Document
        );
        assert_eq!(FileKind::from_mime("application/vnd.ms-excel"), FileKind::Spreadsheet);
        assert_eq!(FileKind::from_mime("application/zip"), FileKind::Archive);
        assert_eq!(FileKind::from_mime("application/json"), FileKind::Text);
        assert_eq!(FileKind::from_mime("application/octet-stream"), FileKind::Other);
    }

    #[test]
    fn data_uri_encoding() {
        assert_eq!(encode_data_uri("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn preview_loads_from_disk() {
        let dir = std::env::temp_dir().join(format!("huddle-staging-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dot.png");
        std::fs::write(&path, b"hi").unwrap();

        let source = FileSource::from_path(&path).unwrap();
        assert_eq!(source.name, "dot.png");
        assert_eq!(source.mime, "image/png");
        assert_eq!(source.size, 2);

        let mut staging = AttachmentStaging::new();
        let previews = staging.add_files(vec![source], false);
        let uri = load_preview(&previews[0]).await.unwrap();
        assert!(staging.set_preview(&previews[0].id, uri));
        assert_eq!(
            staging.files()[0].preview.as_deref(),
            Some("data:image/png;base64,aGk=")
        );
    }
}
