use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;

use crate::models::{Attachment, AttachmentId, TaskId};
use crate::state::AppState;

/// Per-file cap; larger files never enter a task.
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug)]
pub enum AttachmentError {
    TooLarge { name: String, size: u64 },
    Read { name: String, source: std::io::Error },
    TaskMissing { name: String, task_id: TaskId },
    InvalidDataUrl,
    Write { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentError::TooLarge { name, .. } => {
                write!(f, "File \"{name}\" is too large (max 5MB)")
            }
            AttachmentError::Read { name, .. } => write!(f, "Failed to read file \"{name}\""),
            AttachmentError::TaskMissing { name, task_id } => {
                write!(f, "Task {task_id} no longer exists; \"{name}\" was dropped")
            }
            AttachmentError::InvalidDataUrl => write!(f, "attachment data is not a data URL"),
            AttachmentError::Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for AttachmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttachmentError::Read { source, .. } | AttachmentError::Write { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FileSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// A raw file handed over by the presentation layer.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub mime_type: String,
    pub source: FileSource,
}

impl IncomingFile {
    pub fn from_bytes(name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            source: FileSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: PathBuf, mime_type: &str) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Self {
            name,
            mime_type: mime_type.to_string(),
            source: FileSource::Path(path),
        }
    }
}

pub fn new_attachment_id() -> AttachmentId {
    let fraction: f64 = rand::thread_rng().gen();
    AttachmentId(Utc::now().timestamp_millis() as f64 + fraction)
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    let mime = if mime_type.trim().is_empty() {
        FALLBACK_MIME
    } else {
        mime_type
    };
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Splits a data URL into its MIME type and decoded bytes.
pub fn decode_data_url(data: &str) -> Result<(String, Vec<u8>), AttachmentError> {
    let rest = data
        .strip_prefix("data:")
        .ok_or(AttachmentError::InvalidDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(AttachmentError::InvalidDataUrl)?;
    match header.strip_suffix(";base64") {
        Some(mime) => {
            let bytes = STANDARD
                .decode(payload)
                .map_err(|_| AttachmentError::InvalidDataUrl)?;
            Ok((mime.to_string(), bytes))
        }
        None => Ok((header.to_string(), payload.as_bytes().to_vec())),
    }
}

fn check_size(name: &str, size: u64) -> Result<(), AttachmentError> {
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentError::TooLarge {
            name: name.to_string(),
            size,
        });
    }
    Ok(())
}

/// Reads and encodes one file. Oversized paths are rejected from metadata, before reading.
pub async fn encode_file(file: IncomingFile) -> Result<Attachment, AttachmentError> {
    let bytes = match file.source {
        FileSource::Bytes(bytes) => bytes,
        FileSource::Path(path) => {
            let read_err = |source| AttachmentError::Read {
                name: file.name.clone(),
                source,
            };
            let metadata = tokio::fs::metadata(&path).await.map_err(read_err)?;
            check_size(&file.name, metadata.len())?;
            tokio::fs::read(&path).await.map_err(read_err)?
        }
    };
    let size = bytes.len() as u64;
    check_size(&file.name, size)?;
    Ok(Attachment {
        id: new_attachment_id(),
        data: encode_data_url(&file.mime_type, &bytes),
        name: file.name,
        mime_type: file.mime_type,
        size,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Processing { pending: usize },
    Settled,
}

/// Completion counter for one ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    started: bool,
    submitted: usize,
    settled: usize,
}

impl BatchProgress {
    pub fn start(submitted: usize) -> Self {
        Self {
            started: true,
            submitted,
            settled: 0,
        }
    }

    pub fn record(&mut self) {
        self.settled = (self.settled + 1).min(self.submitted);
    }

    pub fn phase(&self) -> BatchPhase {
        if !self.started {
            BatchPhase::Idle
        } else if self.settled < self.submitted {
            BatchPhase::Processing {
                pending: self.submitted - self.settled,
            }
        } else {
            BatchPhase::Settled
        }
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub task_id: TaskId,
    pub submitted: usize,
    pub added: Vec<Attachment>,
    pub rejected: Vec<AttachmentError>,
}

/// Encodes every file concurrently and appends the survivors to the task.
///
/// Outcomes arrive in completion order, not submission order. `on_settled` runs exactly
/// once, after every file has been encoded or rejected.
pub async fn ingest_batch<F>(
    state: &AppState,
    task_id: TaskId,
    files: Vec<IncomingFile>,
    on_settled: F,
) -> BatchReport
where
    F: FnOnce(&BatchReport),
{
    let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();

    let (tx, rx) = mpsc::unbounded_channel();
    for (index, file) in files.into_iter().enumerate() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = encode_file(file).await;
            let _ = tx.send((index, outcome));
        });
    }
    drop(tx);

    settle_batch(state, task_id, names, rx, on_settled).await
}

type EncodeOutcome = (usize, Result<Attachment, AttachmentError>);

/// Drains per-file outcomes in whatever order they arrive until every submitted file has one.
async fn settle_batch<F>(
    state: &AppState,
    task_id: TaskId,
    names: Vec<String>,
    mut rx: mpsc::UnboundedReceiver<EncodeOutcome>,
    on_settled: F,
) -> BatchReport
where
    F: FnOnce(&BatchReport),
{
    let mut progress = BatchProgress::start(names.len());
    let mut report = BatchReport {
        task_id,
        submitted: names.len(),
        added: Vec::new(),
        rejected: Vec::new(),
    };
    let mut resolved = vec![false; names.len()];

    while let BatchPhase::Processing { pending } = progress.phase() {
        let Some((index, outcome)) = rx.recv().await else {
            log::warn!("attachment batch lost {pending} encoder(s) task_id={task_id}");
            break;
        };
        resolved[index] = true;
        progress.record();
        match outcome {
            Ok(attachment) => {
                if state.add_attachment(task_id, attachment.clone()) {
                    log::debug!(
                        "attachment added task_id={task_id} name={} size={}",
                        attachment.name,
                        attachment.size
                    );
                    report.added.push(attachment);
                } else {
                    report.rejected.push(AttachmentError::TaskMissing {
                        name: attachment.name,
                        task_id,
                    });
                }
            }
            Err(error) => {
                log::warn!("attachment rejected task_id={task_id}: {error}");
                report.rejected.push(error);
            }
        }
    }

    // An encoder that died without reporting still counts as a failed read.
    for (index, done) in resolved.iter().enumerate() {
        if !done {
            report.rejected.push(AttachmentError::Read {
                name: names[index].clone(),
                source: std::io::Error::other("encoder task aborted"),
            });
        }
    }

    on_settled(&report);
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Document,
    PlainText,
    Generic,
}

impl AttachmentKind {
    pub fn icon(self) -> &'static str {
        match self {
            AttachmentKind::Image => "🖼️",
            AttachmentKind::Pdf | AttachmentKind::PlainText => "📄",
            AttachmentKind::Document => "📝",
            AttachmentKind::Generic => "📎",
        }
    }
}

pub fn describe(attachment: &Attachment) -> AttachmentKind {
    classify_mime(&attachment.mime_type)
}

pub fn classify_mime(mime_type: &str) -> AttachmentKind {
    if mime_type.starts_with("image/") {
        AttachmentKind::Image
    } else if mime_type == "application/pdf" {
        AttachmentKind::Pdf
    } else if mime_type.contains("document") || mime_type.contains("word") {
        AttachmentKind::Document
    } else if mime_type == "text/plain" {
        AttachmentKind::PlainText
    } else {
        AttachmentKind::Generic
    }
}

pub fn format_size_kb(size: u64) -> String {
    format!("{:.1} KB", size as f64 / 1024.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Embed {
    Image,
    Document,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AttachmentView {
    pub title: String,
    pub size_label: String,
    pub data_url: String,
    pub embed: Embed,
    pub download_name: String,
}

pub fn materialize(attachment: &Attachment) -> AttachmentView {
    let embed = match describe(attachment) {
        AttachmentKind::Image => Embed::Image,
        _ => Embed::Document,
    };
    AttachmentView {
        title: attachment.name.clone(),
        size_label: format_size_kb(attachment.size),
        data_url: attachment.data.clone(),
        embed,
        download_name: safe_file_name(&attachment.name),
    }
}

const VIEWER_STYLE: &str = "body{margin:0;background:#f5f5f5;display:flex;\
flex-direction:column;align-items:center;padding:20px}\
img{max-width:100%;max-height:80vh;object-fit:contain}\
iframe{width:100%;height:80vh;border:none}";

impl AttachmentView {
    /// Standalone viewer page with the content inlined and a download link.
    pub fn to_html(&self) -> String {
        let title = escape_html(&self.title);
        let src = escape_html(&self.data_url);
        let body = match self.embed {
            Embed::Image => format!("<img src=\"{src}\" alt=\"{title}\">"),
            Embed::Document => format!("<iframe src=\"{src}\" title=\"{title}\"></iframe>"),
        };
        format!(
            "<html>\n<head>\n<title>{title}</title>\n\
             <style>{VIEWER_STYLE}</style>\n</head>\n<body>\n\
             <div class=\"header\">\n<h2>{title}</h2>\n<p>Size: {size}</p>\n</div>\n\
             {body}\n\
             <a class=\"download-btn\" href=\"{src}\" download=\"{download}\">Download</a>\n\
             </body>\n</html>\n",
            size = escape_html(&self.size_label),
            download = escape_html(&self.download_name),
        )
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}

/// Decodes the attachment into `dir` and returns the written path.
pub fn write_download(attachment: &Attachment, dir: &Path) -> Result<PathBuf, AttachmentError> {
    let (_, bytes) = decode_data_url(&attachment.data)?;
    let path = dir.join(safe_file_name(&attachment.name));
    let write_err = |source| AttachmentError::Write {
        path: path.clone(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;
    std::fs::write(&path, bytes).map_err(write_err)?;
    Ok(path)
}
