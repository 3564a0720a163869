//! External interfaces the core consumes but does not implement: the chat
//! UI, the model download manager, and the LLM itself all live outside this
//! crate. This module fixes the seams they plug into.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::io::Read;
use tokio_util::sync::CancellationToken;

use crate::error::RagError;

/// Maps text to a fixed-dimension embedding vector. Implementations need not
/// normalize; [`crate::embedder::EmbedderFacade`] handles that.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

/// One message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// The chat model the router's assembled prompt is destined for. Not
/// implemented by this crate — this is purely the seam [`crate::router`]
/// targets.
pub trait LLMChat: Send + Sync {
    fn template(&self, messages: &[Message]) -> String;
    fn send(&self, prompt: &str, cancel: CancellationToken) -> BoxStream<'static, String>;
    fn eot_string(&self) -> &str;
}

/// A readable document source the caller supplies: a local file, a
/// content-provider URI, a remote fetch — the core never inspects permission
/// APIs directly, it only reads bytes.
pub trait DocumentSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn Read + Send>, RagError>;
    fn display_name(&self) -> &str;
    fn mime_hint(&self) -> &str;
    fn size_bytes(&self) -> u64;
}

/// The one concrete [`DocumentSource`] this crate ships: a local file path.
/// Android content-provider sources, remote fetches, etc. are the caller's
/// responsibility.
pub struct FileDocumentSource {
    path: std::path::PathBuf,
    display_name: String,
    mime_hint: String,
    size_bytes: u64,
}

impl FileDocumentSource {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self, RagError> {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let mime_hint = mime_from_extension(&path);
        Ok(Self {
            path,
            display_name,
            mime_hint,
            size_bytes,
        })
    }
}

impl DocumentSource for FileDocumentSource {
    fn open(&self) -> Result<Box<dyn Read + Send>, RagError> {
        Ok(Box::new(std::fs::File::open(&self.path)?))
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn mime_hint(&self) -> &str {
        &self.mime_hint
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

fn mime_from_extension(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "pdf" => crate::extract::MIME_PDF,
        "docx" => crate::extract::MIME_DOCX,
        "pptx" => crate::extract::MIME_PPTX,
        "xlsx" => crate::extract::MIME_XLSX,
        "md" | "markdown" => crate::extract::MIME_MD,
        "csv" => crate::extract::MIME_CSV,
        "json" => crate::extract::MIME_JSON,
        "xml" => crate::extract::MIME_XML,
        _ => crate::extract::MIME_TXT,
    }
    .to_string()
}

/// Test-only chat double so router tests can assert on windowing and prompt
/// templating without a real model attached.
#[cfg(any(test, feature = "test-support"))]
pub struct NullLLMChat;

#[cfg(any(test, feature = "test-support"))]
impl LLMChat for NullLLMChat {
    fn template(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn send(&self, _prompt: &str, _cancel: CancellationToken) -> BoxStream<'static, String> {
        Box::pin(futures::stream::empty())
    }

    fn eot_string(&self) -> &str {
        "<|eot|>"
    }
}
