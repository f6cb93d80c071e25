//! Text extraction from an uploaded report through a vision-capable model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::BoxFuture;

use super::completion::{ChatMessage, ChatPayload, CompletionClient, ContentPart};
use super::pdfium::PdfPageRenderer;
use super::ExtractionError;

/// Token ceiling for a single vision request.
pub const VISION_MAX_TOKENS: u32 = 2000;

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// An uploaded report held in memory.
#[derive(Debug, Clone)]
pub struct ReportFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ReportFile {
    pub fn new(file_name: Option<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Declared content type, or one guessed from the file extension.
    pub fn effective_content_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
            .map(str::to_string)
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|name| mime_guess::from_path(name).first())
                    .map(|mime| mime.essence_str().to_string())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// The file itself goes to the model as one image.
    SingleImage,
    /// The file is rendered page by page before the model call.
    RenderedPages,
}

impl ExtractionMode {
    /// `image/*` is sent as-is; PDFs and anything unknown are rendered.
    pub fn for_file(file: &ReportFile) -> Self {
        match file.effective_content_type() {
            Some(ct) if ct.to_ascii_lowercase().starts_with("image/") => Self::SingleImage,
            _ => Self::RenderedPages,
        }
    }
}

/// Turns a report file into raw model text, possibly wrapped in code fences.
pub trait ExtractionClient: Send + Sync {
    fn extract_text<'a>(
        &'a self,
        file: &'a ReportFile,
        system_prompt: &'a str,
        user_prompt: &'a str,
        max_tokens: u32,
    ) -> BoxFuture<'a, Result<String, ExtractionError>>;
}

/// Extraction over a chat-completion model with image input.
pub struct VisionExtractor {
    completion: Arc<dyn CompletionClient>,
    renderer: Arc<dyn PdfPageRenderer>,
    model: String,
    render_dpi: u32,
    max_pages: usize,
}

impl VisionExtractor {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        renderer: Arc<dyn PdfPageRenderer>,
        model: impl Into<String>,
        render_dpi: u32,
        max_pages: usize,
    ) -> Self {
        Self {
            completion,
            renderer,
            model: model.into(),
            render_dpi,
            max_pages: max_pages.max(1),
        }
    }

    async fn extract(
        &self,
        file: &ReportFile,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ExtractionError> {
        if file.bytes.is_empty() {
            return Err(ExtractionError::EmptyFile);
        }

        let mut parts = vec![ContentPart::text(user_prompt)];
        match ExtractionMode::for_file(file) {
            ExtractionMode::SingleImage => {
                let mime = file
                    .effective_content_type()
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                parts.push(ContentPart::image(data_url(&mime, &file.bytes)));
            }
            ExtractionMode::RenderedPages => {
                let pages = self.render_pages(file.bytes.clone()).await?;
                tracing::debug!(pages = pages.len(), "Report pages rendered");
                parts.extend(
                    pages
                        .iter()
                        .map(|png| ContentPart::image(data_url(DEFAULT_IMAGE_MIME, png))),
                );
            }
        }

        let mut messages = Vec::with_capacity(2);
        if !system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.push(ChatMessage::user_parts(parts));

        let payload = ChatPayload {
            model: self.model.clone(),
            messages,
            max_tokens: max_tokens.min(VISION_MAX_TOKENS),
        };
        let response = self.completion.complete(&payload).await?;
        Ok(response.first_text().unwrap_or_default().to_string())
    }

    async fn render_pages(&self, pdf_bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, ExtractionError> {
        let renderer = Arc::clone(&self.renderer);
        let dpi = self.render_dpi;
        let max_pages = self.max_pages;

        tokio::task::spawn_blocking(move || renderer.render_pages(&pdf_bytes, max_pages, dpi))
            .await
            .map_err(|e| ExtractionError::ImageProcessing(format!("Page render task failed: {e}")))?
    }
}

impl ExtractionClient for VisionExtractor {
    fn extract_text<'a>(
        &'a self,
        file: &'a ReportFile,
        system_prompt: &'a str,
        user_prompt: &'a str,
        max_tokens: u32,
    ) -> BoxFuture<'a, Result<String, ExtractionError>> {
        Box::pin(self.extract(file, system_prompt, user_prompt, max_tokens))
    }
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// One recorded `extract_text` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionCall {
    pub file_name: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// Scripted extraction client for tests.
pub struct MockExtractionClient {
    script: Mutex<VecDeque<Result<String, ExtractionError>>>,
    calls: Mutex<Vec<ExtractionCall>>,
    delay: Option<Duration>,
}

impl MockExtractionClient {
    pub fn new(script: Vec<Result<String, ExtractionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_text(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ExtractionCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ExtractionClient for MockExtractionClient {
    fn extract_text<'a>(
        &'a self,
        file: &'a ReportFile,
        system_prompt: &'a str,
        user_prompt: &'a str,
        max_tokens: u32,
    ) -> BoxFuture<'a, Result<String, ExtractionError>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ExtractionCall {
                file_name: file.file_name.clone(),
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
                max_tokens,
            });
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Ok(String::new()));
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            next
        })
    }
}
