//! Report processing pipeline: extraction, enrichment, summary and publish.

pub mod completion;
pub mod dispatch;
pub mod extraction;
pub mod orchestrator;
pub mod pdfium;
pub mod publish;
pub mod retry;
pub mod sanitize;

use std::time::Duration;

use thiserror::Error;

/// Failure of a chat-completion call.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion API returned retryable status {status}: {body}")]
    Transient { status: u16, body: String },

    #[error("Completion API returned status {status}: {body}")]
    Permanent { status: u16, body: String },

    #[error("Completion transport failure: {0}")]
    Transport(String),

    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// Classify a non-success HTTP status. 429 and 5xx are transient.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || (500..600).contains(&status) {
            Self::Transient { status, body }
        } else {
            Self::Permanent { status, body }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("PDF has no pages")]
    NoPages,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl ExtractionError {
    /// Whether this failure is file or transport I/O rather than model output.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::PdfRendering { .. }
                | Self::PdfEncrypted
                | Self::NoPages
                | Self::EmptyFile
                | Self::Completion(CompletionError::Transport(_))
        )
    }
}

/// Error code carried by a published error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    IoError,
    ProcessingFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IoError => "io_error",
            Self::ProcessingFailed => "processing_failed",
        }
    }
}

/// Terminal failure of one report job.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Extraction returned empty result")]
    ExtractionEmpty,

    #[error("{0}")]
    Io(ExtractionError),

    #[error("{0}")]
    Extraction(ExtractionError),

    #[error("Report processing timed out after {}s", .0.as_secs())]
    DeadlineExceeded(Duration),

    #[error("Report processing was cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::IoError,
            _ => ErrorCode::ProcessingFailed,
        }
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        if err.is_io() {
            Self::Io(err)
        } else {
            Self::Extraction(err)
        }
    }
}
