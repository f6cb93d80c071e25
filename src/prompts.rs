//! Prompt templates for the two model calls of the report pipeline.
//!
//! Templates are read once at startup and shared read-only. Files in the
//! configured prompt directory override the copies compiled into the binary.

use std::path::Path;

/// Instruction sent with the report pages on the extraction call.
pub const EXTRACTION_USER_INSTRUCTION: &str = "This is a medical report. Extract the single JSON object exactly as required by the system prompt. Return only JSON.";

const EMBEDDED_EXTRACTION: &str = include_str!("../prompts/extraction.txt");
const EMBEDDED_SUMMARIZATION: &str = include_str!("../prompts/summarization.txt");

const EXTRACTION_FILE: &str = "extraction.txt";
const SUMMARIZATION_FILE: &str = "summarization.txt";

/// System prompts for extraction and for the overall-finding summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub extraction: String,
    pub summarization: String,
}

impl PromptTemplates {
    /// Templates compiled into the binary.
    pub fn embedded() -> Self {
        Self {
            extraction: EMBEDDED_EXTRACTION.to_string(),
            summarization: EMBEDDED_SUMMARIZATION.to_string(),
        }
    }

    /// Load templates from `dir`, falling back per file to the embedded copy.
    pub fn load(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::embedded();
        };
        Self {
            extraction: read_or(dir, EXTRACTION_FILE, EMBEDDED_EXTRACTION),
            summarization: read_or(dir, SUMMARIZATION_FILE, EMBEDDED_SUMMARIZATION),
        }
    }

    /// User message for the summary call, embedding the report verbatim.
    pub fn summarization_request(report_json: &str) -> String {
        format!("Here is the JSON report:\n{report_json}\n\nAdd overall_finding as per instructions.")
    }
}

fn read_or(dir: &Path, file: &str, fallback: &str) -> String {
    let path = dir.join(file);
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => {
            tracing::info!(path = %path.display(), "Loaded prompt template");
            text
        }
        Ok(_) => {
            tracing::warn!(path = %path.display(), "Prompt template is empty, using embedded copy");
            fallback.to_string()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Prompt template unreadable, using embedded copy");
            fallback.to_string()
        }
    }
}
