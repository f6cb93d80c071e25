//! One report job: extract → clean → enrich → publish partial → summarize → publish final.
//!
//! Every failure ends in a published error event. Nothing is returned to the
//! uploader, who already holds an acknowledgement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::Instrument;

use super::completion::{ChatMessage, ChatPayload, CompletionClient};
use super::extraction::{ExtractionClient, ExtractionMode, ReportFile};
use super::publish::{topic_for, ErrorEvent, PublishPort};
use super::sanitize::strip_code_fences;
use super::PipelineError;
use crate::lab_status::enrich_report;
use crate::prompts::{PromptTemplates, EXTRACTION_USER_INSTRUCTION};

pub const EXTRACTION_MAX_TOKENS: u32 = 8000;
pub const SUMMARY_MAX_TOKENS: u32 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extracting,
    PartialPublished,
    Summarizing,
    FinalPublished,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    pub extraction_max_tokens: u32,
    pub summary_max_tokens: u32,
    pub job_timeout: Duration,
}

impl PipelineSettings {
    pub fn new(model: impl Into<String>, job_timeout: Duration) -> Self {
        Self {
            model: model.into(),
            extraction_max_tokens: EXTRACTION_MAX_TOKENS,
            summary_max_tokens: SUMMARY_MAX_TOKENS,
            job_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportJob {
    pub user_id: String,
    pub file: ReportFile,
}

/// Where a job ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub user_id: String,
    pub stage: PipelineStage,
    /// The final event is the enriched report because the summary call failed.
    pub summary_fallback: bool,
    pub error_code: Option<&'static str>,
}

struct Progress {
    stage: PipelineStage,
    summary_fallback: bool,
}

pub struct ReportPipeline {
    extractor: Arc<dyn ExtractionClient>,
    completion: Arc<dyn CompletionClient>,
    publisher: Arc<dyn PublishPort>,
    prompts: Arc<PromptTemplates>,
    settings: PipelineSettings,
}

impl ReportPipeline {
    pub fn new(
        extractor: Arc<dyn ExtractionClient>,
        completion: Arc<dyn CompletionClient>,
        publisher: Arc<dyn PublishPort>,
        prompts: Arc<PromptTemplates>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor,
            completion,
            publisher,
            prompts,
            settings,
        }
    }

    /// Run one job to completion, a deadline, or shutdown.
    ///
    /// Never fails: errors are published on the user's channel.
    pub async fn process(&self, job: ReportJob, shutdown: watch::Receiver<bool>) -> JobOutcome {
        let span = tracing::info_span!("report_job", user_id = %job.user_id);
        self.process_inner(job, shutdown).instrument(span).await
    }

    async fn process_inner(&self, job: ReportJob, mut shutdown: watch::Receiver<bool>) -> JobOutcome {
        let topic = topic_for(&job.user_id);
        let started = Instant::now();
        let mut progress = Progress {
            stage: PipelineStage::Extracting,
            summary_fallback: false,
        };

        let result = tokio::select! {
            result = self.run_stages(&job.file, &topic, &mut progress) => result,
            _ = tokio::time::sleep(self.settings.job_timeout) => {
                Err(PipelineError::DeadlineExceeded(self.settings.job_timeout))
            }
            _ = wait_for_shutdown(&mut shutdown) => Err(PipelineError::Cancelled),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let error_code = match result {
            Ok(()) => {
                tracing::info!(elapsed_ms, fallback = progress.summary_fallback, "Report job finished");
                None
            }
            Err(e) => {
                tracing::warn!(
                    stage = ?progress.stage,
                    code = e.code().as_str(),
                    error = %e,
                    elapsed_ms,
                    "Report job failed"
                );
                progress.stage = PipelineStage::Failed;
                self.publish_error(&topic, &e);
                Some(e.code().as_str())
            }
        };

        JobOutcome {
            user_id: job.user_id,
            stage: progress.stage,
            summary_fallback: progress.summary_fallback,
            error_code,
        }
    }

    async fn run_stages(&self, file: &ReportFile, topic: &str, progress: &mut Progress) -> Result<(), PipelineError> {
        progress.stage = PipelineStage::Extracting;
        tracing::debug!(mode = ?ExtractionMode::for_file(file), size = file.bytes.len(), "Extracting report");
        let raw = self
            .extractor
            .extract_text(
                file,
                &self.prompts.extraction,
                EXTRACTION_USER_INSTRUCTION,
                self.settings.extraction_max_tokens,
            )
            .await?;

        let cleaned = strip_code_fences(&raw);
        if cleaned.is_empty() {
            return Err(PipelineError::ExtractionEmpty);
        }

        let enriched = enrich_report(&cleaned);
        let partial = if enriched.trim().is_empty() { cleaned } else { enriched };
        self.publish(topic, &partial, "partial");
        progress.stage = PipelineStage::PartialPublished;

        progress.stage = PipelineStage::Summarizing;
        let summarized = self
            .summarize(&partial)
            .await
            .map(|text| strip_code_fences(&text))
            .filter(|text| !text.is_empty());
        let final_report = match summarized {
            Some(text) => text,
            None => {
                progress.summary_fallback = true;
                partial
            }
        };

        self.publish(topic, &final_report, "final");
        progress.stage = PipelineStage::FinalPublished;
        Ok(())
    }

    /// Second model call adding `overall_finding`. `None` means fall back.
    async fn summarize(&self, report_json: &str) -> Option<String> {
        let payload = ChatPayload {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(self.prompts.summarization.as_str()),
                ChatMessage::user(PromptTemplates::summarization_request(report_json)),
            ],
            max_tokens: self.settings.summary_max_tokens,
        };

        match self.completion.complete(&payload).await {
            Ok(response) => match response.first_text() {
                Some(text) if !text.trim().is_empty() => Some(text.to_string()),
                _ => {
                    tracing::warn!("Summary call returned no text, publishing enriched report");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Summary call failed, publishing enriched report");
                None
            }
        }
    }

    fn publish(&self, topic: &str, payload: &str, kind: &'static str) {
        match self.publisher.publish(topic, payload) {
            Ok(()) => tracing::debug!(kind, bytes = payload.len(), "Published report event"),
            Err(e) => tracing::warn!(kind, error = %e, "Report event not delivered"),
        }
    }

    fn publish_error(&self, topic: &str, err: &PipelineError) {
        let event = ErrorEvent::new(err.code(), &err.to_string());
        if let Err(e) = self.publisher.publish(topic, &event.to_json()) {
            tracing::error!(error = %e, code = event.error, "Failed to publish error event");
        }
    }
}

/// Resolves once the shutdown flag is set. Pends forever if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
