//! Accepts uploads and runs each report job on its own task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::extraction::ReportFile;
use super::orchestrator::{JobOutcome, ReportJob, ReportPipeline};

pub const ACK_MESSAGE: &str = "Processing completed";

/// Immediate reply to an upload, naming the channel suffix to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub message: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

pub struct SubmittedJob {
    pub ack: Acknowledgement,
    pub handle: JoinHandle<JobOutcome>,
}

pub struct ReportDispatcher {
    pipeline: Arc<ReportPipeline>,
    permits: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
}

impl ReportDispatcher {
    pub fn new(pipeline: Arc<ReportPipeline>, max_concurrent_jobs: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the job and return at once. Must be called inside a tokio runtime.
    pub fn submit(&self, file: ReportFile, user_id: Option<String>) -> SubmittedJob {
        let user_id = resolve_user_id(user_id);
        let job = ReportJob {
            user_id: user_id.clone(),
            file,
        };

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let shutdown = self.shutdown.subscribe();
        let guard = ActiveJob::enter(&self.active);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Job semaphore closed, running without a permit");
                    None
                }
            };
            pipeline.process(job, shutdown).await
        });

        tracing::info!(user_id = %user_id, active = self.active_jobs(), "Report job submitted");

        SubmittedJob {
            ack: Acknowledgement {
                message: ACK_MESSAGE.to_string(),
                user_id,
            },
            handle,
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal every running and queued job to stop.
    pub fn shutdown(&self) {
        tracing::info!(active = self.active_jobs(), "Cancelling report jobs");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Trimmed caller id, or a fresh UUID when absent or blank.
pub fn resolve_user_id(user_id: Option<String>) -> String {
    user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Counts a job as active until dropped.
struct ActiveJob(Arc<AtomicUsize>);

impl ActiveJob {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::pipeline::completion::MockCompletionClient;
    use crate::pipeline::extraction::MockExtractionClient;
    use crate::pipeline::orchestrator::{PipelineSettings, PipelineStage};
    use crate::pipeline::publish::RecordingPublisher;
    use crate::prompts::PromptTemplates;

    const REPORT: &str = r#"{"test_summary":{"TSH":["2.1","mIU/L","0.4-4.0"]}}"#;

    fn dispatcher(
        extractor: MockExtractionClient,
        summaries: &[&str],
        max_jobs: usize,
    ) -> (ReportDispatcher, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::new());
        let pipeline = ReportPipeline::new(
            Arc::new(extractor),
            Arc::new(MockCompletionClient::with_texts(summaries)),
            publisher.clone(),
            Arc::new(PromptTemplates::embedded()),
            PipelineSettings::new("gpt-4o-mini", Duration::from_secs(30)),
        );
        (ReportDispatcher::new(Arc::new(pipeline), max_jobs), publisher)
    }

    fn file() -> ReportFile {
        ReportFile::new(Some("tsh.png".into()), Some("image/png".into()), vec![1])
    }

    #[test]
    fn user_id_is_kept_or_generated() {
        assert_eq!(resolve_user_id(Some(" u1 ".into())), "u1");
        let generated = resolve_user_id(None);
        assert!(Uuid::parse_str(&generated).is_ok());
        let blank = resolve_user_id(Some("   ".into()));
        assert!(Uuid::parse_str(&blank).is_ok());
        assert_ne!(generated, blank);
    }

    #[test]
    fn acknowledgement_uses_camel_case_user_id() {
        let ack = Acknowledgement {
            message: ACK_MESSAGE.into(),
            user_id: "u1".into(),
        };
        assert_eq!(
            serde_json::to_string(&ack).unwrap(),
            r#"{"message":"Processing completed","userId":"u1"}"#
        );
    }

    #[tokio::test]
    async fn submit_acknowledges_before_job_runs() {
        let (dispatcher, publisher) = dispatcher(
            MockExtractionClient::with_text(REPORT).with_delay(Duration::from_millis(50)),
            &["{\"overall_finding\":\"Normal thyroid function.\"}"],
            2,
        );

        let submitted = dispatcher.submit(file(), Some("u1".into()));
        assert_eq!(
            submitted.ack,
            Acknowledgement {
                message: "Processing completed".into(),
                user_id: "u1".into()
            }
        );
        assert!(publisher.events().is_empty());
        assert_eq!(dispatcher.active_jobs(), 1);

        let outcome = submitted.handle.await.unwrap();
        assert_eq!(outcome.stage, PipelineStage::FinalPublished);
        assert_eq!(publisher.payloads_for("/medicalReportTopic/u1").len(), 2);
        assert_eq!(dispatcher.active_jobs(), 0);
    }

    #[tokio::test]
    async fn generated_id_names_the_channel() {
        let (dispatcher, publisher) = dispatcher(MockExtractionClient::with_text(""), &[], 1);
        let submitted = dispatcher.submit(file(), None);
        let user_id = submitted.ack.user_id.clone();
        submitted.handle.await.unwrap();
        assert_eq!(publisher.payloads_for(&format!("/medicalReportTopic/{user_id}")).len(), 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_and_running_jobs() {
        let (dispatcher, publisher) = dispatcher(
            MockExtractionClient::new(vec![Ok(REPORT.into()), Ok(REPORT.into())]).with_delay(Duration::from_secs(30)),
            &[],
            1,
        );
        let first = dispatcher.submit(file(), Some("a".into()));
        let second = dispatcher.submit(file(), Some("b".into()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        dispatcher.shutdown();
        assert!(dispatcher.is_shutting_down());

        assert_eq!(first.handle.await.unwrap().error_code, Some("processing_failed"));
        assert_eq!(second.handle.await.unwrap().error_code, Some("processing_failed"));
        for user in ["a", "b"] {
            let events = publisher.payloads_for(&format!("/medicalReportTopic/{user}"));
            assert_eq!(events.len(), 1);
            assert!(events[0].contains("Report processing was cancelled"));
        }
        assert_eq!(dispatcher.active_jobs(), 0);
    }
}
