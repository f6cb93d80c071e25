//! Service wiring: build the pipeline from configuration, serve HTTP, and
//! drain on Ctrl-C.

use std::sync::Arc;

use thiserror::Error;

use crate::api::{start_report_server, ApiContext, HttpSettings, TopicHub};
use crate::config::{ServiceConfig, APP_VERSION};
use crate::pipeline::completion::{CompletionClient, OpenAiClient};
use crate::pipeline::dispatch::ReportDispatcher;
use crate::pipeline::extraction::VisionExtractor;
use crate::pipeline::orchestrator::{PipelineSettings, ReportPipeline};
use crate::pipeline::pdfium::PdfiumRenderer;
use crate::pipeline::publish::PublishPort;
use crate::pipeline::retry::{RetryPolicy, RetryingCompletionClient};
use crate::pipeline::CompletionError;
use crate::prompts::PromptTemplates;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to build model client: {0}")]
    Completion(#[from] CompletionError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the HTTP layer needs, built from configuration.
pub fn build_context(config: &ServiceConfig) -> Result<ApiContext, AppError> {
    let prompts = Arc::new(PromptTemplates::load(config.prompt_dir.as_deref()));

    let openai = OpenAiClient::new(&config.openai_base_url, &config.openai_api_key, config.http_timeout)?;
    let completion: Arc<dyn CompletionClient> =
        Arc::new(RetryingCompletionClient::new(Arc::new(openai), RetryPolicy::default()));

    // PDFium is bound per render; a failed probe only disables PDF uploads.
    if let Err(e) = PdfiumRenderer::new() {
        tracing::warn!(error = %e, "PDFium unavailable, PDF reports will fail until it is installed");
    }

    let extractor = Arc::new(VisionExtractor::new(
        Arc::clone(&completion),
        Arc::new(PdfiumRenderer),
        config.chat_model.clone(),
        config.pdf_render_dpi,
        config.max_pdf_pages,
    ));

    let topics = Arc::new(TopicHub::new());
    let publisher: Arc<dyn PublishPort> = topics.clone();

    let pipeline = ReportPipeline::new(
        extractor,
        completion,
        publisher,
        prompts,
        PipelineSettings::new(config.chat_model.clone(), config.job_timeout),
    );
    let dispatcher = Arc::new(ReportDispatcher::new(Arc::new(pipeline), config.max_concurrent_jobs));

    Ok(ApiContext::new(dispatcher, topics))
}

/// Run until Ctrl-C, then stop intake, cancel jobs, and stop the server.
pub async fn run(config: ServiceConfig) -> Result<(), AppError> {
    tracing::info!(
        version = APP_VERSION,
        model = %config.chat_model,
        max_jobs = config.max_concurrent_jobs,
        "medreport starting"
    );

    let ctx = build_context(&config)?;
    let dispatcher = Arc::clone(&ctx.dispatcher);
    let mut server = start_report_server(ctx, config.bind_addr, &HttpSettings::from_config(&config)).await?;
    tracing::info!(addr = %server.session.server_addr, "Accepting reports");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
    }

    tracing::info!(active_jobs = dispatcher.active_jobs(), "Shutting down");
    dispatcher.shutdown();
    server.shutdown();
    server.stopped().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> ServiceConfig {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServiceConfig::from_lookup(move |key| map.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn context_builds_from_minimal_config() {
        let ctx = build_context(&config(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(ctx.dispatcher.active_jobs(), 0);
        assert!(!ctx.dispatcher.is_shutting_down());
        assert_eq!(ctx.topics.topic_count(), 0);
    }

    #[tokio::test]
    async fn context_builds_with_missing_prompt_dir() {
        let ctx = build_context(&config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MEDREPORT_PROMPT_DIR", "/nonexistent/medreport/prompts"),
        ]));
        assert!(ctx.is_ok());
    }
}
