//! HTTP server lifecycle: bind, spawn the axum server, hand back a handle
//! with a shutdown channel.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::report_api_router;
use crate::api::types::{ApiContext, HttpSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSession {
    pub server_addr: String,
    pub port: u16,
    pub started_at: String,
}

/// Handle to a running server.
pub struct ReportServer {
    pub session: ServerSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReportServer {
    /// Stop accepting connections and let in-flight requests finish.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Server shutdown signal sent");
        }
    }

    /// Wait for the server task to exit.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Server task ended abnormally: {e}");
        }
    }
}

pub async fn start_report_server(
    ctx: ApiContext,
    addr: SocketAddr,
    settings: &HttpSettings,
) -> Result<ReportServer, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;

    let app = report_api_router(ctx, settings);
    let session = ServerSession {
        server_addr: addr.to_string(),
        port: addr.port(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("Server received shutdown signal");
        };

        tracing::info!(%addr, "Report server listening");

        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await {
            tracing::error!("Report server error: {e}");
        }

        tracing::info!("Report server stopped");
    });

    Ok(ReportServer {
        session,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use crate::api::topics::TopicHub;
    use crate::pipeline::completion::MockCompletionClient;
    use crate::pipeline::dispatch::ReportDispatcher;
    use crate::pipeline::extraction::{MockExtractionClient, ReportFile};
    use crate::pipeline::orchestrator::{PipelineSettings, ReportPipeline};
    use crate::pipeline::publish::PublishPort;
    use crate::prompts::PromptTemplates;

    const REPORT: &str = r#"```json
{"patient_name":"A. Patient","test_summary":{"WBC":["3.2 x10^3","/uL","4000-11000"],"HIV":["Negative","",""]}}
```"#;

    fn local() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn settings() -> HttpSettings {
        HttpSettings {
            allowed_origins: vec!["http://localhost:3000".into()],
            max_upload_bytes: 1024 * 1024,
        }
    }

    fn ctx(extracted: &str, summary: &str) -> ApiContext {
        let topics = Arc::new(TopicHub::new());
        let publisher: Arc<dyn PublishPort> = topics.clone();
        let pipeline = ReportPipeline::new(
            Arc::new(MockExtractionClient::with_text(extracted)),
            Arc::new(MockCompletionClient::with_texts(&[summary])),
            publisher,
            Arc::new(PromptTemplates::embedded()),
            PipelineSettings::new("gpt-4o-mini", Duration::from_secs(5)),
        );
        ApiContext::new(Arc::new(ReportDispatcher::new(Arc::new(pipeline), 2)), topics)
    }

    async fn wait_for_subscriber(topics: &TopicHub, topic: &str) {
        for _ in 0..100 {
            if topics.subscriber_count(topic) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no subscriber on {topic}");
    }

    async fn next_text<S>(stream: &mut S) -> String
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("message in time")
                .expect("stream open")
                .expect("valid frame");
            if let WsMessage::Text(text) = msg {
                return text.to_string();
            }
        }
    }

    #[tokio::test]
    async fn start_and_stop_server() {
        let mut server = start_report_server(ctx("{}", "{}"), local(), &settings())
            .await
            .expect("server should start");

        assert!(server.session.port > 0);
        assert!(!server.session.started_at.is_empty());

        let url = format!("http://127.0.0.1:{}/api/health", server.session.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert!(resp.status().is_success());

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.stopped())
            .await
            .expect("server stops");
    }

    #[tokio::test]
    async fn subscriber_receives_partial_then_final() {
        let ctx = ctx(
            REPORT,
            r#"{"patient_name":"A. Patient","overall_finding":"Low white cell count."}"#,
        );
        let topics = Arc::clone(&ctx.topics);
        let dispatcher = Arc::clone(&ctx.dispatcher);
        let mut server = start_report_server(ctx, local(), &settings()).await.unwrap();

        let ws_url = format!("ws://127.0.0.1:{}/ws?userId=u1", server.session.port);
        let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await.expect("ws connect");
        wait_for_subscriber(&topics, "/medicalReportTopic/u1").await;

        let submitted = dispatcher.submit(
            ReportFile::new(Some("cbc.png".into()), Some("image/png".into()), vec![1, 2, 3]),
            Some("u1".into()),
        );
        assert_eq!(submitted.ack.user_id, "u1");

        let partial: serde_json::Value = serde_json::from_str(&next_text(&mut socket).await).unwrap();
        assert_eq!(partial["test_summary"]["WBC"][3], "Low");
        assert_eq!(partial["test_summary"]["HIV"][3], "Normal");

        let final_report: serde_json::Value = serde_json::from_str(&next_text(&mut socket).await).unwrap();
        assert_eq!(final_report["overall_finding"], "Low white cell count.");

        drop(socket);
        server.shutdown();
    }

    #[tokio::test]
    async fn subscriber_receives_error_event() {
        let ctx = ctx("   ", "{}");
        let topics = Arc::clone(&ctx.topics);
        let dispatcher = Arc::clone(&ctx.dispatcher);
        let mut server = start_report_server(ctx, local(), &settings()).await.unwrap();

        let ws_url = format!("ws://127.0.0.1:{}/ws?userId=u2", server.session.port);
        let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
        wait_for_subscriber(&topics, "/medicalReportTopic/u2").await;

        dispatcher.submit(
            ReportFile::new(None, Some("image/png".into()), vec![1]),
            Some("u2".into()),
        );

        assert_eq!(
            next_text(&mut socket).await,
            r#"{"error":"processing_failed","message":"Extraction returned empty result"}"#
        );
        server.shutdown();
    }

    #[tokio::test]
    async fn closed_socket_releases_topic() {
        let ctx = ctx("{}", "{}");
        let topics = Arc::clone(&ctx.topics);
        let mut server = start_report_server(ctx, local(), &settings()).await.unwrap();

        let ws_url = format!("ws://127.0.0.1:{}/ws?userId=u3", server.session.port);
        let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
        wait_for_subscriber(&topics, "/medicalReportTopic/u3").await;

        socket.close(None).await.unwrap();
        for _ in 0..100 {
            if topics.topic_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(topics.topic_count(), 0);
        server.shutdown();
    }
}
