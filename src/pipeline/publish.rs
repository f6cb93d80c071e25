//! Per-user publish channels and the events written to them.

use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

use super::ErrorCode;
use crate::config::TOPIC_PREFIX;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Publish channel unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget delivery of a JSON string to a named channel.
///
/// Publishing to a channel nobody listens on is not an error.
pub trait PublishPort: Send + Sync {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), PublishError>;
}

/// Channel name for a user: `<prefix>/<userId>`.
pub fn topic_for(user_id: &str) -> String {
    format!("{TOPIC_PREFIX}/{user_id}")
}

/// `{"error": "<code>", "message": "<text>"}` sent when a job fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub error: &'static str,
    pub message: String,
}

impl ErrorEvent {
    /// Double quotes in `message` become single quotes.
    pub fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            error: code.as_str(),
            message: message.replace('"', "'"),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}","message":""}}"#, self.error)
        })
    }
}

/// Publisher that keeps every `(channel, payload)` pair, for tests.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, String)>>,
    unavailable: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose every send fails.
    pub fn unavailable() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unavailable: true,
        }
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Payloads sent to `channel`, in order.
    pub fn payloads_for(&self, channel: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p)
            .collect()
    }
}

impl PublishPort for RecordingPublisher {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), PublishError> {
        if self.unavailable {
            return Err(PublishError::Unavailable("recording publisher disabled".into()));
        }
        self.events
            .lock()
            .map_err(|_| PublishError::Unavailable("recording publisher poisoned".into()))?
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_prefixed_user_id() {
        assert_eq!(topic_for("u1"), "/medicalReportTopic/u1");
    }

    #[test]
    fn error_event_serializes_in_field_order() {
        let event = ErrorEvent::new(ErrorCode::ProcessingFailed, "Extraction returned empty result");
        assert_eq!(
            event.to_json(),
            r#"{"error":"processing_failed","message":"Extraction returned empty result"}"#
        );
    }

    #[test]
    fn error_event_replaces_double_quotes() {
        let event = ErrorEvent::new(ErrorCode::IoError, r#"cannot read "report.pdf""#);
        assert_eq!(event.message, "cannot read 'report.pdf'");
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["error"], "io_error");
        assert_eq!(parsed["message"], "cannot read 'report.pdf'");
    }

    #[test]
    fn error_event_escapes_control_characters() {
        let event = ErrorEvent::new(ErrorCode::ProcessingFailed, "line one\nline \\ two");
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["message"], "line one\nline \\ two");
    }

    #[test]
    fn recording_publisher_keeps_order() {
        let publisher = RecordingPublisher::new();
        publisher.publish("a", "1").unwrap();
        publisher.publish("b", "2").unwrap();
        publisher.publish("a", "3").unwrap();
        assert_eq!(publisher.payloads_for("a"), vec!["1", "3"]);
        assert_eq!(publisher.events().len(), 3);
    }

    #[test]
    fn unavailable_publisher_fails() {
        assert!(RecordingPublisher::unavailable().publish("a", "1").is_err());
    }
}
