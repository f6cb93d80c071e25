//! HTTP and WebSocket surface of the report service.
//!
//! Uploads are acknowledged immediately; results are pushed to
//! `/medicalReportTopic/<userId>` and delivered to WebSocket subscribers.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod topics;
pub mod types;
pub mod websocket;

pub use router::report_api_router;
pub use server::{start_report_server, ReportServer, ServerSession};
pub use topics::TopicHub;
pub use types::{ApiContext, HttpSettings};
