use std::sync::Arc;

use crate::api::topics::TopicHub;
use crate::pipeline::dispatch::ReportDispatcher;

/// Shared state for every route.
#[derive(Clone)]
pub struct ApiContext {
    pub dispatcher: Arc<ReportDispatcher>,
    pub topics: Arc<TopicHub>,
}

impl ApiContext {
    pub fn new(dispatcher: Arc<ReportDispatcher>, topics: Arc<TopicHub>) -> Self {
        Self { dispatcher, topics }
    }
}

/// Transport limits applied by the router.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl HttpSettings {
    pub fn from_config(config: &crate::config::ServiceConfig) -> Self {
        Self {
            allowed_origins: config.allowed_origins.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}
