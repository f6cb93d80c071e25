pub mod api;
pub mod app;
pub mod config;
pub mod lab_status; // Reference-range classification
pub mod pipeline; // Extraction → enrichment → summary
pub mod prompts;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
