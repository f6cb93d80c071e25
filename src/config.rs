use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "medreport";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every per-user publish channel: `<prefix>/<userId>`.
pub const TOPIC_PREFIX: &str = "/medicalReportTopic";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;
const DEFAULT_PDF_RENDER_DPI: u32 = 72;
const DEFAULT_MAX_PDF_PAGES: usize = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> String {
    format!("info,{APP_NAME}=debug")
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub bind_addr: SocketAddr,
    /// Directory holding `extraction.txt` / `summarization.txt` overrides.
    pub prompt_dir: Option<PathBuf>,
    pub http_timeout: Duration,
    pub job_timeout: Duration,
    pub max_concurrent_jobs: usize,
    pub pdf_render_dpi: u32,
    pub max_pdf_pages: usize,
    pub max_upload_bytes: usize,
    pub allowed_origins: Vec<String>,
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openai_api_key = get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let bind_raw = get("MEDREPORT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "MEDREPORT_BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let allowed_origins = get("MEDREPORT_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let dpi: u32 = parse_or(&get, "MEDREPORT_PDF_RENDER_DPI", DEFAULT_PDF_RENDER_DPI)?;
        let max_jobs: usize = parse_or(&get, "MEDREPORT_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)?;
        if dpi == 0 {
            return Err(ConfigError::Invalid {
                key: "MEDREPORT_PDF_RENDER_DPI",
                value: dpi.to_string(),
            });
        }
        if max_jobs == 0 {
            return Err(ConfigError::Invalid {
                key: "MEDREPORT_MAX_CONCURRENT_JOBS",
                value: max_jobs.to_string(),
            });
        }

        Ok(Self {
            openai_api_key,
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: get("OPENAI_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            bind_addr,
            prompt_dir: get("MEDREPORT_PROMPT_DIR").map(PathBuf::from),
            http_timeout: Duration::from_secs(parse_or(
                &get,
                "MEDREPORT_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            job_timeout: Duration::from_secs(parse_or(
                &get,
                "MEDREPORT_JOB_TIMEOUT_SECS",
                DEFAULT_JOB_TIMEOUT_SECS,
            )?),
            max_concurrent_jobs: max_jobs,
            pdf_render_dpi: dpi,
            max_pdf_pages: parse_or(&get, "MEDREPORT_MAX_PDF_PAGES", DEFAULT_MAX_PDF_PAGES)?,
            max_upload_bytes: parse_or(&get, "MEDREPORT_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            allowed_origins,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = ServiceConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.openai_api_key, "sk-test");
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.pdf_render_dpi, 72);
        assert_eq!(config.max_pdf_pages, 10);
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000".to_string()]);
        assert!(config.prompt_dir.is_none());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = ServiceConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = ServiceConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));
    }

    #[test]
    fn overrides_are_read() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_CHAT_MODEL", "gpt-4o"),
            ("MEDREPORT_BIND_ADDR", "127.0.0.1:9000"),
            ("MEDREPORT_JOB_TIMEOUT_SECS", "60"),
            ("MEDREPORT_PROMPT_DIR", "/etc/medreport/prompts"),
            ("MEDREPORT_ALLOWED_ORIGINS", "http://a.test, https://b.test ,"),
        ]))
        .unwrap();
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.job_timeout, Duration::from_secs(60));
        assert_eq!(config.prompt_dir, Some(PathBuf::from("/etc/medreport/prompts")));
        assert_eq!(config.allowed_origins, vec!["http://a.test", "https://b.test"]);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MEDREPORT_HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "MEDREPORT_HTTP_TIMEOUT_SECS",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MEDREPORT_MAX_CONCURRENT_JOBS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MEDREPORT_MAX_CONCURRENT_JOBS", .. }));
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MEDREPORT_BIND_ADDR", "localhost"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MEDREPORT_BIND_ADDR", .. }));
    }

    #[test]
    fn default_log_filter_mentions_crate() {
        assert!(default_log_filter().contains("medreport=debug"));
    }
}
