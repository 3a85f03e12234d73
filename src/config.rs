use std::path::PathBuf;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_STATE_DIR: &str = ".quiz_state";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub state_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub log_json: bool,
}

impl ClientConfig {
    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url,
            api_token: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            log_json: false,
        }
    }

    /// Reads `QUIZ_*` variables. Call `dotenvy::dotenv()` first to pick up a `.env`.
    pub fn from_env() -> Result<Self, url::ParseError> {
        let base_url = std::env::var("QUIZ_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(base_url.trim())?;
        let api_token = std::env::var("QUIZ_API_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let state_dir = std::env::var("QUIZ_STATE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let http_timeout_secs = std::env::var("QUIZ_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let log_json = std::env::var("QUIZ_LOG_JSON")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            base_url,
            api_token,
            state_dir,
            http_timeout_secs,
            log_json,
        })
    }
}
