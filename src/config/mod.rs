//! Configuration module for the outreach backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Chat-completion settings used for calling briefs
    pub llm: LlmConfig,
    /// Voice gateway settings used by call dispatch
    pub voice: VoiceConfig,
}

/// Chat-completion endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Voice gateway (AVR) settings.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub webhook_url: String,
    pub script_id: String,
    pub max_concurrent_calls: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            api_key: None,
            webhook_url: "http://localhost:8000/api/webhooks/call-events".to_string(),
            script_id: "scholarship_notification".to_string(),
            max_concurrent_calls: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("OUTREACH_API_PSK").ok();

        let db_path = env::var("OUTREACH_DB_PATH")
            .unwrap_or_else(|_| "./data/outreach.sqlite".to_string())
            .into();

        let index_path = env::var("OUTREACH_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = env::var("OUTREACH_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        let bind_addr = bind_addr
            .parse()
            .map_err(|e| format!("Invalid OUTREACH_BIND_ADDR '{}': {}", bind_addr, e))?;

        let log_level = env::var("OUTREACH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: env::var("OPENAI_BASE_URL").unwrap_or(llm_defaults.base_url),
            model: env::var("OUTREACH_LLM_MODEL").unwrap_or(llm_defaults.model),
            temperature: llm_defaults.temperature,
            max_tokens: llm_defaults.max_tokens,
            timeout: env::var("OUTREACH_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(llm_defaults.timeout),
        };

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            base_url: env::var("AVR_CORE_URL").unwrap_or(voice_defaults.base_url),
            api_key: env::var("AVR_API_KEY").ok(),
            webhook_url: env::var("OUTREACH_WEBHOOK_URL").unwrap_or(voice_defaults.webhook_url),
            script_id: voice_defaults.script_id,
            max_concurrent_calls: env::var("MAX_CONCURRENT_CALLS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(voice_defaults.max_concurrent_calls),
        };

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            llm,
            voice,
        })
    }
}
