use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_company_name() -> String {
    "Hireflow".to_string()
}

fn default_timezone() -> String {
    "America/Mexico_City".to_string()
}

fn default_max_history() -> usize {
    20
}

fn default_history_ttl_hours() -> i64 {
    24
}

fn default_lock_ttl_secs() -> i64 {
    30
}

fn default_lock_poll_ms() -> u64 {
    250
}

fn default_lock_max_attempts() -> u32 {
    20
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_fallback_message() -> String {
    "Sorry, something went wrong on our side. Please try again in a moment."
        .to_string()
}

fn default_interview_duration_minutes() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of the webhook endpoint, as Twilio sees it. Signature
    /// verification needs both this URL and the Twilio auth token; requests
    /// are accepted unverified while either is missing.
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_url: String::new(),
        }
    }
}

fn default_database_path() -> String {
    "data/hireflow.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyConfig {
    #[serde(default = "default_company_name")]
    pub name: String,
    /// IANA timezone used when a scheduling action carries no timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for CompanyConfig {
    fn default() -> Self {
        Self {
            name: default_company_name(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// "openai" or "anthropic"; resolved once at startup.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_history_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            ttl_hours: default_history_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: i64,
    #[serde(default = "default_lock_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_lock_max_attempts")]
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
            poll_ms: default_lock_poll_ms(),
            max_attempts: default_lock_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    /// WhatsApp-enabled sender, e.g. "whatsapp:+14155238886".
    #[serde(default)]
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalendarConfig {
    #[serde(default)]
    pub calendar_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmailConfig {
    #[serde(default)]
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
    #[serde(default = "default_interview_duration_minutes")]
    pub interview_duration_minutes: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fallback_message: default_fallback_message(),
            interview_duration_minutes: default_interview_duration_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub company: CompanyConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Secrets are never stored in the config file; they come from the process
/// environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub twilio_auth_token: String,
    pub calendar_access_token: String,
    pub email_api_key: String,
}

impl Secrets {
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).unwrap_or_default();
        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            twilio_auth_token: get("TWILIO_AUTH_TOKEN"),
            calendar_access_token: get("GOOGLE_CALENDAR_TOKEN"),
            email_api_key: get("EMAIL_API_KEY"),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found, using default configuration.", path.display());
            return Ok(Config::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }
}
