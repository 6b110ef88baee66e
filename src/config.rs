//! TOML configuration with environment overrides.
//!
//! Every section is optional; a missing file yields the defaults below. After
//! parsing, a small set of environment variables (usually supplied through a
//! `.env` file) override the file so secrets do not need to live in TOML:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `SECRET_KEY` | `auth.secret_key` |
//! | `ACCESS_TOKEN_EXPIRE_MINUTES` | `auth.token_ttl_minutes` |
//! | `DATABASE_PATH` | `db.path` |
//! | `OLLAMA_BASE_URL` | `agent.base_url` |
//! | `LOG_LEVEL` | `logging.level` |
//! | `GENIE_BIND` | `server.bind` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Placeholder secret shipped in the defaults. The server warns when it is
/// still in use.
pub const DEFAULT_SECRET_KEY: &str = "your-secret-key-change-in-production";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/genie.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
    /// When false, `is_admin` in a registration request is ignored.
    #[serde(default)]
    pub open_admin_registration: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
            token_ttl_minutes: default_token_ttl_minutes(),
            open_admin_registration: false,
        }
    }
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}
/// Longest accepted token lifetime: one year.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

fn default_token_ttl_minutes() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Finished reload jobs kept for inspection.
    #[serde(default = "default_job_history")]
    pub job_history: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            include_globs: default_include_globs(),
            max_tokens: default_max_tokens(),
            job_history: default_job_history(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./tmp/uploads")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}
fn default_max_tokens() -> usize {
    700
}
fn default_job_history() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// `disabled` or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_instructions")]
    pub instructions: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            name: default_agent_name(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            instructions: default_instructions(),
            top_k: default_top_k(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl AgentConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_agent_name() -> String {
    "Financial Advisor".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "mistral".to_string()
}
fn default_embedding_model() -> String {
    "mxbai-embed-large".to_string()
}
fn default_instructions() -> Vec<String> {
    vec![
        "You are a sharp, data-driven financial analyst.".to_string(),
        "Search your knowledge before answering any questions.".to_string(),
        "Use only the knowledge provided to you; do not rely on outside sources.".to_string(),
        "Provide only the final, user-facing answer.".to_string(),
    ]
}
fn default_top_k() -> usize {
    5
}
fn default_batch_size() -> usize {
    32
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from `path` (if it exists), apply environment
/// overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = lookup("SECRET_KEY") {
        config.auth.secret_key = secret;
    }
    if let Some(ttl) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
        config.auth.token_ttl_minutes = ttl
            .trim()
            .parse()
            .with_context(|| format!("ACCESS_TOKEN_EXPIRE_MINUTES is not a number: {}", ttl))?;
    }
    if let Some(path) = lookup("DATABASE_PATH") {
        config.db.path = PathBuf::from(path);
    }
    if let Some(url) = lookup("OLLAMA_BASE_URL") {
        config.agent.base_url = url;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(bind) = lookup("GENIE_BIND") {
        config.server.bind = bind;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.auth.secret_key.trim().is_empty() {
        bail!("auth.secret_key must not be empty");
    }
    if config.auth.token_ttl_minutes <= 0 {
        bail!("auth.token_ttl_minutes must be > 0");
    }
    if config.auth.token_ttl_minutes > MAX_TOKEN_TTL_MINUTES {
        bail!(
            "auth.token_ttl_minutes must be <= {} (one year)",
            MAX_TOKEN_TTL_MINUTES
        );
    }
    if config.knowledge.max_tokens == 0 {
        bail!("knowledge.max_tokens must be > 0");
    }
    if config.agent.top_k == 0 {
        bail!("agent.top_k must be >= 1");
    }
    if config.agent.batch_size == 0 {
        bail!("agent.batch_size must be >= 1");
    }

    match config.agent.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown agent provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(())
}
