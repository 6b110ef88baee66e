//! The agent seam: one process-wide [`Agent`] answering questions over a
//! reloadable [`KnowledgeBase`].
//!
//! The agent is built once at startup by [`create_agent`] and shared as an
//! `Arc<dyn Agent>`. Tests substitute their own implementations.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::ollama::OllamaAgent;

/// Outcome of a knowledge load.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LoadReport {
    /// Files indexed by this load.
    pub files: usize,
    pub chunks: usize,
    /// Staged files that produced no text (unsupported, unreadable or empty),
    /// by file name.
    pub skipped: Vec<String>,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Rebuild the index from the staging directory. With `recreate` the
    /// existing index is replaced wholesale; without it, files already indexed
    /// are left alone.
    async fn load(&self, recreate: bool) -> Result<LoadReport>;
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, message: &str) -> Result<String>;

    fn knowledge(&self) -> Arc<dyn KnowledgeBase>;
}

/// Build the configured agent. `Ok(None)` when the provider is `disabled`.
pub fn create_agent(config: &Config, pool: &SqlitePool) -> Result<Option<Arc<dyn Agent>>> {
    if !config.agent.is_enabled() {
        return Ok(None);
    }
    match config.agent.provider.as_str() {
        "ollama" => {
            let agent = OllamaAgent::new(config, pool.clone())?;
            Ok(Some(Arc::new(agent)))
        }
        other => anyhow::bail!("Unknown agent provider: {}", other),
    }
}
