//! Agent and embedder backed by an Ollama server.
//!
//! Endpoints used:
//! - `POST {base_url}/api/embed` with `{model, input: [..]}` → `{embeddings: [[..]]}`
//! - `POST {base_url}/api/chat` with `{model, messages, stream: false}` → `{message: {content}}`

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::agent::{Agent, KnowledgeBase};
use crate::config::{AgentConfig, Config};
use crate::embedding::{embed_query, post_json_with_retry, Embedder};
use crate::index::{LocalKnowledge, Passage};

fn http_client(config: &AgentConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: endpoint(&config.base_url, "api/embed"),
            model: config.embedding_model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": texts });
        let reply = post_json_with_retry(&self.client, &self.url, &body, self.max_retries).await?;
        parse_embeddings(&reply)
    }
}

fn parse_embeddings(reply: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let rows = reply
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid embed response: missing embeddings array"))?;

    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| anyhow!("Invalid embed response: embedding is not an array"))
        })
        .collect()
}

/// Retrieval-augmented chat agent.
pub struct OllamaAgent {
    name: String,
    model: String,
    instructions: Vec<String>,
    top_k: usize,
    max_retries: u32,
    chat_url: String,
    client: reqwest::Client,
    embedder: Arc<OllamaEmbedder>,
    knowledge: Arc<LocalKnowledge>,
}

impl OllamaAgent {
    pub fn new(config: &Config, pool: SqlitePool) -> Result<Self> {
        let agent = &config.agent;
        let embedder = Arc::new(OllamaEmbedder::new(agent)?);
        let knowledge = Arc::new(LocalKnowledge::new(
            &config.knowledge,
            agent.batch_size,
            pool,
            embedder.clone(),
        )?);

        Ok(Self {
            name: agent.name.clone(),
            model: agent.model.clone(),
            instructions: agent.instructions.clone(),
            top_k: agent.top_k,
            max_retries: agent.max_retries,
            chat_url: endpoint(&agent.base_url, "api/chat"),
            client: http_client(agent)?,
            embedder,
            knowledge,
        })
    }
}

#[async_trait]
impl Agent for OllamaAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, message: &str) -> Result<String> {
        let query = embed_query(self.embedder.as_ref(), message).await?;
        let passages = self.knowledge.search(&query, self.top_k).await?;
        debug!(passages = passages.len(), "retrieved context");

        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system_prompt(&self.instructions, Utc::now(), &passages) },
                { "role": "user", "content": message },
            ],
        });
        let reply =
            post_json_with_retry(&self.client, &self.chat_url, &body, self.max_retries).await?;

        reply
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| anyhow!("Invalid chat response: missing message.content"))
    }

    fn knowledge(&self) -> Arc<dyn KnowledgeBase> {
        self.knowledge.clone()
    }
}

fn system_prompt(instructions: &[String], now: DateTime<Utc>, passages: &[Passage]) -> String {
    let mut prompt = String::new();
    for line in instructions {
        prompt.push_str("- ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nCurrent date and time (UTC): {}\n",
        now.format("%Y-%m-%d %H:%M:%S")
    ));

    if passages.is_empty() {
        prompt.push_str("\nNo knowledge passages matched this question.\n");
    } else {
        prompt.push_str("\nKnowledge passages:\n");
        for (i, p) in passages.iter().enumerate() {
            prompt.push_str(&format!("\n[{}] ({})\n{}\n", i + 1, p.filename, p.text));
        }
    }
    prompt
}
