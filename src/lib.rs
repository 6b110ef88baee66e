//! # Genie
//!
//! A thin HTTP backend that authenticates users, keeps their question
//! history, and answers questions through a retrieval-augmented agent whose
//! knowledge base is rebuilt from admin-uploaded documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  upload   ┌───────────────┐  reload job  ┌──────────────┐
//! │  Admin   │──────────▶│  Ingestion    │─────────────▶│  Knowledge   │
//! │  routes  │           │  coordinator  │  (gated)     │  base (load) │
//! └──────────┘           └──────┬────────┘              └──────┬───────┘
//!                               │ status                       │ chunks
//!                               ▼                              ▼
//!                        ┌─────────────────────────────────────────┐
//!                        │                 SQLite                  │
//!                        └─────────────────────────────────────────┘
//!                               ▲                              ▲
//! ┌──────────┐  /api/ask ┌──────┴────────┐    run()     ┌───────┴──────┐
//! │  Users   │──────────▶│  Ask route    │─────────────▶│    Agent     │
//! └──────────┘           └───────────────┘              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | API error type and JSON error envelope |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`models`] | Core data types |
//! | [`auth`] | Password hashing, bearer tokens, request extractors |
//! | [`users`] / [`questions`] / [`settings`] | Store access |
//! | [`knowledge`] | Knowledge file tracking and the ingestion coordinator |
//! | [`jobs`] | Reload job registry |
//! | [`agent`] | `Agent` / `KnowledgeBase` traits and agent construction |
//! | [`ollama`] | Ollama-backed agent and embedder |
//! | [`index`] | Local chunk index over the staging directory |
//! | [`extract`] / [`chunk`] / [`embedding`] | Ingestion pipeline pieces |
//! | [`server`] / [`routes`] | HTTP server and handlers |

pub mod agent;
pub mod auth;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod jobs;
pub mod knowledge;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod ollama;
pub mod questions;
pub mod routes;
pub mod server;
pub mod settings;
pub mod users;
