//! # Genie CLI (`genie`)
//!
//! ## Usage
//!
//! ```bash
//! genie --config ./config/genie.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `genie init` | Create the SQLite database and run schema migrations |
//! | `genie serve` | Migrate, then start the HTTP API |
//! | `genie reload` | Rebuild the knowledge index from the staging directory |
//! | `genie users create` | Create an account (use `--admin` to bootstrap an admin) |
//! | `genie users prune` | Delete every non-admin account and its history |
//!
//! A `.env` file in the working directory is loaded before the config file,
//! so `SECRET_KEY` and friends can live there.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use genie::agent::create_agent;
use genie::auth::hash_password;
use genie::config::{self, Config};
use genie::users::{self, validate_email, validate_username, NewUser};
use genie::{db, logging, migrate, server};

/// Genie: knowledge-backed question answering with user accounts.
#[derive(Parser)]
#[command(name = "genie", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/genie.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Rebuild the knowledge index synchronously and print a report.
    Reload {
        /// Only index files that are not indexed yet.
        #[arg(long)]
        keep_existing: bool,
    },

    /// Manage user accounts.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Create a user.
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Grant admin privileges.
        #[arg(long)]
        admin: bool,
    },

    /// Delete all non-admin users and their questions.
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level)?;

    match cli.command {
        Commands::Init => {
            migrate::init_database(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Reload { keep_existing } => {
            run_reload(&cfg, !keep_existing).await?;
        }
        Commands::Users { action } => match action {
            UsersAction::Create {
                username,
                email,
                password,
                admin,
            } => {
                create_user(&cfg, &username, &email, &password, admin).await?;
            }
            UsersAction::Prune => {
                prune_users(&cfg).await?;
            }
        },
    }

    Ok(())
}

async fn run_reload(cfg: &Config, recreate: bool) -> Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let Some(agent) = create_agent(cfg, &pool)? else {
        bail!("No agent configured: set [agent] provider in the config file");
    };

    let report = agent.knowledge().load(recreate).await?;
    println!(
        "Indexed {} file(s), {} chunk(s){}.",
        report.files,
        report.chunks,
        if recreate { "" } else { " (existing index kept)" }
    );
    for name in &report.skipped {
        println!("  skipped: {}", name);
    }

    pool.close().await;
    Ok(())
}

async fn create_user(
    cfg: &Config,
    username: &str,
    email: &str,
    password: &str,
    admin: bool,
) -> Result<()> {
    validate_username(username)?;
    validate_email(email)?;
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let hashed = hash_password(password)?;
    let user = users::create(
        &pool,
        NewUser {
            username,
            email,
            hashed_password: &hashed,
            is_admin: admin,
        },
    )
    .await?;

    println!(
        "Created {} '{}' (ID: {}).",
        if user.is_admin { "admin" } else { "user" },
        user.username,
        user.id
    );
    pool.close().await;
    Ok(())
}

async fn prune_users(cfg: &Config) -> Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let pruned = users::prune_non_admin(&pool).await?;
    if pruned.is_empty() {
        println!("No non-admin users found to delete.");
    } else {
        for user in &pruned {
            println!("Deleting user: {} (ID: {})", user.username, user.id);
        }
        println!("Successfully deleted {} non-admin users.", pruned.len());
    }

    pool.close().await;
    Ok(())
}
