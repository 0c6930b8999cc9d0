use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gleaner::config::Config;
use gleaner::feed::{verify_dialect_support, FetchClient};
use gleaner::ingest::{self, IngestOutcome, ManualEntry};
use gleaner::storage::{Database, StorageError};
use gleaner::sync::scheduler;
use gleaner::util::validate_url;

/// Get the config directory path (~/.config/gleaner/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("gleaner");
    Ok(config_dir)
}

/// Create the config directory if needed and restrict it to the owning user.
fn ensure_config_dir(config_dir: &PathBuf) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "gleaner", about = "Personal feed-reading service: scheduled RSS/Atom sync")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync scheduler
    Run {
        /// Seconds between sweeps (overrides config; 0 or less runs one
        /// sweep plus maintenance and exits)
        #[arg(long)]
        interval: Option<i64>,
    },
    /// Subscribe to a feed URL
    Add {
        url: String,
        /// Optional category label
        #[arg(long)]
        category: Option<String>,
        /// Per-feed refresh interval in seconds
        #[arg(long)]
        interval: Option<i64>,
    },
    /// List all feeds
    List,
    /// Re-enable a disabled feed
    Enable { feed_id: i64 },
    /// Disable a feed without removing it
    Disable { feed_id: i64 },
    /// Remove a feed, its links, and its tombstones
    Remove { feed_id: i64 },
    /// Delete an article, leaving tombstones so syncs never resurrect it
    DeleteArticle { article_id: i64 },
    /// Add an article by URL, outside any feed
    AddArticle {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Show recent fetch errors for a feed
    Errors {
        feed_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| config_dir.join("gleaner.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(e @ StorageError::InstanceLocked) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Run { interval } => {
            // Fail fast if the linked parser's dialect set drifted from what
            // we claim to support.
            verify_dialect_support().context("Feed dialect support check failed")?;

            let client = FetchClient::new(&config).context("Failed to build HTTP client")?;
            let interval = interval.unwrap_or(config.sync_interval_secs as i64);
            scheduler::run_loop(&db, &client, &config, interval).await;
        }
        Command::Add {
            url,
            category,
            interval,
        } => {
            validate_url(&url)?;
            let interval = interval.unwrap_or(config.default_feed_interval_secs);
            let feed_id = db.insert_feed(&url, category.as_deref(), interval).await?;
            println!("Added feed {feed_id}: {url}");
        }
        Command::List => {
            let feeds = db.list_feeds().await?;
            if feeds.is_empty() {
                println!("No feeds.");
            }
            for feed in feeds {
                let state = if feed.enabled { "enabled" } else { "disabled" };
                println!("{:>4}  [{}]  {}  <{}>", feed.id, state, feed.title, feed.url);
                if let Some(reason) = &feed.disabled_reason {
                    println!("      {reason}");
                }
            }
        }
        Command::Enable { feed_id } => {
            if db.enable_feed(feed_id).await? {
                println!("Feed {feed_id} enabled.");
            } else {
                eprintln!("No feed with id {feed_id}.");
                std::process::exit(1);
            }
        }
        Command::Disable { feed_id } => {
            if db.disable_feed(feed_id, Utc::now().timestamp()).await? {
                println!("Feed {feed_id} disabled.");
            } else {
                eprintln!("No feed with id {feed_id}.");
                std::process::exit(1);
            }
        }
        Command::Remove { feed_id } => {
            if db.remove_feed(feed_id).await? {
                println!("Feed {feed_id} removed.");
            } else {
                eprintln!("No feed with id {feed_id}.");
                std::process::exit(1);
            }
        }
        Command::DeleteArticle { article_id } => {
            if db.delete_article(article_id, Utc::now().timestamp()).await? {
                println!("Article {article_id} deleted.");
            } else {
                eprintln!("No article with id {article_id}.");
                std::process::exit(1);
            }
        }
        Command::AddArticle {
            url,
            title,
            summary,
        } => {
            validate_url(&url)?;
            let outcome = ingest::add_manual_article(
                &db,
                ManualEntry {
                    url,
                    title,
                    summary,
                },
                Utc::now().timestamp(),
            )
            .await?;
            match outcome {
                IngestOutcome::Created { article_id } => {
                    println!("Article {article_id} added.");
                }
                IngestOutcome::Reused { article_id } => {
                    println!("Already stored as article {article_id}.");
                }
            }
        }
        Command::Errors { feed_id, limit } => {
            let errors = db.list_fetch_errors(feed_id, limit).await?;
            if errors.is_empty() {
                println!("No recorded errors for feed {feed_id}.");
            }
            for error in errors {
                println!("{}  {}", error.created_at, error.message);
                if let Some(detail) = &error.detail {
                    println!("      {detail}");
                }
            }
        }
    }

    Ok(())
}
