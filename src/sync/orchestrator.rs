//! Synchronization orchestrator: one feed's fetch→parse→resolve→persist
//! cycle, end to end.
//!
//! Failures are scoped to the feed being processed: every path out of
//! [`sync_feed`] is a [`SyncOutcome`], never a panic or an error that could
//! abort the sweep. Side effects that used to hide in save hooks are explicit
//! [`ChangeEvent`] values on the outcome.

use std::time::Duration;

use crate::config::Config;
use crate::feed::fetch::{FetchClient, FetchOutcome};
use crate::feed::parser::parse_feed;
use crate::storage::{Database, Feed, StorageError};
use crate::sync::resolver;

/// Per-feed sync tuning, lifted out of [`Config`] so tests can set it
/// directly.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Consecutive failures before the feed is auto-disabled
    pub failure_threshold: i64,
    /// Wall-clock budget for the whole cycle (fetch, parse, persist)
    pub budget: Duration,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            budget: config.sync_budget(),
        }
    }
}

/// Change notifications for collaborators (reading-list materialization,
/// status display). Returned, not fired from storage hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ArticleCreated { article_id: i64 },
    ArticleUpdated { article_id: i64 },
    FeedDisabled { feed_id: i64, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// Fetch, parse, and plan application all succeeded
    Applied {
        new: usize,
        updated: usize,
        unchanged: usize,
    },
    /// Upstream answered 304; only `last_checked` moved
    NotModified,
    /// Fetch or parse failed (or the budget elapsed); failure was recorded
    Failed { failures: i64, disabled: bool },
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub feed_id: i64,
    pub status: SyncStatus,
    pub events: Vec<ChangeEvent>,
}

/// Synchronize one feed.
///
/// The entire cycle runs under `opts.budget`; hitting the budget is recorded
/// as a fetch-class failure like any other, so a wedged upstream counts
/// toward auto-disable instead of stalling the sweep.
pub async fn sync_feed(
    db: &Database,
    client: &FetchClient,
    feed: &Feed,
    opts: &SyncOptions,
    now: i64,
) -> SyncOutcome {
    match tokio::time::timeout(opts.budget, sync_cycle(db, client, feed, opts, now)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(feed_id = feed.id, url = %feed.url, "Sync budget exceeded");
            let detail = serde_json::json!({
                "url": feed.url,
                "kind": "budget_exceeded",
                "budget_secs": opts.budget.as_secs(),
            });
            record_failure_outcome(db, feed, "Sync budget exceeded", Some(detail), opts, now).await
        }
    }
}

async fn sync_cycle(
    db: &Database,
    client: &FetchClient,
    feed: &Feed,
    opts: &SyncOptions,
    now: i64,
) -> SyncOutcome {
    let (body, validators) = match client.fetch(&feed.url, &feed.validators()).await {
        Ok(FetchOutcome::NotModified) => {
            tracing::debug!(feed_id = feed.id, url = %feed.url, "Feed not modified");
            return match db.touch_feed(feed.id, now).await {
                Ok(()) => SyncOutcome {
                    feed_id: feed.id,
                    status: SyncStatus::NotModified,
                    events: Vec::new(),
                },
                Err(e) => storage_failure(feed, e),
            };
        }
        Ok(FetchOutcome::Fetched { body, validators }) => (body, validators),
        Err(e) => {
            tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Fetch failed");
            let detail = e.detail(&feed.url);
            return record_failure_outcome(db, feed, &e.to_string(), Some(detail), opts, now)
                .await;
        }
    };

    let parsed = match parse_feed(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            // Parse failures count toward auto-disable exactly like fetch
            // failures; they are never retried within the same run.
            tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Parse failed");
            let detail = serde_json::json!({ "url": feed.url, "kind": "parse", "error": e.to_string() });
            return record_failure_outcome(db, feed, &e.to_string(), Some(detail), opts, now)
                .await;
        }
    };

    let snapshots = async {
        let links = db.existing_links(feed.id).await?;
        let tombstones = db.tombstones_for_feed(feed.id).await?;
        let index = db.article_index().await?;
        Ok::<_, StorageError>((links, tombstones, index))
    };
    let (links, tombstones, index) = match snapshots.await {
        Ok(snapshots) => snapshots,
        Err(e) => return storage_failure(feed, e),
    };

    let plan = resolver::resolve(parsed.entries, &links, &tombstones, &index);

    let report = match db
        .apply_plan(
            feed.id,
            &plan,
            parsed.title.as_deref(),
            parsed.site_url.as_deref(),
            &validators,
            now,
        )
        .await
    {
        Ok(report) => report,
        Err(e) => return storage_failure(feed, e),
    };

    let mut events: Vec<ChangeEvent> = Vec::new();
    events.extend(
        report
            .created
            .iter()
            .map(|&article_id| ChangeEvent::ArticleCreated { article_id }),
    );
    events.extend(
        report
            .updated
            .iter()
            .map(|&article_id| ChangeEvent::ArticleUpdated { article_id }),
    );

    tracing::info!(
        feed_id = feed.id,
        url = %feed.url,
        new = report.created.len(),
        updated = report.updated.len(),
        unchanged = report.unchanged,
        tombstoned = report.tombstoned,
        dropped = plan.dropped.len(),
        "Feed synchronized"
    );

    SyncOutcome {
        feed_id: feed.id,
        status: SyncStatus::Applied {
            new: report.created.len(),
            updated: report.updated.len(),
            unchanged: report.unchanged,
        },
        events,
    }
}

async fn record_failure_outcome(
    db: &Database,
    feed: &Feed,
    message: &str,
    detail: Option<serde_json::Value>,
    opts: &SyncOptions,
    now: i64,
) -> SyncOutcome {
    let detail = detail.map(|d| d.to_string());
    match db
        .record_failure(
            feed.id,
            message,
            detail.as_deref(),
            opts.failure_threshold,
            now,
        )
        .await
    {
        Ok((failures, disabled)) => {
            let mut events = Vec::new();
            if disabled {
                let reason = format!("Disabled after {failures} consecutive failures: {message}");
                tracing::warn!(feed_id = feed.id, url = %feed.url, failures, "Feed auto-disabled");
                events.push(ChangeEvent::FeedDisabled {
                    feed_id: feed.id,
                    reason,
                });
            }
            SyncOutcome {
                feed_id: feed.id,
                status: SyncStatus::Failed { failures, disabled },
                events,
            }
        }
        Err(e) => storage_failure(feed, e),
    }
}

/// A storage error while syncing: log it and report the feed as failed
/// without touching the failure counter (the counter tracks the upstream
/// source, not our own database).
fn storage_failure(feed: &Feed, error: StorageError) -> SyncOutcome {
    tracing::error!(feed_id = feed.id, url = %feed.url, error = %error, "Storage error during sync");
    SyncOutcome {
        feed_id: feed.id,
        status: SyncStatus::Failed {
            failures: feed.consecutive_failures,
            disabled: false,
        },
        events: Vec::new(),
    }
}
