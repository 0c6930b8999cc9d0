//! Sweep scheduler: periodically finds due feeds and syncs them with
//! bounded concurrency.
//!
//! One sweep never overlaps the next; if a sweep outruns the interval the
//! skipped ticks are dropped rather than queued.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::feed::fetch::FetchClient;
use crate::storage::Database;
use crate::sync::orchestrator::{self, ChangeEvent, SyncOptions, SyncStatus};

/// Tally of one sweep across all due feeds.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepSummary {
    pub feeds: usize,
    pub applied: usize,
    pub not_modified: usize,
    pub failed: usize,
    pub disabled: usize,
    pub new_articles: usize,
    pub updated_articles: usize,
}

/// Sync every feed that is due at `now`.
///
/// Feeds run through a bounded pipeline (`max_concurrent` at a time) on top
/// of the fetch client's own total-in-flight semaphore. A feed that fails or
/// exceeds its budget only affects its own row; the sweep always completes.
pub async fn sweep(
    db: &Database,
    client: &FetchClient,
    opts: &SyncOptions,
    max_concurrent: usize,
    now: i64,
) -> SweepSummary {
    let due = match db.due_feeds(now).await {
        Ok(due) => due,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load due feeds, skipping sweep");
            return SweepSummary::default();
        }
    };

    if due.is_empty() {
        tracing::debug!("No feeds due");
        return SweepSummary::default();
    }

    tracing::info!(due = due.len(), "Starting sweep");

    let outcomes: Vec<_> = stream::iter(due.iter())
        .map(|feed| orchestrator::sync_feed(db, client, feed, opts, now))
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let mut summary = SweepSummary {
        feeds: outcomes.len(),
        ..SweepSummary::default()
    };
    for outcome in outcomes {
        match outcome.status {
            SyncStatus::Applied { new, updated, .. } => {
                summary.applied += 1;
                summary.new_articles += new;
                summary.updated_articles += updated;
            }
            SyncStatus::NotModified => summary.not_modified += 1,
            SyncStatus::Failed { disabled, .. } => {
                summary.failed += 1;
                if disabled {
                    summary.disabled += 1;
                }
            }
        }
        for event in &outcome.events {
            if let ChangeEvent::FeedDisabled { feed_id, reason } = event {
                tracing::warn!(feed_id, reason = %reason, "Feed disabled during sweep");
            }
        }
    }

    tracing::info!(
        feeds = summary.feeds,
        applied = summary.applied,
        not_modified = summary.not_modified,
        failed = summary.failed,
        new_articles = summary.new_articles,
        updated_articles = summary.updated_articles,
        "Sweep complete"
    );
    summary
}

/// Post-sweep maintenance: collect unreferenced feed articles and prune
/// aged-out fetch error records.
pub async fn run_maintenance(db: &Database, error_retention_days: i64, now: i64) {
    match db.cleanup_orphan_articles().await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "Collected orphan articles"),
        Err(e) => tracing::error!(error = %e, "Orphan article cleanup failed"),
    }

    let cutoff = now - error_retention_days * 86_400;
    match db.prune_fetch_errors(cutoff).await {
        Ok(0) => {}
        Ok(pruned) => tracing::info!(pruned, "Pruned old fetch errors"),
        Err(e) => tracing::error!(error = %e, "Fetch error pruning failed"),
    }
}

/// Run the scheduler.
///
/// `interval_secs` of zero or below means one sweep plus maintenance and
/// return (the one-shot mode used for cron-style invocation). Otherwise the
/// loop runs until the process is stopped, with the first sweep fired
/// immediately.
pub async fn run_loop(db: &Database, client: &FetchClient, config: &Config, interval_secs: i64) {
    let opts = SyncOptions::from_config(config);

    if interval_secs <= 0 {
        let now = chrono::Utc::now().timestamp();
        sweep(db, client, &opts, config.max_concurrent_syncs, now).await;
        run_maintenance(db, config.error_retention_days, now).await;
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs as u64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(interval_secs, "Scheduler started");
    loop {
        ticker.tick().await;
        let now = chrono::Utc::now().timestamp();
        sweep(db, client, &opts, config.max_concurrent_syncs, now).await;
        run_maintenance(db, config.error_retention_days, now).await;
    }
}
