//! Manual article ingestion.
//!
//! A user-supplied URL goes through the same identity resolver as feed
//! entries, so manually adding an article a feed already delivered reuses
//! the existing row instead of creating a duplicate. Manual articles carry
//! `source = 'manual'` and no feed link, which exempts them from orphan
//! collection.

use std::collections::HashSet;

use thiserror::Error;

use crate::storage::{Database, StorageError};
use crate::sync::resolver::{self, EntryAction};

#[derive(Debug, Error)]
pub enum IngestError {
    /// The URL is empty or whitespace, so no identity can be derived
    #[error("article URL must not be empty")]
    EmptyUrl,
    /// The resolver produced something other than a single new-entry action
    /// for a fresh manual entry. Indicates a bug, not bad input.
    #[error("manual entry did not resolve to a new article")]
    Unresolvable,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// User input for one manually-added article.
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new article row was created
    Created { article_id: i64 },
    /// The URL matched an article already in the database
    Reused { article_id: i64 },
}

impl IngestOutcome {
    pub fn article_id(&self) -> i64 {
        match self {
            IngestOutcome::Created { article_id } | IngestOutcome::Reused { article_id } => {
                *article_id
            }
        }
    }
}

/// Add an article by URL, deduplicating against everything already stored.
pub async fn add_manual_article(
    db: &Database,
    manual: ManualEntry,
    now: i64,
) -> Result<IngestOutcome, IngestError> {
    if manual.url.trim().is_empty() {
        return Err(IngestError::EmptyUrl);
    }

    // Title falls back to the URL until the user supplies one, matching the
    // placeholder convention for freshly-added feeds.
    let entry = crate::feed::parser::ParsedEntry {
        external_id: None,
        url: Some(manual.url.clone()),
        title: manual.title.unwrap_or_else(|| manual.url.clone()),
        summary: manual.summary,
        content: None,
        authors: Vec::new(),
        published: None,
        updated: None,
    };

    // No feed context: empty link and tombstone snapshots, full article
    // index for URL reuse.
    let index = db.article_index().await?;
    let plan = resolver::resolve(vec![entry], &[], &HashSet::new(), &index);

    match plan.actions.into_iter().next() {
        Some(EntryAction::New {
            reuse_article: Some(article_id),
            ..
        }) => {
            tracing::info!(article_id, "Manual add matched existing article");
            Ok(IngestOutcome::Reused { article_id })
        }
        Some(EntryAction::New {
            entry,
            reuse_article: None,
            ..
        }) => {
            let article_id = db.insert_manual_article(&entry, now).await?;
            tracing::info!(article_id, "Manual article created");
            Ok(IngestOutcome::Created { article_id })
        }
        // A single entry with a non-empty URL always resolves to New against
        // empty link and tombstone snapshots.
        _ => Err(IngestError::Unresolvable),
    }
}
