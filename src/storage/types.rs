use thiserror::Error;

use crate::feed::fetch::CacheValidators;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors with user-friendly messages.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another instance of the service has locked the database
    #[error("Another instance of gleaner appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A uniqueness constraint tripped despite application-level dedup.
    /// This is a bug signal, not an expected runtime condition.
    #[error("Uniqueness constraint violated: {0}")]
    Constraint(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Classify a sqlx error into the cases callers need to distinguish.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StorageError::Constraint(db_err.message().to_string());
            }
        }

        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::InstanceLocked;
        }

        StorageError::Other(err)
    }

    /// True when this error is the storage-level duplicate guard firing.
    pub fn is_constraint(&self) -> bool {
        matches!(self, StorageError::Constraint(_))
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One polled feed source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub category: Option<String>,
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub disabled_at: Option<i64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub refresh_interval_secs: i64,
    pub last_checked: Option<i64>,
    pub consecutive_failures: i64,
}

impl Feed {
    /// Stored conditional-request validators for the next fetch.
    pub fn validators(&self) -> CacheValidators {
        CacheValidators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// A deduplicated content item, surfaced through feed_articles links.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub external_id: Option<String>,
    pub url: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    /// JSON array of author names
    pub authors: Option<String>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
    /// `'feed'` or `'manual'`; display only, never consulted for dedup
    pub source: String,
    pub read: bool,
    pub starred: bool,
    pub created_at: i64,
}

impl Article {
    /// Decode the stored JSON author list. Malformed or missing JSON yields
    /// an empty list rather than an error.
    pub fn author_names(&self) -> Vec<String> {
        self.authors
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Link record tying a feed to an article with a stable per-feed identity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedArticle {
    pub id: i64,
    pub feed_id: i64,
    pub article_id: i64,
    /// Entry's native id, falling back to the entry URL. Stable for the life
    /// of the link even when displayed fields change.
    pub feed_article_id: String,
    pub last_seen: i64,
}

/// A tombstone preventing resurrection of a deleted article under a feed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tombstone {
    pub id: i64,
    pub feed_id: i64,
    pub article_url: String,
    pub deleted_at: i64,
}

/// Append-only fetch/processing failure record for a feed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FetchErrorRecord {
    pub id: i64,
    pub feed_id: i64,
    pub message: String,
    /// Structured JSON payload (status, selected headers; never bodies)
    pub detail: Option<String>,
    pub created_at: i64,
}

/// Internal row shape for the feed_articles + articles join consumed by the
/// identity resolver.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LinkRow {
    pub feed_article_id: String,
    pub article_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub authors: Option<String>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
}
