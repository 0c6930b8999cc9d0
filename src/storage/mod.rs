//! Persistence layer: sqlx/SQLite behind typed query functions.
//!
//! One `Database` handle wraps the pool; each submodule adds the query
//! functions for one table family. The `UNIQUE(feed_id, feed_article_id)`
//! and `UNIQUE(feed_id, article_url)` constraints declared in [`schema`] are
//! the storage-level last line of defense behind the resolver's dedup logic.

mod articles;
mod feeds;
mod fetch_errors;
mod maintenance;
mod schema;
mod tombstones;
mod types;

pub use articles::ApplyReport;
pub use schema::Database;
pub use types::{Article, Feed, FeedArticle, FetchErrorRecord, StorageError, Tombstone};
