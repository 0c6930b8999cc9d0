use std::collections::HashSet;

use super::schema::Database;
use super::types::{StorageError, Tombstone};

impl Database {
    // ========================================================================
    // Tombstone Operations
    // ========================================================================

    /// URL set of every tombstone written for this feed. Consulted by the
    /// resolver before any NEW classification so deleted articles are never
    /// resurrected by a re-fetch.
    pub async fn tombstones_for_feed(
        &self,
        feed_id: i64,
    ) -> Result<HashSet<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT article_url FROM feed_deleted_articles WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from_sqlx)?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    pub async fn list_tombstones(&self, feed_id: i64) -> Result<Vec<Tombstone>, StorageError> {
        let tombstones = sqlx::query_as::<_, Tombstone>(
            "SELECT id, feed_id, article_url, deleted_at
             FROM feed_deleted_articles WHERE feed_id = ? ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(tombstones)
    }
}
