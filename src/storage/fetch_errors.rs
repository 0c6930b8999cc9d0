use super::schema::Database;
use super::types::{FetchErrorRecord, StorageError};

impl Database {
    // ========================================================================
    // Fetch Error Log
    // ========================================================================

    /// Most recent fetch errors for a feed, newest first.
    ///
    /// The log is append-only diagnostics; the consecutive-failure counter on
    /// the feed row is what drives auto-disable, never this table.
    pub async fn list_fetch_errors(
        &self,
        feed_id: i64,
        limit: i64,
    ) -> Result<Vec<FetchErrorRecord>, StorageError> {
        let errors = sqlx::query_as::<_, FetchErrorRecord>(
            "SELECT id, feed_id, message, detail, created_at
             FROM feed_fetch_errors WHERE feed_id = ?
             ORDER BY id DESC LIMIT ?",
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(errors)
    }
}
