use super::schema::Database;
use super::types::StorageError;

impl Database {
    // ========================================================================
    // Maintenance Pass
    // ========================================================================

    /// Delete feed-sourced articles no feed references any more.
    ///
    /// Starred articles and manually-added articles are explicit retention
    /// reasons and survive. Returns the number of rows collected.
    pub async fn cleanup_orphan_articles(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE source = 'feed'
              AND starred = 0
              AND id NOT IN (SELECT article_id FROM feed_articles)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    /// Drop fetch error records older than the cutoff timestamp.
    pub async fn prune_fetch_errors(&self, cutoff: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM feed_fetch_errors WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
