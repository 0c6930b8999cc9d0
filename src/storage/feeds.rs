use super::schema::Database;
use super::types::{Feed, StorageError};

const FEED_COLUMNS: &str = "id, url, title, site_url, category, enabled, disabled_reason, \
     disabled_at, etag, last_modified, refresh_interval_secs, last_checked, consecutive_failures";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, or update its category/interval if the URL already
    /// exists. Returns the feed's id.
    pub async fn insert_feed(
        &self,
        url: &str,
        category: Option<&str>,
        refresh_interval_secs: i64,
    ) -> Result<i64, StorageError> {
        // The URL doubles as the title until the first successful sync
        // refreshes it from feed metadata.
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, category, refresh_interval_secs)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                category = excluded.category,
                refresh_interval_secs = excluded.refresh_interval_secs
            RETURNING id
            "#,
        )
        .bind(url)
        .bind(url)
        .bind(category)
        .bind(refresh_interval_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(row.0)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, StorageError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(feed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(feeds)
    }

    /// Enabled feeds whose refresh interval has elapsed (or that have never
    /// been checked). The scheduler calls this once per sweep.
    pub async fn due_feeds(&self, now: i64) -> Result<Vec<Feed>, StorageError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            r#"
            SELECT {FEED_COLUMNS} FROM feeds
            WHERE enabled = 1
              AND (last_checked IS NULL OR ? - last_checked >= refresh_interval_secs)
            ORDER BY id
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(feeds)
    }

    /// Manually re-enable a feed that was disabled.
    ///
    /// Clears the disabled reason but deliberately NOT the failure counter:
    /// the counter resets only on the next successful sync, so a feed that is
    /// still broken re-disables on its first post-enable failure.
    pub async fn enable_feed(&self, feed_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE feeds SET enabled = 1, disabled_reason = NULL, disabled_at = NULL WHERE id = ?",
        )
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Manually disable a feed (user action, as opposed to auto-disable).
    pub async fn disable_feed(&self, feed_id: i64, now: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE feeds SET enabled = 0, disabled_reason = 'Disabled manually', disabled_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a feed. Links, tombstones, and error records cascade; article
    /// rows survive until the maintenance pass collects orphans.
    pub async fn remove_feed(&self, feed_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a sync attempt that produced no changes (HTTP 304).
    ///
    /// Only `last_checked` moves; validators, failure counter, and everything
    /// else stay untouched.
    pub async fn touch_feed(&self, feed_id: i64, now: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE feeds SET last_checked = ? WHERE id = ?")
            .bind(now)
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        Ok(())
    }

    // ========================================================================
    // Failure Accounting
    // ========================================================================

    /// Record one failed sync attempt atomically: append a fetch error
    /// record, bump the consecutive-failure counter, and disable the feed
    /// once the counter reaches `threshold`.
    ///
    /// Returns the new failure count and whether this call disabled the feed.
    /// Auto-disable is terminal: the feed stays disabled until a manual
    /// `enable_feed`, it is never retried automatically.
    pub async fn record_failure(
        &self,
        feed_id: i64,
        message: &str,
        detail: Option<&str>,
        threshold: i64,
        now: i64,
    ) -> Result<(i64, bool), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO feed_fetch_errors (feed_id, message, detail, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(feed_id)
        .bind(message)
        .bind(detail)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from_sqlx)?;

        let (failures,): (i64,) = sqlx::query_as(
            "UPDATE feeds SET consecutive_failures = consecutive_failures + 1, last_checked = ?
             WHERE id = ? RETURNING consecutive_failures",
        )
        .bind(now)
        .bind(feed_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(StorageError::from_sqlx)?;

        let disabled = failures >= threshold;
        if disabled {
            let reason = format!("Disabled after {failures} consecutive failures: {message}");
            sqlx::query(
                "UPDATE feeds SET enabled = 0, disabled_reason = ?, disabled_at = ? WHERE id = ?",
            )
            .bind(&reason)
            .bind(now)
            .bind(feed_id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from_sqlx)?;
        }

        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok((failures, disabled))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_feed_returns_id() {
        let db = test_db().await;
        let id = db
            .insert_feed("https://example.com/feed.xml", None, 900)
            .await
            .unwrap();
        assert!(id > 0);

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.url, "https://example.com/feed.xml");
        // Title defaults to the URL until first sync
        assert_eq!(feed.title, "https://example.com/feed.xml");
        assert!(feed.enabled);
        assert_eq!(feed.consecutive_failures, 0);
        assert!(feed.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_insert_feed_duplicate_url_same_id() {
        let db = test_db().await;
        let id1 = db
            .insert_feed("https://example.com/feed.xml", None, 900)
            .await
            .unwrap();
        let id2 = db
            .insert_feed("https://example.com/feed.xml", Some("tech"), 600)
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let feed = db.get_feed(id1).await.unwrap().unwrap();
        assert_eq!(feed.category.as_deref(), Some("tech"));
        assert_eq!(feed.refresh_interval_secs, 600);
    }

    #[tokio::test]
    async fn test_due_feeds_selection() {
        let db = test_db().await;
        let never_checked = db.insert_feed("https://a.example/feed", None, 900).await.unwrap();
        let fresh = db.insert_feed("https://b.example/feed", None, 900).await.unwrap();
        let stale = db.insert_feed("https://c.example/feed", None, 900).await.unwrap();
        let disabled = db.insert_feed("https://d.example/feed", None, 900).await.unwrap();

        let now = 10_000;
        db.touch_feed(fresh, now - 100).await.unwrap();
        db.touch_feed(stale, now - 901).await.unwrap();
        db.disable_feed(disabled, now).await.unwrap();

        let due = db.due_feeds(now).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|f| f.id).collect();
        assert!(ids.contains(&never_checked), "never-checked feed is due");
        assert!(ids.contains(&stale), "stale feed is due");
        assert!(!ids.contains(&fresh), "recently-checked feed is not due");
        assert!(!ids.contains(&disabled), "disabled feed is never due");
    }

    #[tokio::test]
    async fn test_record_failure_increments_and_disables() {
        let db = test_db().await;
        let id = db.insert_feed("https://a.example/feed", None, 900).await.unwrap();

        let (failures, disabled) = db
            .record_failure(id, "HTTP error: status 500", None, 3, 100)
            .await
            .unwrap();
        assert_eq!(failures, 1);
        assert!(!disabled);

        db.record_failure(id, "HTTP error: status 500", None, 3, 200)
            .await
            .unwrap();
        let (failures, disabled) = db
            .record_failure(id, "HTTP error: status 500", None, 3, 300)
            .await
            .unwrap();
        assert_eq!(failures, 3);
        assert!(disabled);

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert!(!feed.enabled);
        assert_eq!(feed.disabled_at, Some(300));
        let reason = feed.disabled_reason.unwrap();
        assert!(reason.contains("3 consecutive failures"));
        assert!(reason.contains("status 500"));

        // Errors were appended, one per failure
        let errors = db.list_fetch_errors(id, 10).await.unwrap();
        assert_eq!(errors.len(), 3);
    }

    #[tokio::test]
    async fn test_record_failure_updates_last_checked() {
        let db = test_db().await;
        let id = db.insert_feed("https://a.example/feed", None, 900).await.unwrap();

        db.record_failure(id, "Request timed out", None, 5, 4242)
            .await
            .unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.last_checked, Some(4242));
    }

    #[tokio::test]
    async fn test_enable_feed_keeps_failure_counter() {
        let db = test_db().await;
        let id = db.insert_feed("https://a.example/feed", None, 900).await.unwrap();

        for t in 0..3 {
            db.record_failure(id, "boom", None, 3, t).await.unwrap();
        }
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert!(!feed.enabled);

        assert!(db.enable_feed(id).await.unwrap());
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert!(feed.enabled);
        assert!(feed.disabled_reason.is_none());
        assert!(feed.disabled_at.is_none());
        // Counter survives re-enable; only a successful sync clears it
        assert_eq!(feed.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_touch_feed_only_moves_last_checked() {
        let db = test_db().await;
        let id = db.insert_feed("https://a.example/feed", None, 900).await.unwrap();
        db.record_failure(id, "boom", None, 5, 10).await.unwrap();

        db.touch_feed(id, 500).await.unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.last_checked, Some(500));
        // 304 handling does not reset the failure counter
        assert_eq!(feed.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_remove_feed_is_idempotent() {
        let db = test_db().await;
        let id = db.insert_feed("https://a.example/feed", None, 900).await.unwrap();
        assert!(db.remove_feed(id).await.unwrap());
        assert!(!db.remove_feed(id).await.unwrap());
        assert!(db.get_feed(id).await.unwrap().is_none());
    }
}
