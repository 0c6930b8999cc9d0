use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InstanceLocked` if another instance of gleaner
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StorageError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Set database file permissions BEFORE pool creation so there is no
        // window where the file exists with default umask permissions.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    // Pre-create the file with mode(0o600) atomically.
                    // OpenOptionsExt::mode() sets permissions at creation time,
                    // eliminating the TOCTOU window between create and chmod.
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite will report the error at connect_with.
                }
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. This handles transient lock contention
        // from concurrent feed workers automatically. Using pragma() ensures
        // all connections in the pool inherit the setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);
        // SQLite is single-writer; 5 connections covers peak concurrent
        // readers (feed workers + CLI queries). In-memory databases get one
        // connection, since each additional connection would open its own
        // empty database.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            // Migration errors could also be lock-related
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                StorageError::InstanceLocked
            } else {
                StorageError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All schema changes are wrapped in a single transaction so a failure
    /// mid-migration (disk full, power loss) rolls back to the previous
    /// consistent state. SQLite supports DDL inside transactions, making this
    /// safe. All statements use `IF NOT EXISTS` for idempotency.
    ///
    /// The `UNIQUE(feed_id, feed_article_id)` constraint on feed_articles and
    /// `UNIQUE(feed_id, article_url)` on feed_deleted_articles are the
    /// storage-level last-resort duplicate guards; application logic relies
    /// on them being present from the first migration.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                site_url TEXT,
                category TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                disabled_reason TEXT,
                disabled_at INTEGER,
                etag TEXT,
                last_modified TEXT,
                refresh_interval_secs INTEGER NOT NULL,
                last_checked INTEGER,
                consecutive_failures INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                external_id TEXT,
                url TEXT,
                title TEXT NOT NULL,
                summary TEXT,
                content TEXT,
                authors TEXT,
                published INTEGER,
                updated INTEGER,
                source TEXT NOT NULL DEFAULT 'feed',
                read INTEGER NOT NULL DEFAULT 0,
                starred INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                feed_article_id TEXT NOT NULL,
                last_seen INTEGER NOT NULL,
                UNIQUE(feed_id, feed_article_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_deleted_articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                article_url TEXT NOT NULL,
                deleted_at INTEGER NOT NULL,
                UNIQUE(feed_id, article_url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_fetch_errors (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                message TEXT NOT NULL,
                detail TEXT,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Indexes for the resolver snapshot queries and the cleanup pass
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_articles_feed ON feed_articles(feed_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_articles_article ON feed_articles(article_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_url ON articles(url)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_external_id ON articles(external_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fetch_errors_feed ON feed_fetch_errors(feed_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
