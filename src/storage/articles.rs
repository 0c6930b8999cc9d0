use sqlx::{Sqlite, Transaction};

use super::schema::Database;
use super::types::{Article, FeedArticle, LinkRow, StorageError};
use crate::feed::fetch::CacheValidators;
use crate::feed::parser::ParsedEntry;
use crate::sync::resolver::{ArticleIndex, EntryAction, ExistingLink, ResolutionPlan};

/// What one plan application changed.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub created: Vec<i64>,
    pub updated: Vec<i64>,
    pub unchanged: usize,
    pub tombstoned: usize,
    /// Entries skipped because the storage-level uniqueness guard fired.
    /// Nonzero values indicate an application bug, not normal operation.
    pub skipped_constraint: usize,
}

impl Database {
    // ========================================================================
    // Resolver Snapshots
    // ========================================================================

    /// Snapshot of a feed's links joined with displayed article fields, in
    /// the shape the identity resolver consumes.
    pub async fn existing_links(&self, feed_id: i64) -> Result<Vec<ExistingLink>, StorageError> {
        let rows: Vec<LinkRow> = sqlx::query_as(
            r#"
            SELECT fa.feed_article_id, fa.article_id,
                   a.title, a.url, a.summary, a.content, a.authors, a.published, a.updated
            FROM feed_articles fa
            JOIN articles a ON a.id = fa.article_id
            WHERE fa.feed_id = ?
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| ExistingLink {
                feed_article_id: row.feed_article_id,
                article_id: row.article_id,
                title: row.title,
                url: row.url,
                summary: row.summary,
                content: row.content,
                authors: row
                    .authors
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default(),
                published: row.published,
                updated: row.updated,
            })
            .collect())
    }

    /// Identity index over every article row, for link-only reuse.
    pub async fn article_index(&self) -> Result<ArticleIndex, StorageError> {
        let rows: Vec<(i64, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT id, external_id, url FROM articles ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from_sqlx)?;

        let mut index = ArticleIndex::default();
        for (id, external_id, url) in &rows {
            index.insert(*id, external_id.as_deref(), url.as_deref());
        }
        Ok(index)
    }

    // ========================================================================
    // Plan Application
    // ========================================================================

    /// Apply a resolution plan inside one transaction.
    ///
    /// The same commit refreshes feed metadata (title/site URL from the
    /// parsed payload), stores the response's cache validators, sets
    /// `last_checked`, and zeroes the consecutive-failure counter, so a
    /// crash mid-application can never leave partially-linked articles
    /// behind a feed that claims a successful sync.
    ///
    /// A uniqueness violation on a link insert is logged loudly, that entry
    /// is skipped, and the rest of the plan proceeds.
    pub async fn apply_plan(
        &self,
        feed_id: i64,
        plan: &ResolutionPlan,
        feed_title: Option<&str>,
        feed_site_url: Option<&str>,
        validators: &CacheValidators,
        now: i64,
    ) -> Result<ApplyReport, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;
        let mut report = ApplyReport::default();

        sqlx::query(
            r#"
            UPDATE feeds SET
                title = COALESCE(?, title),
                site_url = COALESCE(?, site_url),
                etag = ?,
                last_modified = ?,
                last_checked = ?,
                consecutive_failures = 0
            WHERE id = ?
            "#,
        )
        .bind(feed_title)
        .bind(feed_site_url)
        .bind(&validators.etag)
        .bind(&validators.last_modified)
        .bind(now)
        .bind(feed_id)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from_sqlx)?;

        for action in &plan.actions {
            match action {
                EntryAction::New {
                    feed_article_id,
                    entry,
                    reuse_article,
                } => {
                    let (article_id, fresh) = match reuse_article {
                        Some(id) => (*id, false),
                        None => (insert_article(&mut tx, entry, "feed", now).await?, true),
                    };

                    let link = sqlx::query(
                        "INSERT INTO feed_articles (feed_id, article_id, feed_article_id, last_seen) VALUES (?, ?, ?, ?)",
                    )
                    .bind(feed_id)
                    .bind(article_id)
                    .bind(feed_article_id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await;

                    match link.map_err(StorageError::from_sqlx) {
                        Ok(_) => {
                            if fresh {
                                report.created.push(article_id);
                            } else {
                                // Link-only creation: the article already existed
                                report.updated.push(article_id);
                            }
                        }
                        Err(e) if e.is_constraint() => {
                            tracing::error!(
                                feed_id,
                                feed_article_id = %feed_article_id,
                                error = %e,
                                "Link uniqueness guard fired despite resolver dedup; skipping entry"
                            );
                            if fresh {
                                // Remove the orphan row this entry created
                                sqlx::query("DELETE FROM articles WHERE id = ?")
                                    .bind(article_id)
                                    .execute(&mut *tx)
                                    .await
                                    .map_err(StorageError::from_sqlx)?;
                            }
                            report.skipped_constraint += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                EntryAction::Updated {
                    feed_article_id,
                    article_id,
                    entry,
                } => {
                    update_article_fields(&mut tx, *article_id, entry).await?;
                    touch_link(&mut tx, feed_id, feed_article_id, now).await?;
                    report.updated.push(*article_id);
                }
                EntryAction::Unchanged {
                    feed_article_id, ..
                } => {
                    touch_link(&mut tx, feed_id, feed_article_id, now).await?;
                    report.unchanged += 1;
                }
                EntryAction::Tombstoned { .. } => {
                    report.tombstoned += 1;
                }
            }
        }

        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok(report)
    }

    // ========================================================================
    // Article Operations
    // ========================================================================

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, StorageError> {
        let article = sqlx::query_as::<_, Article>(
            "SELECT id, external_id, url, title, summary, content, authors, published, updated,
                    source, read, starred, created_at
             FROM articles WHERE id = ?",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(article)
    }

    pub async fn list_articles(&self) -> Result<Vec<Article>, StorageError> {
        let articles = sqlx::query_as::<_, Article>(
            "SELECT id, external_id, url, title, summary, content, authors, published, updated,
                    source, read, starred, created_at
             FROM articles ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(articles)
    }

    pub async fn list_links(&self, feed_id: i64) -> Result<Vec<FeedArticle>, StorageError> {
        let links = sqlx::query_as::<_, FeedArticle>(
            "SELECT id, feed_id, article_id, feed_article_id, last_seen
             FROM feed_articles WHERE feed_id = ? ORDER BY id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(links)
    }

    /// Insert a standalone article (manual ingestion path).
    pub async fn insert_manual_article(
        &self,
        entry: &ParsedEntry,
        now: i64,
    ) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;
        let id = insert_article(&mut tx, entry, "manual", now).await?;
        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok(id)
    }

    /// Refresh an existing article's displayed fields (manual re-ingestion of
    /// a known identity updates, never duplicates).
    pub async fn update_article(
        &self,
        article_id: i64,
        entry: &ParsedEntry,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;
        update_article_fields(&mut tx, article_id, entry).await?;
        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok(())
    }

    /// Delete an article at the user's request.
    ///
    /// For every feed the article is linked to, a tombstone keyed by the
    /// article's URL is written first, then the links and the article row are
    /// removed, all in one transaction. Tombstones key on URL rather than
    /// article id because this row is gone by the time they are consulted.
    /// URL-less articles write no tombstone.
    pub async fn delete_article(&self, article_id: i64, now: i64) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from_sqlx)?;

        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT url FROM articles WHERE id = ?")
                .bind(article_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StorageError::from_sqlx)?;
        let Some((url,)) = row else {
            return Ok(false);
        };

        if let Some(url) = url {
            let feed_ids: Vec<(i64,)> =
                sqlx::query_as("SELECT feed_id FROM feed_articles WHERE article_id = ?")
                    .bind(article_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(StorageError::from_sqlx)?;
            for (feed_id,) in feed_ids {
                sqlx::query(
                    "INSERT OR IGNORE INTO feed_deleted_articles (feed_id, article_url, deleted_at) VALUES (?, ?, ?)",
                )
                .bind(feed_id)
                .bind(&url)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::from_sqlx)?;
            }
        }

        sqlx::query("DELETE FROM feed_articles WHERE article_id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from_sqlx)?;
        sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from_sqlx)?;

        tx.commit().await.map_err(StorageError::from_sqlx)?;
        Ok(true)
    }
}

async fn insert_article(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &ParsedEntry,
    source: &str,
    now: i64,
) -> Result<i64, StorageError> {
    let authors = serde_json::to_string(&entry.authors).ok();
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO articles (external_id, url, title, summary, content, authors, published, updated, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&entry.external_id)
    .bind(&entry.url)
    .bind(&entry.title)
    .bind(&entry.summary)
    .bind(&entry.content)
    .bind(&authors)
    .bind(entry.published)
    .bind(entry.updated)
    .bind(source)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(StorageError::from_sqlx)?;
    Ok(row.0)
}

async fn update_article_fields(
    tx: &mut Transaction<'_, Sqlite>,
    article_id: i64,
    entry: &ParsedEntry,
) -> Result<(), StorageError> {
    let authors = serde_json::to_string(&entry.authors).ok();
    sqlx::query(
        r#"
        UPDATE articles SET
            url = ?, title = ?, summary = ?, content = ?, authors = ?, published = ?, updated = ?
        WHERE id = ?
        "#,
    )
    .bind(&entry.url)
    .bind(&entry.title)
    .bind(&entry.summary)
    .bind(&entry.content)
    .bind(&authors)
    .bind(entry.published)
    .bind(entry.updated)
    .bind(article_id)
    .execute(&mut **tx)
    .await
    .map_err(StorageError::from_sqlx)?;
    Ok(())
}

async fn touch_link(
    tx: &mut Transaction<'_, Sqlite>,
    feed_id: i64,
    feed_article_id: &str,
    now: i64,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE feed_articles SET last_seen = ? WHERE feed_id = ? AND feed_article_id = ?",
    )
    .bind(now)
    .bind(feed_id)
    .bind(feed_article_id)
    .execute(&mut **tx)
    .await
    .map_err(StorageError::from_sqlx)?;
    Ok(())
}
