//! Article identity resolver.
//!
//! Pure classification: given the entries from one fetch plus snapshots of
//! the feed's existing links, tombstones, and the database's reusable
//! articles, produce a [`ResolutionPlan`] describing what the orchestrator
//! should persist. The resolver performs no I/O, which keeps every identity
//! decision deterministically unit-testable.

use std::collections::{HashMap, HashSet};

use crate::feed::parser::ParsedEntry;

/// Snapshot of one existing feed_articles link joined with its article's
/// displayed fields, as the resolver needs to see it.
#[derive(Debug, Clone)]
pub struct ExistingLink {
    pub feed_article_id: String,
    pub article_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
}

impl ExistingLink {
    /// True when any displayed field differs from the entry. `last_seen`
    /// alone never counts as a change.
    fn differs_from(&self, entry: &ParsedEntry) -> bool {
        self.title != entry.title
            || self.url != entry.url
            || self.summary != entry.summary
            || self.content != entry.content
            || self.authors != entry.authors
            || self.published != entry.published
            || self.updated != entry.updated
    }
}

/// Lookup index over all articles in the database, keyed by external id and
/// URL. Used for link-only creation: a new feed offering an identity the
/// database already holds gets a link to the existing article, never a
/// duplicate row.
#[derive(Debug, Default)]
pub struct ArticleIndex {
    by_external_id: HashMap<String, i64>,
    by_url: HashMap<String, i64>,
}

impl ArticleIndex {
    pub fn insert(&mut self, article_id: i64, external_id: Option<&str>, url: Option<&str>) {
        if let Some(id) = external_id {
            self.by_external_id.entry(id.to_string()).or_insert(article_id);
        }
        if let Some(u) = url {
            self.by_url.entry(u.to_string()).or_insert(article_id);
        }
    }

    pub fn lookup(&self, external_id: Option<&str>, url: Option<&str>) -> Option<i64> {
        external_id
            .and_then(|id| self.by_external_id.get(id))
            .or_else(|| url.and_then(|u| self.by_url.get(u)))
            .copied()
    }
}

/// One persistence decision for one entry.
#[derive(Debug, Clone)]
pub enum EntryAction {
    /// No existing link, no tombstone: create a link (and an article row
    /// unless `reuse_article` names one already in the database)
    New {
        feed_article_id: String,
        entry: ParsedEntry,
        reuse_article: Option<i64>,
    },
    /// Existing link, displayed fields changed: update the article, refresh
    /// `last_seen`
    Updated {
        feed_article_id: String,
        article_id: i64,
        entry: ParsedEntry,
    },
    /// Existing link, nothing changed: refresh `last_seen` only
    Unchanged {
        feed_article_id: String,
        article_id: i64,
    },
    /// URL was explicitly deleted under this feed: expected steady state,
    /// nothing is persisted
    Tombstoned { url: String },
}

impl EntryAction {
    /// The per-feed identity this action is keyed on, where one exists.
    pub fn feed_article_id(&self) -> Option<&str> {
        match self {
            EntryAction::New { feed_article_id, .. }
            | EntryAction::Updated { feed_article_id, .. }
            | EntryAction::Unchanged { feed_article_id, .. } => Some(feed_article_id),
            EntryAction::Tombstoned { .. } => None,
        }
    }
}

/// Why an entry was dropped from the plan. Drops are warnings, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Entry carried neither an external id nor a URL
    MissingIdentity,
    /// A malformed feed repeated an identity; the first occurrence in
    /// document order wins
    DuplicateInBatch,
}

#[derive(Debug, Clone)]
pub struct DroppedEntry {
    pub title: String,
    pub reason: DropReason,
}

/// The resolver's output: actions in document order plus dropped entries.
#[derive(Debug, Default)]
pub struct ResolutionPlan {
    pub actions: Vec<EntryAction>,
    pub dropped: Vec<DroppedEntry>,
}

impl ResolutionPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Canonical per-feed identity: the entry's native id, falling back to its
/// URL. `None` when both are absent.
fn identity(entry: &ParsedEntry) -> Option<String> {
    entry
        .external_id
        .clone()
        .or_else(|| entry.url.clone())
        .filter(|id| !id.trim().is_empty())
}

/// Classify each entry, in document order, into a [`ResolutionPlan`].
///
/// Classification order matters: an existing link always wins over a
/// tombstone (a tombstone only blocks entries that would otherwise be NEW),
/// and in-batch duplicates are suppressed before any other decision.
pub fn resolve(
    entries: Vec<ParsedEntry>,
    existing_links: &[ExistingLink],
    tombstones: &HashSet<String>,
    articles: &ArticleIndex,
) -> ResolutionPlan {
    let by_id: HashMap<&str, &ExistingLink> = existing_links
        .iter()
        .map(|link| (link.feed_article_id.as_str(), link))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut plan = ResolutionPlan::default();

    for entry in entries {
        let Some(feed_article_id) = identity(&entry) else {
            tracing::warn!(title = %entry.title, "Dropping entry with neither id nor URL");
            plan.dropped.push(DroppedEntry {
                title: entry.title,
                reason: DropReason::MissingIdentity,
            });
            continue;
        };

        if !seen.insert(feed_article_id.clone()) {
            tracing::warn!(
                feed_article_id = %feed_article_id,
                title = %entry.title,
                "Dropping duplicate entry id within one fetch"
            );
            plan.dropped.push(DroppedEntry {
                title: entry.title,
                reason: DropReason::DuplicateInBatch,
            });
            continue;
        }

        if let Some(link) = by_id.get(feed_article_id.as_str()) {
            if link.differs_from(&entry) {
                plan.actions.push(EntryAction::Updated {
                    feed_article_id,
                    article_id: link.article_id,
                    entry,
                });
            } else {
                plan.actions.push(EntryAction::Unchanged {
                    feed_article_id,
                    article_id: link.article_id,
                });
            }
        } else if entry
            .url
            .as_deref()
            .is_some_and(|url| tombstones.contains(url))
        {
            plan.actions.push(EntryAction::Tombstoned {
                url: entry.url.unwrap_or_default(),
            });
        } else {
            let reuse_article = articles.lookup(entry.external_id.as_deref(), entry.url.as_deref());
            plan.actions.push(EntryAction::New {
                feed_article_id,
                entry,
                reuse_article,
            });
        }
    }

    plan
}
