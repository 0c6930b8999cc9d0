//! gleaner: a personal feed-reading service core.
//!
//! Feeds are polled on a schedule, parsed, and deduplicated into a shared
//! article store: one article row per piece of content, linked to every
//! feed that delivered it. Deleted articles leave per-feed tombstones so a
//! sync never resurrects them; persistently failing feeds disable
//! themselves after a threshold of consecutive failures.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod sync;
pub mod util;
