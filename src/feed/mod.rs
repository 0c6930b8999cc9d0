//! Feed retrieval: HTTP fetching and format parsing.
//!
//! - [`fetch`]: bounded-concurrency HTTP client with conditional-request
//!   support (ETag/Last-Modified) and redacted error payloads
//! - [`parser`]: feed-rs normalization of RSS 0.9x/1.0/2.0 and Atom into
//!   [`parser::ParsedFeed`] records, with a startup-time dialect check
//!
//! Neither submodule touches storage; the sync orchestrator owns persistence.

pub mod fetch;
pub mod parser;

pub use fetch::{CacheValidators, FetchClient, FetchError, FetchOutcome};
pub use parser::{parse_feed, verify_dialect_support, FeedKind, ParseError, ParsedEntry, ParsedFeed};
