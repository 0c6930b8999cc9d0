//! Shared utilities.
//!
//! Currently just URL validation: every feed URL and manually-ingested
//! article URL passes through [`validate_url`] before the service will touch
//! it, so the fetch client never dials private or non-HTTP targets.

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
