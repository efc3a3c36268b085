//! Candidate URL resolution and page fetching.
//!
//! Scraping follows a two-phase pattern:
//!
//! 1. **Resolving**: Map the subscriber's sport query to candidate URLs ([`urls`])
//! 2. **Fetching**: Download each URL with rate limiting and reduce it to text ([`fetcher`])
//!
//! Failed fetches are logged and skipped without failing the batch.

pub mod fetcher;
pub mod urls;
