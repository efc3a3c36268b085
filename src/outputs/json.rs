//! Subscriber preference log.
//!
//! After each successful send the recipient's address and the newsletter's
//! sport are merged into a flat JSON object on disk:
//!
//! ```text
//! html_output_dir/
//! └── subscriber_preferences.json   # {"fan@example.com": "basketball", ...}
//! ```
//!
//! Existing entries are kept; a later send overwrites the sport for the same
//! address.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{debug, instrument};

pub const SUBSCRIBER_LOG: &str = "subscriber_preferences.json";

/// Merge `email -> sport` into `{dir}/subscriber_preferences.json`.
///
/// # Errors
///
/// Returns an error if an existing log is not a JSON object of strings, or
/// if the file cannot be read or written.
#[instrument(level = "debug", skip_all, fields(%dir, %email, %sport))]
pub async fn record_subscriber_preference(
    dir: &str,
    email: &str,
    sport: &str,
) -> Result<(), Box<dyn Error>> {
    let path = format!("{}/{}", dir.trim_end_matches('/'), SUBSCRIBER_LOG);

    let mut preferences: BTreeMap<String, String> = if Path::new(&path).exists() {
        let raw = fs::read_to_string(&path).await?;
        serde_json::from_str(&raw)?
    } else {
        BTreeMap::new()
    };

    preferences.insert(email.to_string(), sport.to_string());
    fs::write(&path, serde_json::to_string_pretty(&preferences)?).await?;
    debug!(%path, entries = preferences.len(), "Updated subscriber preference log");
    Ok(())
}
