//! Optional YAML settings.
//!
//! Every key has a default, so the file itself is optional:
//!
//! ```yaml
//! from_address: newsletter@example.com
//! rate_limit_delay_secs: 1.0
//! request_timeout_secs: 10
//! user_agent: "Mozilla/5.0 ..."
//! summary_chars: 200
//! preview_chars: 500
//! keywords_per_article: 5
//! max_index_terms: 500000
//! ```

use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Verified sender address for outgoing newsletters.
    pub from_address: String,
    pub rate_limit_delay_secs: f64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Characters of each new document that go into the batch summary.
    pub summary_chars: usize,
    /// Characters of each document shown in its newsletter block.
    pub preview_chars: usize,
    pub keywords_per_article: usize,
    /// Vocabulary cap for the document index; rebuilds past it fail.
    pub max_index_terms: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            from_address: "newsletter@example.com".to_string(),
            rate_limit_delay_secs: 1.0,
            request_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            summary_chars: 200,
            preview_chars: 500,
            keywords_per_article: 5,
            max_index_terms: 500_000,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the defaults when no path is given.
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| format!("reading settings from {path}: {e}"))?;
                let settings = Self::from_yaml(&raw)?;
                info!(%path, "Loaded settings");
                settings
            }
            None => Self::default(),
        };
        settings.rate_limit_delay()?;
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, Box<dyn Error>> {
        let settings: Settings = serde_yaml::from_str(raw)?;
        settings.rate_limit_delay()?;
        Ok(settings)
    }

    /// The inter-request delay; negative or non-finite values are rejected.
    pub fn rate_limit_delay(&self) -> Result<Duration, Box<dyn Error>> {
        Duration::try_from_secs_f64(self.rate_limit_delay_secs).map_err(|e| {
            format!(
                "invalid rate_limit_delay_secs {}: {e}",
                self.rate_limit_delay_secs
            )
            .into()
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
