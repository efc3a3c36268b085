//! Data models for scraped documents, subscribers, and newsletter content.
//!
//! This module defines the core data structures used throughout the application:
//! - [`ScrapedDocument`]: Plain text pulled from one candidate URL
//! - [`Frequency`]: How often a subscriber wants a newsletter
//! - [`UserProfile`], [`PreferenceRecord`], [`UserPreference`]: Subscriber records
//!   as stored remotely and as joined for sending
//! - [`PreferenceUpdate`]: A validated partial update of a preference record
//! - [`NewsletterArticle`], [`Newsletter`]: Input to the HTML renderer

use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// A document scraped from a single URL.
///
/// Once appended to the indexer's buffer it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedDocument {
    /// The URL the text was fetched from.
    pub source_url: String,
    /// Visible text, one block per line.
    pub text: String,
}

impl ScrapedDocument {
    /// Extract the domain label before the TLD from the source URL.
    ///
    /// For example: `"https://www.espn.com/nba/"` -> `"espn"`.
    pub fn source_tag(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.source_url).ok()?;
        let Some(url::Host::Domain(host)) = parsed.host() else {
            return None;
        };
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() >= 2 {
            Some(parts[parts.len() - 2].to_string())
        } else {
            None
        }
    }
}

/// Newsletter cadence chosen by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 3] = [Frequency::Daily, Frequency::Weekly, Frequency::Monthly];

    /// Whole days that must elapse after the last send before the next one is due.
    pub fn threshold_days(self) -> i64 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Monthly => 30,
        }
    }

    /// The value stored in the `notification_frequency` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown notification frequency: {other}")),
        }
    }
}

/// A document from the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A document from the `newsletter_preferences` collection, keyed by user id.
///
/// `notification_frequency` is kept as stored; values outside [`Frequency`]
/// are possible and are never due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceRecord {
    pub user_id: String,
    pub sport_preferences: Vec<String>,
    pub notification_frequency: String,
    pub last_newsletter_sent: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl PreferenceRecord {
    /// The record a user gets when no preference document exists yet.
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            sport_preferences: Vec::new(),
            notification_frequency: Frequency::Weekly.as_str().to_string(),
            last_newsletter_sent: None,
            is_active: true,
        }
    }
}

/// A subscriber profile joined with its newsletter preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPreference {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub sport_preferences: Vec<String>,
    pub notification_frequency: String,
    pub last_newsletter_sent: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl UserPreference {
    pub fn join(profile: UserProfile, prefs: PreferenceRecord) -> Self {
        Self {
            user_id: profile.user_id,
            email: profile.email,
            name: profile.name,
            sport_preferences: prefs.sport_preferences,
            notification_frequency: prefs.notification_frequency,
            last_newsletter_sent: prefs.last_newsletter_sent,
            is_active: prefs.is_active,
        }
    }
}

/// A partial update of a preference record. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub sport_preferences: Option<Vec<String>>,
    pub notification_frequency: Option<Frequency>,
    pub last_newsletter_sent: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

impl PreferenceUpdate {
    /// An update that only stamps `last_newsletter_sent`.
    pub fn sent_at(at: DateTime<Utc>) -> Self {
        Self {
            last_newsletter_sent: Some(at),
            ..Self::default()
        }
    }

    /// Stored field names touched by this update, in a stable order.
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.sport_preferences.is_some() {
            paths.push("sport_preferences");
        }
        if self.notification_frequency.is_some() {
            paths.push("notification_frequency");
        }
        if self.last_newsletter_sent.is_some() {
            paths.push("last_newsletter_sent");
        }
        if self.is_active.is_some() {
            paths.push("is_active");
        }
        paths
    }

    /// Reject updates that would write nothing or write blank sport names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.field_paths().is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }
        if let Some(sports) = &self.sport_preferences {
            if let Some(pos) = sports.iter().position(|s| s.trim().is_empty()) {
                return Err(ValidationError::BlankSport(pos));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyUpdate,
    BlankSport(usize),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyUpdate => write!(f, "preference update has no fields"),
            Self::BlankSport(i) => write!(f, "sport preference at position {i} is blank"),
        }
    }
}

impl Error for ValidationError {}

/// One article block in a rendered newsletter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsletterArticle {
    pub title: String,
    pub summary: String,
    pub keywords: Vec<String>,
}

/// Everything the HTML template needs.
#[derive(Debug, Clone)]
pub struct Newsletter {
    pub sport: String,
    pub articles: Vec<NewsletterArticle>,
    /// Publication date in `YYYY-MM-DD` format.
    pub date: String,
}
