//! Subscriber record storage.
//!
//! Two collections back the newsletter:
//!
//! | Collection | Key | Contents |
//! |------------|-----|----------|
//! | `users` | user id | profile: `email`, `name` |
//! | `newsletter_preferences` | user id | `sport_preferences`, `notification_frequency`, `last_newsletter_sent`, `is_active` |
//!
//! The [`DocumentStore`] trait is the only way the rest of the crate touches
//! them; [`firestore`] implements it over the Firestore REST API.

use crate::models::{Frequency, PreferenceRecord, PreferenceUpdate, UserProfile};
use std::error::Error;
use std::fmt;

pub mod firestore;
#[cfg(test)]
pub mod memory;

pub const USERS: &str = "users";
pub const PREFERENCES: &str = "newsletter_preferences";

/// Equality filters on the preferences collection, AND-ed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceFilter {
    pub is_active: bool,
    pub notification_frequency: Option<Frequency>,
}

impl PreferenceFilter {
    pub fn active() -> Self {
        Self {
            is_active: true,
            notification_frequency: None,
        }
    }

    pub fn active_with(frequency: Frequency) -> Self {
        Self {
            is_active: true,
            notification_frequency: Some(frequency),
        }
    }
}

/// Precondition on a preference write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the document when it does not exist yet.
    Upsert,
    /// Fail with [`StoreError::NotFound`] when the document does not exist.
    UpdateExisting,
}

#[derive(Debug)]
pub enum StoreError {
    /// The request never produced a response.
    Transport(reqwest::Error),
    /// The store answered with a non-success status.
    Status { status: u16, body: String },
    /// The response did not have the expected shape.
    Decode(String),
    /// An update targeted a document that does not exist.
    NotFound(String),
    /// No access token could be obtained.
    Auth(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "document store transport error: {e}"),
            Self::Status { status, body } => {
                write!(f, "document store returned HTTP {status}: {body}")
            }
            Self::Decode(msg) => write!(f, "unexpected document store response: {msg}"),
            Self::NotFound(id) => write!(f, "no document for {id}"),
            Self::Auth(msg) => write!(f, "document store authentication failed: {msg}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e)
    }
}

/// Access to the `users` and `newsletter_preferences` collections.
pub trait DocumentStore {
    /// All preference records matching `filter`.
    async fn query_preferences(
        &self,
        filter: &PreferenceFilter,
    ) -> Result<Vec<PreferenceRecord>, StoreError>;

    /// The profile for `user_id`, or `None` if no such document exists.
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// The preference record for `user_id`, or `None` if no such document exists.
    async fn get_preferences(&self, user_id: &str)
    -> Result<Option<PreferenceRecord>, StoreError>;

    /// Write only the fields present in `update`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when `mode` is [`WriteMode::UpdateExisting`]
    /// and there is no record for `user_id`.
    async fn merge_preferences(
        &self,
        user_id: &str,
        update: &PreferenceUpdate,
        mode: WriteMode,
    ) -> Result<(), StoreError>;
}
