//! Due-for-send scheduling and subscriber bookkeeping.
//!
//! A subscriber is due when no newsletter was ever sent, or when the whole
//! days elapsed since the last one reach the threshold of their frequency
//! (daily = 1, weekly = 7, monthly = 30). Frequencies outside that set are
//! never due.
//!
//! The [`Scheduler`] wraps a [`DocumentStore`] and exposes the operations the
//! pipeline needs. Store failures never escape the contract operations: they
//! are logged and reported as an empty list, `None`, or `false`. Callers that
//! must tell "nobody due" from "store down" use [`Scheduler::try_users_due_for`].

use crate::models::{Frequency, PreferenceRecord, PreferenceUpdate, UserPreference};
use crate::store::{DocumentStore, PreferenceFilter, StoreError, WriteMode};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::str::FromStr;
use tracing::{debug, error, info, instrument, warn};

/// Whether a subscriber with this history and frequency is due now.
///
/// # Arguments
///
/// * `last_sent` - When the last newsletter went out; `None` if never
/// * `frequency` - The stored `notification_frequency` value
///
/// # Returns
///
/// `true` if never sent, or if at least the frequency's threshold in whole
/// days has elapsed. Unknown frequencies are never due.
pub fn is_due(last_sent: Option<DateTime<Utc>>, frequency: &str) -> bool {
    is_due_at(last_sent, frequency, Utc::now())
}

/// [`is_due`] evaluated at `now`.
pub fn is_due_at(last_sent: Option<DateTime<Utc>>, frequency: &str, now: DateTime<Utc>) -> bool {
    let Some(last_sent) = last_sent else {
        return true;
    };
    let Ok(frequency) = Frequency::from_str(frequency) else {
        return false;
    };
    (now - last_sent).num_days() >= frequency.threshold_days()
}

#[derive(Debug)]
pub struct Scheduler<S> {
    store: S,
}

impl<S: DocumentStore> Scheduler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active subscribers with `frequency` who are due, joined with their profiles.
    ///
    /// # Returns
    ///
    /// Due subscribers in store order. Records without a readable profile are
    /// skipped, and a failed store query yields an empty list.
    #[instrument(level = "info", skip(self))]
    pub async fn users_due_for(&self, frequency: Frequency) -> Vec<UserPreference> {
        match self.try_users_due_for(frequency).await {
            Ok(users) => users,
            Err(e) => {
                error!(%frequency, error = %e, "Error fetching users due for newsletter");
                Vec::new()
            }
        }
    }

    /// Like [`Scheduler::users_due_for`], but surfaces a failed store query.
    ///
    /// Records whose profile is missing or unreadable are still skipped.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] of the preference query.
    pub async fn try_users_due_for(
        &self,
        frequency: Frequency,
    ) -> Result<Vec<UserPreference>, StoreError> {
        let now = Utc::now();
        let records = self
            .store
            .query_preferences(&PreferenceFilter::active_with(frequency))
            .await?;
        let matched = records.len();

        let due: Vec<UserPreference> = stream::iter(records)
            .filter(|r| {
                let due = is_due_at(r.last_newsletter_sent, &r.notification_frequency, now);
                if !due {
                    debug!(user_id = %r.user_id, last_sent = ?r.last_newsletter_sent, "Not due yet");
                }
                std::future::ready(due)
            })
            .then(|r: PreferenceRecord| async move { self.get_user_preferences(&r.user_id).await })
            .filter_map(std::future::ready)
            .collect()
            .await;

        info!(%frequency, matched, due = due.len(), "Resolved users due for newsletter");
        Ok(due)
    }

    /// Profile and preferences for one user.
    ///
    /// `None` if the profile does not exist or any read fails. A missing
    /// preference document yields the defaults.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_user_preferences(&self, user_id: &str) -> Option<UserPreference> {
        let profile = match self.store.get_profile(user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!(%user_id, "No profile for preference record; skipping");
                return None;
            }
            Err(e) => {
                error!(%user_id, error = %e, "Error fetching user profile");
                return None;
            }
        };
        let prefs = match self.store.get_preferences(user_id).await {
            Ok(prefs) => prefs.unwrap_or_else(|| PreferenceRecord::defaults_for(user_id)),
            Err(e) => {
                error!(%user_id, error = %e, "Error fetching user preferences");
                return None;
            }
        };
        Some(UserPreference::join(profile, prefs))
    }

    /// Every active subscriber with a profile, regardless of frequency.
    #[instrument(level = "info", skip(self))]
    pub async fn get_active_subscribers(&self) -> Vec<UserPreference> {
        let records = match self.store.query_preferences(&PreferenceFilter::active()).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Error fetching active subscribers");
                return Vec::new();
            }
        };

        let mut subscribers = Vec::with_capacity(records.len());
        for record in records {
            match self.store.get_profile(&record.user_id).await {
                Ok(Some(profile)) => subscribers.push(UserPreference::join(profile, record)),
                Ok(None) => debug!(user_id = %record.user_id, "Active record without profile"),
                Err(e) => error!(user_id = %record.user_id, error = %e, "Error fetching user profile"),
            }
        }
        info!(count = subscribers.len(), "Fetched active subscribers");
        subscribers
    }

    /// Validate and merge a partial preference update.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Key of the preference record; created with defaults if absent
    /// * `update` - Fields to write; everything else is left as stored
    ///
    /// # Returns
    ///
    /// `false` if the update is invalid or the write fails.
    #[instrument(level = "info", skip(self, update))]
    pub async fn update_preferences(&self, user_id: &str, update: &PreferenceUpdate) -> bool {
        if let Err(e) = update.validate() {
            warn!(%user_id, error = %e, "Rejected preference update");
            return false;
        }
        self.write(user_id, update, WriteMode::Upsert).await
    }

    /// Stamp `last_newsletter_sent` with the current time.
    ///
    /// Only an existing preference record is stamped; for an unknown user
    /// nothing is written and this returns `false`.
    pub async fn mark_sent(&self, user_id: &str) -> bool {
        let ok = self
            .write(user_id, &PreferenceUpdate::sent_at(Utc::now()), WriteMode::UpdateExisting)
            .await;
        if ok {
            debug!(%user_id, "Recorded newsletter send");
        }
        ok
    }

    async fn write(&self, user_id: &str, update: &PreferenceUpdate, mode: WriteMode) -> bool {
        match self.store.merge_preferences(user_id, update, mode).await {
            Ok(()) => true,
            Err(StoreError::NotFound(_)) => {
                warn!(%user_id, "No preference record to update");
                false
            }
            Err(e) => {
                error!(%user_id, error = %e, "Error updating user preferences");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn prefs(user_id: &str, freq: &str, last_sent: Option<DateTime<Utc>>) -> PreferenceRecord {
        PreferenceRecord {
            user_id: user_id.to_string(),
            sport_preferences: vec!["basketball".to_string()],
            notification_frequency: freq.to_string(),
            last_newsletter_sent: last_sent,
            is_active: true,
        }
    }

    #[test]
    fn test_never_sent_is_always_due() {
        for freq in ["daily", "weekly", "monthly", "hourly", ""] {
            assert!(is_due(None, freq), "{freq}");
        }
    }

    #[test]
    fn test_weekly_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(!is_due_at(Some(now - Duration::days(6)), "weekly", now));
        assert!(is_due_at(Some(now - Duration::days(7)), "weekly", now));
    }

    #[test]
    fn test_thresholds_use_whole_days() {
        let now = Utc::now();
        let almost_a_day = now - Duration::hours(23) - Duration::minutes(59);
        assert!(!is_due_at(Some(almost_a_day), "daily", now));
        assert!(is_due_at(Some(now - Duration::hours(24)), "daily", now));
        assert!(!is_due_at(Some(now - Duration::days(29)), "monthly", now));
        assert!(is_due_at(Some(now - Duration::days(30)), "monthly", now));
    }

    #[test]
    fn test_unknown_frequency_is_never_due() {
        let now = Utc::now();
        assert!(!is_due_at(Some(now - Duration::days(365)), "fortnightly", now));
    }

    #[tokio::test]
    async fn test_users_due_for_empty_when_query_fails() {
        let store = MemoryStore::new()
            .with_profile("u1", "u1@example.com", "One")
            .with_preferences(prefs("u1", "weekly", None))
            .failing_queries();
        let scheduler = Scheduler::new(store);
        assert!(scheduler.users_due_for(Frequency::Weekly).await.is_empty());
        assert!(scheduler.try_users_due_for(Frequency::Weekly).await.is_err());
    }

    #[tokio::test]
    async fn test_users_due_for_filters_due_and_missing_profiles() {
        let now = Utc::now();
        let mut inactive = prefs("inactive", "weekly", None);
        inactive.is_active = false;
        let store = MemoryStore::new()
            .with_profile("due", "due@example.com", "Due")
            .with_profile("recent", "recent@example.com", "Recent")
            .with_profile("never", "never@example.com", "Never")
            .with_profile("daily", "daily@example.com", "Daily")
            .with_profile("inactive", "inactive@example.com", "Inactive")
            .with_preferences(prefs("due", "weekly", Some(now - Duration::days(8))))
            .with_preferences(prefs("recent", "weekly", Some(now - Duration::days(2))))
            .with_preferences(prefs("never", "weekly", None))
            .with_preferences(prefs("orphan", "weekly", None))
            .with_preferences(prefs("daily", "daily", None))
            .with_preferences(inactive);
        let scheduler = Scheduler::new(store);

        let users = scheduler.users_due_for(Frequency::Weekly).await;
        let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["due", "never"]);
        assert_eq!(users[0].email.as_deref(), Some("due@example.com"));
        assert_eq!(users[0].sport_preferences, vec!["basketball".to_string()]);
    }

    #[tokio::test]
    async fn test_unreadable_profile_is_skipped() {
        let store = MemoryStore::new()
            .with_profile("a", "a@example.com", "A")
            .with_profile("b", "b@example.com", "B")
            .with_preferences(prefs("a", "daily", None))
            .with_preferences(prefs("b", "daily", None))
            .failing_reads_for("a");
        let scheduler = Scheduler::new(store);
        let users = scheduler.users_due_for(Frequency::Daily).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "b");
    }

    #[tokio::test]
    async fn test_get_user_preferences_defaults_without_preference_doc() {
        let store = MemoryStore::new().with_profile("u1", "test@example.com", "Test User");
        let scheduler = Scheduler::new(store);
        let user = scheduler.get_user_preferences("u1").await.unwrap();
        assert_eq!(user.email.as_deref(), Some("test@example.com"));
        assert_eq!(user.notification_frequency, "weekly");
        assert!(user.is_active);
        assert!(user.sport_preferences.is_empty());
        assert!(scheduler.get_user_preferences("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_active_subscribers_skip_orphans() {
        let mut inactive = prefs("off", "daily", None);
        inactive.is_active = false;
        let store = MemoryStore::new()
            .with_profile("a", "a@example.com", "A")
            .with_profile("off", "off@example.com", "Off")
            .with_preferences(prefs("a", "monthly", None))
            .with_preferences(prefs("orphan", "daily", None))
            .with_preferences(inactive);
        let scheduler = Scheduler::new(store);
        let subs = scheduler.get_active_subscribers().await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].user_id, "a");
    }

    #[tokio::test]
    async fn test_mark_sent_stamps_and_keeps_other_fields() {
        let store = MemoryStore::new().with_preferences(prefs("u1", "weekly", None));
        let scheduler = Scheduler::new(store);
        let before = Utc::now();
        assert!(scheduler.mark_sent("u1").await);
        let record = scheduler.store().preferences_of("u1").unwrap();
        assert!(record.last_newsletter_sent.unwrap() >= before);
        assert_eq!(record.sport_preferences, vec!["basketball".to_string()]);
        assert!(!is_due(record.last_newsletter_sent, &record.notification_frequency));
    }

    #[tokio::test]
    async fn test_mark_sent_failure_reports_false() {
        let store = MemoryStore::new()
            .with_preferences(prefs("u1", "weekly", None))
            .failing_writes();
        let scheduler = Scheduler::new(store);
        assert!(!scheduler.mark_sent("u1").await);
        assert!(scheduler.store().preferences_of("u1").unwrap().last_newsletter_sent.is_none());
    }

    #[tokio::test]
    async fn test_mark_sent_unknown_user_creates_nothing() {
        let scheduler = Scheduler::new(MemoryStore::new());
        assert!(!scheduler.mark_sent("ghost").await);
        assert!(scheduler.store().preferences_of("ghost").is_none());
    }

    #[tokio::test]
    async fn test_update_preferences_rejects_invalid() {
        let scheduler = Scheduler::new(MemoryStore::new());
        assert!(!scheduler.update_preferences("u1", &PreferenceUpdate::default()).await);
        assert!(scheduler.store().preferences_of("u1").is_none());

        let update = PreferenceUpdate {
            sport_preferences: Some(vec!["basketball".to_string(), "football".to_string()]),
            notification_frequency: Some(Frequency::Weekly),
            ..PreferenceUpdate::default()
        };
        assert!(scheduler.update_preferences("u1", &update).await);
        let record = scheduler.store().preferences_of("u1").unwrap();
        assert_eq!(record.sport_preferences.len(), 2);
    }
}
