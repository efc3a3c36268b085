//! In-memory [`DocumentStore`] with failure injection, for tests.

use super::{DocumentStore, PreferenceFilter, StoreError, WriteMode};
use crate::models::{PreferenceRecord, PreferenceUpdate, UserProfile};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: Mutex<BTreeMap<String, UserProfile>>,
    preferences: Mutex<BTreeMap<String, PreferenceRecord>>,
    fail_queries: bool,
    fail_reads_for: HashSet<String>,
    fail_writes: bool,
}

fn refused(what: &str) -> StoreError {
    StoreError::Status {
        status: 503,
        body: format!("{what} refused"),
    }
}

fn filter_matches(filter: &PreferenceFilter, record: &PreferenceRecord) -> bool {
    record.is_active == filter.is_active
        && filter
            .notification_frequency
            .is_none_or(|f| record.notification_frequency == f.as_str())
}

fn apply(update: &PreferenceUpdate, record: &mut PreferenceRecord) {
    if let Some(sports) = &update.sport_preferences {
        record.sport_preferences = sports.clone();
    }
    if let Some(freq) = update.notification_frequency {
        record.notification_frequency = freq.as_str().to_string();
    }
    if let Some(at) = update.last_newsletter_sent {
        record.last_newsletter_sent = Some(at);
    }
    if let Some(active) = update.is_active {
        record.is_active = active;
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `query_preferences` call fail.
    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    /// Make profile and preference reads for `user_id` fail.
    pub fn failing_reads_for(mut self, user_id: &str) -> Self {
        self.fail_reads_for.insert(user_id.to_string());
        self
    }

    /// Make every `merge_preferences` call fail.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn with_profile(self, user_id: &str, email: &str, name: &str) -> Self {
        self.profiles.lock().unwrap().insert(
            user_id.to_string(),
            UserProfile {
                user_id: user_id.to_string(),
                email: Some(email.to_string()),
                name: Some(name.to_string()),
            },
        );
        self
    }

    pub fn with_preferences(self, record: PreferenceRecord) -> Self {
        self.preferences
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record);
        self
    }

    pub fn preferences_of(&self, user_id: &str) -> Option<PreferenceRecord> {
        self.preferences.lock().unwrap().get(user_id).cloned()
    }

    fn check_read(&self, user_id: &str) -> Result<(), StoreError> {
        if self.fail_reads_for.contains(user_id) {
            return Err(refused(&format!("read of {user_id}")));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    async fn query_preferences(
        &self,
        filter: &PreferenceFilter,
    ) -> Result<Vec<PreferenceRecord>, StoreError> {
        if self.fail_queries {
            return Err(refused("query"));
        }
        Ok(self
            .preferences
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter_matches(filter, r))
            .cloned()
            .collect())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        self.check_read(user_id)?;
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<PreferenceRecord>, StoreError> {
        self.check_read(user_id)?;
        Ok(self.preferences_of(user_id))
    }

    async fn merge_preferences(
        &self,
        user_id: &str,
        update: &PreferenceUpdate,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(refused("write"));
        }
        let mut prefs = self.preferences.lock().unwrap();
        let record = match mode {
            WriteMode::Upsert => prefs
                .entry(user_id.to_string())
                .or_insert_with(|| PreferenceRecord::defaults_for(user_id)),
            WriteMode::UpdateExisting => prefs
                .get_mut(user_id)
                .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?,
        };
        apply(update, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Frequency;

    #[tokio::test]
    async fn test_merge_keeps_fields_outside_the_update() {
        let mut record = PreferenceRecord::defaults_for("u1");
        record.sport_preferences = vec!["golf".to_string()];
        let store = MemoryStore::new().with_preferences(record);
        let update = PreferenceUpdate {
            notification_frequency: Some(Frequency::Daily),
            ..PreferenceUpdate::default()
        };
        store
            .merge_preferences("u1", &update, WriteMode::UpdateExisting)
            .await
            .unwrap();

        let record = store.preferences_of("u1").unwrap();
        assert_eq!(record.notification_frequency, "daily");
        assert_eq!(record.sport_preferences, vec!["golf".to_string()]);
        assert!(record.is_active);
    }

    #[tokio::test]
    async fn test_update_existing_does_not_create() {
        let store = MemoryStore::new();
        let update = PreferenceUpdate {
            is_active: Some(false),
            ..PreferenceUpdate::default()
        };
        let result = store
            .merge_preferences("ghost", &update, WriteMode::UpdateExisting)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "ghost"));
        assert!(store.preferences_of("ghost").is_none());

        store
            .merge_preferences("ghost", &update, WriteMode::Upsert)
            .await
            .unwrap();
        assert!(!store.preferences_of("ghost").unwrap().is_active);
    }

    #[tokio::test]
    async fn test_query_filters_by_activity_and_frequency() {
        let mut off = PreferenceRecord::defaults_for("off");
        off.is_active = false;
        let mut daily = PreferenceRecord::defaults_for("daily");
        daily.notification_frequency = "daily".to_string();
        let store = MemoryStore::new()
            .with_preferences(PreferenceRecord::defaults_for("weekly"))
            .with_preferences(daily)
            .with_preferences(off);

        let weekly = store
            .query_preferences(&PreferenceFilter::active_with(Frequency::Weekly))
            .await
            .unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].user_id, "weekly");
        let active = store.query_preferences(&PreferenceFilter::active()).await.unwrap();
        assert_eq!(active.len(), 2);
    }
}
