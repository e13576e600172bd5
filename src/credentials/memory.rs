//! In-process credential backend.
//!
//! Keeps payloads in clear in memory and loses everything on restart. Used
//! when no database is configured and throughout the test suite.

use super::{rewrite_access_value, CredentialBackend, OAuthCredential, StoredCredential};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Clone)]
struct Entry {
    subject_id: String,
    payload: String,
}

/// DashMap-backed credential store.
///
/// Records are keyed by access key; a second map resolves subject ids to
/// their current key.
#[derive(Default)]
pub struct MemoryCredentialStore {
    by_key: DashMap<String, Entry>,
    by_subject: DashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an arbitrary payload for `subject_id` without validating it.
    pub fn insert_raw(&self, subject_id: &str, payload: &str) -> String {
        let access_key = Uuid::new_v4().to_string();

        if let Some(old_key) = self
            .by_subject
            .insert(subject_id.to_string(), access_key.clone())
        {
            self.by_key.remove(&old_key);
        }

        self.by_key.insert(
            access_key.clone(),
            Entry {
                subject_id: subject_id.to_string(),
                payload: payload.to_string(),
            },
        );

        access_key
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl CredentialBackend for MemoryCredentialStore {
    fn insert(&self, subject_id: &str, credential: &OAuthCredential) -> Result<String> {
        Ok(self.insert_raw(subject_id, &credential.to_payload()?))
    }

    fn get(&self, access_key: &str) -> Result<Option<StoredCredential>> {
        Ok(self.by_key.get(access_key).map(|entry| StoredCredential {
            subject_id: entry.subject_id.clone(),
            access_key: access_key.to_string(),
            payload: entry.payload.clone(),
        }))
    }

    fn upsert_by_subject(
        &self,
        subject_id: &str,
        access_value: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let access_key = self
            .by_subject
            .get(subject_id)
            .map(|key| key.value().clone())
            .ok_or_else(|| anyhow!("No credentials stored for subject {}", subject_id))?;

        // The shard write lock is held for the whole read-modify-write.
        let mut entry = self
            .by_key
            .get_mut(&access_key)
            .ok_or_else(|| anyhow!("No credentials stored for subject {}", subject_id))?;
        let payload = rewrite_access_value(&entry.payload, access_value, expiry)?;
        entry.payload = payload;

        Ok(())
    }

    fn delete(&self, access_key: &str, subject_id: &str) -> Result<bool> {
        let removed = self
            .by_key
            .remove_if(access_key, |_, entry| entry.subject_id == subject_id)
            .is_some();

        if removed {
            self.by_subject
                .remove_if(subject_id, |_, key| key == access_key);
        }

        Ok(removed)
    }
}
