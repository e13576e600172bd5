//! Encrypted credential storage using SQLite.
//!
//! One row per authorized subject. The OAuth payload is sealed with
//! AES-256-GCM; subject id and access key stay in clear for lookups.

use super::{rewrite_access_value, CredentialBackend, OAuthCredential, StoredCredential};
use super::encryption::{PayloadCipher, Sealed};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id INTEGER PRIMARY KEY,
///     subject_id TEXT NOT NULL UNIQUE,
///     access_key TEXT NOT NULL UNIQUE,
///     payload TEXT NOT NULL,           -- Encrypted OAuth JSON
///     payload_nonce TEXT NOT NULL,
///     created_at TEXT NOT NULL,        -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL         -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread Safety
/// The connection sits behind a mutex, so every read-modify-write of a
/// subject's payload happens under one lock.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: PayloadCipher,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher =
            PayloadCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                subject_id TEXT NOT NULL UNIQUE,
                access_key TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL,
                payload_nonce TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))
            .context("Failed to count credentials")?;
        Ok(count as usize)
    }
}

impl CredentialBackend for CredentialStore {
    fn insert(&self, subject_id: &str, credential: &OAuthCredential) -> Result<String> {
        let sealed = self
            .cipher
            .seal(&credential.to_payload()?)
            .context("Failed to encrypt credential payload")?;

        let access_key = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    subject_id, access_key, payload, payload_nonce, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(subject_id) DO UPDATE SET
                    access_key = excluded.access_key,
                    payload = excluded.payload,
                    payload_nonce = excluded.payload_nonce,
                    updated_at = excluded.updated_at
                "#,
                params![
                    subject_id,
                    access_key,
                    sealed.ciphertext,
                    sealed.nonce,
                    now,
                    now
                ],
            )
            .context("Failed to store credentials")?;

        Ok(access_key)
    }

    fn get(&self, access_key: &str) -> Result<Option<StoredCredential>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT subject_id, payload, payload_nonce FROM credentials WHERE access_key = ?1",
                params![access_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        Sealed {
                            ciphertext: row.get(1)?,
                            nonce: row.get(2)?,
                        },
                    ))
                },
            )
            .optional()
            .context("Failed to query credentials")?;

        let Some((subject_id, sealed)) = row else {
            return Ok(None);
        };

        let payload = self
            .cipher
            .open(&sealed)
            .context("Failed to decrypt credential payload")?;

        Ok(Some(StoredCredential {
            subject_id,
            access_key: access_key.to_string(),
            payload,
        }))
    }

    fn upsert_by_subject(
        &self,
        subject_id: &str,
        access_value: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn()?;

        let sealed = conn
            .query_row(
                "SELECT payload, payload_nonce FROM credentials WHERE subject_id = ?1",
                params![subject_id],
                |row| {
                    Ok(Sealed {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")?
            .ok_or_else(|| anyhow!("No credentials stored for subject {}", subject_id))?;

        let payload = self
            .cipher
            .open(&sealed)
            .context("Failed to decrypt credential payload")?;
        let payload = rewrite_access_value(&payload, access_value, expiry)?;
        let resealed = self
            .cipher
            .seal(&payload)
            .context("Failed to encrypt credential payload")?;

        conn.execute(
            r#"
            UPDATE credentials
            SET payload = ?1, payload_nonce = ?2, updated_at = ?3
            WHERE subject_id = ?4
            "#,
            params![
                resealed.ciphertext,
                resealed.nonce,
                Utc::now().to_rfc3339(),
                subject_id
            ],
        )
        .context("Failed to update access value")?;

        Ok(())
    }

    fn delete(&self, access_key: &str, subject_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM credentials WHERE access_key = ?1 AND subject_id = ?2",
                params![access_key, subject_id],
            )
            .context("Failed to delete credentials")?;

        Ok(rows_affected > 0)
    }
}
