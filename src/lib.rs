pub mod config;
pub mod crypto;
pub mod error;
pub mod format;
pub mod passwords;
pub mod reconcile;
pub mod records;
pub mod reencrypt;
pub mod storage;
pub mod store;
pub mod upgrade;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use directories::ProjectDirs;

pub use crate::config::{ConfigFile, EncryptionSettings};
pub use crate::crypto::Encryptor;
pub use crate::error::RecordError;
pub use crate::reconcile::{Reconciliation, reconcile};
pub use crate::records::{PROTECTED_TABLES, ProtectedTable, RecordStore};
pub use crate::reencrypt::{reencrypt_all, verify_all};
pub use crate::storage::Database;
pub use crate::store::{PasswordMetadata, PasswordMetadataStore};
use crate::error::ReencryptError;

/// Result of bringing the database in line with the configured passwords.
#[derive(Debug)]
pub struct EncryptionSetup {
    /// Encryptor for new writes.
    pub encryptor: Encryptor,
    pub reconciliation: Reconciliation,
    /// Rows rewritten, when the primary password changed.
    pub rotated_rows: Option<u64>,
    /// Fields the final encryptor cannot read. Logged, not fatal.
    pub unreadable: Vec<RecordError>,
    /// Stale password metadata removed.
    pub deleted_labels: Vec<String>,
}

/// Reconcile, re-encrypt if the primary changed, then promote the new
/// primary and drop metadata for passwords no longer configured.
///
/// Stale metadata is only removed once every field reads back under the
/// final encryptor.
pub async fn setup_encryption(
    db: &Database,
    settings: &EncryptionSettings,
    cancel: &AtomicBool,
) -> Result<EncryptionSetup> {
    let store = PasswordMetadataStore::new(db.pool().clone());
    let config = reconcile(&store, settings.enabled, &settings.passwords)
        .await
        .context("error parsing encryption configuration")?;

    let mut rotated_rows = None;
    if let Some(rotation) = &config.rotation_encryptor {
        let unreadable = verify_all(db.pool(), rotation)
            .await
            .context("error checking database records")?;
        if !unreadable.is_empty() {
            return Err(ReencryptError::Unreadable(unreadable)).context(
                "refusing to encrypt the database as some fields cannot be successfully read",
            );
        }

        tracing::info!(
            previous_primary = label_name(&config.stored_primary_label),
            new_primary = label_name(&config.configured_primary_label),
            "rotating-database-encryption"
        );
        let rows = reencrypt_all(db.pool(), rotation, cancel)
            .await
            .context("error rotating database encryption")?;
        store
            .update_primary(&config.configured_primary_label)
            .await
            .context("error updating password metadata")?;
        rotated_rows = Some(rows);
    }

    let unreadable = verify_all(db.pool(), &config.encryptor)
        .await
        .context("error checking database records")?;

    let mut deleted_labels = Vec::new();
    if !unreadable.is_empty() {
        // rows that cannot be read should be repaired or deleted by hand
        tracing::error!(
            error = %ReencryptError::Unreadable(unreadable.clone()),
            "database-field-error"
        );
    } else if !config.to_delete_labels.is_empty() {
        tracing::info!(labels = ?config.to_delete_labels, "removing-stale-password-metadata");
        store
            .delete_by_labels(&config.to_delete_labels)
            .await
            .context("error deleting stale password metadata")?;
        deleted_labels = config.to_delete_labels.clone();
    }

    tracing::info!(
        primary = label_name(&config.configured_primary_label),
        "database-encryption"
    );

    Ok(EncryptionSetup {
        encryptor: config.encryptor.clone(),
        reconciliation: config,
        rotated_rows,
        unreadable,
        deleted_labels,
    })
}

/// `"none"` for the empty label.
pub fn label_name(label: &str) -> &str {
    if label.is_empty() { "none" } else { label }
}

pub fn default_database_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "brokerseal")
        .context("could not determine platform directories")?;

    Ok(project_dirs.data_dir().join("brokerseal.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passwords::PasswordEntry;
    use crate::records::SERVICE_INSTANCE_DETAILS;
    use serde_json::json;

    const SECRET_A: &str = "averyverygoodpassword";
    const SECRET_B: &str = "supercoolnewpassword";

    fn settings(enabled: bool, passwords: Vec<PasswordEntry>) -> EncryptionSettings {
        EncryptionSettings { enabled, passwords }
    }

    async fn primaries(db: &Database) -> Vec<String> {
        PasswordMetadataStore::new(db.pool().clone())
            .load()
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.primary)
            .map(|m| m.label)
            .collect()
    }

    #[tokio::test]
    async fn first_enable_encrypts_existing_rows_and_promotes_primary() {
        let db = Database::in_memory().await.unwrap();
        RecordStore::new(db.pool().clone(), Encryptor::noop())
            .put(&SERVICE_INSTANCE_DETAILS, "guid-1", &json!({"a": 1}))
            .await
            .unwrap();

        let cancel = AtomicBool::new(false);
        let setup = setup_encryption(
            &db,
            &settings(true, vec![PasswordEntry::new("barfoo", SECRET_A, true)]),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(setup.rotated_rows, Some(1));
        assert!(setup.unreadable.is_empty());
        assert_eq!(primaries(&db).await, ["barfoo"]);

        let records = RecordStore::new(db.pool().clone(), setup.encryptor.clone());
        assert_eq!(
            records.get(&SERVICE_INSTANCE_DETAILS, "guid-1").await.unwrap(),
            Some(json!({"a": 1}))
        );
        let plaintext_reader = RecordStore::new(db.pool().clone(), Encryptor::noop());
        assert!(plaintext_reader.get(&SERVICE_INSTANCE_DETAILS, "guid-1").await.is_err());
    }

    #[tokio::test]
    async fn second_run_with_same_settings_does_not_rotate() {
        let db = Database::in_memory().await.unwrap();
        let s = settings(true, vec![PasswordEntry::new("barfoo", SECRET_A, true)]);
        let cancel = AtomicBool::new(false);

        setup_encryption(&db, &s, &cancel).await.unwrap();
        let again = setup_encryption(&db, &s, &cancel).await.unwrap();

        assert_eq!(again.rotated_rows, None);
        assert!(!again.reconciliation.changed);
    }

    #[tokio::test]
    async fn rotation_is_refused_when_a_field_is_unreadable() {
        let db = Database::in_memory().await.unwrap();
        let cancel = AtomicBool::new(false);

        setup_encryption(
            &db,
            &settings(true, vec![PasswordEntry::new("barfoo", SECRET_A, true)]),
            &cancel,
        )
        .await
        .unwrap();
        RecordStore::new(db.pool().clone(), Encryptor::noop())
            .put(&SERVICE_INSTANCE_DETAILS, "plain", &json!(1))
            .await
            .unwrap();

        // rotate to a new primary while keeping the old one around
        let setup = setup_encryption(
            &db,
            &settings(
                true,
                vec![
                    PasswordEntry::new("barfoo", SECRET_A, false),
                    PasswordEntry::new("supernew", SECRET_B, true),
                ],
            ),
            &cancel,
        )
        .await;
        // the plaintext row cannot be read by either key, so rotation is refused
        let err = setup.unwrap_err();
        assert!(format!("{err:#}").contains("refusing to encrypt"));
        assert_eq!(primaries(&db).await, ["barfoo"]);
    }

    #[tokio::test]
    async fn dropping_old_password_after_rotation_removes_its_metadata() {
        let db = Database::in_memory().await.unwrap();
        let cancel = AtomicBool::new(false);

        setup_encryption(
            &db,
            &settings(true, vec![PasswordEntry::new("barfoo", SECRET_A, true)]),
            &cancel,
        )
        .await
        .unwrap();
        setup_encryption(
            &db,
            &settings(
                true,
                vec![
                    PasswordEntry::new("barfoo", SECRET_A, false),
                    PasswordEntry::new("supernew", SECRET_B, true),
                ],
            ),
            &cancel,
        )
        .await
        .unwrap();

        let setup = setup_encryption(
            &db,
            &settings(true, vec![PasswordEntry::new("supernew", SECRET_B, true)]),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(setup.deleted_labels, ["barfoo"]);
        let labels: Vec<_> = PasswordMetadataStore::new(db.pool().clone())
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.label)
            .collect();
        assert_eq!(labels, ["supernew"]);
    }

    #[test]
    fn empty_label_is_named_none() {
        assert_eq!(label_name(""), "none");
        assert_eq!(label_name("barfoo"), "barfoo");
    }
}
