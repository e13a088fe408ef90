//! Reconciles the configured password list with stored password metadata.

use std::collections::{HashMap, HashSet};

use crate::crypto::{Encryptor, derive_key, generate_salt};
use crate::error::ReconcileError;
use crate::passwords::{PasswordEntry, check_canary, parse, seal_canary};
use crate::store::{PasswordMetadata, PasswordMetadataStore};

/// What the database should be encrypted with, and whether existing
/// rows have to be rewritten to get there.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Encryptor for new writes.
    pub encryptor: Encryptor,
    /// Reads through every configured key, writes through the new primary.
    /// Present iff `changed`.
    pub rotation_encryptor: Option<Encryptor>,
    pub changed: bool,
    /// `""` when no configured entry is primary.
    pub configured_primary_label: String,
    /// `""` when no stored row is primary.
    pub stored_primary_label: String,
    /// Stored labels that are no longer configured, in stored order.
    pub to_delete_labels: Vec<String>,
}

/// Parse `passwords` and reconcile the result against `store`.
pub async fn parse_configuration(
    store: &PasswordMetadataStore,
    enabled: bool,
    passwords: &str,
) -> Result<Reconciliation, ReconcileError> {
    let configured = parse(passwords)?;
    reconcile(store, enabled, &configured).await
}

/// Check every configured password against the store and work out the
/// encryptors for this run.
///
/// Labels seen for the first time are given a fresh salt and canary and
/// saved as non-primary; the primary flag only moves once existing rows
/// have been re-encrypted.
pub async fn reconcile(
    store: &PasswordMetadataStore,
    enabled: bool,
    configured: &[PasswordEntry],
) -> Result<Reconciliation, ReconcileError> {
    reconcile_with(store, enabled, configured, NewLabels::Save).await
}

/// Like [`reconcile`], but never writes: keys for labels the store has not
/// seen are derived in memory and discarded afterwards.
pub async fn preview(
    store: &PasswordMetadataStore,
    enabled: bool,
    configured: &[PasswordEntry],
) -> Result<Reconciliation, ReconcileError> {
    reconcile_with(store, enabled, configured, NewLabels::Discard).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NewLabels {
    Save,
    Discard,
}

async fn reconcile_with(
    store: &PasswordMetadataStore,
    enabled: bool,
    configured: &[PasswordEntry],
    new_labels: NewLabels,
) -> Result<Reconciliation, ReconcileError> {
    let stored = store.load().await?;
    let stored_primary = stored_primary(&stored)?;
    let by_label: HashMap<&str, &PasswordMetadata> =
        stored.iter().map(|m| (m.label.as_str(), m)).collect();

    let mut combined: Vec<(&PasswordEntry, Encryptor)> = Vec::with_capacity(configured.len());
    for entry in configured {
        let encryptor = match by_label.get(entry.label.as_str()) {
            Some(meta) => {
                let e = Encryptor::aead(&entry.label, derive_key(&entry.secret, &meta.salt));
                check_canary(&e, &meta.canary, &entry.label)?;
                e
            }
            None => new_encryptor(store, entry, new_labels).await?,
        };
        combined.push((entry, encryptor));
    }

    if let Some(label) = stored_primary {
        if !configured.iter().any(|c| c.label == label) {
            return Err(ReconcileError::MissingPriorPrimary {
                label: label.to_string(),
            });
        }
    }

    let configured_primary = combined.iter().find(|(entry, _)| entry.primary);
    match (enabled, configured_primary) {
        (true, None) => return Err(ReconcileError::MissingPrimary),
        (false, Some(_)) => return Err(ReconcileError::UnexpectedPrimary),
        _ => {}
    }

    let configured_primary_label = configured_primary
        .map(|(entry, _)| entry.label.clone())
        .unwrap_or_default();
    let stored_primary_label = stored_primary.unwrap_or_default().to_string();

    let encryptor = configured_primary
        .map(|(_, e)| e.clone())
        .unwrap_or_else(Encryptor::noop);

    let changed = configured_primary_label != stored_primary_label;
    let rotation_encryptor = changed.then(|| {
        let mut decryptors: Vec<Encryptor> = combined.iter().map(|(_, e)| e.clone()).collect();
        // plaintext rows exist before the first primary and after the last one
        if stored_primary.is_none() || configured_primary.is_none() {
            decryptors.push(Encryptor::noop());
        }
        Encryptor::compound(encryptor.clone(), decryptors)
    });

    let configured_labels: HashSet<&str> = configured.iter().map(|c| c.label.as_str()).collect();
    let to_delete_labels = stored
        .iter()
        .filter(|m| !configured_labels.contains(m.label.as_str()))
        .map(|m| m.label.clone())
        .collect();

    Ok(Reconciliation {
        encryptor,
        rotation_encryptor,
        changed,
        configured_primary_label,
        stored_primary_label,
        to_delete_labels,
    })
}

fn stored_primary(stored: &[PasswordMetadata]) -> Result<Option<&str>, ReconcileError> {
    let mut primaries = stored.iter().filter(|m| m.primary);
    let first = primaries.next();
    if primaries.next().is_some() {
        return Err(ReconcileError::CorruptMetadata);
    }
    Ok(first.map(|m| m.label.as_str()))
}

async fn new_encryptor(
    store: &PasswordMetadataStore,
    entry: &PasswordEntry,
    new_labels: NewLabels,
) -> Result<Encryptor, ReconcileError> {
    let crypto_err = |source| ReconcileError::Crypto {
        label: entry.label.clone(),
        source,
    };

    let salt = generate_salt().map_err(crypto_err)?;
    let encryptor = Encryptor::aead(&entry.label, derive_key(&entry.secret, &salt));
    if new_labels == NewLabels::Discard {
        return Ok(encryptor);
    }

    let canary = seal_canary(&encryptor).map_err(crypto_err)?;
    store.save_new(&entry.label, &salt, &canary).await?;
    tracing::info!(label = %entry.label, "new-password-metadata");

    Ok(encryptor)
}
