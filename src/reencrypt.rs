//! Batch re-encryption and verification of every protected column.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::IgnoredAny;
use sqlx::sqlite::SqlitePool;

use crate::crypto::Encryptor;
use crate::error::{CryptoError, RecordError, ReencryptError};
use crate::format::{self, ColumnValue};
use crate::records::{PROTECTED_TABLES, ProtectedTable};

/// Rows read and rewritten per transaction.
pub const BATCH_SIZE: i64 = 100;

/// Rewrite every protected column: read through `encryptor`'s decrypting
/// side, write through its encrypting side.
///
/// Each batch commits on its own, so an error or interruption leaves
/// earlier batches under the new key and later ones untouched. Running
/// it again resumes safely as long as `encryptor` still reads both.
///
/// Returns the number of rows rewritten.
pub async fn reencrypt_all(
    pool: &SqlitePool,
    encryptor: &Encryptor,
    cancel: &AtomicBool,
) -> Result<u64, ReencryptError> {
    let mut total = 0;
    for table in &PROTECTED_TABLES {
        total += reencrypt_table(pool, table, encryptor, cancel).await?;
    }
    Ok(total)
}

async fn reencrypt_table(
    pool: &SqlitePool,
    table: &ProtectedTable,
    encryptor: &Encryptor,
    cancel: &AtomicBool,
) -> Result<u64, ReencryptError> {
    let db_err = |source| ReencryptError::Database {
        table: table.name,
        source,
    };

    let mut after = 0;
    let mut rewritten = 0;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(ReencryptError::Interrupted { table: table.name });
        }

        let mut tx = pool.begin().await.map_err(db_err)?;
        let rows = table
            .fetch_batch(&mut *tx, after, BATCH_SIZE)
            .await
            .map_err(db_err)?;
        if rows.is_empty() {
            break;
        }

        for row in &rows {
            after = row.rowid;
            let Some(value) = &row.value else {
                continue;
            };

            let plaintext = read(encryptor, value).map_err(|source| ReencryptError::Decrypt {
                table: table.name,
                id: row.id.clone(),
                source,
            })?;
            let sealed = format::seal(encryptor, table.format, &plaintext).map_err(|source| {
                ReencryptError::Encrypt {
                    table: table.name,
                    id: row.id.clone(),
                    source,
                }
            })?;

            table.update(&mut *tx, &row.id, sealed).await.map_err(db_err)?;
            rewritten += 1;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(table = table.name, rows = rows.len(), after, "batch committed");

        if rows.len() < BATCH_SIZE as usize {
            break;
        }
    }

    tracing::info!(table = table.name, rows = rewritten, "table reencrypted");
    Ok(rewritten)
}

/// Try to read every protected column with `encryptor` and report all
/// that fail, rather than stopping at the first.
pub async fn verify_all(
    pool: &SqlitePool,
    encryptor: &Encryptor,
) -> Result<Vec<RecordError>, ReencryptError> {
    let mut failures = Vec::new();

    for table in &PROTECTED_TABLES {
        let mut after = 0;
        loop {
            let rows = table
                .fetch_batch(pool, after, BATCH_SIZE)
                .await
                .map_err(|source| ReencryptError::Database {
                    table: table.name,
                    source,
                })?;

            for row in &rows {
                after = row.rowid;
                if let Some(value) = &row.value {
                    if let Err(cause) = read(encryptor, value) {
                        failures.push(RecordError {
                            table: table.name,
                            id: row.id.clone(),
                            cause,
                        });
                    }
                }
            }

            if rows.len() < BATCH_SIZE as usize {
                break;
            }
        }
    }

    Ok(failures)
}

/// Decrypt a stored value and check it is the JSON document it should be.
/// A no-op decryptor "succeeds" on any ciphertext, so decryption alone
/// proves nothing.
fn read(encryptor: &Encryptor, value: &ColumnValue) -> Result<Vec<u8>, CryptoError> {
    let plaintext = format::open(encryptor, value)?;
    serde_json::from_slice::<IgnoredAny>(&plaintext)
        .map_err(|e| CryptoError::InvalidEncoding(format!("decrypted value is not JSON: {e}")))?;
    Ok(plaintext)
}
