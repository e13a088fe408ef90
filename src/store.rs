use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::error::StoreError;

/// Stored salt and canary for one password label.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordMetadata {
    pub label: String,
    pub salt: Vec<u8>,
    pub canary: Vec<u8>,
    pub primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sole writer of the `password_metadata` table.
#[derive(Clone)]
pub struct PasswordMetadataStore {
    pool: SqlitePool,
}

impl PasswordMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All rows, oldest first.
    pub async fn load(&self) -> Result<Vec<PasswordMetadata>, StoreError> {
        let rows = sqlx::query_as::<_, PasswordMetadata>(
            r#"
            SELECT label, salt, canary, "primary", created_at, updated_at
            FROM password_metadata
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Record a previously unseen label. New rows are never primary.
    pub async fn save_new(
        &self,
        label: &str,
        salt: &[u8],
        canary: &[u8],
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO password_metadata (label, salt, canary, "primary", created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(label)
        .bind(salt)
        .bind(canary)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(label, "password metadata saved");
        Ok(())
    }

    /// Make `label` the only primary row, or clear the flag everywhere
    /// when `label` is empty or `"none"`. Runs in one transaction.
    pub async fn update_primary(&self, label: &str) -> Result<(), StoreError> {
        let label = if label == "none" { "" } else { label };

        let mut tx = self.pool.begin().await?;

        let current: Vec<String> =
            sqlx::query_scalar(r#"SELECT label FROM password_metadata WHERE "primary" = 1"#)
                .fetch_all(&mut *tx)
                .await?;

        let unchanged = match current.as_slice() {
            [] => label.is_empty(),
            [only] => only == label,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        let now = Utc::now();
        sqlx::query(
            r#"UPDATE password_metadata SET "primary" = 0, updated_at = ? WHERE "primary" = 1"#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if !label.is_empty() {
            let result = sqlx::query(
                r#"UPDATE password_metadata SET "primary" = 1, updated_at = ? WHERE label = ?"#,
            )
            .bind(now)
            .bind(label)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // dropping tx rolls back the demotion above
                return Err(StoreError::UnknownLabel(label.to_string()));
            }
        }

        tx.commit().await?;
        tracing::debug!(label, "primary password updated");
        Ok(())
    }

    /// Delete rows by label in one transaction. Unknown labels are ignored.
    pub async fn delete_by_labels(&self, labels: &[String]) -> Result<(), StoreError> {
        if labels.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for label in labels {
            sqlx::query("DELETE FROM password_metadata WHERE label = ?")
                .bind(label)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn store() -> PasswordMetadataStore {
        let db = Database::in_memory().await.unwrap();
        PasswordMetadataStore::new(db.pool().clone())
    }

    async fn primaries(store: &PasswordMetadataStore) -> Vec<String> {
        store
            .load()
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.primary)
            .map(|m| m.label)
            .collect()
    }

    #[tokio::test]
    async fn save_new_is_never_primary() {
        let store = store().await;
        store.save_new("barfoo", &[1; 32], b"canary").await.unwrap();

        let rows = store.load().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "barfoo");
        assert_eq!(rows[0].salt, vec![1; 32]);
        assert_eq!(rows[0].canary, b"canary");
        assert!(!rows[0].primary);
    }

    #[tokio::test]
    async fn load_keeps_insertion_order() {
        let store = store().await;
        store.save_new("zzzzz", &[1; 32], b"c").await.unwrap();
        store.save_new("aaaaa", &[2; 32], b"c").await.unwrap();

        let labels: Vec<_> = store.load().await.unwrap().into_iter().map(|m| m.label).collect();
        assert_eq!(labels, ["zzzzz", "aaaaa"]);
    }

    #[tokio::test]
    async fn duplicate_label_is_rejected() {
        let store = store().await;
        store.save_new("barfoo", &[1; 32], b"c").await.unwrap();
        assert!(matches!(
            store.save_new("barfoo", &[2; 32], b"c").await,
            Err(StoreError::Database(_))
        ));
    }

    #[tokio::test]
    async fn update_primary_moves_flag() {
        let store = store().await;
        store.save_new("first", &[1; 32], b"c").await.unwrap();
        store.save_new("second", &[2; 32], b"c").await.unwrap();

        store.update_primary("first").await.unwrap();
        assert_eq!(primaries(&store).await, ["first"]);

        store.update_primary("second").await.unwrap();
        assert_eq!(primaries(&store).await, ["second"]);
    }

    #[tokio::test]
    async fn update_primary_clears_on_empty_or_none() {
        let store = store().await;
        store.save_new("first", &[1; 32], b"c").await.unwrap();

        store.update_primary("first").await.unwrap();
        store.update_primary("").await.unwrap();
        assert!(primaries(&store).await.is_empty());

        store.update_primary("first").await.unwrap();
        store.update_primary("none").await.unwrap();
        assert!(primaries(&store).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_label_rolls_back() {
        let store = store().await;
        store.save_new("first", &[1; 32], b"c").await.unwrap();
        store.update_primary("first").await.unwrap();

        let err = store.update_primary("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownLabel(ref l) if l == "missing"));
        assert_eq!(primaries(&store).await, ["first"]);
    }

    #[tokio::test]
    async fn same_primary_performs_no_writes() {
        let store = store().await;
        store.save_new("first", &[1; 32], b"c").await.unwrap();
        store.update_primary("first").await.unwrap();
        let before = store.load().await.unwrap()[0].updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.update_primary("first").await.unwrap();

        assert_eq!(store.load().await.unwrap()[0].updated_at, before);
    }

    #[tokio::test]
    async fn update_primary_repairs_multiple_primaries() {
        let store = store().await;
        store.save_new("first", &[1; 32], b"c").await.unwrap();
        store.save_new("second", &[2; 32], b"c").await.unwrap();
        sqlx::query(r#"UPDATE password_metadata SET "primary" = 1"#)
            .execute(&store.pool)
            .await
            .unwrap();

        store.update_primary("second").await.unwrap();
        assert_eq!(primaries(&store).await, ["second"]);
    }

    #[tokio::test]
    async fn delete_by_labels_ignores_missing() {
        let store = store().await;
        store.save_new("first", &[1; 32], b"c").await.unwrap();
        store.save_new("second", &[2; 32], b"c").await.unwrap();

        store
            .delete_by_labels(&["first".to_string(), "missing".to_string()])
            .await
            .unwrap();
        store.delete_by_labels(&[]).await.unwrap();

        let labels: Vec<_> = store.load().await.unwrap().into_iter().map(|m| m.label).collect();
        assert_eq!(labels, ["second"]);
    }
}
