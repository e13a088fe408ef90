//! Protected tables and the record DAO that reads and writes them.

use serde_json::Value;
use sqlx::{Row, Sqlite, sqlite::SqlitePool};

use crate::crypto::Encryptor;
use crate::error::{RecordError, RecordStoreError};
use crate::format::{self, ColumnFormat, ColumnValue};

/// A table with one encrypted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedTable {
    pub name: &'static str,
    pub column: &'static str,
    pub format: ColumnFormat,
}

pub const SERVICE_INSTANCE_DETAILS: ProtectedTable = ProtectedTable {
    name: "service_instance_details",
    column: "other_details",
    format: ColumnFormat::Blob,
};

pub const SERVICE_BINDING_CREDENTIALS: ProtectedTable = ProtectedTable {
    name: "service_binding_credentials",
    column: "other_details",
    format: ColumnFormat::Blob,
};

pub const PROVISION_REQUEST_DETAILS: ProtectedTable = ProtectedTable {
    name: "provision_request_details",
    column: "request_details",
    format: ColumnFormat::Text,
};

pub const TERRAFORM_WORKSPACE: ProtectedTable = ProtectedTable {
    name: "terraform_workspace",
    column: "workspace",
    format: ColumnFormat::Blob,
};

/// Every protected table, in the order they are re-encrypted.
pub const PROTECTED_TABLES: [ProtectedTable; 4] = [
    SERVICE_INSTANCE_DETAILS,
    SERVICE_BINDING_CREDENTIALS,
    PROVISION_REQUEST_DETAILS,
    TERRAFORM_WORKSPACE,
];

/// One row of a protected table. `value` is `None` for a NULL column.
#[derive(Debug, Clone)]
pub struct ProtectedRow {
    pub rowid: i64,
    pub id: String,
    pub value: Option<ColumnValue>,
}

impl ProtectedTable {
    /// Up to `limit` rows with rowid greater than `after`, in rowid order.
    pub(crate) async fn fetch_batch<'e, E>(
        &self,
        executor: E,
        after: i64,
        limit: i64,
    ) -> Result<Vec<ProtectedRow>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT rowid, id, {col} FROM {table} WHERE rowid > ? ORDER BY rowid LIMIT ?",
            col = self.column,
            table = self.name,
        );

        let rows = sqlx::query(&sql)
            .bind(after)
            .bind(limit)
            .fetch_all(executor)
            .await?;

        rows.iter()
            .map(|row| -> Result<ProtectedRow, sqlx::Error> {
                let value = match self.format {
                    ColumnFormat::Blob => {
                        row.try_get::<Option<Vec<u8>>, _>(2)?.map(ColumnValue::Blob)
                    }
                    ColumnFormat::Text => {
                        row.try_get::<Option<String>, _>(2)?.map(ColumnValue::Text)
                    }
                };
                Ok(ProtectedRow {
                    rowid: row.try_get(0)?,
                    id: row.try_get(1)?,
                    value,
                })
            })
            .collect()
    }

    pub(crate) async fn fetch_one<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<Option<ColumnValue>>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {col} FROM {table} WHERE id = ?",
            col = self.column,
            table = self.name,
        );

        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(executor).await? else {
            return Ok(None);
        };

        let value = match self.format {
            ColumnFormat::Blob => row.try_get::<Option<Vec<u8>>, _>(0)?.map(ColumnValue::Blob),
            ColumnFormat::Text => row.try_get::<Option<String>, _>(0)?.map(ColumnValue::Text),
        };
        Ok(Some(value))
    }

    /// Overwrite the protected column of an existing row.
    pub(crate) async fn update<'e, E>(
        &self,
        executor: E,
        id: &str,
        value: ColumnValue,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "UPDATE {table} SET {col} = ? WHERE id = ?",
            col = self.column,
            table = self.name,
        );

        let query = match value {
            ColumnValue::Blob(b) => sqlx::query(&sql).bind(b),
            ColumnValue::Text(t) => sqlx::query(&sql).bind(t),
        };
        query.bind(id).execute(executor).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        pool: &SqlitePool,
        id: &str,
        value: ColumnValue,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            "INSERT INTO {table} (id, {col}) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET {col} = excluded.{col}",
            col = self.column,
            table = self.name,
        );

        let query = sqlx::query(&sql).bind(id);
        let query = match value {
            ColumnValue::Blob(b) => query.bind(b),
            ColumnValue::Text(t) => query.bind(t),
        };
        query.execute(pool).await?;
        Ok(())
    }
}

/// Reads and writes JSON documents in protected columns through the
/// encryptor it was built with.
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    encryptor: Encryptor,
}

impl RecordStore {
    pub fn new(pool: SqlitePool, encryptor: Encryptor) -> Self {
        Self { pool, encryptor }
    }

    /// Encrypt `document` and store it under `id`, replacing any previous value.
    pub async fn put(
        &self,
        table: &ProtectedTable,
        id: &str,
        document: &Value,
    ) -> Result<(), RecordStoreError> {
        let plaintext = serde_json::to_vec(document).map_err(|source| RecordStoreError::Json {
            table: table.name,
            id: id.to_string(),
            source,
        })?;

        let value = format::seal(&self.encryptor, table.format, &plaintext).map_err(|cause| {
            RecordError {
                table: table.name,
                id: id.to_string(),
                cause,
            }
        })?;

        table.upsert(&self.pool, id, value).await?;
        Ok(())
    }

    /// Decrypt the document stored under `id`. `None` if the row is
    /// missing or its column is NULL.
    pub async fn get(
        &self,
        table: &ProtectedTable,
        id: &str,
    ) -> Result<Option<Value>, RecordStoreError> {
        let Some(Some(value)) = table.fetch_one(&self.pool, id).await? else {
            return Ok(None);
        };

        let plaintext = format::open(&self.encryptor, &value).map_err(|cause| RecordError {
            table: table.name,
            id: id.to_string(),
            cause,
        })?;

        let document = serde_json::from_slice(&plaintext).map_err(|source| RecordStoreError::Json {
            table: table.name,
            id: id.to_string(),
            source,
        })?;
        Ok(Some(document))
    }

    /// Raw stored value, for inspecting the at-rest form.
    pub async fn raw(
        &self,
        table: &ProtectedTable,
        id: &str,
    ) -> Result<Option<ColumnValue>, RecordStoreError> {
        Ok(table.fetch_one(&self.pool, id).await?.flatten())
    }
}
