//! ABOUTME: Database dump records found inside an archive
//! ABOUTME: Owned by the archive row and removed with it

use bw_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DatabaseBackup {
    pub id: i64,
    pub archive_id: i64,
    pub database_type: String,
    pub database_name: String,
    pub hostname: Option<String>,
    pub size_bytes: i64,
    pub backup_path: Option<String>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDatabaseBackup {
    pub database_type: String,
    pub database_name: String,
    pub hostname: Option<String>,
    pub size_bytes: i64,
    pub backup_path: Option<String>,
}

pub struct DatabaseBackupRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DatabaseBackupRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Attach dump records to an archive, returning how many were written
    pub async fn insert_for_archive(
        conn: &mut SqliteConnection,
        archive_id: i64,
        dumps: &[NewDatabaseBackup],
    ) -> Result<usize> {
        let recorded_at = now_iso8601();
        for dump in dumps {
            sqlx::query(
                r#"
                INSERT INTO database_backups (
                    archive_id, database_type, database_name, hostname, size_bytes, backup_path, recorded_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(archive_id)
            .bind(&dump.database_type)
            .bind(&dump.database_name)
            .bind(&dump.hostname)
            .bind(dump.size_bytes)
            .bind(&dump.backup_path)
            .bind(&recorded_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to record database dump {}: {}",
                    dump.database_name, e
                ))
            })?;
        }
        Ok(dumps.len())
    }

    pub async fn list_for_archive(&self, archive_id: i64) -> Result<Vec<DatabaseBackup>> {
        sqlx::query_as::<_, DatabaseBackup>(
            "SELECT * FROM database_backups WHERE archive_id = ? ORDER BY database_type, database_name",
        )
        .bind(archive_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list database dumps: {}", e)))
    }
}
