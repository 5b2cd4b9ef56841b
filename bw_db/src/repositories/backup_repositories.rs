//! ABOUTME: Backup repository rows keyed by configured name
//! ABOUTME: Upsert keeps identity and history; the borg identifier is write-once

use bw_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::fmt;
use tracing::{debug, instrument, warn};

/// Where a repository lives relative to the host running borgmatic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Local,
    Remote,
}

impl LocationType {
    /// Classify a repository path; `ssh://` URLs are remote
    pub fn from_path(path: &str) -> Self {
        if path.trim_start().starts_with("ssh://") {
            Self::Remote
        } else {
            Self::Local
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct BackupRepository {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub location_type: String,
    pub repository_identifier: Option<String>,
    pub encryption_mode: Option<String>,
    pub size_on_disk_bytes: Option<i64>,
    pub last_modified: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Repository row joined with archive counters for listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RepositoryOverview {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub repository: BackupRepository,
    pub archive_count: i64,
    pub last_backup_time: Option<String>,
}

/// Fields refreshed on every observation of a repository
#[derive(Debug, Clone)]
pub struct UpsertRepositoryRequest {
    pub name: String,
    pub path: String,
    pub location_type: LocationType,
    pub repository_identifier: Option<String>,
    pub encryption_mode: Option<String>,
    pub size_on_disk_bytes: Option<i64>,
    pub last_modified: Option<String>,
}

/// Repository table access
pub struct BackupRepositoryStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BackupRepositoryStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a repository by name; returns the row and whether it was created
    ///
    /// `repository_identifier` is only written while it is still unknown.
    #[instrument(skip(conn, request), fields(name = %request.name))]
    pub async fn upsert(
        conn: &mut SqliteConnection,
        request: &UpsertRepositoryRequest,
    ) -> Result<(BackupRepository, bool)> {
        let now = now_iso8601();

        let existing = sqlx::query_as::<_, BackupRepository>(
            "SELECT * FROM repositories WHERE name = ?",
        )
        .bind(&request.name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to look up repository: {}", e)))?;

        match existing {
            Some(existing) => {
                if let (Some(stored), Some(reported)) = (
                    existing.repository_identifier.as_deref(),
                    request.repository_identifier.as_deref(),
                ) {
                    if stored != reported {
                        warn!(
                            stored = %stored,
                            reported = %reported,
                            "Source reported a different repository id; keeping the stored one"
                        );
                    }
                }

                debug!(id = existing.id, "Refreshing repository metadata");
                let updated = sqlx::query_as::<_, BackupRepository>(
                    r#"
                    UPDATE repositories
                    SET path = ?,
                        location_type = ?,
                        repository_identifier = COALESCE(repository_identifier, ?),
                        encryption_mode = COALESCE(?, encryption_mode),
                        size_on_disk_bytes = COALESCE(?, size_on_disk_bytes),
                        last_modified = COALESCE(?, last_modified),
                        updated_at = ?
                    WHERE id = ?
                    RETURNING *
                    "#,
                )
                .bind(&request.path)
                .bind(request.location_type.as_str())
                .bind(&request.repository_identifier)
                .bind(&request.encryption_mode)
                .bind(request.size_on_disk_bytes)
                .bind(&request.last_modified)
                .bind(&now)
                .bind(existing.id)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| Error::Database(format!("Failed to update repository: {}", e)))?;

                Ok((updated, false))
            }
            None => {
                debug!("Creating repository");
                let created = sqlx::query_as::<_, BackupRepository>(
                    r#"
                    INSERT INTO repositories (
                        name, path, location_type, repository_identifier, encryption_mode,
                        size_on_disk_bytes, last_modified, created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING *
                    "#,
                )
                .bind(&request.name)
                .bind(&request.path)
                .bind(request.location_type.as_str())
                .bind(&request.repository_identifier)
                .bind(&request.encryption_mode)
                .bind(request.size_on_disk_bytes)
                .bind(&request.last_modified)
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| Error::Database(format!("Failed to create repository: {}", e)))?;

                Ok((created, true))
            }
        }
    }

    /// Find repository by name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<BackupRepository>> {
        sqlx::query_as::<_, BackupRepository>("SELECT * FROM repositories WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to find repository: {}", e)))
    }

    /// Find repository by id
    pub async fn find_by_id(&self, id: i64) -> Result<Option<BackupRepository>> {
        sqlx::query_as::<_, BackupRepository>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to find repository: {}", e)))
    }

    /// All repositories with archive count and most recent backup time, by name
    #[instrument(skip(conn))]
    pub async fn list_overview(conn: &mut SqliteConnection) -> Result<Vec<RepositoryOverview>> {
        sqlx::query_as::<_, RepositoryOverview>(
            r#"
            SELECT r.*,
                   COUNT(a.id) AS archive_count,
                   MAX(COALESCE(a.end_time, a.start_time)) AS last_backup_time
            FROM repositories r
            LEFT JOIN backup_archives a ON a.repository_id = r.id
            GROUP BY r.id
            ORDER BY r.name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to list repositories: {}", e)))
    }

    /// Administrative removal; cascades to archives, stats, sources, and retention
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete repository: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}
