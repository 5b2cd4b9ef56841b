//! ABOUTME: Repository store on SQLite with migrations and typed table access
//! ABOUTME: Persists repositories, archives, stats snapshots, sources, and retention

use bw_core::{Error, Result};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, Sqlite, SqlitePool, Transaction,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Tables reported by [`Db::stats`]; a fixed list because table names cannot be bound
const COUNTED_TABLES: &[&str] = &[
    "repositories",
    "backup_archives",
    "repository_stats",
    "backup_sources",
    "pruning_config",
    "database_backups",
];

/// Database connection pool and operations
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        Self::with_options(db_path, 10, true).await
    }

    /// Open the database with an explicit pool size and journal mode
    #[instrument(skip(db_path))]
    pub async fn with_options(db_path: &str, pool_size: u32, wal: bool) -> Result<Self> {
        info!("Initializing database at: {}", db_path);

        let database_url = format!("sqlite://{}", db_path);
        if !Sqlite::database_exists(&database_url)
            .await
            .unwrap_or(false)
        {
            info!("Creating database: {}", database_url);
            Sqlite::create_database(&database_url)
                .await
                .map_err(|e| Error::Database(format!("Failed to create database: {}", e)))?;
        }

        let journal_mode = if wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        // Readers of the API must never block on a reconciliation; WAL gives
        // them the last committed snapshot while a writer holds its transaction.
        let connect_options = SqliteConnectOptions::new()
            .filename(db_path)
            .journal_mode(journal_mode)
            .create_if_missing(true)
            .foreign_keys(true)
            .pragma("synchronous", "NORMAL")
            .pragma("temp_store", "memory")
            .pragma("busy_timeout", "30000");

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::Database(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    /// Run database migrations
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a write transaction; dropping it without commit rolls back
    ///
    /// Opens with `BEGIN IMMEDIATE` so the write lock is taken up front and
    /// concurrent writers queue on the busy timeout instead of failing to
    /// upgrade a read lock.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))
    }

    /// Check database health
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        debug!("Performing database health check");

        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    /// Row counts per table
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let mut table_counts = BTreeMap::new();

        for &table in COUNTED_TABLES {
            let query = format!("SELECT COUNT(*) AS count FROM {}", table);
            let row = sqlx::query(&query)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(format!("Failed to get count for {}: {}", table, e))
                })?;

            let count: i64 = row.get("count");
            table_counts.insert(table.to_string(), count);
        }

        Ok(DatabaseStats { table_counts })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseStats {
    pub table_counts: BTreeMap<String, i64>,
}

pub mod repositories;

pub use repositories::{
    archives::{Archive, ArchiveListing, ArchiveRepository, ArchiveTotals, DailyBucket, NewArchive},
    backup_repositories::{
        BackupRepository, BackupRepositoryStore, LocationType, RepositoryOverview,
        UpsertRepositoryRequest,
    },
    backup_sources::{BackupSource, BackupSourceRepository, SourceSyncSummary},
    database_backups::{DatabaseBackup, DatabaseBackupRepository, NewDatabaseBackup},
    pruning_config::{PruningConfig, PruningConfigRepository, RetentionValues},
    repository_stats::{NewRepositoryStats, RepositoryStats, RepositoryStatsRepository},
};
