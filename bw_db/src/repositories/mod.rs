//! ABOUTME: Table access modules providing typed database operations
//! ABOUTME: Writes take a connection so callers can group them in one transaction

pub mod archives;
pub mod backup_repositories;
pub mod backup_sources;
pub mod database_backups;
pub mod pruning_config;
pub mod repository_stats;
