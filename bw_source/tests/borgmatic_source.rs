//! ABOUTME: End-to-end tests for BorgmaticSource through the real process runner
//! ABOUTME: A fixture invoker serves canned borgmatic output from files via cat

use async_trait::async_trait;
use bw_core::{Error, Result};
use bw_proc::CommandSpec;
use bw_source::{BorgmaticSource, Invoker, RepositoryTarget, SnapshotSource};
use std::{path::PathBuf, time::Duration};
use tempfile::TempDir;
use test_support::{
    sample_borgmatic_config, sample_database_listing, sample_info_json, sample_repository_path,
};

/// Maps `borgmatic info` / `borgmatic list` to `cat <fixture>`
struct FixtureInvocation {
    dir: PathBuf,
}

#[async_trait]
impl Invoker for FixtureInvocation {
    fn label(&self) -> &'static str {
        "fixture"
    }

    fn borgmatic(&self, args: Vec<String>) -> CommandSpec {
        let file = match args.first().map(String::as_str) {
            Some("info") => "info.json",
            Some("list") => "list.txt",
            _ => "unknown",
        };
        CommandSpec::new("cat")
            .args([self.dir.join(file).to_string_lossy().to_string()])
            .timeout(Duration::from_secs(5))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.dir.join(path)).await?)
    }
}

fn fixture_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

fn source(dir: &TempDir) -> BorgmaticSource<FixtureInvocation> {
    BorgmaticSource::new(FixtureInvocation {
        dir: dir.path().to_path_buf(),
    })
    .with_config_path(Some("config.yaml".to_string()))
}

fn target() -> RepositoryTarget {
    RepositoryTarget::new("main", sample_repository_path())
}

#[tokio::test]
async fn fetch_assembles_full_snapshot() {
    let info = sample_info_json();
    let dir = fixture_dir(&[
        ("info.json", info.as_str()),
        ("list.txt", sample_database_listing()),
        ("config.yaml", sample_borgmatic_config()),
    ]);

    let snapshot = source(&dir).fetch(&target()).await.unwrap();

    assert_eq!(snapshot.archives.len(), 2);
    assert_eq!(snapshot.database_dumps.len(), 2);
    let configuration = snapshot.configuration.expect("configuration should be read");
    assert_eq!(configuration.retention.keep_daily, Some(7));
}

#[tokio::test]
async fn optional_parts_are_best_effort() {
    let info = sample_info_json();
    let dir = fixture_dir(&[("info.json", info.as_str())]);

    let snapshot = source(&dir).fetch(&target()).await.unwrap();

    assert_eq!(snapshot.archives.len(), 2);
    assert!(snapshot.database_dumps.is_empty());
    assert!(snapshot.configuration.is_none());
}

#[tokio::test]
async fn dumps_can_be_disabled() {
    let info = sample_info_json();
    let dir = fixture_dir(&[
        ("info.json", info.as_str()),
        ("list.txt", sample_database_listing()),
    ]);

    let snapshot = source(&dir)
        .with_database_dumps(false)
        .fetch(&target())
        .await
        .unwrap();
    assert!(snapshot.database_dumps.is_empty());
}

#[tokio::test]
async fn failing_info_is_source_unavailable() {
    let dir = fixture_dir(&[]);
    let result = source(&dir).fetch(&target()).await;
    assert!(matches!(result, Err(Error::SourceUnavailable(_))));
}

#[tokio::test]
async fn unreadable_info_is_malformed() {
    let dir = fixture_dir(&[("info.json", "Summary: borgmatic failed\n")]);
    let result = source(&dir).fetch(&target()).await;
    assert!(matches!(result, Err(Error::MalformedSnapshot(_))));
}
