//! ABOUTME: Archive schema check at the reconciler boundary
//! ABOUTME: Turns loosely typed source archives into insertable store records

use bw_core::{parse_timestamp, to_rfc3339, Error, Result};
use bw_db::NewArchive;
use bw_source::RawArchive;

/// Validate one reported archive
///
/// Identity (hash), name, and a parseable start time are required. Missing
/// size counters count as zero; an unparseable end time is dropped. Duration
/// is the reported value when usable, otherwise end minus start.
pub fn validate_archive(raw: &RawArchive) -> Result<NewArchive> {
    if let Some(error) = &raw.decode_error {
        return Err(Error::MalformedSnapshot(format!("undecodable entry: {}", error)));
    }

    let archive_hash = required(raw.hash.as_deref(), "hash")?;
    let archive_name = required(raw.name.as_deref(), "name")?;

    let start_raw = required(raw.start.as_deref(), "start time")?;
    let start = parse_timestamp(&start_raw).ok_or_else(|| {
        Error::MalformedSnapshot(format!("unparseable start time {:?}", start_raw))
    })?;
    let end = raw.end.as_deref().and_then(parse_timestamp);

    let duration_seconds = raw
        .duration
        .filter(|d| d.is_finite() && *d >= 0.0)
        .or_else(|| {
            let end = end?;
            let elapsed = end.signed_duration_since(start);
            (elapsed.num_milliseconds() >= 0).then(|| elapsed.num_milliseconds() as f64 / 1000.0)
        });

    let original_size_bytes = size(raw.stats.original_size, "original size")?;
    let compressed_size_bytes = size(raw.stats.compressed_size, "compressed size")?;
    let deduplicated_size_bytes = size(raw.stats.deduplicated_size, "deduplicated size")?;
    let file_count = size(raw.stats.file_count, "file count")?;

    Ok(NewArchive {
        archive_name,
        archive_hash,
        hostname: non_empty(raw.hostname.as_deref()),
        username: non_empty(raw.username.as_deref()),
        comment: non_empty(raw.comment.as_deref()),
        start_time: to_rfc3339(start),
        end_time: end.map(to_rfc3339),
        duration_seconds,
        original_size_bytes,
        compressed_size_bytes,
        deduplicated_size_bytes,
        file_count,
    })
}

fn required(value: Option<&str>, field: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| Error::MalformedSnapshot(format!("missing archive {}", field)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn size(value: Option<i64>, field: &str) -> Result<i64> {
    match value {
        Some(v) if v < 0 => Err(Error::MalformedSnapshot(format!("negative {}: {}", field, v))),
        Some(v) => Ok(v),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_source::ArchiveCounters;

    fn raw() -> RawArchive {
        RawArchive {
            name: Some("nas-2024-01-15T02:00:00".into()),
            hash: Some("h2".into()),
            hostname: Some("nas".into()),
            username: Some("root".into()),
            comment: Some(String::new()),
            start: Some("2024-01-15T02:00:00.000000".into()),
            end: Some("2024-01-15T02:12:34.500000".into()),
            duration: None,
            stats: ArchiveCounters {
                original_size: Some(1000),
                compressed_size: Some(500),
                deduplicated_size: Some(100),
                file_count: Some(7),
            },
            decode_error: None,
        }
    }

    #[test]
    fn test_valid_archive_is_normalized() {
        let archive = validate_archive(&raw()).unwrap();

        assert_eq!(archive.start_time, "2024-01-15T02:00:00Z");
        assert_eq!(archive.end_time.as_deref(), Some("2024-01-15T02:12:34Z"));
        assert_eq!(archive.duration_seconds, Some(754.5));
        assert_eq!(archive.comment, None);
        assert_eq!(archive.file_count, 7);
    }

    #[test]
    fn test_reported_duration_wins() {
        let mut input = raw();
        input.duration = Some(10.0);
        assert_eq!(validate_archive(&input).unwrap().duration_seconds, Some(10.0));

        input.duration = Some(f64::NAN);
        assert_eq!(validate_archive(&input).unwrap().duration_seconds, Some(754.5));

        input.end = None;
        assert_eq!(validate_archive(&input).unwrap().duration_seconds, None);
    }

    #[test]
    fn test_required_fields() {
        let mut no_hash = raw();
        no_hash.hash = Some("  ".into());
        assert!(matches!(validate_archive(&no_hash), Err(Error::MalformedSnapshot(_))));

        let mut no_name = raw();
        no_name.name = None;
        assert!(validate_archive(&no_name).is_err());

        let mut bad_start = raw();
        bad_start.start = Some("last tuesday".into());
        let err = validate_archive(&bad_start).unwrap_err();
        assert!(err.to_string().contains("last tuesday"));
    }

    #[test]
    fn test_sizes_default_to_zero_but_never_negative() {
        let mut input = raw();
        input.stats = ArchiveCounters::default();
        let archive = validate_archive(&input).unwrap();
        assert_eq!(archive.original_size_bytes, 0);

        input.stats.compressed_size = Some(-1);
        assert!(validate_archive(&input).is_err());
    }

    #[test]
    fn test_undecodable_entry() {
        let input = RawArchive::undecodable(Some("x".into()), "invalid type");
        assert!(validate_archive(&input).is_err());
    }
}
