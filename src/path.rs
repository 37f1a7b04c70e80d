//! Version-filename utilities for the `_delta_log` directory (spec §4.1, §6).

use crate::error::{DeltaResult, Error};
use crate::Version;

/// Commit and checkpoint filenames pad the version to this many characters.
pub const VERSION_WIDTH: usize = 20;

/// Largest version this engine will format. `v >= 10^20` is rejected because
/// it would overflow the fixed-width filename.
const MAX_VERSION: u128 = 10u128.pow(VERSION_WIDTH as u32);

/// Format a version as a zero-padded 20-character decimal string, e.g. `0` ->
/// `"00000000000000000000"`.
pub fn format_version(version: Version) -> DeltaResult<String> {
    if version < 0 {
        return Err(Error::validation(format!(
            "version must be non-negative, got {version}"
        )));
    }
    if (version as u128) >= MAX_VERSION {
        return Err(Error::validation(format!(
            "version {version} overflows the {VERSION_WIDTH}-digit filename format"
        )));
    }
    Ok(format!("{version:0width$}", width = VERSION_WIDTH))
}

/// The kind of `_delta_log` entry a filename names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryKind {
    Commit,
    SinglePartCheckpoint,
    /// 1-indexed `(part, total_parts)`.
    MultiPartCheckpoint(u32, u32),
}

/// A parsed `_delta_log` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogPath {
    pub version: Version,
    pub kind: LogEntryKind,
    /// The filename (last path segment), not the full path.
    pub filename: String,
}

/// Parse a log entry filename or full path. Tolerant of embedded directory
/// paths: only the last `/`-separated segment is interpreted.
///
/// Recognizes:
///   - `<20digits>.json` -> [`LogEntryKind::Commit`]
///   - `<20digits>.checkpoint.parquet` -> [`LogEntryKind::SinglePartCheckpoint`]
///   - `<20digits>.checkpoint.<n>.<N>.parquet` -> [`LogEntryKind::MultiPartCheckpoint`]
///
/// Any other filename (e.g. `_last_checkpoint`, a CRC file, a sidecar) yields
/// `None` rather than an error — callers filter the directory listing for the
/// entries they care about.
pub fn parse_log_path(path: &str) -> Option<ParsedLogPath> {
    let filename = path.rsplit('/').next().unwrap_or(path);

    let rest = filename.strip_suffix(".json")?;
    if let Ok(version) = rest.parse::<Version>() {
        if rest.len() == VERSION_WIDTH {
            return Some(ParsedLogPath {
                version,
                kind: LogEntryKind::Commit,
                filename: filename.to_string(),
            });
        }
    }
    parse_checkpoint_path(filename)
}

fn parse_checkpoint_path(filename: &str) -> Option<ParsedLogPath> {
    let rest = filename.strip_suffix(".parquet")?;
    let rest = rest.strip_suffix(".checkpoint")?;
    // single-part: "<20digits>"
    if rest.len() == VERSION_WIDTH {
        if let Ok(version) = rest.parse::<Version>() {
            return Some(ParsedLogPath {
                version,
                kind: LogEntryKind::SinglePartCheckpoint,
                filename: filename.to_string(),
            });
        }
        return None;
    }
    None
}

/// Parse a multi-part checkpoint filename, which has the shape
/// `<20digits>.checkpoint.<n>.<N>.parquet`. Kept distinct from
/// [`parse_log_path`] because the single-part matcher above greedily strips a
/// single `.checkpoint` suffix; multi-part filenames have two more dot
/// segments in between.
pub fn parse_multipart_checkpoint_path(filename: &str) -> Option<ParsedLogPath> {
    let rest = filename.strip_suffix(".parquet")?;
    let mut parts = rest.rsplitn(3, '.');
    let total: u32 = parts.next()?.parse().ok()?;
    let part: u32 = parts.next()?.parse().ok()?;
    let prefix = parts.next()?;
    let version_str = prefix.strip_suffix(".checkpoint")?;
    if version_str.len() != VERSION_WIDTH {
        return None;
    }
    let version: Version = version_str.parse().ok()?;
    if part == 0 || total == 0 || part > total {
        return None;
    }
    Some(ParsedLogPath {
        version,
        kind: LogEntryKind::MultiPartCheckpoint(part, total),
        filename: filename.to_string(),
    })
}

pub fn commit_filename(version: Version) -> DeltaResult<String> {
    Ok(format!("{}.json", format_version(version)?))
}

pub fn single_part_checkpoint_filename(version: Version) -> DeltaResult<String> {
    Ok(format!("{}.checkpoint.parquet", format_version(version)?))
}

pub fn multi_part_checkpoint_filename(version: Version, part: u32, total: u32) -> DeltaResult<String> {
    Ok(format!(
        "{}.checkpoint.{part:010}.{total:010}.parquet",
        format_version(version)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded() {
        assert_eq!(format_version(0).unwrap(), "00000000000000000000");
        assert_eq!(format_version(42).unwrap(), "00000000000000000042");
    }

    #[test]
    fn rejects_negative_and_overflow() {
        assert!(format_version(-1).is_err());
        assert!(format_version(10i64.pow(20)).is_err());
    }

    #[test]
    fn parses_commit_from_bare_filename_and_full_path() {
        let p = parse_log_path("00000000000000000007.json").unwrap();
        assert_eq!(p.version, 7);
        assert_eq!(p.kind, LogEntryKind::Commit);

        let p = parse_log_path("s3://bucket/table/_delta_log/00000000000000000007.json").unwrap();
        assert_eq!(p.version, 7);
    }

    #[test]
    fn parses_single_part_checkpoint() {
        let p = parse_log_path("00000000000000000010.checkpoint.parquet").unwrap();
        assert_eq!(p.version, 10);
        assert_eq!(p.kind, LogEntryKind::SinglePartCheckpoint);
    }

    #[test]
    fn parses_multipart_checkpoint() {
        let p = parse_multipart_checkpoint_path(
            "00000000000000000010.checkpoint.0000000001.0000000003.parquet",
        )
        .unwrap();
        assert_eq!(p.version, 10);
        assert_eq!(p.kind, LogEntryKind::MultiPartCheckpoint(1, 3));
    }

    #[test]
    fn ignores_non_log_files() {
        assert!(parse_log_path("_last_checkpoint").is_none());
        assert!(parse_log_path("00000000000000000001.crc").is_none());
    }
}
