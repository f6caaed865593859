//! Bundle inspection and bounded extraction.
//!
//! A bundle is untrusted: both the scan and the extraction keep a running total
//! of decompressed bytes and stop as soon as it passes the ceiling, so a small
//! upload cannot expand into unbounded work or disk usage.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument, warn};
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a valid zip archive: {0}")]
    Malformed(String),
    #[error("uncompressed contents exceed the {limit} byte ceiling")]
    TooLarge { limit: u64 },
    #[error("archive i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Totals gathered by a successful scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub uncompressed_bytes: u64,
}

fn open(path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ZipArchive::new(file).map_err(|e| ArchiveError::Malformed(e.to_string()))
}

fn entry_error(err: ZipError) -> ArchiveError {
    ArchiveError::Malformed(err.to_string())
}

/// Stream every entry through the decompressor without writing anything to disk.
///
/// Checks, in order: the file is a zip archive; the cumulative decompressed size
/// stays within `limit`. The scan aborts on the first entry that pushes the
/// total over the ceiling.
#[instrument(skip_all, fields(path = %path.display(), limit))]
pub fn scan_archive(path: &Path, limit: u64) -> Result<ArchiveSummary, ArchiveError> {
    let mut archive = open(path)?;
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(entry_error)?;
        if entry.is_dir() {
            continue;
        }
        let remaining = limit - total;
        let mut bounded = entry.take(remaining.saturating_add(1));
        let read = io::copy(&mut bounded, &mut io::sink())
            .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
        total += read;
        if total > limit {
            warn!(index, total, "uncompressed size over ceiling");
            return Err(ArchiveError::TooLarge { limit });
        }
    }

    debug!(entries = archive.len(), total, "archive scanned");
    Ok(ArchiveSummary {
        entries: archive.len(),
        uncompressed_bytes: total,
    })
}

/// Extract the archive under `dest`, still bounded by `limit`.
///
/// Entry names that would land outside `dest` are rejected as malformed.
#[instrument(skip_all, fields(path = %path.display(), dest = %dest.display(), limit))]
pub fn extract_archive(path: &Path, dest: &Path, limit: u64) -> Result<u64, ArchiveError> {
    let mut archive = open(path)?;
    let io_err = |path: &Path, source: io::Error| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(entry_error)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::Malformed(format!("unsafe entry name '{}'", entry.name())))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let mut out = File::create(&target).map_err(|e| io_err(&target, e))?;
        let remaining = limit - total;
        let mut bounded = entry.take(remaining.saturating_add(1));
        let written = io::copy(&mut bounded, &mut out).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                ArchiveError::Malformed(e.to_string())
            }
            _ => io_err(&target, e),
        })?;
        total += written;
        if total > limit {
            warn!(index, total, "extraction over ceiling");
            return Err(ArchiveError::TooLarge { limit });
        }
    }

    debug!(total, "archive extracted");
    Ok(total)
}

/// True when `name` is a regular file directly under `root`.
pub fn has_root_file(root: &Path, name: &str) -> bool {
    root.join(name).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_zip;

    #[test]
    fn garbage_is_malformed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bundle.zip");
        fs::write(&path, b"definitely not a zip file").expect("write");
        let err = scan_archive(&path, 1024).expect_err("malformed");
        assert!(matches!(err, ArchiveError::Malformed(_)));
    }

    #[test]
    fn scan_reports_totals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bundle.zip");
        write_zip(&path, &[("preview.png", b"png"), ("css/theme.css", b"body{}")]).expect("zip");
        let summary = scan_archive(&path, 1024).expect("scan");
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.uncompressed_bytes, 9);
    }

    #[test]
    fn highly_compressible_bundle_is_rejected_by_uncompressed_size() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bomb.zip");
        let zeros = vec![0u8; 256 * 1024];
        write_zip(&path, &[("a.bin", &zeros), ("b.bin", &zeros)]).expect("zip");
        assert!(fs::metadata(&path).expect("meta").len() < 64 * 1024);

        let err = scan_archive(&path, 300 * 1024).expect_err("too large");
        assert!(matches!(err, ArchiveError::TooLarge { limit } if limit == 300 * 1024));
    }

    #[test]
    fn limit_is_inclusive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bundle.zip");
        write_zip(&path, &[("a.txt", b"12345"), ("b.txt", b"12345")]).expect("zip");
        assert!(scan_archive(&path, 10).is_ok());
        assert!(matches!(
            scan_archive(&path, 9),
            Err(ArchiveError::TooLarge { .. })
        ));
    }

    #[test]
    fn extracts_nested_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bundle.zip");
        write_zip(&path, &[("preview.png", b"png"), ("css/theme.css", b"body{}")]).expect("zip");
        let dest = temp.path().join("extract");
        let written = extract_archive(&path, &dest, 1024).expect("extract");
        assert_eq!(written, 9);
        assert!(has_root_file(&dest, "preview.png"));
        assert_eq!(
            fs::read_to_string(dest.join("css/theme.css")).expect("read"),
            "body{}"
        );
        assert!(!has_root_file(&dest, "css"));
    }

    #[test]
    fn extraction_stops_at_ceiling() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bundle.zip");
        write_zip(&path, &[("a.txt", &[b'a'; 64]), ("b.txt", &[b'b'; 64])]).expect("zip");
        let dest = temp.path().join("extract");
        let err = extract_archive(&path, &dest, 100).expect_err("too large");
        assert!(matches!(err, ArchiveError::TooLarge { .. }));
        let on_disk: u64 = fs::read_dir(&dest)
            .expect("read dir")
            .map(|e| e.expect("entry").metadata().expect("meta").len())
            .sum();
        assert!(on_disk <= 101);
    }

    #[test]
    fn escaping_entry_names_are_malformed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bundle.zip");
        write_zip(&path, &[("../escape.txt", b"nope")]).expect("zip");
        let err = extract_archive(&path, &temp.path().join("extract"), 1024).expect_err("unsafe");
        assert!(matches!(err, ArchiveError::Malformed(_)));
        assert!(!temp.path().join("escape.txt").exists());
    }
}
