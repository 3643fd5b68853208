//! UI bundle packaging.
//!
//! Archives a compiled asset tree into `<output>/<name>-bundle.zip`. Entries
//! are added in sorted order with a fixed timestamp, so packing the same tree
//! twice yields identical bytes. The archive is written to a temporary file
//! next to the target and renamed into place, so a failed run never leaves
//! a partial archive behind.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::{CompressionMethod, DateTime, ZipWriter, write::SimpleFileOptions};

/// Suffix appended to the bundle name.
pub const ARCHIVE_SUFFIX: &str = "-bundle.zip";

/// Packaging errors.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Nothing to pack.
    #[error("bundle source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    /// IO error.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file name cannot be stored as a UTF-8 entry name.
    #[error("cannot add {0} to the bundle: file names must be valid UTF-8")]
    EntryName(PathBuf),

    /// Source tree could not be scanned.
    #[error("failed to scan bundle source: {0}")]
    Walk(#[from] walkdir::Error),

    /// Archive encoding failed.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The finished archive could not be moved into place.
    #[error("failed to finalize archive: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Result type for packaging.
pub type Result<T> = std::result::Result<T, BundleError>;

/// Path of the archive `pack` produces.
pub fn archive_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{name}{ARCHIVE_SUFFIX}"))
}

/// Pack `source_dir` into `<output_dir>/<name>-bundle.zip`.
///
/// Entry names are relative to `source_dir` with `/` separators. Returns the
/// archive path.
pub fn pack(source_dir: &Path, output_dir: &Path, name: &str) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(BundleError::SourceMissing(source_dir.to_path_buf()));
    }

    fs::create_dir_all(output_dir).map_err(|source| io_error(output_dir, source))?;

    let target = archive_path(output_dir, name);
    let mut partial = tempfile::Builder::new()
        .prefix(".")
        .suffix(".zip.partial")
        .tempfile_in(output_dir)
        .map_err(|source| io_error(output_dir, source))?;

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut files = 0usize;
    {
        let mut writer = ZipWriter::new(partial.as_file_mut());
        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let entry_name = entry_name(source_dir, entry.path())?;

            writer.start_file(entry_name.as_str(), options)?;
            let mut input =
                File::open(entry.path()).map_err(|source| io_error(entry.path(), source))?;
            io::copy(&mut input, &mut writer)
                .map_err(|source| io_error(entry.path(), source))?;
            debug!(entry = %entry_name, "added to bundle");
            files += 1;
        }
        writer.finish()?;
    }

    partial.persist(&target)?;

    let bytes = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
    info!(path = %target.display(), files, bytes, "bundle created");

    Ok(target)
}

/// Archive entry name for `path`, relative to `root` with `/` separators.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let invalid = || BundleError::EntryName(path.to_path_buf());
    let relative = path.strip_prefix(root).map_err(|_| invalid())?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(invalid)?;
    Ok(parts.join("/"))
}

fn io_error(path: &Path, source: io::Error) -> BundleError {
    BundleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    fn sample_source() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "alpha").expect("write");
        fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
        fs::write(dir.path().join("sub/b.txt"), "beta").expect("write");
        dir
    }

    #[test]
    fn test_pack_round_trip() {
        let source = sample_source();
        let out = tempfile::tempdir().expect("tempdir");

        let archive = pack(source.path(), out.path(), "ui").expect("pack");
        assert_eq!(archive, out.path().join("ui-bundle.zip"));

        let mut zip = ZipArchive::new(File::open(&archive).expect("open")).expect("zip");
        let names: Vec<_> = zip.file_names().map(str::to_string).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, ["a.txt", "sub/b.txt"]);

        let mut text = String::new();
        zip.by_name("sub/b.txt")
            .expect("entry")
            .read_to_string(&mut text)
            .expect("read");
        assert_eq!(text, "beta");
    }

    #[test]
    fn test_pack_is_deterministic() {
        let source = sample_source();
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");

        let a = fs::read(pack(source.path(), first.path(), "ui").expect("first")).expect("read");
        let b = fs::read(pack(source.path(), second.path(), "ui").expect("second")).expect("read");
        assert_eq!(a, b);
    }

    #[test]
    fn test_pack_leaves_only_archive() {
        let source = sample_source();
        let out = tempfile::tempdir().expect("tempdir");

        pack(source.path(), out.path(), "theme").expect("pack");

        let entries: Vec<_> = fs::read_dir(out.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, ["theme-bundle.zip"]);
    }

    #[test]
    fn test_pack_missing_source() {
        let out = tempfile::tempdir().expect("tempdir");
        let err = pack(&out.path().join("missing"), out.path(), "ui").unwrap_err();

        assert!(matches!(err, BundleError::SourceMissing(_)));
        assert!(!archive_path(out.path(), "ui").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_pack_rejects_non_utf8_names() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let source = sample_source();
        let name = OsStr::from_bytes(b"bad\xff.txt");
        if fs::write(source.path().join("sub").join(name), "x").is_err() {
            // The file system refuses non UTF-8 names.
            return;
        }
        let out = tempfile::tempdir().expect("tempdir");

        let err = pack(source.path(), out.path(), "ui").unwrap_err();
        assert!(matches!(err, BundleError::EntryName(_)), "{err}");
        assert_eq!(fs::read_dir(out.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn test_pack_overwrites_existing() {
        let source = sample_source();
        let out = tempfile::tempdir().expect("tempdir");
        fs::write(archive_path(out.path(), "ui"), "stale").expect("write");

        let archive = pack(source.path(), out.path(), "ui").expect("pack");
        assert!(ZipArchive::new(File::open(archive).expect("open")).is_ok());
    }
}
