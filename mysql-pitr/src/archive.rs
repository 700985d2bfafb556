//! Archive codec: reversible `.tar.gz` packaging of backup directories.
//!
//! `pack` and `unpack` are exact inverses over a directory tree. After a
//! successful `pack`, exactly one of {directory, archive} exists; a failed
//! `pack` leaves the directory untouched and discards any partial artifact.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::utils::errors::{Error, Result};

/// Suffix appended to a directory's base name to form its packed variant.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// True if `path` names a packed artifact.
pub fn is_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(ARCHIVE_SUFFIX))
        .unwrap_or(false)
}

/// The directory path a packed artifact unpacks to (its name minus the
/// archive suffix, in the same parent directory).
pub fn unpacked_path(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(name);
    archive.with_file_name(stem)
}

/// The archive path a directory packs to.
pub fn packed_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}{ARCHIVE_SUFFIX}"))
}

/// Pack a directory into `<dir>.tar.gz` and remove the directory.
///
/// The archive is built under a temporary name and renamed into place, so
/// an interrupted pack never leaves a readable-looking partial archive.
pub fn pack(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(Error::NotFound(dir.to_path_buf()));
    }
    let base_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::NotFound(dir.to_path_buf()))?
        .to_string();
    let archive = packed_path(dir);
    if archive.exists() {
        return Err(Error::AlreadyExists(archive));
    }

    let tmp = archive.with_extension("gz.tmp");
    let result = (|| -> Result<()> {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(&base_name, dir)?;
        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, &archive)?;
    fs::remove_dir_all(dir)?;
    info!(archive = %archive.display(), "Packed backup directory");
    Ok(archive)
}

/// Unpack a `.tar.gz` artifact next to itself and remove the archive.
///
/// Fails with `ArchiveCorrupt` when the artifact cannot be read, leaving no
/// partial output behind. If the destination directory already exists it is
/// returned unchanged (the catalog checks `packed` before calling, but the
/// codec still refuses to clobber).
pub fn unpack(archive: &Path) -> Result<PathBuf> {
    let dest = unpacked_path(archive);
    if dest.is_dir() {
        debug!(dir = %dest.display(), "Already unpacked");
        return Ok(dest);
    }
    if !archive.is_file() {
        return Err(Error::NotFound(archive.to_path_buf()));
    }

    let parent = archive
        .parent()
        .ok_or_else(|| Error::NotFound(archive.to_path_buf()))?;
    // Entries are rooted at the directory's base name, so extracting into a
    // scratch directory yields exactly one top-level child to move in place.
    let scratch = parent.join(format!(
        ".unpack_{}",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("tmp")
    ));
    let _ = fs::remove_dir_all(&scratch);
    fs::create_dir_all(&scratch)?;

    let result = (|| -> Result<()> {
        let file = File::open(archive)?;
        let decoder = GzDecoder::new(file);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(&scratch).map_err(|e| Error::ArchiveCorrupt {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;
        let extracted = scratch.join(
            dest.file_name()
                .ok_or_else(|| Error::NotFound(archive.to_path_buf()))?,
        );
        if !extracted.is_dir() {
            return Err(Error::ArchiveCorrupt {
                path: archive.to_path_buf(),
                reason: "archive does not contain the expected root directory".to_string(),
            });
        }
        fs::rename(&extracted, &dest)?;
        Ok(())
    })();

    let _ = fs::remove_dir_all(&scratch);
    match result {
        Ok(()) => {
            fs::remove_file(archive)?;
            info!(dir = %dest.display(), "Unpacked backup archive");
            Ok(dest)
        }
        Err(e) => Err(e),
    }
}
