//! Compression of volume directories using [TarGz].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;
use walkdir::WalkDir;

use super::Archiver;

/// Errors on compressing a volume.
#[derive(Debug, Display, Error, From)]
pub enum ArchiveError {
    /// Source of the archive is not a directory.
    #[display("Not a directory: {}", _0.display())]
    NotADirectory(#[error(ignore)] PathBuf),
    /// Walking the source directory failed.
    #[display("Walking the source directory failed: {_0}")]
    Walk(walkdir::Error),
    /// Writing the archive failed.
    #[display("Writing the archive failed: {_0}")]
    Io(io::Error),
}

/// Gzip compressed tarball.
///
/// The archive contains a single top-level directory named after the source
/// directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGz {
    compression: Compression,
}

impl Archiver for TarGz {
    fn compress(&self, source_dir: &Path, dest: &Path) -> Result<(), ArchiveError> {
        if !source_dir.is_dir() {
            return Err(ArchiveError::NotADirectory(source_dir.to_path_buf()));
        }
        log::debug!(target: "backend::archive", "Compressing {} to {}", source_dir.display(), dest.display());

        let result = write_archive(source_dir, dest, self.compression);
        if result.is_err() && dest.exists() {
            if let Err(e) = fs::remove_file(dest) {
                log::warn!(target: "backend::archive", "Removing partial archive {} failed: {e}", dest.display());
            }
        }
        result
    }
}

fn write_archive(source_dir: &Path, dest: &Path, compression: Compression) -> Result<(), ArchiveError> {
    let root = source_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("volume"));

    let archive_file = File::create(dest)?;
    let mut builder = Builder::new(GzEncoder::new(archive_file, compression));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or_else(|_| entry.path());
        let name = root.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if file_type.is_file() || file_type.is_symlink() {
            builder.append_path_with_name(entry.path(), &name)?;
        } else {
            log::debug!(target: "backend::archive", "Skipping special file {}", entry.path().display());
        }
    }

    builder.into_inner()?.finish()?;
    log::trace!(target: "backend::archive", "Finished {}", dest.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    #[test]
    fn archive_is_rooted_at_volume_name() {
        let dir = TempDir::new().unwrap();
        let volume = dir.path().join("pgdata");
        fs::create_dir_all(volume.join("base")).unwrap();
        fs::write(volume.join("PG_VERSION"), b"16").unwrap();
        fs::write(volume.join("base/1"), b"rows").unwrap();
        let dest = dir.path().join("pgdata.tar.gz");

        TarGz::default().compress(&volume, &dest).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .map(|n| n.trim_end_matches('/').to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            ["pgdata", "pgdata/PG_VERSION", "pgdata/base", "pgdata/base/1"]
        );
    }

    #[test]
    fn missing_source_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.tar.gz");

        let err = TarGz::default()
            .compress(&dir.path().join("nope"), &dest)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotADirectory(_)));
        assert!(!dest.exists());
    }
}
