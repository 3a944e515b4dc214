//! Collaborators performing the actual backup work.
//!
//! Currently the following backends are implemented:
//!
//! - [TarGz]: Compression of a volume directory into a `.tar.gz` archive.
//! - [Docker]: Discovery and dumps of database containers.
//! - [Telegram]: Chat messages and file delivery through a Telegram bot.
//! - [S3]: Upload to S3 compatible object storage.

pub mod archive;
pub mod docker;
pub mod s3;
pub mod telegram;

use std::path::{Path, PathBuf};

pub use archive::{ArchiveError, TarGz};
pub use docker::{DatabaseContainer, DatabaseEngine, Docker, DockerConfig, DumpError};
pub use s3::{S3Config, UploadError, S3};
pub use telegram::{NotifyError, Telegram};

/// Compresses a directory into a single archive file.
pub trait Archiver {
    fn compress(&self, source_dir: &Path, dest: &Path) -> Result<(), ArchiveError>;
}

/// Chat delivery of status messages and files.
pub trait Notifier {
    fn send_message(&self, text: &str) -> Result<(), NotifyError>;

    fn send_file(&self, path: &Path) -> Result<(), NotifyError>;
}

/// Object storage target for archives.
pub trait ObjectStore {
    /// Uploads `path` as `key` and returns a locator to retrieve it again.
    fn upload(&self, path: &Path, key: &str) -> Result<String, UploadError>;
}

/// Finds and dumps databases running in containers.
pub trait DatabaseDumper {
    /// Running containers whose image looks like a known database.
    fn discover(&self) -> Vec<DatabaseContainer>;

    /// Dumps all databases of `container` into `output_dir`.
    ///
    /// Returns the dump file or [None] if the dump failed.
    fn dump(&self, container: &str, output_dir: &Path) -> Option<PathBuf>;
}
