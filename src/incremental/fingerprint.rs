//! Aggregate summary of a volume directory used to detect changes between runs.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::Md5;
use sha2::digest::DynDigest;
use sha2::Sha256;
use walkdir::WalkDir;

/// Hash function fed with the per-file `"{path}:{size}:{mtime}"` records.
///
/// Switching the algorithm changes every stored hash, so each volume is
/// backed up once more on the first run after the switch.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    clap::ValueEnum,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    #[display("md5")]
    Md5,
    #[display("sha256")]
    Sha256,
}

impl HashAlgorithm {
    fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(Md5::default()),
            Self::Sha256 => Box::new(Sha256::default()),
        }
    }
}

/// Observed state of one volume directory at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeFingerprint {
    /// Sum of the sizes of all regular files.
    #[serde(default, rename = "size")]
    pub total_size_bytes: u64,

    /// Number of regular files.
    #[serde(default)]
    pub file_count: u64,

    /// Newest file modification time in nanoseconds since the Unix epoch.
    ///
    /// Zero if the directory holds no readable files.
    #[serde(default, rename = "latestModTime")]
    pub latest_modification_time: u64,

    /// Hex encoded digest over every scanned file.
    #[serde(default)]
    pub content_hash: String,
}

/// Scans `path` recursively and summarizes it.
///
/// Returns [None] if `path` itself can't be opened. Files that can't be
/// stat'ed are skipped. Entries are visited sorted by file name, so the hash
/// is stable as long as the tree is unchanged.
pub fn fingerprint(path: &Path, algorithm: HashAlgorithm) -> Option<VolumeFingerprint> {
    if let Err(e) = fs::read_dir(path) {
        log::warn!(target: "incremental::fingerprint", "Cannot open {}: {e}", path.display());
        return None;
    }

    let mut hasher = algorithm.hasher();
    let mut total_size_bytes = 0u64;
    let mut file_count = 0u64;
    let mut latest_modification_time = 0u64;

    for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!(target: "incremental::fingerprint", "Skipping unreadable entry below {}: {e}", path.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!(target: "incremental::fingerprint", "Cannot stat {}: {e}", entry.path().display());
                continue;
            }
        };
        let mtime = match metadata.modified() {
            Ok(mtime) => unix_nanos(mtime),
            Err(e) => {
                log::warn!(target: "incremental::fingerprint", "No modification time for {}: {e}", entry.path().display());
                continue;
            }
        };

        let size = metadata.len();
        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or_else(|_| entry.path());

        hasher.update(format!("{}:{size}:{mtime}", relative.display()).as_bytes());
        total_size_bytes += size;
        file_count += 1;
        latest_modification_time = latest_modification_time.max(mtime);
    }

    let fingerprint = VolumeFingerprint {
        total_size_bytes,
        file_count,
        latest_modification_time,
        content_hash: hex::encode(hasher.finalize()),
    };
    log::trace!(target: "incremental::fingerprint", "{}: {fingerprint:?}", path.display());

    Some(fingerprint)
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
