//! Decides whether a volume has to be backed up again.

use std::path::Path;

use derive_more::Display;

use super::fingerprint::{fingerprint, HashAlgorithm};
use super::{BackupState, VolumeFingerprint};

/// Default relative size change above which a volume counts as changed.
pub const DEFAULT_SIZE_CHANGE_THRESHOLD: f64 = 0.01;

/// Tuning of the change detection.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectionConfig {
    /// Relative size delta (`0.01` = 1%) that triggers a backup.
    #[serde(default = "default_threshold")]
    pub size_change_threshold: f64,

    /// Hash used for [VolumeFingerprint::content_hash].
    #[serde(default)]
    pub hash: HashAlgorithm,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            size_change_threshold: DEFAULT_SIZE_CHANGE_THRESHOLD,
            hash: HashAlgorithm::default(),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_SIZE_CHANGE_THRESHOLD
}

/// Why a [Decision] was taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Reason {
    #[display("fingerprint unavailable")]
    FingerprintUnavailable,
    #[display("first observation")]
    FirstObservation,
    #[display("content changed")]
    ContentChanged,
    #[display("size changed beyond threshold")]
    SizeChanged,
    #[display("newer files present")]
    NewerFiles,
    #[display("no change detected")]
    Unchanged,
    #[display("forced")]
    Forced,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub backup: bool,
    pub reason: Reason,
}

impl Decision {
    fn backup(reason: Reason) -> Self {
        Self {
            backup: true,
            reason,
        }
    }

    fn skip() -> Self {
        Self {
            backup: false,
            reason: Reason::Unchanged,
        }
    }

    pub(crate) fn forced() -> Self {
        Self::backup(Reason::Forced)
    }
}

/// Fingerprints volumes and compares them to the recorded state.
#[derive(Copy, Clone, Debug, Default)]
pub struct ChangeDetector {
    config: DetectionConfig,
}

impl ChangeDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Fingerprints `path` with the configured hash.
    pub fn fingerprint(&self, path: &Path) -> Option<VolumeFingerprint> {
        fingerprint(path, self.config.hash)
    }

    /// Decides whether `volume` needs a new backup.
    ///
    /// The signals are checked strongest first and the first match wins:
    /// missing fingerprint, missing record, hash, size delta, newest mtime.
    /// The per-file hash input is a plain concatenation, so the weaker size
    /// and mtime checks can still fire on trees the hash considers equal.
    pub fn needs_backup(
        &self,
        volume: &str,
        current: Option<&VolumeFingerprint>,
        prior: &BackupState,
    ) -> Decision {
        let Some(current) = current else {
            return Decision::backup(Reason::FingerprintUnavailable);
        };
        let Some(record) = prior.get(volume) else {
            return Decision::backup(Reason::FirstObservation);
        };
        let previous = &record.fingerprint;

        if current.content_hash != previous.content_hash {
            return Decision::backup(Reason::ContentChanged);
        }

        let delta = current.total_size_bytes.abs_diff(previous.total_size_bytes) as f64;
        if delta / previous.total_size_bytes.max(1) as f64 > self.config.size_change_threshold {
            return Decision::backup(Reason::SizeChanged);
        }

        if current.latest_modification_time > previous.latest_modification_time {
            return Decision::backup(Reason::NewerFiles);
        }

        Decision::skip()
    }
}
