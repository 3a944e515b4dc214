//! Persistence of the per-volume fingerprints between runs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use derive_more::{Display, Error};

use super::VolumeFingerprint;

/// Outcome of one volume within one run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum VolumeOutcome {
    /// Archived and transmitted.
    #[display("backed up")]
    BackedUp,
    /// No change detected.
    #[display("skipped")]
    Skipped,
    /// The archive could not be created.
    #[display("compression failed")]
    FailedCompress,
    /// The archive was created but could not be delivered.
    #[display("transmission failed")]
    FailedTransmit,
}

/// Persisted history of one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Fingerprint of the last observation, whether backed up or not.
    #[serde(flatten)]
    pub fingerprint: VolumeFingerprint,

    /// Time of the last backup that was both archived and transmitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,
}

/// Volume name to [BackupRecord] mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BackupState {
    records: BTreeMap<String, BackupRecord>,
}

impl BackupState {
    pub fn get(&self, volume: &str) -> Option<&BackupRecord> {
        self.records.get(volume)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BackupRecord)> {
        self.records.iter()
    }

    /// Records the result of processing `volume` in the current run.
    ///
    /// The fingerprint is always refreshed. If the scan failed the previous
    /// fingerprint is kept. `last_backup` only moves forward on
    /// [VolumeOutcome::BackedUp]; every other outcome carries it over.
    pub fn record(
        &mut self,
        volume: &str,
        fingerprint: Option<VolumeFingerprint>,
        outcome: VolumeOutcome,
        now: DateTime<Utc>,
    ) {
        let prior = self.records.remove(volume);
        let last_backup = match outcome {
            VolumeOutcome::BackedUp => Some(now),
            VolumeOutcome::Skipped
            | VolumeOutcome::FailedCompress
            | VolumeOutcome::FailedTransmit => prior.as_ref().and_then(|r| r.last_backup),
        };
        let fingerprint = fingerprint
            .or_else(|| prior.map(|r| r.fingerprint))
            .unwrap_or_default();

        self.records.insert(
            volume.to_string(),
            BackupRecord {
                fingerprint,
                last_backup,
            },
        );
    }

    /// Drops the records of volumes `keep` rejects and returns their names.
    pub fn retain_volumes(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.records.retain(|volume, _| {
            let kept = keep(volume);
            if !kept {
                dropped.push(volume.clone());
            }
            kept
        });
        dropped
    }
}

impl FromIterator<(String, BackupRecord)> for BackupState {
    fn from_iter<T: IntoIterator<Item = (String, BackupRecord)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Writing the state file failed.
#[derive(Debug, Display, Error)]
pub enum StateSaveError {
    #[display("Serializing backup state failed: {_0}")]
    Serialize(serde_json::Error),
    #[display("Writing state file {} failed: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// JSON file holding the [BackupState].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file.
    ///
    /// A missing or corrupt file yields an empty state, which makes every
    /// volume look new.
    pub fn load(&self) -> BackupState {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(target: "incremental::state", "No state file at {}, starting fresh", self.path.display());
                return BackupState::default();
            }
            Err(e) => {
                log::warn!(target: "incremental::state", "Reading state file {} failed: {e}", self.path.display());
                return BackupState::default();
            }
        };

        match serde_json::from_slice::<BackupState>(&raw) {
            Ok(state) => {
                log::debug!(target: "incremental::state", "Loaded {} record(s) from {}", state.len(), self.path.display());
                state
            }
            Err(e) => {
                log::warn!(target: "incremental::state", "State file {} is corrupt, ignoring it: {e}", self.path.display());
                BackupState::default()
            }
        }
    }

    /// Overwrites the state file with `state`.
    ///
    /// The content is written next to the target and renamed over it.
    pub fn save(&self, state: &BackupState) -> Result<(), StateSaveError> {
        let json = serde_json::to_vec_pretty(state).map_err(StateSaveError::Serialize)?;
        let io_err = |source| StateSaveError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        log::debug!(target: "incremental::state", "Saved {} record(s) to {}", state.len(), self.path.display());
        Ok(())
    }
}
