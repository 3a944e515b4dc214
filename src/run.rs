//! A single sequential backup run over all volumes and database containers.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use derive_more::{Display, Error, From};

use crate::backends::{
    Archiver, DatabaseContainer, DatabaseDumper, Notifier, NotifyError, ObjectStore, UploadError,
};
use crate::incremental::{BackupState, ChangeDetector, Decision, VolumeOutcome};

/// A top-level directory below one of the roots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub path: PathBuf,
}

/// What happened to one volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeReport {
    pub volume: String,
    pub decision: Decision,
    /// [None] on a dry run.
    pub outcome: Option<VolumeOutcome>,
}

/// What happened to one database container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpReport {
    pub container: String,
    pub delivered: bool,
}

/// Errors on delivering an archive or dump.
#[derive(Debug, Display, Error, From)]
pub enum TransmitError {
    #[display("{_0}")]
    Upload(UploadError),
    #[display("{_0}")]
    Notify(NotifyError),
}

/// Lists the volumes below `roots`.
///
/// Roots that can't be read are skipped. A volume name seen under an earlier
/// root shadows later ones since names key the backup state.
pub fn discover_volumes(roots: &[PathBuf]) -> Vec<Volume> {
    let mut seen = HashSet::new();
    let mut volumes = Vec::new();

    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(target: "run", "Cannot access path {}: {e}", root.display());
                continue;
            }
        };
        let mut found: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        found.sort();

        for path in found {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                log::warn!(target: "run", "Skipping {}: volume {name} was already found under another root", path.display());
                continue;
            }
            log::debug!(target: "run", "Found valid folder: {}", path.display());
            volumes.push(Volume { name, path });
        }
    }

    volumes
}

/// Names of the `detected` containers with a mount below one of `roots`, each once.
pub fn relevant_containers(detected: &[DatabaseContainer], roots: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for container in detected {
        if let Some(mount) = container.mounted_below(roots) {
            if !names.contains(&container.name) {
                log::info!(target: "run", "Database container {} has volume in ROOT_DIR: {}", container.name, mount.source.display());
                names.push(container.name.clone());
            }
        }
    }
    names
}

/// Wires the collaborators into one run.
pub struct Run<'a> {
    detector: ChangeDetector,
    archiver: &'a dyn Archiver,
    notifier: &'a dyn Notifier,
    object_store: Option<(&'a dyn ObjectStore, Box<dyn Fn(&str) -> String + 'a>)>,
    work_dir: PathBuf,
    timestamp: String,
    force: bool,
    dry_run: bool,
}

impl<'a> Run<'a> {
    /// Archives and dumps are placed into `work_dir` and named with `timestamp`.
    pub fn new(
        detector: ChangeDetector,
        archiver: &'a dyn Archiver,
        notifier: &'a dyn Notifier,
        work_dir: PathBuf,
        timestamp: String,
    ) -> Self {
        Self {
            detector,
            archiver,
            notifier,
            object_store: None,
            work_dir,
            timestamp,
            force: false,
            dry_run: false,
        }
    }

    /// Upload to `store` under the key computed by `key_for` instead of
    /// sending files through the chat.
    pub fn with_object_store(
        mut self,
        store: &'a dyn ObjectStore,
        key_for: impl Fn(&str) -> String + 'a,
    ) -> Self {
        self.object_store = Some((store, Box::new(key_for)));
        self
    }

    /// Back up every volume regardless of the change detection.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Only decide, never dump, archive, send or record.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Dumps the databases of containers with volumes below `roots`, then the
    /// `explicit` ones not delivered yet.
    pub fn dump_databases(
        &self,
        dumper: &dyn DatabaseDumper,
        roots: &[PathBuf],
        explicit: &[String],
    ) -> Vec<DumpReport> {
        log::info!(target: "run", "Detecting database containers and volumes...");
        let detected = dumper.discover();
        let relevant = relevant_containers(&detected, roots);

        let mut delivered: HashSet<String> = HashSet::new();
        let mut reports = Vec::new();
        for container in relevant.iter().chain(explicit) {
            if delivered.contains(container) {
                continue;
            }
            if self.dry_run {
                log::info!(target: "run", "Would dump database container {container}");
                continue;
            }

            let ok = self.dump_one(dumper, container);
            if ok {
                delivered.insert(container.clone());
            }
            reports.push(DumpReport {
                container: container.clone(),
                delivered: ok,
            });
        }

        reports
    }

    fn dump_one(&self, dumper: &dyn DatabaseDumper, container: &str) -> bool {
        let Some(dump) = dumper.dump(container, &self.work_dir) else {
            return false;
        };

        let delivered = match self.transmit(&dump) {
            Ok(()) => {
                log::info!(target: "run", "Database dump sent: {}", dump.display());
                true
            }
            Err(e) => {
                log::error!(target: "run", "Cannot send database dump {}: {e}", dump.display());
                false
            }
        };
        remove(&dump);

        delivered
    }

    /// Processes every volume and records the outcome in `state`.
    ///
    /// Records of volumes that are no longer present are dropped.
    pub fn backup_volumes(&self, volumes: &[Volume], state: &mut BackupState) -> Vec<VolumeReport> {
        let reports = volumes
            .iter()
            .map(|volume| self.backup_volume(volume, state))
            .collect();

        if !self.dry_run {
            for volume in state.retain_volumes(|name| volumes.iter().any(|v| v.name == name)) {
                log::info!(target: "run", "Forgetting volume {volume}, it no longer exists");
            }
        }

        reports
    }

    /// Fingerprints, decides, archives and delivers one volume.
    pub fn backup_volume(&self, volume: &Volume, state: &mut BackupState) -> VolumeReport {
        let fingerprint = self.detector.fingerprint(&volume.path);
        let decision = if self.force {
            Decision::forced()
        } else {
            self.detector
                .needs_backup(&volume.name, fingerprint.as_ref(), state)
        };
        log::info!(
            target: "run",
            "{}: {} ({})",
            volume.name,
            if decision.backup { "backup" } else { "skip" },
            decision.reason
        );

        if self.dry_run {
            return VolumeReport {
                volume: volume.name.clone(),
                decision,
                outcome: None,
            };
        }

        let outcome = if decision.backup {
            self.archive_and_send(volume)
        } else {
            VolumeOutcome::Skipped
        };
        state.record(&volume.name, fingerprint, outcome, Utc::now());

        VolumeReport {
            volume: volume.name.clone(),
            decision,
            outcome: Some(outcome),
        }
    }

    fn archive_and_send(&self, volume: &Volume) -> VolumeOutcome {
        let archive = self
            .work_dir
            .join(format!("{}-{}.tar.gz", volume.name, self.timestamp));

        if let Err(e) = self.archiver.compress(&volume.path, &archive) {
            log::error!(target: "run", "Cannot compress {}: {e}", volume.path.display());
            return VolumeOutcome::FailedCompress;
        }
        log::info!(target: "run", "Successfully compressed: {}", archive.display());

        let outcome = match self.transmit(&archive) {
            Ok(()) => {
                log::debug!(target: "run", "Archive {} was sent", archive.display());
                VolumeOutcome::BackedUp
            }
            Err(e) => {
                log::error!(target: "run", "Cannot send {}: {e}", archive.display());
                VolumeOutcome::FailedTransmit
            }
        };
        remove(&archive);

        outcome
    }

    /// Uploads `path` to the object store and posts the link, or sends it
    /// through the chat if there is no object store.
    pub fn transmit(&self, path: &Path) -> Result<(), TransmitError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match &self.object_store {
            Some((store, key_for)) => {
                let locator = store.upload(path, &key_for(&file_name))?;
                self.notifier.send_message(&format!("{file_name}\n{locator}"))?;
            }
            None => self.notifier.send_file(path)?,
        }

        Ok(())
    }
}

/// Human readable overview of the run for the chat.
pub fn summary(volumes: &[VolumeReport], dumps: &[DumpReport]) -> String {
    let mut text = String::new();

    if !dumps.is_empty() {
        text.push_str("Databases:\n");
        for dump in dumps {
            let status = if dump.delivered { "sent" } else { "failed" };
            let _ = writeln!(text, "- {}: {status}", dump.container);
        }
    }

    text.push_str("Volumes:\n");
    if volumes.is_empty() {
        text.push_str("- none found\n");
    }
    for report in volumes {
        let status = match report.outcome {
            Some(outcome) => outcome.to_string(),
            None if report.decision.backup => "would back up".to_string(),
            None => "would skip".to_string(),
        };
        let _ = writeln!(text, "- {}: {status} ({})", report.volume, report.decision.reason);
    }

    text
}

fn remove(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!(target: "run", "File {} was deleted", path.display()),
        Err(e) => log::error!(target: "run", "Error while deleting {}: {e}", path.display()),
    }
}
