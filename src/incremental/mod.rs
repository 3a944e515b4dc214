//! Change detection for incremental backups.
//!
//! Every run fingerprints each volume ([fingerprint]), compares it against the
//! [BackupState] of the previous run ([ChangeDetector]) and records the
//! [VolumeOutcome] afterwards. Only volumes that changed get archived again.

pub mod decision;
pub mod fingerprint;
pub mod state;

pub use decision::{ChangeDetector, Decision, DetectionConfig, Reason};
pub use fingerprint::{fingerprint, HashAlgorithm, VolumeFingerprint};
pub use state::{BackupRecord, BackupState, StateSaveError, StateStore, VolumeOutcome};
