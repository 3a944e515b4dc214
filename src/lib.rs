//! Library to incrementally backup Docker volumes and database containers.
//!
//! Every run dumps the databases of known containers, then fingerprints each
//! volume below the configured roots and only archives the ones that changed
//! since the last run (see [`incremental`]). Archives and dumps are delivered
//! through a Telegram bot or uploaded to object storage (see [`backends`]).

#![forbid(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod incremental;
pub mod logging;
pub mod run;
pub mod settings;
