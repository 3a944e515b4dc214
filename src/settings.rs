//! Settings file holding tuning that rarely changes between runs.

use std::io;
use std::path::Path;

use derive_more::{Display, Error, From};

use crate::backends::{DockerConfig, S3Config};
use crate::incremental::DetectionConfig;

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// Configuration read from the TOML settings file.
pub struct Settings {
    /// Change detection tuning.
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Timeouts of the database dumps.
    #[serde(default)]
    pub docker: DockerConfig,

    /// Upload archives here instead of sending them through the chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store: Option<S3Config>,
}

/// Errors on reading the settings file.
#[derive(Debug, Display, Error, From)]
pub enum SettingsError {
    #[display("Reading the settings file failed: {_0}")]
    Io(io::Error),
    #[display("Parsing the settings file failed: {_0}")]
    Parse(toml::de::Error),
}

impl Settings {
    /// Reads the settings at `path`.
    ///
    /// If the file doesn't exist yet the defaults are written to it and
    /// returned.
    pub fn load_or_init(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "Writing default settings to {} because it doesn't exist yet",
                    path.display()
                );
                let settings = Settings::default();
                let write = toml::to_string_pretty(&settings)
                    .map_err(io::Error::other)
                    .and_then(|raw| {
                        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(path, raw)
                    });
                if let Err(e) = write {
                    log::warn!("Writing default settings to {} failed: {e}", path.display());
                }

                Ok(settings)
            }
            Err(e) => Err(e.into()),
        }
    }
}
