use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::incremental::HashAlgorithm;

/// Volume roots scanned when `ROOT_DIR` is unset.
pub const DEFAULT_ROOT_DIRS: [&str; 3] = [
    "/var/snap/docker/common/var-lib-docker/volumes/",
    "/var/lib/docker/volumes",
    "/root/backup",
];

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Telegram bot token.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Chat receiving the backups.
    #[arg(long, env = "BOT_DEST", allow_negative_numbers = true)]
    pub bot_dest: i64,

    /// Message sent before the backups.
    #[arg(long, env = "CUST_MSG")]
    pub custom_message: Option<String>,

    /// Comma separated directories whose subdirectories are backed up as volumes.
    #[arg(
        long = "root-dir",
        env = "ROOT_DIR",
        value_delimiter = ',',
        value_parser = parse_trimmed_path,
        default_values = DEFAULT_ROOT_DIRS,
    )]
    pub root_dirs: Vec<PathBuf>,

    /// Directory for archives, dumps and the log file.
    #[arg(long, env = "TMP_DIR", default_value = "/tmp")]
    pub tmp_dir: PathBuf,

    /// Comma separated containers to dump in addition to the detected ones.
    #[arg(long = "db-container", env = "DB_CONTAINERS", value_delimiter = ',')]
    pub db_containers: Vec<String>,

    /// File recording the fingerprints of the previous run.
    #[arg(long, env = "STATE_FILE", default_value = "/var/lib/docker-backup/state.json")]
    pub state_file: PathBuf,

    /// TOML settings file. Created with defaults if missing.
    #[arg(long, env = "BACKUP_CONFIG", default_value = "/etc/docker-backup/settings.toml")]
    pub config: PathBuf,

    /// Override the hash algorithm of the settings file.
    #[arg(long)]
    pub hash: Option<HashAlgorithm>,

    /// Back up every volume regardless of detected changes.
    #[arg(long)]
    pub force: bool,

    /// Only report which volumes would be backed up.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Explicitly listed containers without blanks.
    pub fn db_containers(&self) -> Vec<String> {
        self.db_containers
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn parse_trimmed_path(s: &str) -> Result<PathBuf, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Err("empty path".to_string())
    } else {
        Ok(PathBuf::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn lists_are_split_and_trimmed() {
        let cli = Cli::try_parse_from([
            "docker_backup",
            "--bot-token",
            "t",
            "--bot-dest",
            "-100123",
            "--root-dir",
            "/a, /b",
            "--db-container",
            "db, ,cache",
        ])
        .unwrap();

        assert_eq!(cli.bot_dest, -100123);
        assert_eq!(cli.root_dirs, [PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(cli.db_containers(), ["db", "cache"]);
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["docker_backup", "--bot-token", "t", "--bot-dest", "1"]).unwrap();

        assert_eq!(cli.root_dirs.len(), 3);
        assert_eq!(cli.tmp_dir, PathBuf::from("/tmp"));
        assert!(cli.db_containers().is_empty());
        assert!(!cli.force);
    }
}
