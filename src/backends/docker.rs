//! Dumps of databases running inside Docker containers using [Docker].

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use derive_more::{Display, Error, From};
use regex::Regex;

use super::DatabaseDumper;

static DATABASE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mysql|mariadb|postgres|mongo|redis").expect("valid regex"));

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeouts of the `docker` invocations.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DockerConfig {
    /// Upper bound for a single database dump.
    #[serde(default = "default_dump_timeout")]
    pub dump_timeout_secs: u64,

    /// Upper bound for listing and inspecting containers.
    #[serde(default = "default_inspect_timeout")]
    pub inspect_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            dump_timeout_secs: default_dump_timeout(),
            inspect_timeout_secs: default_inspect_timeout(),
        }
    }
}

fn default_dump_timeout() -> u64 {
    300
}

fn default_inspect_timeout() -> u64 {
    30
}

/// Errors on running `docker`.
#[derive(Debug, Display, Error, From)]
pub enum DumpError {
    /// `docker` could not be started or its output not collected.
    #[display("Running docker failed: {_0}")]
    #[from]
    Io(io::Error),
    /// The command did not finish in time and was killed.
    #[display("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
    /// The command exited unsuccessfully.
    #[display("`{command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Database engines that can be dumped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum DatabaseEngine {
    /// MySQL or MariaDB, dumped with `mysqldump`.
    #[display("mysql")]
    MySql,
    /// PostgreSQL, dumped with `pg_dumpall`.
    #[display("postgres")]
    Postgres,
}

impl DatabaseEngine {
    /// Detects the engine from the process list of a container.
    pub fn from_process_list(processes: &str) -> Option<Self> {
        let processes = processes.to_lowercase();
        if processes.contains("mysqld") || processes.contains("mariadb") {
            Some(Self::MySql)
        } else if processes.contains("postgres") {
            Some(Self::Postgres)
        } else {
            None
        }
    }

    fn dump_command(self) -> &'static [&'static str] {
        match self {
            Self::MySql => &[
                "mysqldump",
                "--all-databases",
                "--single-transaction",
                "--routines",
                "--triggers",
            ],
            Self::Postgres => &["pg_dumpall", "-U", "postgres"],
        }
    }
}

/// A volume mounted into a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A running container with a database image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseContainer {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
}

impl DatabaseContainer {
    /// Whether any mount of the container lives below one of `roots`.
    pub fn mounted_below(&self, roots: &[PathBuf]) -> Option<&Mount> {
        self.mounts
            .iter()
            .find(|mount| roots.iter().any(|root| mount.source.starts_with(root)))
    }
}

/// Parses a line of `docker ps --format '{{.Names}}\t{{.Image}}\t{{.Status}}'`.
///
/// Returns the container name and lowercased image if the image belongs to a
/// known database and the container is up.
pub fn parse_container_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.split('\t');
    let name = parts.next()?.trim();
    let image = parts.next()?.trim().to_lowercase();
    let status = parts.next()?.to_lowercase();

    if name.is_empty() || !DATABASE_IMAGE.is_match(&image) || !status.contains("up") {
        return None;
    }
    Some((name.to_string(), image))
}

/// Parses the `{{.Source}}:{{.Destination}}` lines of `docker inspect`.
pub fn parse_mounts(output: &str) -> Vec<Mount> {
    output
        .lines()
        .filter_map(|line| {
            let (source, destination) = line.trim().split_once(':')?;
            Some(Mount {
                source: source.into(),
                destination: destination.into(),
            })
        })
        .collect()
}

/// Database dumps through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct Docker {
    config: DockerConfig,
}

impl Docker {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    fn inspect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.inspect_timeout_secs.max(1))
    }

    fn docker(&self, args: &[&str]) -> Result<String, DumpError> {
        let mut command = Command::new("docker");
        command.args(args);
        let (stdout, _) = run_with_timeout(&mut command, tempfile::tempfile()?, self.inspect_timeout())?;
        Ok(read_back(stdout)?)
    }

    fn mounts(&self, container: &str) -> Vec<Mount> {
        let format = "{{range .Mounts}}{{.Source}}:{{.Destination}}\n{{end}}";
        match self.docker(&["inspect", "--format", format, container]) {
            Ok(output) => parse_mounts(&output),
            Err(e) => {
                log::warn!(target: "backend::docker", "Inspecting mounts of {container} failed: {e}");
                Vec::new()
            }
        }
    }

    fn is_running(&self, container: &str) -> bool {
        self.docker(&["inspect", "--format={{.State.Running}}", container])
            .is_ok_and(|out| out.trim() == "true")
    }

    fn try_dump(&self, container: &str, output_dir: &Path) -> Result<Option<PathBuf>, DumpError> {
        if !self.is_running(container) {
            log::warn!(target: "backend::docker", "Container {container} is not running or doesn't exist");
            return Ok(None);
        }

        let processes = self.docker(&["exec", container, "ps", "aux"])?;
        let Some(engine) = DatabaseEngine::from_process_list(&processes) else {
            log::warn!(target: "backend::docker", "Unknown database type in container {container}");
            return Ok(None);
        };

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let dump_file = output_dir.join(format!("{container}_{engine}_{timestamp}.sql"));
        log::info!(target: "backend::docker", "Dumping {engine} database of container {container}");
        log::debug!(target: "backend::docker", "Writing dump to {}", dump_file.display());

        let mut command = Command::new("docker");
        command
            .arg("exec")
            .arg(container)
            .args(engine.dump_command());

        let timeout = Duration::from_secs(self.config.dump_timeout_secs.max(1));
        let result = File::create(&dump_file)
            .map_err(DumpError::from)
            .and_then(|file| run_with_timeout(&mut command, file, timeout));
        match result {
            Ok(_) => Ok(Some(dump_file)),
            Err(e) => {
                if dump_file.exists() {
                    if let Err(e) = fs::remove_file(&dump_file) {
                        log::warn!(target: "backend::docker", "Removing failed dump {} failed: {e}", dump_file.display());
                    }
                }
                Err(e)
            }
        }
    }
}

impl DatabaseDumper for Docker {
    fn discover(&self) -> Vec<DatabaseContainer> {
        let listing = match self.docker(&[
            "ps",
            "-a",
            "--format",
            "{{.Names}}\t{{.Image}}\t{{.Status}}",
        ]) {
            Ok(listing) => listing,
            Err(e) => {
                log::error!(target: "backend::docker", "Failed to list Docker containers: {e}");
                return Vec::new();
            }
        };

        listing
            .lines()
            .filter_map(parse_container_line)
            .map(|(name, image)| {
                let mounts = self.mounts(&name);
                log::info!(target: "backend::docker", "Found database container {name} with image {image}");
                DatabaseContainer {
                    name,
                    image,
                    mounts,
                }
            })
            .collect()
    }

    fn dump(&self, container: &str, output_dir: &Path) -> Option<PathBuf> {
        match self.try_dump(container, output_dir) {
            Ok(Some(dump)) => {
                log::info!(target: "backend::docker", "Database dump successful: {}", dump.display());
                Some(dump)
            }
            Ok(None) => None,
            Err(e) => {
                log::error!(target: "backend::docker", "Database dump failed for {container}: {e}");
                None
            }
        }
    }
}

/// Runs `command` with stdout redirected to `stdout`, killing it after `timeout`.
///
/// Stderr is captured into an anonymous file so a chatty child can't block
/// on a full pipe. Returns `stdout` rewound to its start.
fn run_with_timeout(
    command: &mut Command,
    stdout: File,
    timeout: Duration,
) -> Result<(File, ExitStatus), DumpError> {
    let stderr = tempfile::tempfile()?;
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout.try_clone()?))
        .stderr(Stdio::from(stderr.try_clone()?))
        .spawn()?;
    let describe = || format!("{command:?}");

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DumpError::Timeout {
                command: describe(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    if !status.success() {
        return Err(DumpError::Failed {
            command: describe(),
            status,
            stderr: read_back(stderr)?.trim().to_string(),
        });
    }

    let mut stdout = stdout;
    stdout.rewind()?;
    Ok((stdout, status))
}

fn read_back(mut file: File) -> io::Result<String> {
    file.rewind()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_containers_are_recognized() {
        assert_eq!(
            parse_container_line("db\tMariaDB:11\tUp 3 hours"),
            Some(("db".into(), "mariadb:11".into()))
        );
        assert_eq!(
            parse_container_line("pg\tpostgres:16-alpine\tUp 2 days (healthy)"),
            Some(("pg".into(), "postgres:16-alpine".into()))
        );
    }

    #[test]
    fn other_containers_are_ignored() {
        assert_eq!(parse_container_line("web\tnginx:latest\tUp 3 hours"), None);
        assert_eq!(parse_container_line("db\tmysql:8\tExited (0) 2 days ago"), None);
        assert_eq!(parse_container_line("garbage"), None);
        assert_eq!(parse_container_line(""), None);
    }

    #[test]
    fn mounts_are_parsed() {
        let mounts = parse_mounts("/var/lib/docker/volumes/db/_data:/var/lib/mysql\n\n/etc/x:/etc/y:ro\n");
        assert_eq!(
            mounts,
            [
                Mount {
                    source: "/var/lib/docker/volumes/db/_data".into(),
                    destination: "/var/lib/mysql".into(),
                },
                Mount {
                    source: "/etc/x".into(),
                    destination: "/etc/y:ro".into(),
                },
            ]
        );
    }

    #[test]
    fn mount_roots_are_matched_by_path_prefix() {
        let container = DatabaseContainer {
            name: "db".into(),
            image: "mysql".into(),
            mounts: parse_mounts("/var/lib/docker/volumes/db/_data:/var/lib/mysql"),
        };

        assert!(container
            .mounted_below(&["/var/lib/docker/volumes".into()])
            .is_some());
        assert!(container.mounted_below(&["/root/backup".into()]).is_none());
    }

    #[test]
    fn engine_detection() {
        let ps = "USER PID COMMAND\nmysql 1 /usr/sbin/mysqld --user=mysql";
        assert_eq!(DatabaseEngine::from_process_list(ps), Some(DatabaseEngine::MySql));
        let ps = "root 1 mariadbd";
        assert_eq!(DatabaseEngine::from_process_list(ps), Some(DatabaseEngine::MySql));
        let ps = "postgres 1 postgres -D /var/lib/postgresql/data";
        assert_eq!(DatabaseEngine::from_process_list(ps), Some(DatabaseEngine::Postgres));
        assert_eq!(DatabaseEngine::from_process_list("redis-server *:6379"), None);
    }

    #[cfg(unix)]
    #[test]
    fn slow_commands_are_killed() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let out = tempfile::tempfile().unwrap();

        let started = Instant::now();
        let err = run_with_timeout(&mut command, out, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, DumpError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn stdout_is_captured() {
        let mut command = Command::new("echo");
        command.arg("hello");
        let out = tempfile::tempfile().unwrap();

        let (file, status) = run_with_timeout(&mut command, out, Duration::from_secs(5)).unwrap();
        assert!(status.success());
        assert_eq!(read_back(file).unwrap(), "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn failures_carry_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo broken >&2; exit 3"]);
        let out = tempfile::tempfile().unwrap();

        let err = run_with_timeout(&mut command, out, Duration::from_secs(5)).unwrap_err();
        match err {
            DumpError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
