//! Logger writing to stderr and to a log file that is sent along with the backups.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::LevelFilter;

/// Writes every log line to stderr and to a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // stderr is best effort, the file is what gets delivered
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

/// Initializes the logger.
///
/// Tries `dir/<stem>.txt` first and falls back to the current directory like
/// the temp folder does. Returns the log file in use, if any.
pub fn init(level: Option<LevelFilter>, dir: &Path, stem: &str) -> Option<PathBuf> {
    let file_name = format!("{stem}.txt");
    let candidates = [dir.join(&file_name), PathBuf::from(&file_name)];
    let opened = candidates
        .into_iter()
        .find_map(|path| File::create(&path).ok().map(|file| (path, file)));

    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    if let Some(level) = level {
        builder.filter_level(level);
    }

    let log_file = opened.map(|(path, file)| {
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
        builder.write_style(env_logger::WriteStyle::Never);
        path
    });
    builder.try_init().expect("env_logger should not fail");

    match &log_file {
        Some(path) => log::debug!("Logging to {}", path.display()),
        None => log::error!("Cannot create log file in {}", dir.display()),
    }

    log_file
}
