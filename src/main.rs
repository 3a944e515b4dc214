use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Local;
use clap::Parser;

use docker_backup_lib::backends::{Docker, Notifier, TarGz, Telegram, S3};
use docker_backup_lib::cli::Cli;
use docker_backup_lib::incremental::{ChangeDetector, StateStore};
use docker_backup_lib::run::{self, Run};
use docker_backup_lib::settings::Settings;

fn main() -> ExitCode {
    // variables from .env don't override the real environment
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let log_file = docker_backup_lib::logging::init(cli.verbose, &cli.tmp_dir, &timestamp);

    let mut settings = match Settings::load_or_init(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(hash) = cli.hash {
        settings.detection.hash = hash;
    }
    log::debug!("ROOT_DIR: {:?}", cli.root_dirs);
    log::debug!("BOT_DEST: {}", cli.bot_dest);

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let bot = match Telegram::new(cli.bot_token.clone(), cli.bot_dest) {
        Ok(bot) => bot,
        Err(e) => {
            log::error!("Creating the Telegram client failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let object_store = match settings.object_store.clone().map(S3::new).transpose() {
        Ok(store) => store,
        Err(e) => {
            log::error!("Creating the object storage client failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !dry_run {
        let message = match cli.custom_message.as_deref().filter(|m| !m.is_empty()) {
            Some(custom) => format!("{custom}\n\nBackup at {timestamp}"),
            None => format!("Backup at {timestamp}"),
        };
        if let Err(e) = bot.send_message(&message) {
            log::error!("Sending the backup message failed: {e}");
        }
    }

    let work_dir = create_work_dir(&cli.tmp_dir, &timestamp);
    let state_store = StateStore::new(&cli.state_file);
    let mut state = state_store.load();

    let archiver = TarGz::default();
    let docker = Docker::new(settings.docker);
    let mut run = Run::new(
        ChangeDetector::new(settings.detection),
        &archiver,
        &bot,
        work_dir.clone(),
        timestamp.clone(),
    )
    .force(cli.force)
    .dry_run(dry_run);
    if let Some(store) = &object_store {
        run = run.with_object_store(store, move |name| store.key_for(name));
    }

    // databases first so their dumps are consistent with the volume archives
    let dumps = run.dump_databases(&docker, &cli.root_dirs, &cli.db_containers());
    let volumes = run::discover_volumes(&cli.root_dirs);
    let reports = run.backup_volumes(&volumes, &mut state);
    let summary = run::summary(&reports, &dumps);

    if dry_run {
        log::info!("Dry-run summary:\n{summary}");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = state_store.save(&state) {
        log::error!("{e}");
    }
    if let Err(e) = bot.send_message(&summary) {
        log::error!("Sending the summary failed: {e}");
    }
    if work_dir != Path::new(".") {
        if let Err(e) = fs::remove_dir(&work_dir) {
            log::warn!("Temporary folder {} not removed: {e}", work_dir.display());
        }
    }

    log::info!("Completed!");
    if let Some(log_file) = log_file {
        if let Err(e) = bot.send_file(&log_file) {
            log::error!("Error while sending log file: {e}");
        }
    }

    ExitCode::SUCCESS
}

/// Creates the per-run folder below `tmp_dir`, falling back to the current directory.
fn create_work_dir(tmp_dir: &Path, timestamp: &str) -> PathBuf {
    let work_dir = tmp_dir.join(timestamp);
    if work_dir.exists() {
        log::warn!("Folder {} already exists, this could cause some troubles", work_dir.display());
        return work_dir;
    }

    match fs::create_dir_all(&work_dir) {
        Ok(()) => {
            log::debug!("TMP_DIR: {}", work_dir.display());
            work_dir
        }
        Err(e) => {
            log::error!("Cannot create temporary folder {}: {e}. Defaulting to current folder", work_dir.display());
            PathBuf::from(".")
        }
    }
}
