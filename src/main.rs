mod cli;
mod config;
mod crawl;
mod database;
mod error;
mod extract;
mod normalize;
mod pipeline;
mod schedule;
mod scheduler;
mod schema;
mod store;

use cli::Cli;
use config::{Config, LoggingConfig, CONFIG};
use directories::ProjectDirs;
use error::FundPulseError;
use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming,
};
use log::{debug, error};

const LOG_FILE_BYTES: u64 = 10 * 1024 * 1024;
const LOG_FILES_KEPT: usize = 5;

fn setup_logging(project_dirs: &ProjectDirs, logging: &LoggingConfig) -> Result<LoggerHandle, FundPulseError> {
    let log_dir = project_dirs.data_local_dir().join("logs");

    Logger::try_with_str(format!("fundpulse={}", logging.fundpulse))
        .and_then(|logger| {
            logger
                .log_to_file(FileSpec::default().directory(log_dir).basename("fundpulse"))
                .format_for_files(detailed_format)
                .rotate(
                    Criterion::Size(LOG_FILE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(LOG_FILES_KEPT),
                )
                .duplicate_to_stderr(Duplicate::Warn)
                .start()
        })
        .map_err(|e| FundPulseError::Error(format!("Failed to start logging: {}", e)))
}

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "fundpulse") else {
        eprintln!("Could not determine the fundpulse data directory");
        std::process::exit(1);
    };

    let config = Config::load_config(&project_dirs);

    // The handle flushes and closes the log file when dropped
    let _logger = match setup_logging(&project_dirs, &config.logging) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    if CONFIG.set(config).is_err() {
        error!("Configuration was already initialized");
    }

    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line(&project_dirs) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
