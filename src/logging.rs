use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use once_cell::sync::OnceCell;
use std::path::PathBuf;

const LOG_FILE_BASENAME: &str = "schoolreportd";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGER: OnceCell<LoggerHandle> = OnceCell::new();

/// File-based logging, initialized once per process. Repeated calls are
/// no-ops. Level comes from `SCHOOLREPORTD_LOG` (default `info`), directory
/// from `SCHOOLREPORTD_LOG_DIR` (default: the system temp dir).
pub fn init_from_env() -> Result<(), String> {
    if LOGGER.get().is_some() {
        return Ok(());
    }

    let level = std::env::var("SCHOOLREPORTD_LOG").unwrap_or_else(|_| "info".to_string());
    let log_dir = std::env::var("SCHOOLREPORTD_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("schoolreportd-logs"));

    std::fs::create_dir_all(&log_dir)
        .map_err(|e| format!("failed to create log directory {}: {}", log_dir.display(), e))?;

    let handle = Logger::try_with_str(&level)
        .map_err(|e| format!("invalid log level `{}`: {}", level, e))?
        .log_to_file(
            FileSpec::default()
                .directory(&log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|e| format!("failed to start logger: {}", e))?;

    let _ = LOGGER.set(handle);
    log::info!(
        "schoolreportd {} started, logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
    Ok(())
}
