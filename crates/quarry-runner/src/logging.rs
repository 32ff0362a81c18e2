use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use quarry_host::ProjectPaths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging for a component.
///
/// - `component_name`: Name of the component (e.g., "server", "runner")
/// - `file_enabled`: If true, also writes `<component_name>.log` under the
///   data directory. If false, only console logging.
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(component_name: &str, file_enabled: bool) -> io::Result<Option<WorkerGuard>> {
    if !file_enabled {
        tracing_subscriber::fmt().with_env_filter(env_filter()).init();
        return Ok(None);
    }

    let log_dir = log_directory()?;
    let (writer, guard, log_path) = open_log_file(&log_dir, component_name)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(io::stdout).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!("Logging to file: {}", log_path.display());
    Ok(Some(guard))
}

/// Open `<dir>/<component>.log` for appending behind a non-blocking writer
fn open_log_file(
    dir: &Path,
    component_name: &str,
) -> io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard, PathBuf)> {
    fs::create_dir_all(dir)?;
    let log_path = dir.join(format!("{}.log", component_name));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(BufWriter::new(file));
    Ok((writer, guard, log_path))
}

/// `<data dir>/quarry/logs`
pub fn log_directory() -> io::Result<PathBuf> {
    let paths = ProjectPaths::new()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory"))?;
    Ok(paths.logs_dir())
}

/// Truncate log file if it exceeds MAX_LOG_SIZE.
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    if log_path.exists() && fs::metadata(log_path)?.len() > MAX_LOG_SIZE {
        let file = File::create(log_path)?;
        file.set_len(0)?;
    }
    Ok(())
}
