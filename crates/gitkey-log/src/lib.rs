// ABOUTME: Shared logging setup for gitkey binaries
// ABOUTME: Three entry points: init() for stderr, init_file() for file-only, init_session() for the CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// File-only logging. Default: WARN level, RUST_LOG override.
/// Logs to the day's file under [`log_dir`].
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = log_dir().ok_or("could not determine config directory")?;
    let log_file = open_log_file(&dir.join(log_file_name(app_name, &today())))?;

    tracing_subscriber::fmt()
        .with_writer(Arc::new(log_file))
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .init();

    Ok(())
}

/// Directory holding daily log files: `<config dir>/gitkey/logs`.
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gitkey").join("logs"))
}

/// `<app>_<YYYYMMDD>.log`
pub fn log_file_name(app_name: &str, date: &str) -> String {
    format!("{app_name}_{date}.log")
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Guard for an interactive session's logging. Dropping it records the end of the session.
#[derive(Debug)]
pub struct LogSession {
    app_name: String,
    path: Option<PathBuf>,
}

impl LogSession {
    /// The day's log file, or `None` when logging to stderr only.
    pub fn log_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        tracing::info!(app = %self.app_name, "Session ended");
    }
}

/// Session logging: everything at DEBUG into the day's log file, WARN and above
/// (or RUST_LOG) on stderr. Falls back to stderr only if the file can't be opened.
pub fn init_session(app_name: &str) -> LogSession {
    init_session_in(app_name, log_dir())
}

fn init_session_in(app_name: &str, dir: Option<PathBuf>) -> LogSession {
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let path = dir.map(|d| d.join(log_file_name(app_name, &today())));
    let file = match path.as_deref().map(open_log_file) {
        Some(Ok(file)) => Some(file),
        Some(Err(e)) => {
            eprintln!("Warning: failed to open log file, logging to stderr only: {e}");
            None
        }
        None => None,
    };
    let path = file.as_ref().and(path);

    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .with_filter(LevelFilter::DEBUG)
    });

    // A global subscriber may already be set (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    tracing::info!(app = %app_name, log_file = ?path, "Session started");
    LogSession {
        app_name: app_name.to_string(),
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_file() {
        let _ = super::init_file as fn(&str);
    }

    #[test]
    fn log_file_name_is_daily() {
        assert_eq!(log_file_name("gitkey", "20250301"), "gitkey_20250301.log");
        assert_eq!(today().len(), 8);
    }

    #[test]
    fn log_dir_is_namespaced() {
        if let Some(dir) = log_dir() {
            assert!(dir.ends_with("gitkey/logs"));
        }
    }

    #[test]
    fn session_creates_file_and_falls_back() {
        let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
        let session = init_session_in("gitkey", Some(temp_dir.path().join("logs")));
        let path = session.log_path().expect("file logging").to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(temp_dir.path()));
        drop(session);

        // A regular file where the directory should be.
        let blocker = temp_dir.path().join("blocked");
        std::fs::write(&blocker, "x").unwrap();
        let session = init_session_in("gitkey", Some(blocker));
        assert!(session.log_path().is_none());
    }
}
