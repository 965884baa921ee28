// Diagnostic logging and the user-facing log sink.
//
// `tlog!` is the crate-wide diagnostic channel (stderr, plus a log file when
// enabled). `LogSink` is the capability handed to the link manager and the
// transfer engine for messages meant for whoever drives the update.

use std::path::Path;
use std::sync::Mutex;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and a `watch-ota.log` symlink (Unix only).
pub(crate) fn init_file_logging(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-watch-ota.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("watch-ota.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create watch-ota.log symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would try to lock LOG_FILE, go straight to stderr
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(())
}

/// Stop file logging and close the log file.
pub(crate) fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

// ============================================================================
// Log sink
// ============================================================================

/// Destination for user-facing informational and error messages.
///
/// Both methods default to doing nothing, so an implementor only overrides
/// what it cares about and the core never has to check for a logger.
pub trait LogSink: Send + Sync {
    fn info(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLog;

impl LogSink for NoopLog {}

/// Sink that forwards to `tlog!` under a fixed tag.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    tag: &'static str,
}

impl ConsoleLog {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new("ota")
    }
}

impl LogSink for ConsoleLog {
    fn info(&self, message: &str) {
        tlog!("[{}] {}", self.tag, message);
    }

    fn error(&self, message: &str) {
        tlog!("[{}] ERROR: {}", self.tag, message);
    }
}
