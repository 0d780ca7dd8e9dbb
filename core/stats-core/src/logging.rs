//! FILENAME: core/stats-core/src/logging.rs
// PURPOSE: Unified logging for the statistics engines.
// CONTEXT: Every line has the shape `seq|level|category|message`. Lines go to
//          the `log` facade (target = category) and, once `init_log_file` has
//          been called, to a shared log file that can be re-sorted by sequence.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use once_cell::sync::Lazy;

use crate::error::EngineError;

// ============================================================================
// UNIFIED LOGGING SYSTEM
// ============================================================================

/// Global sequence counter shared by every engine in the process.
static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Global log file handle.
pub static LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(None));

/// Path of the active log file, if any.
static LOG_PATH: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Next value of the process-wide log sequence.
pub fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst) + 1
}

/// Maps the single-letter level used in log lines onto the `log` facade.
fn facade_level(level: &str) -> log::Level {
    match level {
        "E" => log::Level::Error,
        "W" => log::Level::Warn,
        "I" => log::Level::Info,
        "T" => log::Level::Trace,
        _ => log::Level::Debug,
    }
}

/// Formats one log line in the unified format.
pub fn format_line(seq: u64, level: &str, category: &str, message: &str) -> String {
    format!("{}|{}|{}|{}", seq, level, category, message)
}

/// Opens (truncating) the unified log file at `path`.
pub fn init_log_file(path: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
    let log_path = path.as_ref().to_path_buf();

    if let Some(dir) = log_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&log_path)?;

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    if let Ok(mut guard) = LOG_PATH.lock() {
        *guard = Some(log_path.clone());
    }

    Ok(log_path)
}

/// Returns the active log file path, if a log file was initialized.
pub fn log_path() -> Option<PathBuf> {
    LOG_PATH.lock().ok().and_then(|guard| guard.clone())
}

/// Stops writing to the log file. Facade output continues.
pub fn close_log_file() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(mut file) = guard.take() {
            let _ = file.flush();
        }
    }
    if let Ok(mut guard) = LOG_PATH.lock() {
        *guard = None;
    }
}

/// Appends one line to the log file when one is open.
fn append_to_file(line: &str) {
    let mut guard = match LOG_FILE.lock() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    if let Some(file) = guard.as_mut() {
        let written = writeln!(file, "{}", line).and_then(|_| file.flush());
        if let Err(e) = written {
            log::error!(target: "LOG", "failed to write log line: {}", e);
        }
    }
}

/// Emits `message` under a fresh sequence number to the file and the facade.
pub fn write_log(level: &str, category: &str, message: &str) {
    let line = format_line(next_seq(), level, category, message);
    append_to_file(&line);
    log::log!(target: category, facade_level(level), "{}", line);
}

/// Emits an `ENTER`/`EXIT` tracing line; `detail` is appended when non-empty.
pub fn write_span(level: &str, category: &str, phase: &str, func: &str, detail: &str) {
    let mut message = format!("{} {}", phase, func);
    if !detail.is_empty() {
        message.push(' ');
        message.push_str(detail);
    }
    write_log(level, category, &message);
}

/// Writes a pre-formatted line to the log file only.
pub fn write_log_raw(message: &str) {
    append_to_file(message);
}

/// Sorts the log file by sequence number. Lines written from several worker
/// threads can land out of order; this restores the logical order.
/// Returns the number of lines written back.
pub fn sort_log_file() -> Result<usize, EngineError> {
    let mut guard = LOG_FILE
        .lock()
        .map_err(|e| EngineError::Config(format!("log lock poisoned: {}", e)))?;

    let file = match guard.as_mut() {
        Some(file) => file,
        None => return Ok(0),
    };

    file.flush()?;
    file.seek(SeekFrom::Start(0))?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;

    let mut lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    // Stable sort: lines without a parsable sequence keep their order at the end.
    lines.sort_by_key(|line| line_seq(line));

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;

    for line in &lines {
        writeln!(file, "{}", line)?;
    }

    file.flush()?;
    Ok(lines.len())
}

fn line_seq(line: &str) -> u64 {
    line.split('|')
        .next()
        .and_then(|seq| seq.parse().ok())
        .unwrap_or(u64::MAX)
}

// ============================================================================
// MACRO DEFINITIONS & EXPORTS
// ============================================================================

#[macro_export]
macro_rules! log_debug {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::write_log("D", $cat, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::write_log("I", $cat, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::write_log("W", $cat, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::write_log("E", $cat, &format!($($arg)*))
    };
}

// Function tracing

#[macro_export]
macro_rules! log_enter {
    ($cat:expr, $func:expr) => {
        $crate::logging::write_span("D", $cat, "ENTER", $func, "")
    };
    ($cat:expr, $func:expr, $($arg:tt)*) => {
        $crate::logging::write_span("D", $cat, "ENTER", $func, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_exit {
    ($cat:expr, $func:expr) => {
        $crate::logging::write_span("D", $cat, "EXIT", $func, "")
    };
    ($cat:expr, $func:expr, $($arg:tt)*) => {
        $crate::logging::write_span("D", $cat, "EXIT", $func, &format!($($arg)*))
    };
}

pub use log_debug;
pub use log_info;
pub use log_warn;
pub use log_error;
pub use log_enter;
pub use log_exit;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_unified_line() {
        assert_eq!(format_line(7, "I", "CHART", "hello"), "7|I|CHART|hello");
    }

    #[test]
    fn sequence_numbers_increase() {
        let a = next_seq();
        let b = next_seq();
        assert!(b > a);
    }

    #[test]
    fn sort_restores_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("engine.log");
        init_log_file(&path).unwrap();
        assert_eq!(log_path(), Some(path.clone()));

        write_log_raw("30|I|TEST|third");
        write_log_raw("10|I|TEST|first");
        write_log_raw("20|I|TEST|second");

        let count = sort_log_file().unwrap();
        assert!(count >= 3);

        let content = std::fs::read_to_string(&path).unwrap();
        let seqs: Vec<u64> = content
            .lines()
            .filter_map(|l| l.split('|').next().and_then(|s| s.parse().ok()))
            .collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);

        let first = content.find("10|I|TEST|first").unwrap();
        let second = content.find("20|I|TEST|second").unwrap();
        let third = content.find("30|I|TEST|third").unwrap();
        assert!(first < second && second < third);

        close_log_file();
    }
}
