//! Structured logging module for NeuroSignal
//!
//! Lines go through the `log` facade and, once `init_logging` has run, are
//! appended to a daily file under the log directory. Categories:
//! - CLASSIFIER: Conclusion changes during a live session
//! - PIPELINE: Insight requests, retries and provider fallbacks
//! - SESSION: Session lifecycle (start, stop, save, delete)
//! - STORAGE: Journal and credential store access
//! - ERROR: Errors

use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Classifier,
    Pipeline,
    Session,
    Storage,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Classifier => "CLASSIFIER",
            LogCategory::Pipeline => "PIPELINE",
            LogCategory::Session => "SESSION",
            LogCategory::Storage => "STORAGE",
            LogCategory::Error => "ERROR",
        }
    }

    fn level(&self) -> log::Level {
        match self {
            LogCategory::Error => log::Level::Error,
            LogCategory::Classifier => log::Level::Debug,
            _ => log::Level::Info,
        }
    }
}

/// Directory of the active log file, set by `init_logging`
static LOG_DIR: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Get the log directory path
pub fn get_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NEUROSIGNAL_LOG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".neurosignal/logs")
}

fn log_file_name() -> String {
    format!("neurosignal-{}.log", Local::now().format("%Y-%m-%d"))
}

/// Initialize file logging - creates the log directory if needed
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_in(get_log_dir())
}

pub fn init_logging_in(log_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }

    if let Ok(mut guard) = LOG_DIR.lock() {
        *guard = Some(log_dir);
    }

    log(LogCategory::Session, None, "NeuroSignal logging initialized");

    Ok(())
}

/// Format a single log line. The session id is shortened to 8 characters.
pub fn format_line(category: LogCategory, session_id: Option<&str>, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let session_context = session_id
        .map(|id| format!("session={} | ", &id[..id.char_indices().nth(8).map_or(id.len(), |(i, _)| i)]))
        .unwrap_or_default();

    format!(
        "[{}] [{}] {}{}",
        timestamp,
        category.as_str(),
        session_context,
        message
    )
}

/// Log a message with category and optional session context
pub fn log(category: LogCategory, session_id: Option<&str>, message: &str) {
    let line = format_line(category, session_id, message);

    log::log!(target: "neurosignal", category.level(), "{}", line);

    let dir = LOG_DIR.lock().ok().and_then(|guard| guard.clone());
    if let Some(dir) = dir {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(log_file_name()))
        {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Log a classifier event (conclusion changed)
pub fn log_classifier(session_id: Option<&str>, message: &str) {
    log(LogCategory::Classifier, session_id, message);
}

/// Log a pipeline event (provider call, retry, fallback)
pub fn log_pipeline(session_id: Option<&str>, message: &str) {
    log(LogCategory::Pipeline, session_id, message);
}

/// Log a session lifecycle event
pub fn log_session(session_id: Option<&str>, message: &str) {
    log(LogCategory::Session, session_id, message);
}

/// Log a storage event
pub fn log_storage(session_id: Option<&str>, message: &str) {
    log(LogCategory::Storage, session_id, message);
}

/// Log an error
pub fn log_error(session_id: Option<&str>, message: &str) {
    log(LogCategory::Error, session_id, message);
}

/// Clean up old log files (keep last 7 days)
pub fn cleanup_old_logs() -> Result<usize, Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();
    let mut deleted = 0;

    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(7);

    for entry in fs::read_dir(&log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff && fs::remove_file(&path).is_ok() {
                    deleted += 1;
                }
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_shortens_session_id() {
        let line = format_line(
            LogCategory::Pipeline,
            Some("0123456789abcdef"),
            "primary call ok",
        );
        assert!(line.contains("[PIPELINE] session=01234567 | primary call ok"));
    }

    #[test]
    fn test_format_line_without_session() {
        let line = format_line(LogCategory::Error, None, "boom");
        assert!(line.ends_with("[ERROR] boom"));
    }

    #[test]
    fn test_short_session_id_kept_whole() {
        let line = format_line(LogCategory::Session, Some("abc"), "start");
        assert!(line.contains("session=abc | start"));
    }
}
