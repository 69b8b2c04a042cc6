//! Driver logging with a circular ring buffer
//!
//! Every module logs through the `log` facade. [`RingLogger`] is the sink:
//! it keeps the newest entries in a fixed-size ring so a diagnostics front
//! end can show recent driver activity without any console attached.
//!
//! # Usage
//!
//! ```rust,ignore
//! ata::logger::init(log::LevelFilter::Debug).ok();
//! log::info!("scan complete");
//! for entry in ata::logger::global().recent(8) { /* render */ }
//! ```
//!
//! Messages longer than [`MAX_MESSAGE_LEN`] are truncated. Register-level
//! trace records are emitted at `trace` level and are normally filtered.

use core::fmt::Write;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use alloc::vec::Vec;
use heapless::{Deque, String};
use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Number of entries kept in the ring
pub const LOG_BUFFER_SIZE: usize = 128;

/// Maximum message length per log entry (bytes)
pub const MAX_MESSAGE_LEN: usize = 128;

/// A single log entry in the ring
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    /// Source file when the record carries a static path
    pub file: &'static str,
    pub line: u32,
    pub message: String<MAX_MESSAGE_LEN>,
}

impl LogEntry {
    fn create(record: &Record<'_>) -> Self {
        let mut message = String::new();
        // A full buffer ends the write early; the prefix is kept.
        let _ = write!(message, "{}", record.args());
        Self {
            level: record.level(),
            file: record.file_static().unwrap_or(""),
            line: record.line().unwrap_or(0),
            message,
        }
    }
}

/// Ring-buffer logger
///
/// The ring is guarded by a spin lock; statistics and the level filter are
/// atomics so they can be read without taking it.
pub struct RingLogger {
    entries: Mutex<Deque<LogEntry, LOG_BUFFER_SIZE>>,

    /// Minimum level kept, stored as a `LevelFilter` discriminant
    min_level: AtomicU8,

    /// Total number of entries written
    total_logs: AtomicUsize,

    /// Number of records filtered by level
    dropped_logs: AtomicUsize,
}

impl RingLogger {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Deque::new()),
            min_level: AtomicU8::new(LevelFilter::Trace as u8),
            total_logs: AtomicUsize::new(0),
            dropped_logs: AtomicUsize::new(0),
        }
    }

    /// Set the minimum level to keep
    pub fn set_min_level(&self, level: LevelFilter) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn min_level(&self) -> LevelFilter {
        match self.min_level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Get logging statistics as `(total_logs, dropped_logs)`
    pub fn stats(&self) -> (usize, usize) {
        (
            self.total_logs.load(Ordering::Relaxed),
            self.dropped_logs.load(Ordering::Relaxed),
        )
    }

    /// Copies of up to `count` newest entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for RingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.min_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            self.dropped_logs.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let entry = LogEntry::create(record);
        let mut entries = self.entries.lock();
        if entries.is_full() {
            entries.pop_front();
        }
        // Cannot fail after the pop above.
        let _ = entries.push_back(entry);
        self.total_logs.fetch_add(1, Ordering::Relaxed);
    }

    fn flush(&self) {}
}

lazy_static! {
    static ref GLOBAL_LOGGER: RingLogger = RingLogger::new();
}

/// The process-wide logger instance
pub fn global() -> &'static RingLogger {
    &GLOBAL_LOGGER
}

/// Install the global ring logger as the `log` backend
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    GLOBAL_LOGGER.set_min_level(level);
    log::set_logger(&*GLOBAL_LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(logger: &RingLogger, level: Level, line: u32) {
        logger.log(
            &Record::builder()
                .level(level)
                .file_static(Some("dispatch.rs"))
                .line(Some(line))
                .args(format_args!("command {} done", line))
                .build(),
        );
    }

    #[test]
    fn test_ring_keeps_newest() {
        let logger = RingLogger::new();
        for line in 0..(LOG_BUFFER_SIZE as u32 + 5) {
            emit(&logger, Level::Info, line);
        }
        let recent = logger.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].line, LOG_BUFFER_SIZE as u32 + 4);
        assert_eq!(recent[1].message.as_str(), "command 132 done");
        assert_eq!(logger.stats(), (LOG_BUFFER_SIZE + 5, 0));
    }

    #[test]
    fn test_level_filter_counts_drops() {
        let logger = RingLogger::new();
        logger.set_min_level(LevelFilter::Warn);
        emit(&logger, Level::Debug, 1);
        emit(&logger, Level::Error, 2);
        assert_eq!(logger.stats(), (1, 1));
        assert_eq!(logger.recent(10)[0].level, Level::Error);
    }
}
