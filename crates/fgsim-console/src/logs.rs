use fgsim_core::{LogLevel, LogRecord};
use std::collections::BTreeSet;

/// Levels that share one visibility control.
fn linked(level: LogLevel) -> &'static [LogLevel] {
    match level {
        LogLevel::Error | LogLevel::Critical => &[LogLevel::Error, LogLevel::Critical],
        LogLevel::Debug => &[LogLevel::Debug],
        LogLevel::Info => &[LogLevel::Info],
        LogLevel::Warning => &[LogLevel::Warning],
    }
}

/// Append-only record list in arrival order, with per-level visibility.
#[derive(Debug, Default)]
pub struct LogStream {
    records: Vec<LogRecord>,
    hidden: BTreeSet<LogLevel>,
    clear_pending: bool,
}

impl LogStream {
    pub fn append(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn is_visible(&self, level: LogLevel) -> bool {
        !self.hidden.contains(&level)
    }

    pub fn visible(&self) -> impl Iterator<Item = &LogRecord> + '_ {
        self.records
            .iter()
            .filter(|record| self.is_visible(record.level))
    }

    pub fn visible_levels(&self) -> BTreeSet<LogLevel> {
        LogLevel::ALL
            .iter()
            .copied()
            .filter(|level| self.is_visible(*level))
            .collect()
    }

    /// Flips `level` and every level linked to it to the same new value.
    pub fn toggle_visibility(&mut self, level: LogLevel) {
        let show = !self.is_visible(level);
        for linked_level in linked(level) {
            if show {
                self.hidden.remove(linked_level);
            } else {
                self.hidden.insert(*linked_level);
            }
        }
    }

    pub fn request_clear(&mut self) {
        if !self.records.is_empty() {
            self.clear_pending = true;
        }
    }

    pub fn clear_pending(&self) -> bool {
        self.clear_pending
    }

    /// Second step of a clear. Returns whether records were dropped.
    pub fn confirm_clear(&mut self, accepted: bool) -> bool {
        let pending = std::mem::take(&mut self.clear_pending);
        if pending && accepted {
            self.records.clear();
            return true;
        }
        false
    }
}
