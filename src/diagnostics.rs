//! Persistent event log and runtime counters.
//!
//! The event log is a bounded ring of recent notable events (alarms,
//! config applies, relay actions). It is persisted through the atomic
//! store as one postcard document, so the last entries survive a reset
//! and can be returned to the server on a `serial_request`.
//!
//! Runtime metrics are plain counters bumped by the router.

use std::collections::VecDeque;

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;
use crate::error::StoreError;
use crate::store::AtomicStore;

pub const EVENT_LOG_FILE: &str = "event_log.bin";
pub const DEFAULT_LOG_CAPACITY: usize = 32;
pub const MAX_MESSAGE_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Alarm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: u64,
    pub level: LogLevel,
    pub message: heapless::String<MAX_MESSAGE_LEN>,
}

impl LogEntry {
    /// Build an entry, truncating `message` on a char boundary.
    pub fn new(epoch: u64, level: LogLevel, message: &str) -> Self {
        let mut end = message.len().min(MAX_MESSAGE_LEN);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        let mut m = heapless::String::new();
        let _ = m.push_str(&message[..end]);
        Self {
            epoch,
            level,
            message: m,
        }
    }
}

/// Store-backed ring buffer of [`LogEntry`]s, oldest first.
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Load the persisted ring. A missing or unreadable log starts empty.
    pub fn load(storage: &mut (impl StoragePort + ?Sized), capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        match AtomicStore::new(storage).read(EVENT_LOG_FILE) {
            Ok(bytes) => match postcard::from_bytes::<Vec<LogEntry>>(&bytes) {
                Ok(entries) => {
                    for e in entries {
                        log.push(e);
                    }
                }
                Err(_) => warn!("EventLog: stored log does not decode, starting empty"),
            },
            Err(StoreError::NotFound) => {}
            Err(e) => warn!("EventLog: load failed ({}), starting empty", e),
        }
        log
    }

    /// Append and persist. The in-memory ring is updated even when the
    /// write fails.
    pub fn record(
        &mut self,
        storage: &mut (impl StoragePort + ?Sized),
        entry: LogEntry,
    ) -> Result<(), StoreError> {
        self.push(entry);
        self.persist(storage)
    }

    pub fn persist(&self, storage: &mut (impl StoragePort + ?Sized)) -> Result<(), StoreError> {
        let entries: Vec<&LogEntry> = self.entries.iter().collect();
        let bytes = postcard::to_allocvec(&entries).map_err(|_| StoreError::Io)?;
        AtomicStore::new(storage)
            .write(EVENT_LOG_FILE, &bytes)
            .inspect_err(|e| warn!("EventLog: persist failed: {}", e))
    }

    fn push(&mut self, entry: LogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self, storage: &mut (impl StoragePort + ?Sized)) -> Result<(), StoreError> {
        self.entries.clear();
        AtomicStore::new(storage).remove(EVENT_LOG_FILE)
    }
}

/// Counters accumulated by the control loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub ticks: u64,
    pub notes_sent: u32,
    pub send_failures: u32,
    pub notes_received: u32,
    /// Envelopes addressed to another device and dropped.
    pub foreign_dropped: u32,
    pub protocol_errors: u32,
    pub store_failures: u32,
    pub alarms_raised: u32,
    pub relay_actuations: u32,
}

// ───────────────────────────────────────────────────────────────
// Panic hook
// ───────────────────────────────────────────────────────────────

/// Route panics through the logger so they land in the same output as
/// everything else before the process aborts.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        match info.location() {
            Some(loc) => error!("PANIC: {} at {}:{}", reason, loc.file(), loc.line()),
            None => error!("PANIC: {}", reason),
        }
    }));
}
