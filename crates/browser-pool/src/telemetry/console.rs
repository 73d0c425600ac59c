//! Console Collector - console API calls and uncaught page errors

use serde::{Deserialize, Serialize};
use std::fmt;

use super::buffer::{keep_last, stamp_fields, BufferStats, CommonFilter, Entry, RingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
    /// Uncaught exception on the page, not a console call
    PageError,
}

impl ConsoleLevel {
    /// Map a `Runtime.consoleAPICalled` type onto a level
    pub fn from_api_type(kind: &str) -> Self {
        match kind {
            "debug" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "warning" | "warn" => ConsoleLevel::Warning,
            "error" | "assert" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Error => "error",
            ConsoleLevel::PageError => "pageerror",
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    pub level: ConsoleLevel,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ConsoleEntry {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp: 0,
            level,
            text: text.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Entry for ConsoleEntry {
    fn stamp(&mut self) {
        stamp_fields(&mut self.id, &mut self.timestamp);
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn category(&self) -> String {
        self.level.as_str().to_string()
    }

    fn search_text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleQuery {
    /// Level names, e.g. `["error", "pageerror"]`
    pub levels: Option<Vec<String>>,
    pub since: Option<u64>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

pub struct ConsoleBuffer {
    buffer: RingBuffer<ConsoleEntry>,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
        }
    }

    pub fn append(&self, entry: ConsoleEntry) -> ConsoleEntry {
        self.buffer.append(entry)
    }

    /// Matches in chronological order; `limit` keeps the most recent ones
    pub fn query(&self, query: &ConsoleQuery) -> Vec<ConsoleEntry> {
        let filter = CommonFilter::new(
            query.levels.as_deref(),
            query.since,
            query.search.as_deref(),
        );
        keep_last(self.buffer.matching(|e| filter.accepts(e)), query.limit)
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }
}
