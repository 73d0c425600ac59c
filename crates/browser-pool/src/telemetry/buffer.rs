//! Bounded FIFO store shared by every telemetry kind

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Something a ring buffer can hold
pub trait Entry: Clone {
    /// Fill in id and timestamp when the producer left them empty
    fn stamp(&mut self);

    fn timestamp(&self) -> u64;

    /// Bucket used by type filters and `stats()`
    fn category(&self) -> String;

    /// Text matched by substring search
    fn search_text(&self) -> &str;
}

/// Shared stamping rule: empty id / zero timestamp mean "absent"
pub(crate) fn stamp_fields(id: &mut String, timestamp: &mut u64) {
    if id.is_empty() {
        *id = Uuid::now_v7().to_string();
    }
    if *timestamp == 0 {
        *timestamp = now_millis();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub total: usize,
    pub capacity: usize,
    pub by_category: BTreeMap<String, usize>,
}

pub struct RingBuffer<T> {
    entries: RwLock<VecDeque<T>>,
    capacity: usize,
}

impl<T: Entry> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Insert, evicting the oldest entries beyond capacity. Returns the stored entry.
    pub fn append(&self, mut entry: T) -> T {
        entry.stamp();
        let mut entries = self.entries.write();
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        entry
    }

    /// Matching entries in insertion order
    pub fn matching(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.entries
            .read()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        let entries = self.entries.read();
        let mut by_category = BTreeMap::new();
        for entry in entries.iter() {
            *by_category.entry(entry.category()).or_insert(0) += 1;
        }
        BufferStats {
            total: entries.len(),
            capacity: self.capacity,
            by_category,
        }
    }
}

/// Filters every telemetry query shares
#[derive(Debug, Clone, Default)]
pub(crate) struct CommonFilter<'a> {
    pub categories: Option<&'a [String]>,
    pub since: Option<u64>,
    pub search: Option<String>,
}

impl<'a> CommonFilter<'a> {
    pub fn new(categories: Option<&'a [String]>, since: Option<u64>, search: Option<&str>) -> Self {
        Self {
            categories,
            since,
            search: search.map(str::to_lowercase),
        }
    }

    pub fn accepts<T: Entry>(&self, entry: &T) -> bool {
        if let Some(categories) = self.categories {
            let category = entry.category();
            if !categories.iter().any(|c| c.eq_ignore_ascii_case(&category)) {
                return false;
            }
        }
        if self.since.is_some_and(|since| entry.timestamp() < since) {
            return false;
        }
        match &self.search {
            Some(needle) => entry.search_text().to_lowercase().contains(needle.as_str()),
            None => true,
        }
    }
}

/// Keep the last `limit` items, preserving order
pub(crate) fn keep_last<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        if items.len() > limit {
            items.drain(..items.len() - limit);
        }
    }
    items
}
