//! Performance Collector - navigation timings and metric snapshots

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::buffer::{keep_last, stamp_fields, BufferStats, CommonFilter, Entry, RingBuffer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    /// `navigation` or `metrics`
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl PerformanceSample {
    pub fn navigation(url: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            id: String::new(),
            timestamp: 0,
            kind: "navigation".to_string(),
            url: url.into(),
            duration_ms: Some(elapsed.as_millis() as u64),
            metrics: BTreeMap::new(),
        }
    }

    pub fn metrics(url: impl Into<String>, metrics: BTreeMap<String, f64>) -> Self {
        Self {
            id: String::new(),
            timestamp: 0,
            kind: "metrics".to_string(),
            url: url.into(),
            duration_ms: None,
            metrics,
        }
    }
}

impl Entry for PerformanceSample {
    fn stamp(&mut self) {
        stamp_fields(&mut self.id, &mut self.timestamp);
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn category(&self) -> String {
        self.kind.clone()
    }

    fn search_text(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceQuery {
    pub kinds: Option<Vec<String>>,
    pub since: Option<u64>,
    pub url_contains: Option<String>,
    pub limit: Option<usize>,
}

pub struct PerformanceBuffer {
    buffer: RingBuffer<PerformanceSample>,
}

impl PerformanceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
        }
    }

    pub fn append(&self, sample: PerformanceSample) -> PerformanceSample {
        self.buffer.append(sample)
    }

    /// Chronological, limited to the most recent matches
    pub fn query(&self, query: &PerformanceQuery) -> Vec<PerformanceSample> {
        let filter = CommonFilter::new(
            query.kinds.as_deref(),
            query.since,
            query.url_contains.as_deref(),
        );
        keep_last(self.buffer.matching(|s| filter.accepts(s)), query.limit)
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
