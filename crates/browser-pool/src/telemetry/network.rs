//! Network Collector - one entry per finished request/response exchange
//!
//! Requests are tracked in flight by request id and appended once they get a
//! response or fail, so stored entries never change after insertion.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use super::buffer::{now_millis, stamp_fields, BufferStats, CommonFilter, Entry, RingBuffer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: u64,
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Transport-level failure (no HTTP status)
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl NetworkEntry {
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp: 0,
            request_id: request_id.into(),
            url: url.into(),
            method: method.into(),
            resource_type: None,
            status: None,
            status_text: String::new(),
            mime_type: None,
            failed: false,
            failure_text: None,
            duration_ms: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Transport failure or HTTP error status
    pub fn is_failed(&self) -> bool {
        self.failed || self.status.is_some_and(|status| status >= 400)
    }
}

impl Entry for NetworkEntry {
    fn stamp(&mut self) {
        stamp_fields(&mut self.id, &mut self.timestamp);
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn category(&self) -> String {
        self.resource_type
            .as_deref()
            .unwrap_or("other")
            .to_ascii_lowercase()
    }

    fn search_text(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    Code(u16),
    /// Transport failure or status >= 400
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkQuery {
    /// Resource types, e.g. `["xhr", "fetch"]`
    pub resource_types: Option<Vec<String>>,
    pub methods: Option<Vec<String>>,
    pub since: Option<u64>,
    pub url_contains: Option<String>,
    pub status: Option<StatusFilter>,
    pub limit: Option<usize>,
}

/// A request seen on the wire but not finished yet
#[derive(Debug, Clone)]
struct InFlight {
    entry: NetworkEntry,
    started: Instant,
}

pub struct NetworkBuffer {
    buffer: RingBuffer<NetworkEntry>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl NetworkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn append(&self, entry: NetworkEntry) -> NetworkEntry {
        self.buffer.append(entry)
    }

    /// Outgoing request; held until it completes
    pub fn on_request(&self, request_id: &str, url: &str, method: &str, resource_type: Option<String>) {
        let mut entry = NetworkEntry::new(request_id, method, url);
        entry.resource_type = resource_type;
        entry.timestamp = now_millis();

        let mut in_flight = self.in_flight.lock();
        // Redirects reuse the request id; the latest hop wins
        if in_flight.len() >= self.buffer.capacity() && !in_flight.contains_key(request_id) {
            tracing::debug!("[Telemetry] In-flight table full, dropping {}", url);
            return;
        }
        in_flight.insert(
            request_id.to_string(),
            InFlight {
                entry,
                started: Instant::now(),
            },
        );
    }

    pub fn on_response(
        &self,
        request_id: &str,
        url: &str,
        status: u16,
        status_text: &str,
        mime_type: Option<String>,
    ) -> NetworkEntry {
        let (mut entry, duration) = self.take_in_flight(request_id, url);
        entry.status = Some(status);
        entry.status_text = status_text.to_string();
        entry.mime_type = mime_type;
        entry.duration_ms = duration;
        self.buffer.append(entry)
    }

    pub fn on_failure(&self, request_id: &str, url: &str, error_text: &str) -> NetworkEntry {
        let (mut entry, duration) = self.take_in_flight(request_id, url);
        entry.failed = true;
        entry.failure_text = Some(error_text.to_string());
        entry.duration_ms = duration;
        self.buffer.append(entry)
    }

    fn take_in_flight(&self, request_id: &str, url: &str) -> (NetworkEntry, Option<u64>) {
        match self.in_flight.lock().remove(request_id) {
            Some(pending) => {
                let mut entry = pending.entry;
                if !url.is_empty() {
                    entry.url = url.to_string();
                }
                (entry, Some(pending.started.elapsed().as_millis() as u64))
            }
            // Request predates the subscription; method unknown
            None => (NetworkEntry::new(request_id, "", url), None),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Matches newest first, then truncated to `limit`
    pub fn query(&self, query: &NetworkQuery) -> Vec<NetworkEntry> {
        let filter = CommonFilter::new(
            query.resource_types.as_deref(),
            query.since,
            query.url_contains.as_deref(),
        );
        let mut matches = self.buffer.matching(|e| {
            filter.accepts(e)
                && query
                    .methods
                    .as_ref()
                    .map_or(true, |methods| methods.iter().any(|m| m.eq_ignore_ascii_case(&e.method)))
                && match query.status {
                    Some(StatusFilter::Code(code)) => e.status == Some(code),
                    Some(StatusFilter::Failed) => e.is_failed(),
                    None => true,
                }
        });

        // Reverse first so equal timestamps still come out newest first
        matches.reverse();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        matches
    }

    pub fn clear(&self) {
        self.buffer.clear();
        self.in_flight.lock().clear();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_returns_newest_first() {
        let network = NetworkBuffer::new(500);
        for i in 0..20u64 {
            network.append(
                NetworkEntry::new(format!("r{}", i), "GET", format!("https://example.com/{}", i))
                    .with_status(200)
                    .at(1_000 + i),
            );
        }

        let newest = network.query(&NetworkQuery {
            limit: Some(10),
            ..Default::default()
        });
        let ids: Vec<_> = newest.iter().map(|e| e.request_id.as_str()).collect();
        let expected: Vec<String> = (10..20).rev().map(|i| format!("r{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_failed_status_filter() {
        let network = NetworkBuffer::new(10);
        network.append(NetworkEntry::new("ok", "GET", "https://a.test/").with_status(200));
        network.append(NetworkEntry::new("missing", "GET", "https://a.test/x").with_status(404));
        network.append(NetworkEntry::new("boom", "POST", "https://a.test/api").with_status(500));
        network.on_request("dns", "https://nowhere.invalid/", "GET", Some("Document".to_string()));
        network.on_failure("dns", "", "net::ERR_NAME_NOT_RESOLVED");

        let failed = network.query(&NetworkQuery {
            status: Some(StatusFilter::Failed),
            ..Default::default()
        });
        let mut ids: Vec<_> = failed.iter().map(|e| e.request_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["boom", "dns", "missing"]);

        let not_found = network.query(&NetworkQuery {
            status: Some(StatusFilter::Code(404)),
            ..Default::default()
        });
        assert_eq!(not_found.len(), 1);
        assert_eq!(not_found[0].request_id, "missing");
    }

    #[test]
    fn test_exchange_assembled_from_events() {
        let network = NetworkBuffer::new(10);
        network.on_request("r1", "https://api.test/items", "POST", Some("XHR".to_string()));
        assert_eq!(network.in_flight(), 1);
        assert!(network.is_empty());

        let entry = network.on_response("r1", "https://api.test/items", 201, "Created", None);
        assert_eq!(network.in_flight(), 0);
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.status, Some(201));
        assert!(entry.duration_ms.is_some());
        assert_eq!(network.stats().by_category["xhr"], 1);
    }

    #[test]
    fn test_untracked_completion_leaves_method_empty() {
        let network = NetworkBuffer::new(10);
        let entry = network.on_response("early", "https://a.test/boot.js", 200, "OK", None);
        assert_eq!(entry.method, "");
        assert_eq!(entry.duration_ms, None);

        let methods = network.query(&NetworkQuery {
            methods: Some(vec!["GET".to_string()]),
            ..Default::default()
        });
        assert!(methods.is_empty());
    }

    #[test]
    fn test_url_and_method_filters() {
        let network = NetworkBuffer::new(10);
        network.append(NetworkEntry::new("1", "GET", "https://CDN.example.com/app.js"));
        network.append(NetworkEntry::new("2", "POST", "https://api.example.com/login"));
        network.append(NetworkEntry::new("3", "GET", "https://api.example.com/me"));

        let api_gets = network.query(&NetworkQuery {
            url_contains: Some("API.example".to_string()),
            methods: Some(vec!["get".to_string()]),
            ..Default::default()
        });
        assert_eq!(api_gets.len(), 1);
        assert_eq!(api_gets[0].request_id, "3");

        let cdn = network.query(&NetworkQuery {
            url_contains: Some("cdn".to_string()),
            ..Default::default()
        });
        assert_eq!(cdn.len(), 1);
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let network = NetworkBuffer::new(500);
        for i in 0..600 {
            network.append(NetworkEntry::new(format!("r{}", i), "GET", "https://a.test/"));
        }
        assert_eq!(network.len(), 500);
        let all = network.query(&NetworkQuery::default());
        assert!(all.iter().all(|e| e.request_id != "r99"));
        assert!(all.iter().any(|e| e.request_id == "r100"));
    }
}
