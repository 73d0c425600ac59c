//! Telemetry Ring Buffers
//!
//! Each resource owns one [`TelemetrySet`]: console, network and performance
//! buffers, all bounded with oldest-first eviction. Page events land here
//! through [`TelemetrySet::record`], which only translates and appends.

pub mod buffer;
pub mod console;
pub mod network;
pub mod performance;

use serde::Serialize;

pub use buffer::{now_millis, BufferStats, Entry, RingBuffer};
pub use console::{ConsoleBuffer, ConsoleEntry, ConsoleLevel, ConsoleQuery};
pub use network::{NetworkBuffer, NetworkEntry, NetworkQuery, StatusFilter};
pub use performance::{PerformanceBuffer, PerformanceQuery, PerformanceSample};

use crate::config::BufferLimits;
use crate::driver::PageEvent;

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryStats {
    pub console: BufferStats,
    pub network: BufferStats,
    pub performance: BufferStats,
}

pub struct TelemetrySet {
    pub console: ConsoleBuffer,
    pub network: NetworkBuffer,
    pub performance: PerformanceBuffer,
}

impl TelemetrySet {
    pub fn new(limits: &BufferLimits) -> Self {
        Self {
            console: ConsoleBuffer::new(limits.console),
            network: NetworkBuffer::new(limits.network),
            performance: PerformanceBuffer::new(limits.performance),
        }
    }

    /// Route one page event into the matching buffer
    pub fn record(&self, event: PageEvent) {
        match event {
            PageEvent::Console {
                level,
                text,
                location,
            } => {
                self.console.append(
                    ConsoleEntry::new(ConsoleLevel::from_api_type(&level), text)
                        .with_location(location),
                );
            }
            PageEvent::PageError { message } => {
                self.console
                    .append(ConsoleEntry::new(ConsoleLevel::PageError, message));
            }
            PageEvent::Request {
                request_id,
                url,
                method,
                resource_type,
            } => self.network.on_request(&request_id, &url, &method, resource_type),
            PageEvent::Response {
                request_id,
                url,
                status,
                status_text,
                mime_type,
            } => {
                self.network
                    .on_response(&request_id, &url, status, &status_text, mime_type);
            }
            PageEvent::RequestFailed {
                request_id,
                url,
                error_text,
            } => {
                self.network.on_failure(&request_id, &url, &error_text);
            }
            PageEvent::Closed => {}
        }
    }

    pub fn clear(&self) {
        self.console.clear();
        self.network.clear();
        self.performance.clear();
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            console: self.console.stats(),
            network: self.network.stats(),
            performance: self.performance.stats(),
        }
    }
}
