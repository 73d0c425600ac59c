//! Pool Configuration
//!
//! Injected once into the [`ResourceManager`](crate::manager::ResourceManager)
//! and read-only afterwards. Durations serialize as milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a navigation counts as finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitUntil {
    #[default]
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
    /// Done as soon as the browser commits to the new document
    #[serde(rename = "commit")]
    Commit,
}

impl WaitUntil {
    /// Name of the `Page.lifecycleEvent` that completes this condition
    pub fn lifecycle_event(&self) -> Option<&'static str> {
        match self {
            WaitUntil::Load => Some("load"),
            WaitUntil::DomContentLoaded => Some("DOMContentLoaded"),
            WaitUntil::NetworkIdle => Some("networkIdle"),
            WaitUntil::Commit => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Per-resource settings, fixed when the context is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    pub viewport: Viewport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Maximum entries kept per telemetry buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferLimits {
    pub console: usize,
    pub network: usize,
    pub performance: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            console: 1000,
            network: 500,
            performance: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Browser-level DevTools WebSocket URL
    pub cdp_url: String,

    /// Global cap on live pages across every resource
    pub max_concurrent_pages: usize,

    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,

    pub default_wait_until: WaitUntil,

    pub viewport: Viewport,

    pub user_agent: Option<String>,

    pub buffer_limits: BufferLimits,

    /// Liveness probe budget for health checks
    #[serde(with = "duration_ms")]
    pub probe_timeout: Duration,

    /// Shorter probe budget used while auto-healing
    #[serde(with = "duration_ms")]
    pub heal_probe_timeout: Duration,

    /// Extra time the navigation watchdog grants beyond the navigation timeout
    #[serde(with = "duration_ms")]
    pub watchdog_grace: Duration,

    /// Budget for connecting and creating contexts/pages
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Budget for closing a single page or context
    #[serde(with = "duration_ms")]
    pub close_timeout: Duration,

    /// Failed plain navigations after which a resource is refused
    pub unstable_after: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cdp_url: "ws://localhost:9222/devtools/browser".to_string(),
            max_concurrent_pages: 10,
            navigation_timeout: Duration::from_secs(30),
            default_wait_until: WaitUntil::Load,
            viewport: Viewport::default(),
            user_agent: None,
            buffer_limits: BufferLimits::default(),
            probe_timeout: Duration::from_millis(3000),
            heal_probe_timeout: Duration::from_millis(2000),
            watchdog_grace: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            unstable_after: 2,
        }
    }
}

impl PoolConfig {
    /// Baseline options for new resources
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            viewport: self.viewport,
            user_agent: self.user_agent.clone(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
