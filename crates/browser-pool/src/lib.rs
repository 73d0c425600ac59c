//! Browser Resource Pool
//!
//! Brokers browser contexts and pages for many independent callers over one
//! browser connection, keeps an eye on their liveness and recovers them when
//! they hang.
//!
//! # Layout
//!
//! 1. **manager**: single owner of the connection, contexts, pages and the global page cap
//! 2. **health**: probes pages with timeouts, closes hung ones, recreates contexts
//! 3. **guard**: per-resource retry/escalation state machine around navigation
//! 4. **telemetry**: bounded console/network/performance buffers fed by page events
//! 5. **driver**: the platform seam; CDP over a single WebSocket in production

pub mod cdp;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod guard;
pub mod health;
pub mod manager;
pub mod response;
pub mod shutdown;
pub mod telemetry;

pub use cdp::{CDPClient, CDPSession};
pub use config::{BufferLimits, ContextOptions, PoolConfig, Viewport, WaitUntil};
pub use driver::{CdpDriver, Driver, DriverError};
pub use error::{PoolError, Result};
pub use events::{EventBus, PoolEvent};
pub use guard::{
    GuardState, NavigationAction, NavigationGuard, NavigationReport, SafeNavigateOptions,
};
pub use health::{HealOutcome, HealthChecker, HealthRecord, RecreateOutcome};
pub use manager::{NavigateOptions, PageHandle, ResourceHandle, ResourceId, ResourceManager};
pub use response::ToolResponse;
pub use shutdown::install_shutdown_handler;
pub use telemetry::TelemetrySet;
