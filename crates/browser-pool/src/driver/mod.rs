//! Driver Seam - what the pool needs from a browser platform
//!
//! Browser → Context → Page, each an async trait object. The pool never sees
//! protocol details; it only creates, probes, navigates and closes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::cdp::CDPError;
use crate::config::{ContextOptions, WaitUntil};

pub mod cdp;
#[cfg(test)]
pub(crate) mod mock;

pub use self::cdp::CdpDriver;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("CDP error: {0}")]
    Cdp(#[from] CDPError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Target closed")]
    Closed,

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Events a page pushes to its subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Console {
        level: String,
        text: String,
        location: Option<String>,
    },
    PageError {
        message: String,
    },
    Request {
        request_id: String,
        url: String,
        method: String,
        resource_type: Option<String>,
    },
    Response {
        request_id: String,
        url: String,
        status: u16,
        status_text: String,
        mime_type: Option<String>,
    },
    RequestFailed {
        request_id: String,
        url: String,
        error_text: String,
    },
    /// Emitted exactly once, whether the page was closed by us or died
    Closed,
}

/// Page event subscriber callback
pub type PageEventHandler = Arc<dyn Fn(PageEvent) + Send + Sync>;

/// What a finished navigation reports back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationResponse {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Entry point - turns configuration into a live browser connection
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self) -> DriverResult<Arc<dyn Browser>>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(&self, options: &ContextOptions) -> DriverResult<Arc<dyn Context>>;

    fn is_connected(&self) -> bool;

    /// Flips to `true` when the connection is lost
    fn disconnected(&self) -> watch::Receiver<bool>;

    async fn close(&self) -> DriverResult<()>;
}

#[async_trait]
pub trait Context: Send + Sync {
    fn id(&self) -> &str;

    async fn new_page(&self) -> DriverResult<Arc<dyn Page>>;

    async fn close(&self) -> DriverResult<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    fn id(&self) -> &str;

    fn url(&self) -> String;

    fn is_closed(&self) -> bool;

    /// Register a handler for every subsequent page event
    fn subscribe(&self, handler: PageEventHandler);

    /// Navigate and wait for `wait_until`, giving up after `timeout`
    async fn navigate(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> DriverResult<NavigationResponse>;

    async fn evaluate(&self, expression: &str) -> DriverResult<Value>;

    async fn metrics(&self) -> DriverResult<BTreeMap<String, f64>>;

    async fn close(&self) -> DriverResult<()>;
}
