//! Error types for the resource pool
//!
//! One flat enum per failure class callers can act on. Each variant maps to a
//! stable code for the response envelope.

use serde_json::{json, Value};
use thiserror::Error;

use crate::driver::DriverError;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Browser connection unavailable: {0}")]
    Connection(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Page limit reached: {live}/{max} pages open")]
    CapacityExceeded { live: usize, max: usize },

    #[error("Resource {resource_id} is unstable after {failures} failed navigations")]
    ContextUnstable { resource_id: String, failures: u32 },

    #[error("Navigation to {url} failed on resource {resource_id} (attempt {attempt}): {message}")]
    Navigation {
        resource_id: String,
        url: String,
        attempt: u32,
        message: String,
    },

    #[error("Invalid navigation target: {0}")]
    InvalidUrl(String),

    #[error("Health check failed for {resource_id}: {message}")]
    HealthCheck { resource_id: String, message: String },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl PoolError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::Connection(_) => "CONNECTION_ERROR",
            PoolError::NotFound(_) => "NOT_FOUND",
            PoolError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            PoolError::ContextUnstable { .. } => "CONTEXT_UNSTABLE",
            PoolError::Navigation { .. } => "NAVIGATION_ERROR",
            PoolError::InvalidUrl(_) => "INVALID_URL",
            PoolError::HealthCheck { .. } => "HEALTH_CHECK_ERROR",
            PoolError::Driver(_) => "DRIVER_ERROR",
        }
    }

    /// What the caller should do next
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            PoolError::Connection(_) => Some("Check that the browser is running and retry"),
            PoolError::NotFound(_) => Some("Create a new resource and use its id"),
            PoolError::CapacityExceeded { .. } => {
                Some("Close unused pages or retry once other work finishes")
            }
            PoolError::ContextUnstable { .. } => {
                Some("Use safe_navigate or recreate the resource")
            }
            PoolError::Navigation { .. } => Some("Retry the navigation through safe_navigate"),
            PoolError::HealthCheck { .. } => Some("Recreate the resource"),
            PoolError::InvalidUrl(_) | PoolError::Driver(_) => None,
        }
    }

    /// Structured details for the response envelope
    pub fn details(&self) -> Value {
        let mut details = match self {
            PoolError::NotFound(resource_id) => json!({ "resource_id": resource_id }),
            PoolError::CapacityExceeded { live, max } => json!({ "live": live, "max": max }),
            PoolError::ContextUnstable {
                resource_id,
                failures,
            } => json!({ "resource_id": resource_id, "failures": failures }),
            PoolError::Navigation {
                resource_id,
                url,
                attempt,
                ..
            } => json!({ "resource_id": resource_id, "url": url, "attempt": attempt }),
            PoolError::HealthCheck { resource_id, .. } => json!({ "resource_id": resource_id }),
            PoolError::InvalidUrl(url) => json!({ "url": url }),
            PoolError::Connection(_) | PoolError::Driver(_) => json!({}),
        };
        if let (Some(suggestion), Some(map)) = (self.suggestion(), details.as_object_mut()) {
            map.insert("suggestion".to_string(), json!(suggestion));
        }
        details
    }
}
