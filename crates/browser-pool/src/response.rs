//! Response envelope
//!
//! `{success, data, metadata, error}` for every operation that crosses the
//! process boundary. Only opaque string ids travel in here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PoolError, Result};
use crate::guard::NavigationReport;
use crate::telemetry::now_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl From<&PoolError> for ErrorBody {
    fn from(error: &PoolError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            details: error.details(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub timestamp: u64,
    /// Contextual fields such as `resource_id` or `attempt`
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Default for ResponseMetadata {
    fn default() -> Self {
        Self {
            timestamp: now_millis(),
            fields: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub metadata: ResponseMetadata,
    pub error: Option<ErrorBody>,
}

impl ToolResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                metadata: ResponseMetadata::default(),
                error: None,
            },
            Err(e) => Self::failure(ErrorBody {
                code: "SERIALIZATION_ERROR".to_string(),
                message: e.to_string(),
                details: Value::Null,
            }),
        }
    }

    pub fn failure(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            metadata: ResponseMetadata::default(),
            error: Some(error),
        }
    }

    pub fn from_error(error: &PoolError) -> Self {
        Self::failure(error.into())
    }

    pub fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.fields.insert(key.to_string(), value.into());
        self
    }
}

impl From<NavigationReport> for ToolResponse {
    fn from(report: NavigationReport) -> Self {
        let error = report.error.clone();
        let mut response = match error {
            Some(error) => Self::failure(error),
            None => Self::ok(&report),
        };
        // A recreation is not an error, but the navigation did not happen either
        response.success = report.success;
        if response.data.is_none() {
            response.data = serde_json::to_value(&report).ok();
        }
        response
            .with_meta("resource_id", report.resource_id)
            .with_meta("attempt", report.attempt)
            .with_meta("action", report.action.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let response = ToolResponse::from_result(Ok(json!({ "resource_id": "r1" })))
            .with_meta("operation", "create_resource");

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["resource_id"], "r1");
        assert_eq!(value["metadata"]["operation"], "create_resource");
        assert!(value["metadata"]["timestamp"].as_u64().unwrap() > 0);
        assert!(value["error"].is_null());
    }

    #[test]
    fn test_error_envelope_carries_code_and_details() {
        let response = ToolResponse::from_result::<()>(Err(PoolError::CapacityExceeded {
            live: 10,
            max: 10,
        }));

        assert!(!response.success);
        assert!(response.data.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, "CAPACITY_EXCEEDED");
        assert_eq!(error.details["max"], 10);
        assert!(error.details["suggestion"].is_string());
    }
}
