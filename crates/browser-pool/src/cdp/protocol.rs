//! CDP Protocol Types
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - add domain-specific types only when needed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// Browser context ID from `Target.createBrowserContext`
pub type BrowserContextId = String;

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CDPError>,
}

/// CDP Error
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl CDPEvent {
    /// Read a string field out of `params`
    pub fn param_str(&self, pointer: &str) -> Option<&str> {
        self.params.as_ref()?.pointer(pointer)?.as_str()
    }

    /// Session this event belongs to.
    ///
    /// `Target.detachedFromTarget` arrives on the browser session but names the
    /// detached session in its params, so it is routed there instead.
    pub fn routing_session(&self) -> Option<&str> {
        if self.method == "Target.detachedFromTarget" {
            return self.param_str("/sessionId");
        }
        self.session_id.as_deref()
    }
}

/// Unified CDP Message (response or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Result of Target.createTarget
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

/// Result of Target.createBrowserContext
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBrowserContextResult {
    #[serde(rename = "browserContextId")]
    pub browser_context_id: BrowserContextId,
}

/// Result of Page.navigate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NavigateResult {
    #[serde(rename = "frameId", default)]
    pub frame_id: String,
    #[serde(rename = "loaderId", default)]
    pub loader_id: Option<String>,
    #[serde(rename = "errorText", default)]
    pub error_text: Option<String>,
}
