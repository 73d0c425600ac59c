//! CDP Session - Represents a connection to a specific browser target
//!
//! Design: Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket - no per-session connection overhead.

use super::client::{CDPClient, CDPError, Result};
use super::protocol::{AttachToTargetResult, NavigateResult, SessionId, TargetId};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Domains every pooled page needs for probing, navigation and telemetry
pub const DEFAULT_DOMAINS: &[&str] = &["Page", "Runtime", "Network", "Inspector", "Performance"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach to a target without enabling any domains yet.
    ///
    /// Callers register their event routing first and then call
    /// [`CDPSession::enable`], so no early event is missed.
    pub async fn attach(client: Arc<CDPClient>, target_id: TargetId) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;

        Ok(Self {
            client,
            target_id,
            session_id: attach_result.session_id,
        })
    }

    /// Enable domains in parallel; individual failures are logged, not fatal
    pub async fn enable(&self, domains: &[&str]) {
        let enable_futures: Vec<_> = domains
            .iter()
            .map(|domain| self.send(format!("{}.enable", domain), None))
            .collect();

        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(
                "[CDP] Some domain enables failed on {}: {}/{}",
                self.target_id,
                failures,
                results.len()
            );
        }

        // networkIdle and friends only arrive with lifecycle events switched on
        if let Err(e) = self
            .send(
                "Page.setLifecycleEventsEnabled",
                Some(json!({ "enabled": true })),
            )
            .await
        {
            tracing::warn!("[CDP] Lifecycle events unavailable on {}: {}", self.target_id, e);
        }
    }

    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Start a navigation; completion is signalled by lifecycle events
    pub async fn navigate(&self, url: impl Into<String>) -> Result<NavigateResult> {
        let result = self
            .send("Page.navigate", Some(json!({ "url": url.into() })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Evaluate JavaScript and return the value by value
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        self.send(
            "Runtime.evaluate",
            Some(json!({
                "expression": expression.into(),
                "returnByValue": true,
            })),
        )
        .await
    }

    /// Apply viewport size
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send(
            "Emulation.setDeviceMetricsOverride",
            Some(json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.send(
            "Emulation.setUserAgentOverride",
            Some(json!({ "userAgent": user_agent })),
        )
        .await?;
        Ok(())
    }

    /// Collect `Performance.getMetrics` as name -> value
    pub async fn metrics(&self) -> Result<BTreeMap<String, f64>> {
        let result = self.send("Performance.getMetrics", None).await?;
        let metrics = result["metrics"]
            .as_array()
            .ok_or_else(|| CDPError::Protocol {
                code: -1,
                message: "Performance.getMetrics returned no metrics".to_string(),
            })?
            .iter()
            .filter_map(|m| Some((m["name"].as_str()?.to_string(), m["value"].as_f64()?)))
            .collect();
        Ok(metrics)
    }

    /// Close the target this session is attached to
    pub async fn close_target(&self) -> Result<()> {
        self.client
            .send_request(
                "Target.closeTarget",
                Some(json!({ "targetId": &self.target_id })),
                None,
            )
            .await?;
        Ok(())
    }
}
