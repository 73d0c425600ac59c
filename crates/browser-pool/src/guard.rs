//! Navigation Guard - bounded retry and escalation around navigation
//!
//! One call is one attempt. The guard keeps a single counter per resource id,
//! pre-incremented on entry:
//!
//! ```text
//! Idle → Attempting → Success     (navigated, counter reset)
//!                   → Retry       (failed, caller may call again)
//!                   → Escalate    (out of attempts or health check failed)
//!                   → Recreated   (threshold reached, resource replaced)
//! ```
//!
//! Looping is left to the caller so every attempt stays cancellable.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::WaitUntil;
use crate::driver::{DriverError, NavigationResponse};
use crate::error::PoolError;
use crate::events::PoolEvent;
use crate::health::{HealthChecker, HealthRecord};
use crate::manager::{validate_target, ResourceId, ResourceManager};
use crate::response::ErrorBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    Idle,
    Attempting,
    Success,
    Retry,
    Escalate,
    Recreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationAction {
    Navigated,
    NavigationFailed,
    MaxAttemptsReached,
    HealthCheckFailed,
    ContextRecreated,
    RecreateFailed,
    InvalidTarget,
    NotFound,
}

impl NavigationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationAction::Navigated => "navigated",
            NavigationAction::NavigationFailed => "navigation_failed",
            NavigationAction::MaxAttemptsReached => "max_attempts_reached",
            NavigationAction::HealthCheckFailed => "health_check_failed",
            NavigationAction::ContextRecreated => "context_recreated",
            NavigationAction::RecreateFailed => "recreate_failed",
            NavigationAction::InvalidTarget => "invalid_target",
            NavigationAction::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeNavigateOptions {
    pub max_attempts: u32,
    pub force_recreate_threshold: u32,
    /// Falls back to the pool's default wait condition
    pub wait_until: Option<WaitUntil>,
    /// Falls back to the pool's navigation timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Default for SafeNavigateOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            force_recreate_threshold: 2,
            wait_until: None,
            timeout: None,
        }
    }
}

/// Outcome of a single guarded attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationReport {
    pub success: bool,
    pub resource_id: ResourceId,
    pub url: String,
    pub attempt: u32,
    pub state: GuardState,
    pub action: NavigationAction,
    pub will_retry: bool,
    /// Set after recreation: rebind to this id for further calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_new_resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<NavigationResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
}

impl NavigationReport {
    fn new(
        resource_id: &str,
        url: &str,
        attempt: u32,
        state: GuardState,
        action: NavigationAction,
    ) -> Self {
        Self {
            success: false,
            resource_id: resource_id.to_string(),
            url: url.to_string(),
            attempt,
            state,
            action,
            will_retry: false,
            use_new_resource_id: None,
            suggestion: None,
            error: None,
            response: None,
            health: None,
        }
    }

    fn with_error(mut self, error: &PoolError) -> Self {
        self.error = Some(error.into());
        self
    }

    fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Tracker {
    attempts: u32,
    state: GuardState,
}

/// Whether this attempt escalates straight to recreation
fn should_recreate(attempt: u32, options: &SafeNavigateOptions) -> bool {
    attempt >= options.force_recreate_threshold
}

/// Where a failed attempt leaves the resource
fn after_failure(attempt: u32, options: &SafeNavigateOptions) -> (GuardState, NavigationAction) {
    if attempt >= options.max_attempts {
        (GuardState::Escalate, NavigationAction::MaxAttemptsReached)
    } else {
        (GuardState::Retry, NavigationAction::NavigationFailed)
    }
}

type Trackers = Arc<DashMap<ResourceId, Tracker>>;

/// Drop trackers of resources the pool has closed
fn prune_closed(manager: &Arc<ResourceManager>, trackers: Trackers) -> JoinHandle<()> {
    let mut events = manager.events().subscribe();
    let manager = Arc::downgrade(manager);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PoolEvent::ResourceClosed { resource_id }) => {
                    trackers.remove(&resource_id);
                }
                Ok(PoolEvent::ConnectionLost | PoolEvent::CleanedUp)
                | Err(RecvError::Lagged(_)) => {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    trackers.retain(|id, _| manager.get_resource(id).is_ok());
                }
                Ok(_) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub struct NavigationGuard {
    manager: Arc<ResourceManager>,
    checker: HealthChecker,
    trackers: Trackers,
    pruner: JoinHandle<()>,
}

impl NavigationGuard {
    /// Must be called from within a tokio runtime
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        let trackers: Trackers = Arc::new(DashMap::new());
        Self {
            checker: HealthChecker::new(manager.clone()),
            pruner: prune_closed(&manager, trackers.clone()),
            manager,
            trackers,
        }
    }

    pub fn health(&self) -> &HealthChecker {
        &self.checker
    }

    /// Attempts counted against the resource since its last success
    pub fn attempts(&self, resource_id: &str) -> u32 {
        self.trackers.get(resource_id).map_or(0, |t| t.attempts)
    }

    pub fn state(&self, resource_id: &str) -> GuardState {
        self.trackers
            .get(resource_id)
            .map_or(GuardState::Idle, |t| t.state)
    }

    /// Forget everything tracked for the resource
    pub fn reset(&self, resource_id: &str) {
        self.trackers.remove(resource_id);
    }

    /// Resources with guard state
    pub fn tracked(&self) -> usize {
        self.trackers.len()
    }

    fn begin_attempt(&self, resource_id: &str) -> u32 {
        let mut tracker = self
            .trackers
            .entry(resource_id.to_string())
            .or_insert(Tracker {
                attempts: 0,
                state: GuardState::Idle,
            });
        tracker.attempts += 1;
        tracker.state = GuardState::Attempting;
        tracker.attempts
    }

    fn settle(&self, resource_id: &str, state: GuardState) {
        if let Some(mut tracker) = self.trackers.get_mut(resource_id) {
            tracker.state = state;
            if state == GuardState::Success {
                tracker.attempts = 0;
            }
        }
    }

    /// One guarded navigation attempt. Never fails; branch on the report.
    pub async fn safe_navigate(
        &self,
        resource_id: &str,
        url: &str,
        options: SafeNavigateOptions,
    ) -> NavigationReport {
        let report = self.attempt(resource_id, url, options).await;
        // Closed while the attempt was running
        if self.manager.get_resource(resource_id).is_err() {
            self.trackers.remove(resource_id);
        }
        report
    }

    async fn attempt(
        &self,
        resource_id: &str,
        url: &str,
        options: SafeNavigateOptions,
    ) -> NavigationReport {
        if let Err(e) = validate_target(url) {
            return NavigationReport::new(
                resource_id,
                url,
                0,
                self.state(resource_id),
                NavigationAction::InvalidTarget,
            )
            .with_error(&e);
        }
        if self.manager.get_resource(resource_id).is_err() {
            // Usually a caller that did not rebind after recreation
            return self.gone(resource_id, url, 0);
        }

        let attempt = self.begin_attempt(resource_id);
        tracing::debug!(
            "[NavigationGuard] {} attempt {} -> {}",
            resource_id,
            attempt,
            url
        );

        if should_recreate(attempt, &options) {
            return self.recreate(resource_id, url, attempt).await;
        }

        let health = self.checker.check_health(resource_id).await;
        if !health.healthy {
            let heal = self.checker.auto_heal(resource_id).await;
            if !heal.healed {
                self.settle(resource_id, GuardState::Escalate);
                let error = PoolError::HealthCheck {
                    resource_id: resource_id.to_string(),
                    message: heal.reason.clone(),
                };
                let mut report = NavigationReport::new(
                    resource_id,
                    url,
                    attempt,
                    GuardState::Escalate,
                    NavigationAction::HealthCheckFailed,
                )
                .with_suggestion("Recreate the resource before navigating again")
                .with_error(&error);
                report.health = Some(heal.health);
                return report;
            }
        }

        self.navigate(resource_id, url, attempt, &options).await
    }

    async fn navigate(
        &self,
        resource_id: &str,
        url: &str,
        attempt: u32,
        options: &SafeNavigateOptions,
    ) -> NavigationReport {
        let config = self.manager.config();
        let wait_until = options.wait_until.unwrap_or(config.default_wait_until);
        let timeout = options.timeout.unwrap_or(config.navigation_timeout);
        let watchdog = timeout + config.watchdog_grace;

        let page = match self.manager.primary_page(resource_id).await {
            Ok(page) => page,
            Err(PoolError::NotFound(_)) => return self.gone(resource_id, url, attempt),
            Err(e) => return self.failed(resource_id, url, attempt, options, e.to_string()),
        };

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(watchdog, page.page.navigate(url, wait_until, timeout)).await
            {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        "[NavigationGuard] Watchdog fired after {:?} on {}",
                        watchdog,
                        resource_id
                    );
                    Err(DriverError::Timeout(watchdog))
                }
            };

        if self.manager.get_resource(resource_id).is_err() {
            return self.gone(resource_id, url, attempt);
        }

        let response = match outcome {
            Ok(response) => response,
            Err(e) => return self.failed(resource_id, url, attempt, options, e.to_string()),
        };

        // Navigation can report success on a page that dies right after
        if let Err(e) = page.probe(config.probe_timeout).await {
            return self.failed(
                resource_id,
                url,
                attempt,
                options,
                format!("page unresponsive after navigation: {}", e),
            );
        }

        self.settle(resource_id, GuardState::Success);
        self.manager.record_navigation(resource_id, url, started.elapsed());
        tracing::debug!(
            "[NavigationGuard] {} reached {} on attempt {}",
            resource_id,
            url,
            attempt
        );

        let mut report = NavigationReport::new(
            resource_id,
            url,
            attempt,
            GuardState::Success,
            NavigationAction::Navigated,
        );
        report.success = true;
        report.response = Some(response);
        report
    }

    /// The resource is not (or no longer) in the pool; retrying cannot help
    fn gone(&self, resource_id: &str, url: &str, attempt: u32) -> NavigationReport {
        self.reset(resource_id);
        tracing::debug!(
            "[NavigationGuard] {} is not in the pool, giving up on {}",
            resource_id,
            url
        );
        NavigationReport::new(
            resource_id,
            url,
            attempt,
            GuardState::Idle,
            NavigationAction::NotFound,
        )
        .with_suggestion("Create a new resource or use the id returned by recreation")
        .with_error(&PoolError::NotFound(resource_id.to_string()))
    }

    fn failed(
        &self,
        resource_id: &str,
        url: &str,
        attempt: u32,
        options: &SafeNavigateOptions,
        message: String,
    ) -> NavigationReport {
        let (state, action) = after_failure(attempt, options);
        self.settle(resource_id, state);
        tracing::warn!(
            "[NavigationGuard] {} attempt {}/{} failed: {}",
            resource_id,
            attempt,
            options.max_attempts,
            message
        );

        let error = PoolError::Navigation {
            resource_id: resource_id.to_string(),
            url: url.to_string(),
            attempt,
            message,
        };
        let report =
            NavigationReport::new(resource_id, url, attempt, state, action).with_error(&error);
        if state == GuardState::Retry {
            let mut report =
                report.with_suggestion("Call safe_navigate again with the same resource id");
            report.will_retry = true;
            report
        } else {
            report.with_suggestion("Recreate the resource; retries are exhausted")
        }
    }

    async fn recreate(&self, resource_id: &str, url: &str, attempt: u32) -> NavigationReport {
        tracing::info!(
            "[NavigationGuard] {} reached attempt {}, recreating",
            resource_id,
            attempt
        );
        let outcome = self.checker.force_recreate(resource_id).await;
        // The old resource is closed either way
        self.trackers.remove(resource_id);

        match outcome.new_resource_id {
            Some(new_id) if outcome.success => {
                self.trackers.insert(
                    new_id.clone(),
                    Tracker {
                        attempts: 0,
                        state: GuardState::Recreated,
                    },
                );
                let mut report = NavigationReport::new(
                    resource_id,
                    url,
                    attempt,
                    GuardState::Recreated,
                    NavigationAction::ContextRecreated,
                )
                .with_suggestion("Retry the navigation with the new resource id");
                report.will_retry = true;
                report.use_new_resource_id = Some(new_id);
                report
            }
            _ => {
                let error = PoolError::HealthCheck {
                    resource_id: resource_id.to_string(),
                    message: format!(
                        "recreation failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ),
                };
                NavigationReport::new(
                    resource_id,
                    url,
                    attempt,
                    GuardState::Escalate,
                    NavigationAction::RecreateFailed,
                )
                .with_suggestion("Create a new resource")
                .with_error(&error)
            }
        }
    }
}

impl Drop for NavigationGuard {
    fn drop(&mut self) {
        self.pruner.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::test_manager;
    use crate::response::ToolResponse;
    use std::sync::atomic::Ordering;

    async fn guarded_resource(
        max_pages: usize,
    ) -> (
        NavigationGuard,
        Arc<ResourceManager>,
        Arc<crate::driver::mock::MockControl>,
        ResourceId,
    ) {
        let (manager, control) = test_manager(max_pages);
        let id = manager.create_resource(None).await.unwrap();
        manager.create_child(&id).await.unwrap();
        (NavigationGuard::new(manager.clone()), manager, control, id)
    }

    #[test]
    fn test_decisions() {
        let options = SafeNavigateOptions::default();
        assert!(!should_recreate(1, &options));
        assert!(should_recreate(2, &options));
        assert_eq!(
            after_failure(1, &options),
            (GuardState::Retry, NavigationAction::NavigationFailed)
        );
        assert_eq!(
            after_failure(3, &options),
            (GuardState::Escalate, NavigationAction::MaxAttemptsReached)
        );
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (guard, manager, _control, id) = guarded_resource(3).await;

        let report = guard
            .safe_navigate(&id, "https://example.com", SafeNavigateOptions::default())
            .await;
        assert!(report.success);
        assert_eq!(report.attempt, 1);
        assert_eq!(report.action, NavigationAction::Navigated);
        assert_eq!(report.response.unwrap().status, Some(200));
        assert_eq!(guard.attempts(&id), 0);
        assert_eq!(guard.state(&id), GuardState::Success);
        assert_eq!(manager.telemetry(&id).unwrap().performance.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_then_recreation() {
        let (guard, manager, control, id) = guarded_resource(3).await;
        control.fail_navigation.store(true, Ordering::SeqCst);
        let options = SafeNavigateOptions::default();

        let first = guard.safe_navigate(&id, "https://example.com", options).await;
        assert!(!first.success);
        assert_eq!(first.attempt, 1);
        assert_eq!(first.action, NavigationAction::NavigationFailed);
        assert!(first.will_retry);
        assert_eq!(first.error.unwrap().code, "NAVIGATION_ERROR");
        assert_eq!(guard.state(&id), GuardState::Retry);

        let second = guard.safe_navigate(&id, "https://example.com", options).await;
        assert_eq!(second.attempt, 2);
        assert_eq!(second.action, NavigationAction::ContextRecreated);
        assert_eq!(second.state, GuardState::Recreated);
        let new_id = second.use_new_resource_id.unwrap();
        assert_ne!(new_id, id);

        // Recreation does not navigate
        assert_eq!(control.navigations.load(Ordering::SeqCst), 1);
        assert!(manager.get_resource(&id).is_err());
        assert_eq!(guard.attempts(&id), 0);
        assert_eq!(guard.attempts(&new_id), 0);

        control.fail_navigation.store(false, Ordering::SeqCst);
        let third = guard.safe_navigate(&new_id, "https://example.com", options).await;
        assert!(third.success);
        assert_eq!(third.attempt, 1);
    }

    #[tokio::test]
    async fn test_max_attempts_reached() {
        let (guard, _manager, control, id) = guarded_resource(3).await;
        control.fail_navigation.store(true, Ordering::SeqCst);
        let options = SafeNavigateOptions {
            max_attempts: 3,
            force_recreate_threshold: 10,
            ..Default::default()
        };

        for _ in 0..2 {
            let report = guard.safe_navigate(&id, "https://example.com", options).await;
            assert_eq!(report.action, NavigationAction::NavigationFailed);
        }
        let last = guard.safe_navigate(&id, "https://example.com", options).await;
        assert_eq!(last.attempt, 3);
        assert_eq!(last.action, NavigationAction::MaxAttemptsReached);
        assert_eq!(last.state, GuardState::Escalate);
        assert!(!last.will_retry);
        assert!(last.suggestion.unwrap().contains("Recreate"));
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (guard, _manager, control, id) = guarded_resource(3).await;
        let options = SafeNavigateOptions {
            force_recreate_threshold: 3,
            ..Default::default()
        };

        control.fail_navigation.store(true, Ordering::SeqCst);
        guard.safe_navigate(&id, "https://example.com", options).await;
        assert_eq!(guard.attempts(&id), 1);

        control.fail_navigation.store(false, Ordering::SeqCst);
        let report = guard.safe_navigate(&id, "https://example.com", options).await;
        assert!(report.success);
        assert_eq!(report.attempt, 2);
        assert_eq!(guard.attempts(&id), 0);
    }

    #[tokio::test]
    async fn test_watchdog_cuts_hung_navigation() {
        let (guard, _manager, control, id) = guarded_resource(3).await;
        control.hang_navigation.store(true, Ordering::SeqCst);

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            guard.safe_navigate(
                &id,
                "https://example.com",
                SafeNavigateOptions {
                    timeout: Some(Duration::from_millis(20)),
                    ..Default::default()
                },
            ),
        )
        .await
        .expect("watchdog should settle the attempt");

        assert_eq!(report.action, NavigationAction::NavigationFailed);
        assert!(report.error.unwrap().message.contains("Timed out"));
    }

    #[tokio::test]
    async fn test_unhealthy_resource_is_not_navigated() {
        let (manager, control) = test_manager(3);
        let guard = NavigationGuard::new(manager.clone());
        let id = manager.create_resource(None).await.unwrap();

        let report = guard
            .safe_navigate(&id, "https://example.com", SafeNavigateOptions::default())
            .await;
        assert_eq!(report.action, NavigationAction::HealthCheckFailed);
        assert_eq!(report.error.unwrap().code, "HEALTH_CHECK_ERROR");
        assert!(!report.health.unwrap().healthy);
        assert_eq!(control.navigations.load(Ordering::SeqCst), 0);
        assert_eq!(guard.attempts(&id), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_target_and_unknown_resource() {
        let (guard, _manager, _control, id) = guarded_resource(3).await;

        let invalid = guard
            .safe_navigate(&id, "::not-a-url", SafeNavigateOptions::default())
            .await;
        assert_eq!(invalid.action, NavigationAction::InvalidTarget);
        assert_eq!(guard.attempts(&id), 0);

        let missing = guard
            .safe_navigate("gone", "https://example.com", SafeNavigateOptions::default())
            .await;
        assert_eq!(missing.action, NavigationAction::NotFound);
        assert_eq!(missing.error.unwrap().code, "NOT_FOUND");
    }

    async fn settle_tracking(guard: &NavigationGuard) -> usize {
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while guard.tracked() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        guard.tracked()
    }

    #[tokio::test]
    async fn test_resource_closed_mid_navigation_is_not_found() {
        let (guard, manager, control, id) = guarded_resource(3).await;
        control.hang_navigation.store(true, Ordering::SeqCst);

        let (report, _) = tokio::join!(
            guard.safe_navigate(&id, "https://example.com", SafeNavigateOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                manager.cleanup_all().await;
            }
        );
        assert!(!report.success);
        assert_eq!(report.action, NavigationAction::NotFound);
        assert!(!report.will_retry);
        assert!(report.use_new_resource_id.is_none());
        assert_eq!(report.error.unwrap().code, "NOT_FOUND");
        assert_eq!(guard.attempts(&id), 0);
    }

    #[tokio::test]
    async fn test_trackers_follow_resource_lifetime() {
        let (manager, control) = test_manager(3);
        let guard = NavigationGuard::new(manager.clone());

        for _ in 0..20 {
            let id = manager.create_resource(None).await.unwrap();
            manager.create_child(&id).await.unwrap();
            let report = guard
                .safe_navigate(&id, "https://example.com", SafeNavigateOptions::default())
                .await;
            assert!(report.success);
            manager.close_resource(&id).await;
        }
        assert_eq!(settle_tracking(&guard).await, 0);

        // Dropped without per-resource close events
        for _ in 0..2 {
            let id = manager.create_resource(None).await.unwrap();
            manager.create_child(&id).await.unwrap();
            guard
                .safe_navigate(&id, "https://example.com", SafeNavigateOptions::default())
                .await;
        }
        assert_eq!(guard.tracked(), 2);
        control.browser().unwrap().disconnect();
        assert_eq!(settle_tracking(&guard).await, 0);
    }

    #[tokio::test]
    async fn test_report_converts_to_envelope() {
        let (guard, _manager, control, id) = guarded_resource(3).await;
        control.fail_navigation.store(true, Ordering::SeqCst);

        let report = guard
            .safe_navigate(&id, "https://example.com", SafeNavigateOptions::default())
            .await;
        let response = ToolResponse::from(report);

        assert!(!response.success);
        assert_eq!(response.metadata.fields["action"], "navigation_failed");
        assert_eq!(response.metadata.fields["attempt"], 1);
        assert_eq!(response.data.unwrap()["will_retry"], true);
        assert_eq!(response.error.unwrap().details["attempt"], 1);
    }
}
