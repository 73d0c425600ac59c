//! Health Checker - liveness probes and tiered remediation
//!
//! Probe timeouts are routine and only ever land in a record's issue list.
//! Remediation goes through the resource manager: close hung pages first,
//! recreate the whole resource when that is not enough.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::events::PoolEvent;
use crate::manager::{PageHandle, ResourceId, ResourceManager};
use crate::telemetry::now_millis;

/// Snapshot of one resource's liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub resource_id: ResourceId,
    pub timestamp: u64,
    pub healthy: bool,
    pub issues: Vec<String>,
    pub total_pages: usize,
    pub active_pages: usize,
    pub unresponsive_pages: usize,
}

impl HealthRecord {
    /// Conservative verdict for a resource that could not be inspected at all
    pub fn unreachable(resource_id: &str, error: &PoolError) -> Self {
        let failure = PoolError::HealthCheck {
            resource_id: resource_id.to_string(),
            message: error.to_string(),
        };
        Self {
            resource_id: resource_id.to_string(),
            timestamp: now_millis(),
            healthy: false,
            issues: vec![failure.to_string()],
            total_pages: 0,
            active_pages: 0,
            unresponsive_pages: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealOutcome {
    pub healed: bool,
    pub reason: String,
    /// Pages closed because they failed the heal probe
    pub closed_pages: Vec<String>,
    /// Verdict after healing, or the failing one if nothing was done
    pub health: HealthRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecreateOutcome {
    pub success: bool,
    pub old_resource_id: ResourceId,
    pub new_resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum Verdict {
    Closed,
    Active,
    Unresponsive(String),
}

async fn probe_page(page: &PageHandle, timeout: Duration) -> Verdict {
    if page.page.is_closed() {
        return Verdict::Closed;
    }
    match page.probe(timeout).await {
        Ok(()) => Verdict::Active,
        Err(e) => Verdict::Unresponsive(e.to_string()),
    }
}

pub struct HealthChecker {
    manager: Arc<ResourceManager>,
}

impl HealthChecker {
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        Self { manager }
    }

    /// Probe every page of the resource. Never fails.
    pub async fn check_health(&self, resource_id: &str) -> HealthRecord {
        let handle = match self.manager.get_resource(resource_id) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("[HealthChecker] Cannot inspect {}: {}", resource_id, e);
                return HealthRecord::unreachable(resource_id, &e);
            }
        };

        let pages = handle.pages();
        let timeout = self.manager.config().probe_timeout;
        let verdicts = join_all(pages.iter().map(|page| probe_page(page, timeout))).await;

        let mut issues = Vec::new();
        let mut active = 0;
        let mut unresponsive = 0;
        for (page, verdict) in pages.iter().zip(verdicts) {
            match verdict {
                Verdict::Closed => issues.push(format!("Page {} is closed", page.page_id)),
                Verdict::Active => active += 1,
                Verdict::Unresponsive(reason) => {
                    unresponsive += 1;
                    issues.push(format!("Page {} is unresponsive: {}", page.page_id, reason));
                }
            }
        }
        if pages.is_empty() {
            issues.push("Resource has no pages".to_string());
        }

        let healthy = unresponsive == 0 && active > 0;
        if healthy {
            tracing::debug!(
                "[HealthChecker] {} healthy ({} active pages)",
                resource_id,
                active
            );
        } else {
            tracing::warn!(
                "[HealthChecker] {} unhealthy: {}",
                resource_id,
                issues.join("; ")
            );
        }

        HealthRecord {
            resource_id: resource_id.to_string(),
            timestamp: now_millis(),
            healthy,
            issues,
            total_pages: pages.len(),
            active_pages: active,
            unresponsive_pages: unresponsive,
        }
    }

    /// Close pages that fail a short probe.
    ///
    /// `healed` is only reported when the resource is healthy afterwards;
    /// closing every page of a resource does not count as healing it.
    pub async fn auto_heal(&self, resource_id: &str) -> HealOutcome {
        let before = self.check_health(resource_id).await;
        if before.healthy {
            return HealOutcome {
                healed: false,
                reason: "already healthy".to_string(),
                closed_pages: Vec::new(),
                health: before,
            };
        }

        let handle = match self.manager.get_resource(resource_id) {
            Ok(handle) => handle,
            Err(e) => {
                return HealOutcome {
                    healed: false,
                    reason: format!("resource unreachable: {}", e),
                    closed_pages: Vec::new(),
                    health: before,
                }
            }
        };

        let timeout = self.manager.config().heal_probe_timeout;
        let pages = handle.open_pages();
        let results = join_all(pages.iter().map(|page| page.probe(timeout))).await;

        let mut closed_pages = Vec::new();
        for (page, result) in pages.iter().zip(results) {
            let Err(e) = result else { continue };
            tracing::warn!(
                "[HealthChecker] Closing unresponsive page {}: {}",
                page.page_id,
                e
            );
            if let Err(e) = self.manager.close_child(resource_id, &page.page_id).await {
                tracing::warn!("[HealthChecker] Could not close {}: {}", page.page_id, e);
            }
            closed_pages.push(page.page_id.clone());
        }

        if closed_pages.is_empty() {
            return HealOutcome {
                healed: false,
                reason: "no unresponsive pages to close".to_string(),
                closed_pages,
                health: before,
            };
        }

        let after = self.check_health(resource_id).await;
        let reason = if after.healthy {
            format!("closed {} unresponsive page(s)", closed_pages.len())
        } else {
            format!(
                "closed {} unresponsive page(s) but resource is still unhealthy",
                closed_pages.len()
            )
        };
        tracing::info!("[HealthChecker] Healing {}: {}", resource_id, reason);

        HealOutcome {
            healed: after.healthy,
            reason,
            closed_pages,
            health: after,
        }
    }

    /// Replace the resource with a fresh one using the same options.
    ///
    /// Closing the old resource is best-effort. The new resource gets its first
    /// page so it is immediately usable.
    pub async fn force_recreate(&self, resource_id: &str) -> RecreateOutcome {
        let options = self
            .manager
            .get_resource(resource_id)
            .map(|handle| handle.options)
            .ok();

        if !self.manager.close_resource(resource_id).await {
            tracing::debug!(
                "[HealthChecker] {} was already gone before recreation",
                resource_id
            );
        }

        let failed = |e: PoolError| {
            tracing::warn!("[HealthChecker] Recreating {} failed: {}", resource_id, e);
            RecreateOutcome {
                success: false,
                old_resource_id: resource_id.to_string(),
                new_resource_id: None,
                error: Some(e.to_string()),
            }
        };

        let new_id = match self.manager.create_resource(options).await {
            Ok(id) => id,
            Err(e) => return failed(e),
        };
        if let Err(e) = self.manager.create_child(&new_id).await {
            self.manager.close_resource(&new_id).await;
            return failed(e);
        }

        tracing::info!("[HealthChecker] Recreated {} as {}", resource_id, new_id);
        self.manager.events().publish(PoolEvent::ResourceRecreated {
            old_resource_id: resource_id.to_string(),
            new_resource_id: new_id.clone(),
        });

        RecreateOutcome {
            success: true,
            old_resource_id: resource_id.to_string(),
            new_resource_id: Some(new_id),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextOptions, Viewport};
    use crate::driver::mock::test_manager;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_zero_pages_is_unhealthy() {
        let (manager, _control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        let id = manager.create_resource(None).await.unwrap();

        let record = checker.check_health(&id).await;
        assert!(!record.healthy);
        assert_eq!(record.total_pages, 0);
        assert_eq!(record.issues, vec!["Resource has no pages"]);
    }

    #[tokio::test]
    async fn test_unknown_resource_gives_unhealthy_record() {
        let (manager, _control) = test_manager(3);
        let checker = HealthChecker::new(manager);

        let record = checker.check_health("missing").await;
        assert!(!record.healthy);
        assert_eq!(record.resource_id, "missing");
        assert!(record.issues[0].contains("Resource not found"));
    }

    #[tokio::test]
    async fn test_heal_short_circuits_when_healthy() {
        let (manager, _control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        let id = manager.create_resource(None).await.unwrap();
        manager.create_child(&id).await.unwrap();

        let outcome = checker.auto_heal(&id).await;
        assert!(!outcome.healed);
        assert_eq!(outcome.reason, "already healthy");
        assert!(outcome.closed_pages.is_empty());
        assert_eq!(manager.get_resource(&id).unwrap().page_count(), 1);
    }

    #[tokio::test]
    async fn test_hung_page_is_closed_by_heal() {
        let (manager, control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        let id = manager.create_resource(None).await.unwrap();
        manager.create_child(&id).await.unwrap();
        control.hang_new_pages.store(true, Ordering::SeqCst);
        let hung = manager.create_child(&id).await.unwrap();

        let record = checker.check_health(&id).await;
        assert!(!record.healthy);
        assert_eq!(record.active_pages, 1);
        assert_eq!(record.unresponsive_pages, 1);
        assert!(record.issues[0].contains(&hung.page_id));

        let outcome = checker.auto_heal(&id).await;
        assert!(outcome.healed);
        assert_eq!(outcome.closed_pages, vec![hung.page_id]);
        assert!(outcome.health.healthy);
        assert_eq!(manager.live_pages(), 1);
    }

    #[tokio::test]
    async fn test_closing_every_page_is_not_healed() {
        let (manager, control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        let id = manager.create_resource(None).await.unwrap();
        control.hang_new_pages.store(true, Ordering::SeqCst);
        manager.create_child(&id).await.unwrap();

        let outcome = checker.auto_heal(&id).await;
        assert!(!outcome.healed);
        assert_eq!(outcome.closed_pages.len(), 1);
        assert_eq!(outcome.health.total_pages, 0);
        assert_eq!(manager.live_pages(), 0);
    }

    #[tokio::test]
    async fn test_heal_without_pages_reports_nothing_done() {
        let (manager, _control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        let id = manager.create_resource(None).await.unwrap();

        let outcome = checker.auto_heal(&id).await;
        assert!(!outcome.healed);
        assert_eq!(outcome.reason, "no unresponsive pages to close");
    }

    #[tokio::test]
    async fn test_force_recreate_replaces_resource() {
        let (manager, _control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        let mut events = manager.events().subscribe();
        let options = ContextOptions {
            viewport: Viewport {
                width: 390,
                height: 844,
            },
            user_agent: Some("pool-test".to_string()),
        };
        let old = manager.create_resource(Some(options.clone())).await.unwrap();
        manager.create_child(&old).await.unwrap();

        let outcome = checker.force_recreate(&old).await;
        assert!(outcome.success);
        let new = outcome.new_resource_id.unwrap();
        assert_ne!(new, old);

        assert!(matches!(
            manager.get_resource(&old),
            Err(PoolError::NotFound(_))
        ));
        assert_eq!(manager.get_resource(&new).unwrap().options, options);
        assert!(checker.check_health(&new).await.healthy);
        assert_eq!(manager.live_pages(), 1);

        let mut recreated = false;
        while let Ok(event) = events.try_recv() {
            if let PoolEvent::ResourceRecreated {
                old_resource_id,
                new_resource_id,
            } = event
            {
                assert_eq!(old_resource_id, old);
                assert_eq!(new_resource_id, new);
                recreated = true;
            }
        }
        assert!(recreated);
    }

    #[tokio::test]
    async fn test_force_recreate_reports_launch_failure() {
        let (manager, control) = test_manager(3);
        let checker = HealthChecker::new(manager.clone());
        control.fail_launch.store(true, Ordering::SeqCst);

        let outcome = checker.force_recreate("gone").await;
        assert!(!outcome.success);
        assert!(outcome.new_resource_id.is_none());
        assert!(outcome.error.unwrap().contains("connection unavailable"));
    }
}
