//! Resource Manager - owns the browser connection and every pooled context
//!
//! Single writer for pool state: the resource map, the global page budget and
//! the root connection are only ever mutated here. Health checking and guarded
//! navigation go through this API.
//!
//! Page accounting: every live page holds one slot of the global budget. A slot
//! is reserved before the page is created (fail fast at the cap), handed back
//! if creation fails or is cancelled, and released exactly once when the page
//! closes - whichever of explicit close, crash or disconnect comes first.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ContextOptions, PoolConfig, Viewport, WaitUntil};
use crate::driver::{
    Browser, CdpDriver, Context, Driver, DriverError, DriverResult, NavigationResponse, Page,
    PageEvent,
};
use crate::error::{PoolError, Result};
use crate::events::{EventBus, PoolEvent};
use crate::telemetry::{now_millis, PerformanceSample, TelemetrySet};

pub type ResourceId = String;
pub type PageId = String;

/// Cheapest round trip that proves the renderer is alive
const PROBE_EXPRESSION: &str = "true";

/// One unit of the global page budget
struct PageSlot {
    released: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl PageSlot {
    /// Returns the slot to the budget. Only the first call has any effect.
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

/// A slot held while a page is being created; handed back on drop unless committed
struct SlotReservation {
    slot: Arc<PageSlot>,
    committed: bool,
}

impl SlotReservation {
    fn commit(mut self) -> Arc<PageSlot> {
        self.committed = true;
        self.slot.clone()
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.release();
        }
    }
}

/// Driver output that has to be closed when nobody claims it
#[async_trait]
trait Disposable: Send + 'static {
    async fn dispose(self);
}

#[async_trait]
impl Disposable for Arc<dyn Context> {
    async fn dispose(self) {
        let _ = self.close().await;
    }
}

#[async_trait]
impl Disposable for Arc<dyn Page> {
    async fn dispose(self) {
        let _ = self.close().await;
    }
}

/// A driver-side creation running detached from its caller.
///
/// The browser finishes the request even when the caller times out or is
/// cancelled; whatever arrives after that is closed on arrival.
struct PendingCreation<T: Disposable> {
    task: Option<JoinHandle<DriverResult<T>>>,
    what: &'static str,
}

impl<T: Disposable> PendingCreation<T> {
    fn spawn<F>(what: &'static str, create: F) -> Self
    where
        F: Future<Output = DriverResult<T>> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(create)),
            what,
        }
    }

    /// `None` if the driver did not answer within `timeout`
    async fn wait(&mut self, timeout: Duration) -> Option<DriverResult<T>> {
        let task = self.task.as_mut()?;
        let joined = tokio::time::timeout(timeout, task).await.ok()?;
        self.task = None;
        Some(joined.unwrap_or(Err(DriverError::Closed)))
    }
}

impl<T: Disposable> Drop for PendingCreation<T> {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let what = self.what;
        runtime.spawn(async move {
            if let Ok(Ok(orphan)) = task.await {
                tracing::debug!(
                    "[ResourceManager] Closing {} created after its caller gave up",
                    what
                );
                orphan.dispose().await;
            }
        });
    }
}

#[derive(Clone)]
struct PageRecord {
    page: Arc<dyn Page>,
    slot: Arc<PageSlot>,
    seq: u64,
}

/// A page inside a pooled resource
#[derive(Clone)]
pub struct PageHandle {
    pub resource_id: ResourceId,
    pub page_id: PageId,
    pub page: Arc<dyn Page>,
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("resource_id", &self.resource_id)
            .field("page_id", &self.page_id)
            .finish_non_exhaustive()
    }
}

impl PageHandle {
    /// Liveness probe bounded by `timeout`
    pub async fn probe(&self, timeout: Duration) -> DriverResult<()> {
        match tokio::time::timeout(timeout, self.page.evaluate(PROBE_EXPRESSION)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(DriverError::Timeout(timeout)),
        }
    }
}

/// A pooled browser context and everything attached to it
#[derive(Clone)]
pub struct ResourceHandle {
    pub id: ResourceId,
    pub context: Arc<dyn Context>,
    pub options: ContextOptions,
    pub telemetry: Arc<TelemetrySet>,
    pub created_at: u64,
    pages: Arc<DashMap<PageId, PageRecord>>,
    plain_failures: Arc<AtomicU32>,
}

impl ResourceHandle {
    /// Registered pages in creation order, including ones that just died
    pub fn pages(&self) -> Vec<PageHandle> {
        let mut records: Vec<(PageId, PageRecord)> = self
            .pages
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        records.sort_by_key(|(_, record)| record.seq);
        records
            .into_iter()
            .map(|(page_id, record)| PageHandle {
                resource_id: self.id.clone(),
                page_id,
                page: record.page,
            })
            .collect()
    }

    pub fn open_pages(&self) -> Vec<PageHandle> {
        self.pages()
            .into_iter()
            .filter(|handle| !handle.page.is_closed())
            .collect()
    }

    pub fn page(&self, page_id: &str) -> Option<PageHandle> {
        self.pages.get(page_id).map(|record| PageHandle {
            resource_id: self.id.clone(),
            page_id: page_id.to_string(),
            page: record.page.clone(),
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Consecutive failed plain navigations
    pub fn navigation_failures(&self) -> u32 {
        self.plain_failures.load(Ordering::SeqCst)
    }

    fn drain_pages(&self) -> Vec<(PageId, PageRecord)> {
        let ids: Vec<PageId> = self.pages.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.pages.remove(&id))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub resource_id: ResourceId,
    pub pages: usize,
    pub viewport: Viewport,
    pub created_at: u64,
    pub navigation_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub resources: usize,
    pub live_pages: usize,
    pub max_pages: usize,
    pub connected: bool,
}

/// Per-call overrides for plain navigation
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigateOptions {
    pub wait_until: Option<WaitUntil>,
    pub timeout: Option<Duration>,
}

struct Connection {
    browser: Arc<dyn Browser>,
    generation: u64,
    watcher: JoinHandle<()>,
}

pub struct ResourceManager {
    config: PoolConfig,
    driver: Arc<dyn Driver>,
    connection: Arc<Mutex<Option<Connection>>>,
    generation: AtomicU64,
    resources: Arc<DashMap<ResourceId, ResourceHandle>>,
    live_pages: Arc<AtomicUsize>,
    page_seq: AtomicU64,
    events: Arc<EventBus>,
}

impl ResourceManager {
    pub fn new(config: PoolConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            driver,
            connection: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            resources: Arc::new(DashMap::new()),
            live_pages: Arc::new(AtomicUsize::new(0)),
            page_seq: AtomicU64::new(0),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Pool backed by a Chrome reachable at `config.cdp_url`
    pub fn with_cdp(config: PoolConfig) -> Self {
        let driver = Arc::new(CdpDriver::from_config(&config));
        Self::new(config, driver)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Pages currently holding a slot, across all resources
    pub fn live_pages(&self) -> usize {
        self.live_pages.load(Ordering::SeqCst)
    }

    /// Launch the browser once; later callers reuse the live connection
    async fn ensure_connected(&self) -> Result<Arc<dyn Browser>> {
        let mut connection = self.connection.lock().await;

        if let Some(existing) = connection.as_ref() {
            if existing.browser.is_connected() {
                return Ok(existing.browser.clone());
            }
        }
        if let Some(stale) = connection.take() {
            // Watcher has not caught up yet; do its job here
            stale.watcher.abort();
            tracing::warn!("[ResourceManager] Replacing stale browser connection");
            drop_all(&self.resources);
            self.events.publish(PoolEvent::ConnectionLost);
        }

        tracing::info!(
            "[ResourceManager] Launching browser via {} driver",
            self.driver.name()
        );
        let browser =
            match tokio::time::timeout(self.config.connect_timeout, self.driver.launch()).await {
                Ok(Ok(browser)) => browser,
                Ok(Err(e)) => return Err(PoolError::Connection(e.to_string())),
                Err(_) => {
                    return Err(PoolError::Connection(format!(
                        "launch timed out after {:?}",
                        self.config.connect_timeout
                    )))
                }
            };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watcher = self.watch_disconnect(&browser, generation);
        *connection = Some(Connection {
            browser: browser.clone(),
            generation,
            watcher,
        });

        self.events.publish(PoolEvent::Connected);
        Ok(browser)
    }

    /// Clear the pool when the browser goes away underneath us
    fn watch_disconnect(&self, browser: &Arc<dyn Browser>, generation: u64) -> JoinHandle<()> {
        let mut disconnected = browser.disconnected();
        let connection = self.connection.clone();
        let resources = self.resources.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            // A dropped sender means the browser handle is gone too
            let _ = disconnected.wait_for(|gone| *gone).await;

            let mut guard = connection.lock().await;
            if guard.as_ref().map(|c| c.generation) != Some(generation) {
                return;
            }
            guard.take();
            drop(guard);

            tracing::warn!(
                "[ResourceManager] Browser connection lost, dropping {} resources",
                resources.len()
            );
            drop_all(&resources);
            events.publish(PoolEvent::ConnectionLost);
        })
    }

    /// Create a new isolated context. `None` uses the configured baseline.
    pub async fn create_resource(&self, options: Option<ContextOptions>) -> Result<ResourceId> {
        let options = options.unwrap_or_else(|| self.config.context_options());
        let browser = self.ensure_connected().await?;

        let mut pending = {
            let browser = browser.clone();
            let options = options.clone();
            PendingCreation::spawn("context", async move { browser.new_context(&options).await })
        };
        let context = match pending.wait(self.config.connect_timeout).await {
            Some(Ok(context)) => context,
            Some(Err(DriverError::Closed)) => {
                return Err(PoolError::Connection(
                    "browser closed while creating context".to_string(),
                ))
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(DriverError::Timeout(self.config.connect_timeout).into()),
        };

        if !browser.is_connected() {
            let _ = context.close().await;
            return Err(PoolError::Connection(
                "browser disconnected while creating context".to_string(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let handle = ResourceHandle {
            id: id.clone(),
            context,
            options,
            telemetry: Arc::new(TelemetrySet::new(&self.config.buffer_limits)),
            created_at: now_millis(),
            pages: Arc::new(DashMap::new()),
            plain_failures: Arc::new(AtomicU32::new(0)),
        };
        self.resources.insert(id.clone(), handle);

        tracing::debug!("[ResourceManager] Created resource {}", id);
        self.events.publish(PoolEvent::ResourceCreated {
            resource_id: id.clone(),
        });
        Ok(id)
    }

    pub fn get_resource(&self, resource_id: &str) -> Result<ResourceHandle> {
        self.resources
            .get(resource_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PoolError::NotFound(resource_id.to_string()))
    }

    pub fn telemetry(&self, resource_id: &str) -> Result<Arc<TelemetrySet>> {
        Ok(self.get_resource(resource_id)?.telemetry)
    }

    fn reserve_slot(&self) -> Result<SlotReservation> {
        let max = self.config.max_concurrent_pages;
        let mut current = self.live_pages.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return Err(PoolError::CapacityExceeded { live: current, max });
            }
            match self.live_pages.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        Ok(SlotReservation {
            slot: Arc::new(PageSlot {
                released: AtomicBool::new(false),
                live: self.live_pages.clone(),
            }),
            committed: false,
        })
    }

    /// Open a page in the resource, counted against the global cap
    pub async fn create_child(&self, resource_id: &str) -> Result<PageHandle> {
        let handle = self.get_resource(resource_id)?;
        let reservation = self.reserve_slot()?;

        let mut pending = {
            let context = handle.context.clone();
            PendingCreation::spawn("page", async move { context.new_page().await })
        };
        let page = match pending.wait(self.config.connect_timeout).await {
            Some(Ok(page)) => page,
            Some(Err(e)) => {
                tracing::warn!(
                    "[ResourceManager] Page creation failed in {}: {}",
                    resource_id,
                    e
                );
                return Err(e.into());
            }
            None => return Err(DriverError::Timeout(self.config.connect_timeout).into()),
        };

        let slot = reservation.commit();
        let page_id = page.id().to_string();
        handle.pages.insert(
            page_id.clone(),
            PageRecord {
                page: page.clone(),
                slot: slot.clone(),
                seq: self.page_seq.fetch_add(1, Ordering::SeqCst),
            },
        );
        self.wire_page(&handle, &page, &slot);

        // The page may have died during wiring, or the resource been closed meanwhile
        let died = page.is_closed();
        if died || !self.resources.contains_key(resource_id) {
            handle.pages.remove(&page_id);
            slot.release();
            let _ = page.close().await;
            return Err(if died {
                DriverError::Closed.into()
            } else {
                PoolError::NotFound(resource_id.to_string())
            });
        }

        tracing::debug!(
            "[ResourceManager] Opened page {} in {} ({}/{} live)",
            page_id,
            resource_id,
            self.live_pages(),
            self.config.max_concurrent_pages
        );
        self.events.publish(PoolEvent::PageOpened {
            resource_id: resource_id.to_string(),
            page_id: page_id.clone(),
        });
        Ok(PageHandle {
            resource_id: resource_id.to_string(),
            page_id,
            page,
        })
    }

    /// Route page events into telemetry and release the slot on close
    fn wire_page(&self, handle: &ResourceHandle, page: &Arc<dyn Page>, slot: &Arc<PageSlot>) {
        let telemetry = handle.telemetry.clone();
        let pages = Arc::downgrade(&handle.pages);
        let slot = slot.clone();
        let events = self.events.clone();
        let resource_id = handle.id.clone();
        let page_id = page.id().to_string();

        page.subscribe(Arc::new(move |event: PageEvent| match event {
            PageEvent::Closed => {
                if let Some(pages) = pages.upgrade() {
                    pages.remove(&page_id);
                }
                if slot.release() {
                    tracing::debug!("[ResourceManager] Page {} closed", page_id);
                    events.publish(PoolEvent::PageClosed {
                        resource_id: resource_id.clone(),
                        page_id: page_id.clone(),
                    });
                }
            }
            other => telemetry.record(other),
        }));
    }

    /// First open page of the resource, opening one if there is none
    pub async fn primary_page(&self, resource_id: &str) -> Result<PageHandle> {
        let handle = self.get_resource(resource_id)?;
        match handle.open_pages().into_iter().next() {
            Some(page) => Ok(page),
            None => self.create_child(resource_id).await,
        }
    }

    /// Close one page. `Ok(false)` if it was already gone.
    pub async fn close_child(&self, resource_id: &str, page_id: &str) -> Result<bool> {
        let handle = self.get_resource(resource_id)?;
        match handle.pages.remove(page_id) {
            Some((page_id, record)) => {
                self.close_page(resource_id, &page_id, &record).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_page(&self, resource_id: &str, page_id: &str, record: &PageRecord) {
        match tokio::time::timeout(self.config.close_timeout, record.page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("[ResourceManager] Error closing page {}: {}", page_id, e)
            }
            Err(_) => tracing::warn!("[ResourceManager] Timed out closing page {}", page_id),
        }
        // Normally the close event got here first
        if record.slot.release() {
            self.events.publish(PoolEvent::PageClosed {
                resource_id: resource_id.to_string(),
                page_id: page_id.to_string(),
            });
        }
    }

    /// Close a resource and everything in it. Idempotent, never fails.
    ///
    /// Returns whether the resource was still registered.
    pub async fn close_resource(&self, resource_id: &str) -> bool {
        let Some((_, handle)) = self.resources.remove(resource_id) else {
            tracing::debug!("[ResourceManager] Resource {} already closed", resource_id);
            return false;
        };

        let records = handle.drain_pages();
        join_all(
            records
                .iter()
                .map(|(page_id, record)| self.close_page(resource_id, page_id, record)),
        )
        .await;

        match tokio::time::timeout(self.config.close_timeout, handle.context.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "[ResourceManager] Error closing context for {}: {}",
                resource_id,
                e
            ),
            Err(_) => tracing::warn!(
                "[ResourceManager] Timed out closing context for {}",
                resource_id
            ),
        }
        handle.telemetry.clear();

        tracing::debug!(
            "[ResourceManager] Closed resource {} ({} pages)",
            resource_id,
            records.len()
        );
        self.events.publish(PoolEvent::ResourceClosed {
            resource_id: resource_id.to_string(),
        });
        true
    }

    /// Close every resource, then the browser connection. Safe to repeat.
    pub async fn cleanup_all(&self) {
        let ids: Vec<ResourceId> = self.resources.iter().map(|e| e.key().clone()).collect();
        if !ids.is_empty() {
            tracing::info!("[ResourceManager] Cleaning up {} resources", ids.len());
        }
        join_all(ids.iter().map(|id| self.close_resource(id))).await;

        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.watcher.abort();
            match tokio::time::timeout(self.config.close_timeout, connection.browser.close()).await
            {
                Ok(Ok(())) => tracing::info!("[ResourceManager] Browser connection closed"),
                Ok(Err(e)) => tracing::warn!("[ResourceManager] Error closing browser: {}", e),
                Err(_) => tracing::warn!("[ResourceManager] Timed out closing browser"),
            }
        }

        self.events.publish(PoolEvent::CleanedUp);
    }

    /// Unguarded navigation of the resource's primary page.
    ///
    /// Resources that keep failing here are refused with `ContextUnstable`
    /// so callers cannot spin on a broken context; the guarded path recovers them.
    pub async fn navigate(
        &self,
        resource_id: &str,
        url: &str,
        options: NavigateOptions,
    ) -> Result<NavigationResponse> {
        let handle = self.get_resource(resource_id)?;

        let failures = handle.navigation_failures();
        if failures >= self.config.unstable_after {
            tracing::warn!(
                "[ResourceManager] Refusing navigation on unstable resource {} ({} failures)",
                resource_id,
                failures
            );
            return Err(PoolError::ContextUnstable {
                resource_id: resource_id.to_string(),
                failures,
            });
        }

        validate_target(url)?;
        let page = self.primary_page(resource_id).await?;
        let wait_until = options.wait_until.unwrap_or(self.config.default_wait_until);
        let timeout = options.timeout.unwrap_or(self.config.navigation_timeout);
        let deadline = timeout + self.config.watchdog_grace;

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(deadline, page.page.navigate(url, wait_until, timeout))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(DriverError::Timeout(deadline)),
            };

        // Closed underneath us while navigating
        if !self.resources.contains_key(resource_id) {
            tracing::debug!(
                "[ResourceManager] Resource {} closed during navigation",
                resource_id
            );
            return Err(PoolError::NotFound(resource_id.to_string()));
        }

        match outcome {
            Ok(response) => {
                handle.plain_failures.store(0, Ordering::SeqCst);
                self.record_navigation(resource_id, url, started.elapsed());
                Ok(response)
            }
            Err(e) => {
                let attempt = handle.plain_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(
                    "[ResourceManager] Navigation to {} failed on {} ({} consecutive): {}",
                    url,
                    resource_id,
                    attempt,
                    e
                );
                Err(PoolError::Navigation {
                    resource_id: resource_id.to_string(),
                    url: url.to_string(),
                    attempt,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Store a navigation timing sample; silently skipped for unknown resources
    pub fn record_navigation(&self, resource_id: &str, url: &str, elapsed: Duration) {
        if let Ok(handle) = self.get_resource(resource_id) {
            handle
                .telemetry
                .performance
                .append(PerformanceSample::navigation(url, elapsed));
        }
    }

    /// Sample the primary page's runtime metrics into the performance buffer
    pub async fn record_performance(&self, resource_id: &str) -> Result<PerformanceSample> {
        let page = self.primary_page(resource_id).await?;
        let metrics = match tokio::time::timeout(self.config.probe_timeout, page.page.metrics())
            .await
        {
            Ok(result) => result?,
            Err(_) => return Err(DriverError::Timeout(self.config.probe_timeout).into()),
        };
        let telemetry = self.telemetry(resource_id)?;
        Ok(telemetry
            .performance
            .append(PerformanceSample::metrics(page.page.url(), metrics)))
    }

    pub fn list_resources(&self) -> Vec<ResourceSummary> {
        let mut summaries: Vec<ResourceSummary> = self
            .resources
            .iter()
            .map(|entry| {
                let handle = entry.value();
                ResourceSummary {
                    resource_id: handle.id.clone(),
                    pages: handle.page_count(),
                    viewport: handle.options.viewport,
                    created_at: handle.created_at,
                    navigation_failures: handle.navigation_failures(),
                }
            })
            .collect();
        // UUIDv7 ids sort by creation time
        summaries.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        summaries
    }

    pub async fn stats(&self) -> PoolStats {
        let connected = self
            .connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.browser.is_connected());
        PoolStats {
            resources: self.resources.len(),
            live_pages: self.live_pages(),
            max_pages: self.config.max_concurrent_pages,
            connected,
        }
    }
}

/// Drop every resource without talking to the browser (it is already gone)
fn drop_all(resources: &DashMap<ResourceId, ResourceHandle>) {
    let ids: Vec<ResourceId> = resources.iter().map(|e| e.key().clone()).collect();
    for id in ids {
        if let Some((_, handle)) = resources.remove(&id) {
            for (_, record) in handle.drain_pages() {
                record.slot.release();
            }
            handle.telemetry.clear();
        }
    }
}

/// Reject targets no browser could navigate to
pub fn validate_target(url: &str) -> Result<()> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https" | "file" | "about" | "data") => {
            Ok(())
        }
        Ok(parsed) => Err(PoolError::InvalidUrl(format!(
            "{} (unsupported scheme '{}')",
            url,
            parsed.scheme()
        ))),
        Err(e) => Err(PoolError::InvalidUrl(format!("{}: {}", url, e))),
    }
}
