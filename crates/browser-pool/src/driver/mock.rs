//! Scripted in-memory driver for tests
//!
//! Every knob is shared through `MockControl`, so a test can keep a handle
//! after giving the driver to the pool and flip behaviour mid-scenario.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{
    Browser, Context, Driver, DriverError, DriverResult, NavigationResponse, Page, PageEvent,
    PageEventHandler,
};
use crate::config::{ContextOptions, PoolConfig, WaitUntil};
use crate::manager::ResourceManager;

/// Pool over a mock driver with timeouts short enough for tests
pub(crate) fn test_manager(max_pages: usize) -> (Arc<ResourceManager>, Arc<MockControl>) {
    let config = PoolConfig {
        max_concurrent_pages: max_pages,
        navigation_timeout: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(50),
        heal_probe_timeout: Duration::from_millis(50),
        watchdog_grace: Duration::from_millis(50),
        connect_timeout: Duration::from_millis(500),
        close_timeout: Duration::from_millis(100),
        ..PoolConfig::default()
    };
    let (driver, control) = MockDriver::new();
    (Arc::new(ResourceManager::new(config, driver)), control)
}

#[derive(Default)]
pub(crate) struct MockControl {
    pub fail_launch: AtomicBool,
    pub fail_navigation: AtomicBool,
    /// Navigation never settles, ignoring its own timeout
    pub hang_navigation: AtomicBool,
    /// Probes on pages opened from now on never answer
    pub hang_new_pages: AtomicBool,
    /// `Context::new_page` never returns
    pub hang_new_page: AtomicBool,
    /// Contexts and pages take this long to come back
    pub creation_delay: Mutex<Duration>,
    pub launches: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub contexts_closed: AtomicUsize,
    pub navigations: AtomicUsize,
    browsers: Mutex<Vec<Arc<MockBrowser>>>,
    pages: Mutex<Vec<Arc<MockPage>>>,
}

impl MockControl {
    pub fn browser(&self) -> Option<Arc<MockBrowser>> {
        self.browsers.lock().last().cloned()
    }

    pub fn page(&self, id: &str) -> Option<Arc<MockPage>> {
        self.pages.lock().iter().find(|p| p.id == id).cloned()
    }

    pub fn created_pages(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn open_pages(&self) -> usize {
        self.pages.lock().iter().filter(|p| !p.is_closed()).count()
    }

    async fn creation_delay(&self) {
        let delay = *self.creation_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Default)]
pub(crate) struct MockDriver {
    pub control: Arc<MockControl>,
}

impl MockDriver {
    pub fn new() -> (Arc<Self>, Arc<MockControl>) {
        let driver = Arc::new(Self::default());
        let control = driver.control.clone();
        (driver, control)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn launch(&self) -> DriverResult<Arc<dyn Browser>> {
        self.control.launches.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_launch.load(Ordering::SeqCst) {
            return Err(DriverError::Launch("mock browser refused to start".to_string()));
        }
        let (disconnected, _) = watch::channel(false);
        let browser = Arc::new(MockBrowser {
            control: self.control.clone(),
            disconnected,
            contexts: AtomicUsize::new(0),
        });
        self.control.browsers.lock().push(browser.clone());
        Ok(browser)
    }
}

pub(crate) struct MockBrowser {
    control: Arc<MockControl>,
    disconnected: watch::Sender<bool>,
    contexts: AtomicUsize,
}

impl MockBrowser {
    /// Simulate the browser process going away
    pub fn disconnect(&self) {
        self.disconnected.send_replace(true);
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn new_context(&self, _options: &ContextOptions) -> DriverResult<Arc<dyn Context>> {
        self.control.creation_delay().await;
        if !self.is_connected() {
            return Err(DriverError::Closed);
        }
        self.control.contexts_created.fetch_add(1, Ordering::SeqCst);
        let n = self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockContext {
            id: format!("context-{}", n),
            control: self.control.clone(),
            pages: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        !*self.disconnected.borrow()
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnected.subscribe()
    }

    async fn close(&self) -> DriverResult<()> {
        self.disconnect();
        Ok(())
    }
}

pub(crate) struct MockContext {
    id: String,
    control: Arc<MockControl>,
    pages: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl Context for MockContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&self) -> DriverResult<Arc<dyn Page>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        if self.control.hang_new_page.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.control.creation_delay().await;
        let n = self.pages.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(MockPage {
            id: format!("{}-page-{}", self.id, n),
            control: self.control.clone(),
            closed: AtomicBool::new(false),
            hang_probe: AtomicBool::new(self.control.hang_new_pages.load(Ordering::SeqCst)),
            url: Mutex::new("about:blank".to_string()),
            handlers: Mutex::new(Vec::new()),
        });
        self.control.pages.lock().push(page.clone());
        Ok(page)
    }

    async fn close(&self) -> DriverResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.control.contexts_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub(crate) struct MockPage {
    pub id: String,
    control: Arc<MockControl>,
    closed: AtomicBool,
    hang_probe: AtomicBool,
    url: Mutex<String>,
    handlers: Mutex<Vec<PageEventHandler>>,
}

impl MockPage {
    pub fn emit(&self, event: PageEvent) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Simulate the page dying underneath the pool
    pub fn crash(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(PageEvent::Closed);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

#[async_trait]
impl Page for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> String {
        self.url.lock().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self, handler: PageEventHandler) {
        self.handlers.lock().push(handler);
    }

    async fn navigate(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        _timeout: Duration,
    ) -> DriverResult<NavigationResponse> {
        self.control.navigations.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if self.control.hang_navigation.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.control.fail_navigation.load(Ordering::SeqCst) {
            return Err(DriverError::Navigation("net::ERR_NAME_NOT_RESOLVED".to_string()));
        }
        *self.url.lock() = url.to_string();
        Ok(NavigationResponse {
            url: url.to_string(),
            status: Some(200),
        })
    }

    async fn evaluate(&self, _expression: &str) -> DriverResult<Value> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if self.hang_probe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(json!(true))
    }

    async fn metrics(&self) -> DriverResult<BTreeMap<String, f64>> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        Ok(BTreeMap::from([
            ("JSHeapUsedSize".to_string(), 1_048_576.0),
            ("Nodes".to_string(), 42.0),
        ]))
    }

    async fn close(&self) -> DriverResult<()> {
        self.crash();
        Ok(())
    }
}
