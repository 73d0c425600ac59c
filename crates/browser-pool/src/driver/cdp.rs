//! CDP-backed driver
//!
//! One `CDPClient` per browser. Each resource is a CDP browser context, each
//! page a target with its own flattened session. Session events are
//! translated into [`PageEvent`]s and pushed to the page's subscribers.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use super::{
    Browser, Context, Driver, DriverError, DriverResult, NavigationResponse, Page, PageEvent,
    PageEventHandler,
};
use crate::cdp::protocol::{
    BrowserContextId, CDPEvent, CreateBrowserContextResult, CreateTargetResult,
};
use crate::cdp::session::DEFAULT_DOMAINS;
use crate::cdp::{CDPClient, CDPSession};
use crate::config::{ContextOptions, PoolConfig, WaitUntil};

/// Document responses remembered per loader while a navigation is pending
const MAX_TRACKED_DOCUMENTS: usize = 64;

/// Connects to an already running Chrome over its DevTools WebSocket
pub struct CdpDriver {
    cdp_url: String,
}

impl CdpDriver {
    pub fn new(cdp_url: impl Into<String>) -> Self {
        Self {
            cdp_url: cdp_url.into(),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.cdp_url.clone())
    }
}

#[async_trait]
impl Driver for CdpDriver {
    fn name(&self) -> &str {
        "cdp"
    }

    async fn launch(&self) -> DriverResult<Arc<dyn Browser>> {
        let client = CDPClient::connect(&self.cdp_url)
            .await
            .map_err(|e| DriverError::Launch(format!("{}: {}", self.cdp_url, e)))?;
        Ok(Arc::new(CdpBrowser { client }))
    }
}

pub struct CdpBrowser {
    client: Arc<CDPClient>,
}

#[async_trait]
impl Browser for CdpBrowser {
    async fn new_context(&self, options: &ContextOptions) -> DriverResult<Arc<dyn Context>> {
        let result = self
            .client
            .send_request(
                "Target.createBrowserContext",
                Some(json!({ "disposeOnDetach": true })),
                None,
            )
            .await?;
        let created: CreateBrowserContextResult =
            serde_json::from_value(result).map_err(crate::cdp::CDPError::from)?;

        Ok(Arc::new(CdpContext {
            client: self.client.clone(),
            id: created.browser_context_id,
            options: options.clone(),
        }))
    }

    fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.client.closed()
    }

    async fn close(&self) -> DriverResult<()> {
        self.client.close().await?;
        Ok(())
    }
}

pub struct CdpContext {
    client: Arc<CDPClient>,
    id: BrowserContextId,
    options: ContextOptions,
}

impl CdpContext {
    async fn prepare(&self, session: &CDPSession) -> DriverResult<()> {
        session.enable(DEFAULT_DOMAINS).await;
        session
            .set_viewport(self.options.viewport.width, self.options.viewport.height)
            .await?;
        if let Some(user_agent) = &self.options.user_agent {
            session.set_user_agent(user_agent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Context for CdpContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&self) -> DriverResult<Arc<dyn Page>> {
        let result = self
            .client
            .send_request(
                "Target.createTarget",
                Some(json!({
                    "url": "about:blank",
                    "browserContextId": &self.id,
                })),
                None,
            )
            .await?;
        let created: CreateTargetResult =
            serde_json::from_value(result).map_err(crate::cdp::CDPError::from)?;

        let session = match CDPSession::attach(self.client.clone(), created.target_id.clone()).await
        {
            Ok(session) => session,
            Err(e) => {
                let _ = self
                    .client
                    .send_request(
                        "Target.closeTarget",
                        Some(json!({ "targetId": created.target_id })),
                        None,
                    )
                    .await;
                return Err(e.into());
            }
        };

        // Route events before enabling domains so nothing is lost
        let page = Arc::new(CdpPage::new(session));
        page.install_routing();

        if let Err(e) = self.prepare(&page.session).await {
            let _ = page.close().await;
            return Err(e);
        }

        tracing::debug!("[CDP] Page {} ready in context {}", page.id(), self.id);
        Ok(page)
    }

    async fn close(&self) -> DriverResult<()> {
        self.client
            .send_request(
                "Target.disposeBrowserContext",
                Some(json!({ "browserContextId": &self.id })),
                None,
            )
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LifecycleEvent {
    loader_id: Option<String>,
    name: String,
}

/// State shared between a page and its session callback
struct PageState {
    closed: watch::Sender<bool>,
    url: RwLock<String>,
    handlers: RwLock<Vec<PageEventHandler>>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    document_status: Mutex<HashMap<String, u16>>,
}

impl PageState {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            closed,
            url: RwLock::new("about:blank".to_string()),
            handlers: RwLock::new(Vec::new()),
            lifecycle,
            document_status: Mutex::new(HashMap::new()),
        }
    }

    fn emit(&self, event: PageEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// First caller wins; only it emits `Closed`
    fn mark_closed(&self) {
        if !self.closed.send_replace(true) {
            self.emit(PageEvent::Closed);
        }
    }

    fn on_cdp_event(&self, event: &CDPEvent) {
        match event.method.as_str() {
            "Page.lifecycleEvent" => {
                if let Some(name) = event.param_str("/name") {
                    let _ = self.lifecycle.send(LifecycleEvent {
                        loader_id: event.param_str("/loaderId").map(str::to_string),
                        name: name.to_string(),
                    });
                }
            }
            "Page.frameNavigated" => {
                let params = event.params.as_ref();
                let is_main = params.and_then(|p| p.pointer("/frame/parentId")).is_none();
                if let (true, Some(url)) = (is_main, event.param_str("/frame/url")) {
                    *self.url.write() = url.to_string();
                }
            }
            "Network.responseReceived" if event.param_str("/type") == Some("Document") => {
                let loader = event.param_str("/loaderId");
                let status = event
                    .params
                    .as_ref()
                    .and_then(|p| p.pointer("/response/status"))
                    .and_then(Value::as_f64);
                if let (Some(loader), Some(status)) = (loader, status) {
                    let mut documents = self.document_status.lock();
                    if documents.len() >= MAX_TRACKED_DOCUMENTS {
                        documents.clear();
                    }
                    documents.insert(loader.to_string(), status as u16);
                }
            }
            "Inspector.detached" | "Inspector.targetCrashed" | "Target.detachedFromTarget" => {
                tracing::warn!("[CDP] Page went away: {}", event.method);
                self.mark_closed();
                return;
            }
            _ => {}
        }

        if let Some(page_event) = translate(event) {
            self.emit(page_event);
        }
    }
}

pub struct CdpPage {
    session: CDPSession,
    state: Arc<PageState>,
}

impl CdpPage {
    fn new(session: CDPSession) -> Self {
        Self {
            session,
            state: Arc::new(PageState::new()),
        }
    }

    fn install_routing(&self) {
        let state = self.state.clone();
        let client: Weak<CDPClient> = Arc::downgrade(self.session.client());
        let session_id = self.session.session_id.clone();

        self.session.client().subscribe_session(
            self.session.session_id.clone(),
            Arc::new(move |event: CDPEvent| {
                state.on_cdp_event(&event);
                if *state.closed.borrow() {
                    if let Some(client) = client.upgrade() {
                        client.unsubscribe_session(&session_id);
                    }
                }
            }),
        );
    }

    async fn wait_for_lifecycle(
        &self,
        lifecycle: &mut broadcast::Receiver<LifecycleEvent>,
        expected: &str,
        loader_id: &str,
    ) -> DriverResult<()> {
        let mut closed = self.state.closed.subscribe();
        loop {
            tokio::select! {
                event = lifecycle.recv() => match event {
                    Ok(event)
                        if event.name == expected
                            && event.loader_id.as_deref() == Some(loader_id) =>
                    {
                        return Ok(());
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(DriverError::Closed),
                },
                _ = closed.wait_for(|closed| *closed) => return Err(DriverError::Closed),
            }
        }
    }
}

#[async_trait]
impl Page for CdpPage {
    fn id(&self) -> &str {
        &self.session.target_id
    }

    fn url(&self) -> String {
        self.state.url.read().clone()
    }

    fn is_closed(&self) -> bool {
        *self.state.closed.borrow() || self.session.client().is_closed()
    }

    fn subscribe(&self, handler: PageEventHandler) {
        self.state.handlers.write().push(handler);
    }

    async fn navigate(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> DriverResult<NavigationResponse> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }

        // Subscribe before sending so a fast load cannot slip past
        let mut lifecycle = self.state.lifecycle.subscribe();
        let work = async {
            let result = self.session.navigate(url).await?;
            if let Some(error) = result.error_text.filter(|e| !e.is_empty()) {
                return Err(DriverError::Navigation(error));
            }

            // Same-document navigations carry no loader and fire no lifecycle
            if let (Some(expected), Some(loader_id)) =
                (wait_until.lifecycle_event(), result.loader_id.as_deref())
            {
                self.wait_for_lifecycle(&mut lifecycle, expected, loader_id)
                    .await?;
            }

            let status = result
                .loader_id
                .as_ref()
                .and_then(|loader| self.state.document_status.lock().remove(loader));
            Ok(NavigationResponse {
                url: url.to_string(),
                status,
            })
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| DriverError::Timeout(timeout))?
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        let result = self.session.evaluate(expression).await?;
        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("uncaught exception");
            return Err(DriverError::Evaluation(message.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn metrics(&self) -> DriverResult<BTreeMap<String, f64>> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        Ok(self.session.metrics().await?)
    }

    async fn close(&self) -> DriverResult<()> {
        if *self.state.closed.borrow() {
            return Ok(());
        }
        let result = if self.session.client().is_closed() {
            Ok(())
        } else {
            self.session.close_target().await
        };
        self.session
            .client()
            .unsubscribe_session(&self.session.session_id);
        self.state.mark_closed();
        result.map_err(DriverError::from)
    }
}

/// Translate a session event into a page event, if it is one we record
pub fn translate(event: &CDPEvent) -> Option<PageEvent> {
    let params = event.params.as_ref()?;
    let text = |pointer: &str| params.pointer(pointer).and_then(Value::as_str);

    match event.method.as_str() {
        "Runtime.consoleAPICalled" => {
            let args = params["args"].as_array().map(Vec::as_slice).unwrap_or(&[]);
            let text = args
                .iter()
                .map(remote_object_text)
                .collect::<Vec<_>>()
                .join(" ");
            let location = params.pointer("/stackTrace/callFrames/0").map(|frame| {
                format!(
                    "{}:{}:{}",
                    frame["url"].as_str().unwrap_or(""),
                    frame["lineNumber"].as_u64().unwrap_or(0),
                    frame["columnNumber"].as_u64().unwrap_or(0)
                )
            });
            Some(PageEvent::Console {
                level: text_or(params.get("type"), "log"),
                text,
                location,
            })
        }
        "Runtime.exceptionThrown" => {
            let message = text("/exceptionDetails/exception/description")
                .or_else(|| text("/exceptionDetails/text"))
                .unwrap_or("Uncaught exception");
            Some(PageEvent::PageError {
                message: message.to_string(),
            })
        }
        "Network.requestWillBeSent" => Some(PageEvent::Request {
            request_id: text("/requestId")?.to_string(),
            url: text("/request/url").unwrap_or("").to_string(),
            method: text("/request/method").unwrap_or("").to_string(),
            resource_type: text("/type").map(str::to_string),
        }),
        "Network.responseReceived" => Some(PageEvent::Response {
            request_id: text("/requestId")?.to_string(),
            url: text("/response/url").unwrap_or("").to_string(),
            status: params
                .pointer("/response/status")
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as u16,
            status_text: text("/response/statusText").unwrap_or("").to_string(),
            mime_type: text("/response/mimeType").map(str::to_string),
        }),
        "Network.loadingFailed" => Some(PageEvent::RequestFailed {
            request_id: text("/requestId")?.to_string(),
            url: String::new(),
            error_text: text("/errorText").unwrap_or("unknown error").to_string(),
        }),
        _ => None,
    }
}

fn text_or(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

/// Render a Runtime.RemoteObject the way a console would print it
fn remote_object_text(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(value) if !value.is_null() => value.to_string(),
        _ => arg
            .get("unserializableValue")
            .or_else(|| arg.get("description"))
            .and_then(Value::as_str)
            .unwrap_or("undefined")
            .to_string(),
    }
}
