use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, ErrorReason, EventRequestWillBeSent,
    EventResponseReceived, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, LaunchMode};
use crate::discovery::ResourceKind;

use super::backend::{BrowserBackend, BrowserInstance, InterceptPolicy, PageTab, TrafficEvent};
use super::error::{BrowserError, BrowserResult};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 720;
const HANDLER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launches headless Chromium processes through chromiumoxide.
#[derive(Debug, Clone)]
pub struct ChromiumBackend {
    config: Arc<ChromiumSection>,
}

impl ChromiumBackend {
    pub fn new(config: ChromiumSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        });

        if self.config.launch_mode == LaunchMode::Managed {
            let path = self.config.executable_path.as_ref().ok_or_else(|| {
                BrowserError::Configuration(
                    "managed launch mode requires an executable path".into(),
                )
            })?;
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            "--disable-dev-shm-usage".to_string(),
            "--disable-software-rasterizer".to_string(),
            "--disable-extensions".to_string(),
            "--mute-audio".to_string(),
            "--no-first-run".to_string(),
            format!("--user-agent={}", self.config.user_agent),
            format!("--window-size={VIEWPORT_WIDTH},{VIEWPORT_HEIGHT}"),
        ];
        if !self.config.sandbox {
            builder = builder.no_sandbox();
            args.push("--disable-setuid-sandbox".into());
        }
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        args.extend(self.config.extra_args.iter().cloned());

        builder = builder.args(args);
        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    async fn launch(&self) -> BrowserResult<Arc<dyn BrowserInstance>> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            mode = ?self.config.launch_mode,
            executable = ?self.config.executable_path,
            headless = self.config.headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(Arc::new(ChromiumBrowser {
            browser: RwLock::new(browser),
            handler_task: AsyncMutex::new(Some(handler_task)),
            user_agent: self.config.user_agent.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct ChromiumBrowser {
    browser: RwLock<Browser>,
    handler_task: AsyncMutex<Option<JoinHandle<()>>>,
    user_agent: String,
}

#[async_trait]
impl BrowserInstance for ChromiumBrowser {
    async fn probe(&self) -> BrowserResult<()> {
        let version = self.browser.read().await.version().await?;
        debug!(product = %version.product, "Chromium liveness probe ok");
        Ok(())
    }

    async fn open_tab(&self) -> BrowserResult<Box<dyn PageTab>> {
        let page = self
            .browser
            .read()
            .await
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;

        let params = SetUserAgentOverrideParams::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(BrowserError::Configuration)?;
        if let Err(err) = page.set_user_agent(params).await {
            if let Err(close_err) = page.close().await {
                debug!(error = %close_err, "failed to close tab after setup error");
            }
            return Err(err.into());
        }

        Ok(Box::new(ChromiumTab {
            page,
            listeners: AsyncMutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        {
            let mut browser = self.browser.write().await;
            if let Err(err) = browser.close().await {
                warn!(error = %err, "Failed to close browser gracefully");
            }
        }
        if let Some(handle) = self.handler_task.lock().await.take() {
            match tokio::time::timeout(HANDLER_SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Browser handler join error"),
                Err(_) => warn!("Browser handler did not stop within grace period"),
            }
        }
        Ok(())
    }
}

/// A single Chromium page with its observer tasks.
#[derive(Debug)]
pub struct ChromiumTab {
    page: Page,
    listeners: AsyncMutex<Vec<JoinHandle<()>>>,
}

fn resource_kind(raw: &str) -> Option<ResourceKind> {
    raw.parse().ok()
}

#[async_trait]
impl PageTab for ChromiumTab {
    async fn observe(
        &self,
        policy: &InterceptPolicy,
    ) -> BrowserResult<UnboundedReceiver<TrafficEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?;
        let mut responses = self.page.event_listener::<EventResponseReceived>().await?;
        self.page.execute(NetworkEnableParams::default()).await?;

        let sender = tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let traffic = TrafficEvent::Request {
                    url: event.request.url.clone(),
                    resource_type: event.r#type.as_ref().and_then(|t| resource_kind(t.as_ref())),
                };
                if sender.send(traffic).is_err() {
                    break;
                }
            }
        }));

        let sender = tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let traffic = TrafficEvent::Response {
                    url: event.response.url.clone(),
                    content_type: Some(event.response.mime_type.clone()),
                    resource_type: resource_kind(event.r#type.as_ref()),
                };
                if sender.send(traffic).is_err() {
                    break;
                }
            }
        }));

        if !policy.is_passthrough() {
            let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
            self.page
                .execute(FetchEnableParams {
                    patterns: Some(vec![RequestPattern {
                        url_pattern: Some("*".into()),
                        resource_type: None,
                        request_stage: Some(RequestStage::Request),
                    }]),
                    handle_auth_requests: None,
                })
                .await?;

            let page = self.page.clone();
            let policy = policy.clone();
            let sender = tx;
            // Every paused request must be answered or the page stalls, so
            // this loop keeps running after the receiver is gone.
            tasks.push(tokio::spawn(async move {
                while let Some(event) = paused.next().await {
                    let blocked = resource_kind(event.resource_type.as_ref())
                        .filter(|kind| policy.blocks(*kind));
                    let resolved = match blocked {
                        Some(kind) => {
                            let _ = sender.send(TrafficEvent::Blocked {
                                url: event.request.url.clone(),
                                resource_type: kind,
                            });
                            page.execute(FailRequestParams::new(
                                event.request_id.clone(),
                                ErrorReason::BlockedByClient,
                            ))
                            .await
                            .map(|_| ())
                        }
                        None => page
                            .execute(ContinueRequestParams::new(event.request_id.clone()))
                            .await
                            .map(|_| ()),
                    };
                    if let Err(err) = resolved {
                        debug!(
                            url = %event.request.url,
                            error = %err,
                            "failed to resolve paused request"
                        );
                    }
                }
            }));
        }

        self.listeners.lock().await.extend(tasks);
        Ok(rx)
    }

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> BrowserResult<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Configuration)?;
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        let ChromiumTab { page, listeners } = *self;
        for handle in listeners.into_inner() {
            handle.abort();
        }
        page.close().await?;
        Ok(())
    }
}
