#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use streamprobe_core::browser::{
    BrowserBackend, BrowserError, BrowserInstance, BrowserResult, InterceptPolicy, PageTab,
    TrafficEvent,
};

/// What a fake page does once navigated.
#[derive(Clone, Default)]
pub struct ScriptedPage {
    /// Emitted on the observer channel when navigation starts.
    pub traffic: Vec<TrafficEvent>,
    /// Returned by the DOM scrape evaluation.
    pub dom: Option<Value>,
    /// In-page fetch bodies keyed by URL; missing URLs answer `None`.
    pub bodies: HashMap<String, String>,
    pub hang_navigation: bool,
    pub fail_dom: bool,
}

impl ScriptedPage {
    pub fn request(mut self, url: &str) -> Self {
        self.traffic.push(TrafficEvent::Request {
            url: url.to_string(),
            resource_type: None,
        });
        self
    }

    pub fn response(mut self, url: &str, content_type: &str) -> Self {
        self.traffic.push(TrafficEvent::Response {
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            resource_type: None,
        });
        self
    }

    pub fn body(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }
}

#[derive(Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub browsers_closed: AtomicUsize,
    pub tabs_opened: AtomicUsize,
    pub tabs_closed: AtomicUsize,
    pub fetches: Mutex<HashMap<String, usize>>,
}

impl Counters {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn browsers_closed(&self) -> usize {
        self.browsers_closed.load(Ordering::SeqCst)
    }

    pub fn tabs_opened(&self) -> usize {
        self.tabs_opened.load(Ordering::SeqCst)
    }

    pub fn tabs_closed(&self) -> usize {
        self.tabs_closed.load(Ordering::SeqCst)
    }

    pub fn fetches_of(&self, url: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

/// Browser backend serving [`ScriptedPage`]s by target URL.
pub struct FakeBackend {
    pages: Arc<HashMap<String, ScriptedPage>>,
    pub counters: Arc<Counters>,
    pub healthy: Arc<AtomicBool>,
    pub launch_delay: Duration,
    pub fail_launch: bool,
    pub fail_observe: bool,
}

impl FakeBackend {
    pub fn new(pages: impl IntoIterator<Item = (&'static str, ScriptedPage)>) -> Self {
        Self {
            pages: Arc::new(
                pages
                    .into_iter()
                    .map(|(url, page)| (url.to_string(), page))
                    .collect(),
            ),
            counters: Arc::new(Counters::default()),
            healthy: Arc::new(AtomicBool::new(true)),
            launch_delay: Duration::ZERO,
            fail_launch: false,
            fail_observe: false,
        }
    }

    pub fn empty() -> Self {
        Self::new([])
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn launch(&self) -> BrowserResult<Arc<dyn BrowserInstance>> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launch {
            return Err(BrowserError::Launch("no chromium binary".into()));
        }
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBrowser {
            pages: Arc::clone(&self.pages),
            counters: Arc::clone(&self.counters),
            healthy: Arc::clone(&self.healthy),
            fail_observe: self.fail_observe,
        }))
    }
}

struct FakeBrowser {
    pages: Arc<HashMap<String, ScriptedPage>>,
    counters: Arc<Counters>,
    healthy: Arc<AtomicBool>,
    fail_observe: bool,
}

#[async_trait]
impl BrowserInstance for FakeBrowser {
    async fn probe(&self) -> BrowserResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrowserError::Unexpected("browser disconnected".into()))
        }
    }

    async fn open_tab(&self) -> BrowserResult<Box<dyn PageTab>> {
        self.counters.tabs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTab {
            pages: Arc::clone(&self.pages),
            counters: Arc::clone(&self.counters),
            fail_observe: self.fail_observe,
            sender: Mutex::new(None),
            current: Mutex::new(None),
        }))
    }

    async fn close(&self) -> BrowserResult<()> {
        self.counters.browsers_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeTab {
    pages: Arc<HashMap<String, ScriptedPage>>,
    counters: Arc<Counters>,
    fail_observe: bool,
    sender: Mutex<Option<UnboundedSender<TrafficEvent>>>,
    current: Mutex<Option<ScriptedPage>>,
}

impl FakeTab {
    fn page(&self) -> ScriptedPage {
        self.current.lock().unwrap().clone().unwrap_or_default()
    }
}

#[async_trait]
impl PageTab for FakeTab {
    async fn observe(
        &self,
        _policy: &InterceptPolicy,
    ) -> BrowserResult<UnboundedReceiver<TrafficEvent>> {
        if self.fail_observe {
            return Err(BrowserError::Unexpected("Network.enable rejected".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let page = self.pages.get(url).cloned().unwrap_or_default();
        *self.current.lock().unwrap() = Some(page.clone());
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            for event in page.traffic.iter().cloned() {
                let _ = sender.send(event);
            }
        }
        if page.hang_navigation {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> BrowserResult<Value> {
        let page = self.page();
        if page.fail_dom {
            return Err(BrowserError::Script("Execution context was destroyed".into()));
        }
        Ok(page.dom.unwrap_or_else(|| json!({})))
    }

    async fn fetch_text(&self, url: &str) -> BrowserResult<Option<String>> {
        *self
            .counters
            .fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        Ok(self.page().bodies.get(url).cloned())
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.counters.tabs_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
