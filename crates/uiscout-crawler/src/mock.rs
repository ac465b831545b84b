//! Scripted in-memory browser for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::browser::{BrowserSession, NodeSnapshot, PageHandle};
use crate::{Error, Result};

#[derive(Default)]
struct ScriptedPage {
    links: Vec<String>,
    nodes: HashMap<String, Vec<NodeSnapshot>>,
}

/// A fake site: pages, their links and the nodes each selector matches.
#[derive(Default)]
pub(crate) struct MockSite {
    pages: HashMap<String, ScriptedPage>,
    failing: HashSet<String>,
    flaky: HashMap<String, usize>,
    goto_delay_ms: u64,
    stuck_images: usize,
    refuse_pages: bool,
    gotos: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    closed: AtomicBool,
}

impl MockSite {
    pub(crate) fn page(site: &Arc<MockSite>) -> Arc<dyn PageHandle> {
        Arc::new(MockPage {
            site: Arc::clone(site),
            current: Mutex::new(None),
        })
    }

    pub(crate) fn goto_count(&self, url: &str) -> usize {
        self.gotos.lock().iter().filter(|u| *u == url).count()
    }

    pub(crate) fn gotos(&self) -> Vec<String> {
        self.gotos.lock().clone()
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockSiteBuilder {
    site: MockSite,
}

impl MockSiteBuilder {
    pub(crate) fn new() -> Self {
        Self {
            site: MockSite::default(),
        }
    }

    pub(crate) fn page(mut self, url: &str, links: &[&str]) -> Self {
        let page = self.site.pages.entry(url.to_string()).or_default();
        page.links = links.iter().map(|l| l.to_string()).collect();
        self
    }

    pub(crate) fn nodes(mut self, url: &str, selector: &str, nodes: Vec<NodeSnapshot>) -> Self {
        self.site
            .pages
            .entry(url.to_string())
            .or_default()
            .nodes
            .insert(selector.to_string(), nodes);
        self
    }

    /// Every navigation to `url` fails.
    pub(crate) fn failing(mut self, url: &str) -> Self {
        self.site.failing.insert(url.to_string());
        self
    }

    /// The first `failures` navigations to `url` fail.
    pub(crate) fn flaky(mut self, url: &str, failures: usize) -> Self {
        self.site.flaky.insert(url.to_string(), failures);
        self
    }

    pub(crate) fn goto_delay_ms(mut self, ms: u64) -> Self {
        self.site.goto_delay_ms = ms;
        self
    }

    pub(crate) fn stuck_images(mut self, count: usize) -> Self {
        self.site.stuck_images = count;
        self
    }

    /// `new_page` always fails, as if the browser could not start.
    pub(crate) fn refuse_pages(mut self) -> Self {
        self.site.refuse_pages = true;
        self
    }

    pub(crate) fn build(self) -> Arc<MockSite> {
        Arc::new(self.site)
    }
}

pub(crate) struct MockBrowser {
    pub(crate) site: Arc<MockSite>,
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        if self.site.refuse_pages || self.site.is_closed() {
            return Err(Error::SessionInit("mock browser unavailable".into()));
        }
        Ok(MockSite::page(&self.site))
    }

    async fn close(&self) -> Result<()> {
        self.site.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockPage {
    site: Arc<MockSite>,
    current: Mutex<Option<String>>,
}

impl MockPage {
    fn with_current<T>(&self, f: impl FnOnce(Option<&ScriptedPage>) -> T) -> T {
        let current = self.current.lock().clone();
        f(current.as_ref().and_then(|url| self.site.pages.get(url)))
    }
}

#[async_trait]
impl PageHandle for MockPage {
    async fn goto(&self, url: &str) -> Result<()> {
        let previous_attempts = {
            let mut gotos = self.site.gotos.lock();
            let n = gotos.iter().filter(|u| *u == url).count();
            gotos.push(url.to_string());
            n
        };

        let active = self.site.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.max_active.fetch_max(active, Ordering::SeqCst);
        if self.site.goto_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.site.goto_delay_ms)).await;
        }
        self.site.active.fetch_sub(1, Ordering::SeqCst);

        let flaky = self
            .site
            .flaky
            .get(url)
            .is_some_and(|failures| previous_attempts < *failures);
        if self.site.failing.contains(url) || flaky {
            return Err(Error::Browser(eoka::Error::CdpSimple(
                "net::ERR_CONNECTION_REFUSED".into(),
            )));
        }

        *self.current.lock() = Some(url.to_string());
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self
            .current
            .lock()
            .clone()
            .unwrap_or_else(|| "about:blank".into()))
    }

    async fn wait_for_network_idle(&self, _idle_ms: u64, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }

    async fn ready_state(&self) -> Result<String> {
        Ok("complete".into())
    }

    async fn pending_images(&self) -> Result<usize> {
        Ok(self.site.stuck_images)
    }

    async fn wait(&self, _ms: u64) {}

    async fn wait_for_selector(&self, selector: &str, _timeout_ms: u64) -> Result<()> {
        let found = self.with_current(|page| {
            page.and_then(|s| s.nodes.get(selector))
                .is_some_and(|nodes| !nodes.is_empty())
        });
        if found {
            Ok(())
        } else {
            Err(Error::Timeout(format!("waiting for '{}'", selector)))
        }
    }

    async fn query_nodes(&self, selector: &str) -> Result<Vec<NodeSnapshot>> {
        Ok(self.with_current(|page| {
            page.and_then(|s| s.nodes.get(selector))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn links(&self) -> Result<Vec<String>> {
        Ok(self.with_current(|page| page.map(|s| s.links.clone()).unwrap_or_default()))
    }
}

/// Node snapshot shorthand for tests.
pub(crate) fn node(tag: &str, attrs: &[(&str, &str)], path: &str) -> NodeSnapshot {
    NodeSnapshot {
        tag: tag.to_string(),
        attributes: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        text: String::new(),
        path: path.to_string(),
    }
}
