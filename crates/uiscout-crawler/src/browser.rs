//! Browser seam: the page operations the crawler needs, and their CDP implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use eoka::{Browser, Page};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::BrowserConfig;
use crate::{Error, Result};

/// A DOM node as seen by discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Lowercase tag name.
    pub tag: String,
    /// Every attribute on the node.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Trimmed text content.
    #[serde(default)]
    pub text: String,
    /// `tag:nth-of-type(n)` chain from the nearest ancestor with an id (or `body`).
    #[serde(default)]
    pub path: String,
}

/// Operations on a single page.
///
/// A page handle is used by one crawl task at a time; calls are never issued
/// concurrently against the same handle.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current URL after redirects.
    async fn url(&self) -> Result<String>;

    async fn wait_for_network_idle(&self, idle_ms: u64, timeout_ms: u64) -> Result<()>;

    /// `document.readyState`.
    async fn ready_state(&self) -> Result<String>;

    /// Images that have neither loaded nor errored yet.
    async fn pending_images(&self) -> Result<usize>;

    /// Fixed delay.
    async fn wait(&self, ms: u64);

    /// Wait until at least one node matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Snapshot every node matching `selector`, in document order.
    async fn query_nodes(&self, selector: &str) -> Result<Vec<NodeSnapshot>>;

    /// Absolute `href` of every anchor on the page.
    async fn links(&self) -> Result<Vec<String>>;
}

/// A browser-level resource pool handing out independent pages.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>>;

    /// Release the browser. Further `new_page` calls fail.
    async fn close(&self) -> Result<()>;
}

/// Snapshots every node matching `__uiscout_selector`.
const QUERY_NODES_JS: &str = r#"
(() => {
    const selector = __uiscout_selector;

    function structuralPath(el) {
        const parts = [];
        let node = el;
        while (node && node !== document.body && node !== document.documentElement) {
            if (node.id) {
                parts.unshift('#' + CSS.escape(node.id));
                return parts.join(' > ');
            }
            let s = node.tagName.toLowerCase();
            const parent = node.parentElement;
            if (parent) {
                const siblings = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (siblings.length > 1) {
                    s += ':nth-of-type(' + (siblings.indexOf(node) + 1) + ')';
                }
            }
            parts.unshift(s);
            node = parent;
        }
        parts.unshift('body');
        return parts.join(' > ');
    }

    const results = [];
    for (const el of document.querySelectorAll(selector)) {
        const attributes = {};
        for (const attr of el.attributes) {
            attributes[attr.name] = attr.value;
        }
        results.push({
            tag: el.tagName.toLowerCase(),
            attributes,
            text: (el.textContent || '').trim().replace(/\s+/g, ' '),
            path: structuralPath(el),
        });
    }
    return JSON.stringify(results);
})()
"#;

const LINKS_JS: &str =
    "JSON.stringify(Array.from(document.querySelectorAll('a[href]')).map(a => a.href))";

const PENDING_IMAGES_JS: &str = "Array.from(document.images).filter(img => !img.complete).length";

/// [`BrowserSession`] backed by an eoka (CDP) browser.
pub struct EokaSession {
    browser: Mutex<Option<Browser>>,
}

impl EokaSession {
    /// Launch a browser. Any failure is reported as [`Error::SessionInit`].
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth)
            .await
            .map_err(|e| Error::SessionInit(e.to_string()))?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
        })
    }
}

#[async_trait]
impl BrowserSession for EokaSession {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| Error::SessionInit("browser already closed".into()))?;
        let page = browser.new_page("about:blank").await?;
        Ok(Arc::new(EokaPage { page }))
    }

    async fn close(&self) -> Result<()> {
        if let Some(browser) = self.browser.lock().await.take() {
            debug!("Closing browser");
            browser.close().await?;
        }
        Ok(())
    }
}

/// [`PageHandle`] over an eoka page.
pub struct EokaPage {
    page: Page,
}

#[async_trait]
impl PageHandle for EokaPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn wait_for_network_idle(&self, idle_ms: u64, timeout_ms: u64) -> Result<()> {
        self.page.wait_for_network_idle(idle_ms, timeout_ms).await?;
        Ok(())
    }

    async fn ready_state(&self) -> Result<String> {
        Ok(self.page.evaluate("document.readyState").await?)
    }

    async fn pending_images(&self) -> Result<usize> {
        Ok(self.page.evaluate(PENDING_IMAGES_JS).await?)
    }

    async fn wait(&self, ms: u64) {
        self.page.wait(ms).await;
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.page.wait_for(selector, timeout_ms).await?;
        Ok(())
    }

    async fn query_nodes(&self, selector: &str) -> Result<Vec<NodeSnapshot>> {
        let js = format!(
            "var __uiscout_selector = {}; {}",
            serde_json::to_string(selector)?,
            QUERY_NODES_JS
        );
        let json: String = self.page.evaluate(&js).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn links(&self) -> Result<Vec<String>> {
        let json: String = self.page.evaluate(LINKS_JS).await?;
        Ok(serde_json::from_str(&json)?)
    }
}
