//! Breadth-first crawl driver.
//!
//! The orchestrator owns the visited set and the inventory outright. Page
//! work runs in spawned tasks, each on its own page handle, and reports back
//! to the orchestrator, which is the only place crawl state is read or
//! written. Checking and marking a URL as visited is therefore a single step.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{BrowserSession, EokaSession, PageHandle};
use crate::config::{Config, CrawlSettings};
use crate::discover::ElementDiscoverer;
use crate::element::{ElementDescriptor, Inventory};
use crate::navigation::{is_same_origin, NavigationController};
use crate::{Error, Result};

/// Where a page is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlPhase {
    Idle,
    Navigating,
    Discovering,
    Traversing,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Navigating => "navigating",
            Self::Discovering => "discovering",
            Self::Traversing => "traversing",
        };
        f.write_str(s)
    }
}

/// A page that could not be crawled.
#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub url: String,
    /// Phase the page was in when it failed.
    pub phase: CrawlPhase,
    pub error: String,
}

/// Result of one crawl invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
    /// Discovered elements per normalized URL. Failed pages have no entry.
    pub inventory: Inventory,
    /// Every URL marked visited, in the order it was scheduled.
    pub visited: Vec<String>,
    pub failures: Vec<PageFailure>,
    /// The cancellation signal fired before the frontier was exhausted.
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn element_count(&self) -> usize {
        self.inventory.values().map(Vec::len).sum()
    }
}

/// State owned by a single crawl invocation.
#[derive(Default)]
struct CrawlState {
    visited: HashSet<String>,
    order: Vec<String>,
    inventory: Inventory,
    failures: Vec<PageFailure>,
}

impl CrawlState {
    /// Returns false if `url` was already visited.
    fn mark_visited(&mut self, url: &str) -> bool {
        if !self.visited.insert(url.to_string()) {
            return false;
        }
        self.order.push(url.to_string());
        true
    }
}

/// What a page task produces on success.
struct PageVisit {
    elements: Vec<ElementDescriptor>,
    links: Vec<String>,
}

struct TaskOutput {
    page: Arc<dyn PageHandle>,
    url: String,
    remaining_depth: u32,
    result: std::result::Result<PageVisit, PageFailure>,
}

/// Drives traversal over one browser session.
pub struct CrawlOrchestrator {
    session: Arc<dyn BrowserSession>,
    navigation: Arc<NavigationController>,
    discoverer: Arc<ElementDiscoverer>,
    settings: CrawlSettings,
}

impl CrawlOrchestrator {
    pub fn new(session: Arc<dyn BrowserSession>, config: &Config) -> Self {
        Self {
            session,
            navigation: Arc::new(NavigationController::new(config.navigation.clone())),
            discoverer: Arc::new(ElementDiscoverer::new(config.discovery.clone())),
            settings: config.crawl.clone(),
        }
    }

    /// Crawl from `start_url`, following links up to `max_depth` levels.
    ///
    /// A depth of 1 crawls only the start page. Per-page failures are
    /// recorded in the report; only failing to open the first page is an
    /// error. Once `cancel` fires no new navigation starts, and in-flight
    /// pages are allowed to finish.
    pub async fn crawl(
        &self,
        start_url: &str,
        max_depth: u32,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport> {
        let start = normalize_start(start_url);
        let mut state = CrawlState::default();

        if max_depth == 0 {
            debug!("Depth 0, nothing to crawl");
            return Ok(CrawlReport::default());
        }

        info!("Crawling {} (depth {})", start, max_depth);

        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((start.clone(), max_depth));

        let mut idle_pages: Vec<Arc<dyn PageHandle>> = Vec::new();
        let mut pages_opened = 0usize;
        let mut page_cap = self.settings.max_concurrency.max(1);
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();

        loop {
            while tasks.len() < page_cap && !cancel.is_cancelled() {
                if self.page_limit_reached(&state) {
                    if !queue.is_empty() {
                        info!("Page limit reached, dropping {} queued URL(s)", queue.len());
                        queue.clear();
                    }
                    break;
                }

                let Some((url, depth)) = next_unvisited(&mut queue, &state) else {
                    break;
                };

                let page = match idle_pages.pop() {
                    Some(page) => page,
                    None => match self.session.new_page().await {
                        Ok(page) => {
                            pages_opened += 1;
                            page
                        }
                        Err(e) if pages_opened == 0 => {
                            error!("Could not open a page: {}", e);
                            return Err(match e {
                                Error::SessionInit(_) => e,
                                other => Error::SessionInit(other.to_string()),
                            });
                        }
                        Err(e) => {
                            warn!(
                                "Could not open another page, continuing with {}: {}",
                                pages_opened, e
                            );
                            page_cap = pages_opened;
                            queue.push_front((url, depth));
                            break;
                        }
                    },
                };

                state.mark_visited(&url);
                let navigation = Arc::clone(&self.navigation);
                let discoverer = Arc::clone(&self.discoverer);
                tasks.spawn(async move {
                    let result = visit_page(&*page, &url, depth, &navigation, &discoverer).await;
                    TaskOutput {
                        page,
                        url,
                        remaining_depth: depth,
                        result,
                    }
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let output = match joined {
                Ok(output) => output,
                Err(e) => {
                    // The page handle went down with the task.
                    error!("Page task aborted: {}", e);
                    pages_opened = pages_opened.saturating_sub(1);
                    continue;
                }
            };
            idle_pages.push(output.page);

            match output.result {
                Ok(visit) => {
                    debug!(
                        "{}: {} element(s), {} link(s)",
                        output.url,
                        visit.elements.len(),
                        visit.links.len()
                    );
                    state.inventory.insert(output.url, visit.elements);
                    if output.remaining_depth > 1 {
                        for link in visit.links {
                            if self.should_follow(&start, &link, &state) {
                                queue.push_back((link, output.remaining_depth - 1));
                            }
                        }
                    }
                }
                Err(failure) => {
                    warn!("Skipping {}: {}", failure.url, failure.error);
                    state.failures.push(failure);
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            info!("Crawl cancelled with {} URL(s) left in the queue", queue.len());
        }

        info!(
            "Crawl finished: {} page(s) visited, {} failed",
            state.order.len(),
            state.failures.len()
        );

        Ok(CrawlReport {
            inventory: state.inventory,
            visited: state.order,
            failures: state.failures,
            cancelled,
        })
    }

    fn page_limit_reached(&self, state: &CrawlState) -> bool {
        self.settings
            .max_pages
            .is_some_and(|max| state.visited.len() >= max)
    }

    fn should_follow(&self, start: &str, link: &str, state: &CrawlState) -> bool {
        if state.visited.contains(link) {
            return false;
        }
        if self.settings.same_origin_only && !is_same_origin(start, link) {
            debug!("Not following off-origin link {}", link);
            return false;
        }
        true
    }
}

/// Pop queue entries until one that has not been visited yet.
fn next_unvisited(
    queue: &mut VecDeque<(String, u32)>,
    state: &CrawlState,
) -> Option<(String, u32)> {
    while let Some((url, depth)) = queue.pop_front() {
        if !state.visited.contains(&url) {
            return Some((url, depth));
        }
    }
    None
}

async fn visit_page(
    page: &dyn PageHandle,
    url: &str,
    remaining_depth: u32,
    navigation: &NavigationController,
    discoverer: &ElementDiscoverer,
) -> std::result::Result<PageVisit, PageFailure> {
    debug!("{} {}", CrawlPhase::Navigating, url);
    if let Err(e) = navigation.navigate(page, url).await {
        return Err(PageFailure {
            url: url.to_string(),
            phase: CrawlPhase::Navigating,
            error: e.to_string(),
        });
    }
    navigation.await_ready(page).await;

    debug!("{} {}", CrawlPhase::Discovering, url);
    let elements = discoverer.discover(page).await;

    let links = if remaining_depth > 1 {
        debug!("{} {}", CrawlPhase::Traversing, url);
        navigation.extract_links(page).await.unwrap_or_else(|e| {
            warn!("Could not read links on {}: {}", url, e);
            Vec::new()
        })
    } else {
        Vec::new()
    };

    debug!("{} {}", CrawlPhase::Idle, url);
    Ok(PageVisit { elements, links })
}

/// Fragment-free form of the start URL. Unparseable input is used as given.
fn normalize_start(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Crawl using an existing session, closing it when done whatever the outcome.
pub async fn crawl_with_session(
    session: Arc<dyn BrowserSession>,
    config: &Config,
    start_url: &str,
    max_depth: u32,
    cancel: &CancellationToken,
) -> Result<CrawlReport> {
    let orchestrator = CrawlOrchestrator::new(Arc::clone(&session), config);
    let result = orchestrator.crawl(start_url, max_depth, cancel).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }
    result
}

/// Launch a browser, crawl `start_url` and release the browser.
pub async fn crawl_site(
    config: &Config,
    start_url: &str,
    max_depth: u32,
    cancel: CancellationToken,
) -> Result<CrawlReport> {
    let session = EokaSession::launch(&config.browser).await?;
    let session: Arc<dyn BrowserSession> = Arc::new(session);
    crawl_with_session(session, config, start_url, max_depth, &cancel).await
}
