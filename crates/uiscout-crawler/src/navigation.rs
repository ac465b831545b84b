//! Resilient navigation: bounded retries, readiness waiting and link extraction.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::PageHandle;
use crate::config::NavigationConfig;
use crate::{Error, Result};

const POLL_INTERVAL_MS: u64 = 100;

/// What `await_ready` managed to observe before its deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyReport {
    pub network_idle: bool,
    pub dom_parsed: bool,
    pub images_settled: bool,
}

impl ReadyReport {
    pub fn is_complete(&self) -> bool {
        self.network_idle && self.dom_parsed && self.images_settled
    }
}

/// Drives page loads for the crawler.
#[derive(Debug, Clone)]
pub struct NavigationController {
    config: NavigationConfig,
}

impl NavigationController {
    pub fn new(config: NavigationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Navigate with retry support.
    ///
    /// Makes at most `max_attempts` attempts, each bounded by
    /// `attempt_timeout_ms`, with `retry_delay_ms` between them.
    pub async fn navigate(&self, page: &dyn PageHandle, url: &str) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);
        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!("Retry attempt {}/{} for {}", attempt, max_attempts, url);
                if self.config.retry_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }

            match tokio::time::timeout(attempt_timeout, page.goto(url)).await {
                Ok(Ok(())) => {
                    debug!("Navigated to {} (attempt {})", url, attempt);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Attempt {} to load {} failed: {}", attempt, url, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "Attempt {} to load {} timed out after {}ms",
                        attempt, url, self.config.attempt_timeout_ms
                    );
                    last_error = format!("timed out after {}ms", self.config.attempt_timeout_ms);
                }
            }
        }

        Err(Error::Navigation {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Wait until the page is usable for discovery.
    ///
    /// Waits for network quiescence, a parsed DOM, the settle delay, and then
    /// for pending images to load or error. Each stage is bounded; a stage that
    /// runs out of time is reported in the returned [`ReadyReport`] instead of
    /// failing the page.
    pub async fn await_ready(&self, page: &dyn PageHandle) -> ReadyReport {
        // Some sites never stop polling
        let network_idle = match page
            .wait_for_network_idle(self.config.network_idle_ms, self.config.ready_timeout_ms)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!("Network did not settle: {}", e);
                false
            }
        };

        let dom_parsed = self.wait_for_dom(page).await;
        page.wait(self.config.settle_ms).await;
        let images_settled = self.wait_for_images(page).await;

        let report = ReadyReport {
            network_idle,
            dom_parsed,
            images_settled,
        };
        if !report.is_complete() {
            debug!("Page only partially ready: {:?}", report);
        }
        report
    }

    async fn wait_for_dom(&self, page: &dyn PageHandle) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.config.ready_timeout_ms);
        loop {
            match page.ready_state().await {
                Ok(state) if state != "loading" => return true,
                Ok(_) => {}
                Err(e) => debug!("readyState check failed: {}", e),
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    async fn wait_for_images(&self, page: &dyn PageHandle) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.config.image_timeout_ms);
        loop {
            match page.pending_images().await {
                Ok(0) => return true,
                Ok(pending) => debug!("{} image(s) still loading", pending),
                Err(e) => debug!("Image check failed: {}", e),
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    /// Outbound links on the current page, normalized and deduplicated in document order.
    pub async fn extract_links(&self, page: &dyn PageHandle) -> Result<Vec<String>> {
        let base = page.url().await.ok().and_then(|u| Url::parse(&u).ok());
        let raw = page.links().await?;

        let mut links: Vec<String> = Vec::with_capacity(raw.len());
        for href in raw {
            if let Some(link) = normalize_url(&href, base.as_ref()) {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        Ok(links)
    }
}

/// Resolve `raw` against `base` and strip the fragment.
///
/// Returns `None` for unparseable URLs and for schemes other than http(s).
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Check if two URLs share the same origin (scheme + host + port).
pub fn is_same_origin(base: &str, candidate: &str) -> bool {
    match (Url::parse(base), Url::parse(candidate)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSite, MockSiteBuilder};

    fn fast_config(max_attempts: u32) -> NavigationConfig {
        NavigationConfig {
            max_attempts,
            retry_delay_ms: 1,
            attempt_timeout_ms: 1_000,
            network_idle_ms: 10,
            ready_timeout_ms: 200,
            settle_ms: 0,
            image_timeout_ms: 200,
        }
    }

    #[test]
    fn test_normalize_url() {
        let base = Url::parse("https://example.com/docs/index.html").unwrap();
        assert_eq!(
            normalize_url("guide.html#intro", Some(&base)),
            Some("https://example.com/docs/guide.html".into())
        );
        assert_eq!(
            normalize_url("/about", Some(&base)),
            Some("https://example.com/about".into())
        );
        assert_eq!(normalize_url("mailto:a@example.com", Some(&base)), None);
        assert_eq!(normalize_url("javascript:void(0)", Some(&base)), None);
        assert_eq!(normalize_url("", Some(&base)), None);
        assert_eq!(normalize_url("not a url", None), None);
        assert_eq!(
            normalize_url("https://example.com", None),
            Some("https://example.com/".into())
        );
    }

    #[test]
    fn test_is_same_origin() {
        assert!(is_same_origin("https://example.com/a", "https://example.com/b?x=1"));
        assert!(!is_same_origin("https://example.com/", "http://example.com/"));
        assert!(!is_same_origin("https://example.com/", "https://other.com/"));
        assert!(!is_same_origin("https://example.com:8443/", "https://example.com/"));
        assert!(!is_same_origin("garbage", "https://example.com/"));
    }

    #[tokio::test]
    async fn test_navigate_succeeds_first_try() {
        let site = MockSiteBuilder::new().page("https://a.test/", &[]).build();
        let page = MockSite::page(&site);
        let nav = NavigationController::new(fast_config(3));

        nav.navigate(&*page, "https://a.test/").await.unwrap();
        assert_eq!(site.goto_count("https://a.test/"), 1);
    }

    #[tokio::test]
    async fn test_navigate_retry_bound() {
        let site = MockSiteBuilder::new().failing("https://down.test/").build();
        let page = MockSite::page(&site);
        let nav = NavigationController::new(fast_config(3));

        let err = nav.navigate(&*page, "https://down.test/").await.unwrap_err();
        assert_eq!(site.goto_count("https://down.test/"), 3);
        match err {
            Error::Navigation { attempts, url, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(url, "https://down.test/");
            }
            other => panic!("Expected Navigation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_navigate_recovers_from_transient_failure() {
        let site = MockSiteBuilder::new()
            .page("https://flaky.test/", &[])
            .flaky("https://flaky.test/", 2)
            .build();
        let page = MockSite::page(&site);
        let nav = NavigationController::new(fast_config(3));

        nav.navigate(&*page, "https://flaky.test/").await.unwrap();
        assert_eq!(site.goto_count("https://flaky.test/"), 3);
    }

    #[tokio::test]
    async fn test_navigate_attempt_timeout_counts_as_failure() {
        let site = MockSiteBuilder::new()
            .page("https://slow.test/", &[])
            .goto_delay_ms(200)
            .build();
        let page = MockSite::page(&site);
        let mut config = fast_config(2);
        config.attempt_timeout_ms = 20;
        let nav = NavigationController::new(config);

        let err = nav.navigate(&*page, "https://slow.test/").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(site.goto_count("https://slow.test/"), 2);
    }

    #[tokio::test]
    async fn test_await_ready_complete() {
        let site = MockSiteBuilder::new().page("https://a.test/", &[]).build();
        let page = MockSite::page(&site);
        let nav = NavigationController::new(fast_config(1));
        nav.navigate(&*page, "https://a.test/").await.unwrap();

        let report = nav.await_ready(&*page).await;
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_await_ready_stuck_image_is_bounded() {
        let site = MockSiteBuilder::new()
            .page("https://a.test/", &[])
            .stuck_images(1)
            .build();
        let page = MockSite::page(&site);
        let nav = NavigationController::new(fast_config(1));
        nav.navigate(&*page, "https://a.test/").await.unwrap();

        let report = nav.await_ready(&*page).await;
        assert!(report.dom_parsed);
        assert!(!report.images_settled);
    }

    #[tokio::test]
    async fn test_extract_links_normalizes_and_dedups() {
        let site = MockSiteBuilder::new()
            .page(
                "https://a.test/",
                &[
                    "https://a.test/b#top",
                    "https://a.test/b",
                    "mailto:x@a.test",
                    "https://a.test/c",
                ],
            )
            .build();
        let page = MockSite::page(&site);
        let nav = NavigationController::new(fast_config(1));
        nav.navigate(&*page, "https://a.test/").await.unwrap();

        let links = nav.extract_links(&*page).await.unwrap();
        assert_eq!(links, vec!["https://a.test/b", "https://a.test/c"]);
    }
}
