use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Transport errors, 429 and 5xx are worth another attempt; other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

/// Anything that can turn a URL into page text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport { url: url.to_string(), source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status });
        }

        resp.text()
            .await
            .map_err(|source| FetchError::Transport { url: url.to_string(), source })
    }
}

/// Doubling delays from `base_ms`, one per retry, each with up to one base of jitter.
pub fn backoff(base_ms: u64, retries: u32) -> Vec<Duration> {
    (0..retries)
        .map(|attempt| {
            let jitter = (rand::random::<f64>() * base_ms as f64) as u64;
            Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(16)) + jitter)
        })
        .collect()
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// delays run out.
pub async fn with_retry<A, Fut>(delays: Vec<Duration>, attempt: A) -> Result<String, FetchError>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    RetryIf::start(delays, attempt, |e: &FetchError| {
        let retry = e.is_retryable();
        if retry {
            warn!("{} (retrying)", e);
        }
        retry
    })
    .await
}

#[async_trait]
impl PageFetcher for HttpClient {
    /// Fetch a URL as text, retrying transient failures with backoff.
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let delays = backoff(self.config.retry_base_ms, self.config.max_retries);
        with_retry(delays, || self.get_once(url)).await
    }
}

// ── Batch fetch ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct FailedFetch {
    pub url: String,
    pub error: String,
}

/// Outcome of one batch: successful pages in input order, plus the URLs that
/// could not be fetched.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub pages: Vec<FetchedPage>,
    pub failed: Vec<FailedFetch>,
}

impl FetchReport {
    pub fn extend(&mut self, other: FetchReport) {
        self.pages.extend(other.pages);
        self.failed.extend(other.failed);
    }
}

/// Fetch every URL with at most `concurrency` requests in flight. A failed URL
/// is recorded in the report and does not affect the rest of the batch.
pub async fn fetch_all<F>(fetcher: &F, urls: &[String], concurrency: usize) -> FetchReport
where
    F: PageFetcher + ?Sized,
{
    let results: Vec<(String, Result<String, FetchError>)> = stream::iter(urls.iter().cloned())
        .map(|url| async move {
            let result = fetcher.get_text(&url).await;
            (url, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = FetchReport::default();
    for (url, result) in results {
        match result {
            Ok(html) => report.pages.push(FetchedPage { url, html }),
            Err(e) => {
                warn!("Fetch failed: {:#}", e);
                report.failed.push(FailedFetch { url, error: e.to_string() });
            }
        }
    }
    report
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned pages; unknown URLs answer 404.
    pub(crate) struct FakeFetcher {
        pub pages: HashMap<String, String>,
    }

    impl FakeFetcher {
        pub(crate) fn new<const N: usize>(pages: [(&str, &str); N]) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(u, h)| (u.to_string(), h.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
            })
        }
    }

    #[test]
    fn test_fetch_all_preserves_order_and_isolates_failures() {
        let fetcher = FakeFetcher::new([("a", "<p>a</p>"), ("c", "<p>c</p>"), ("d", "<p>d</p>")]);
        let urls: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();

        let report = tokio_test::block_on(fetch_all(&fetcher, &urls, 3));

        let fetched: Vec<&str> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(fetched, vec!["a", "c", "d"]);
        assert_eq!(report.pages[1].html, "<p>c</p>");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "b");
        assert!(report.failed[0].error.contains("404"));
    }

    #[test]
    fn test_fetch_all_empty_batch() {
        let fetcher = FakeFetcher::new([]);
        let report = tokio_test::block_on(fetch_all(&fetcher, &[], 0));
        assert!(report.pages.is_empty());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_retryable_statuses() {
        let status = |s| FetchError::Status { url: "u".into(), status: s };
        assert!(status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(!status(StatusCode::NOT_FOUND).is_retryable());
        assert!(!status(StatusCode::FORBIDDEN).is_retryable());
    }

    /// Answers 503 for the first `failures` requests, then a page.
    struct FlakyFetcher {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for FlakyFetcher {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok("<p>ok</p>".to_string())
        }
    }

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        let delays = backoff(100, 4);
        assert_eq!(delays.len(), 4);
        for (i, d) in delays.iter().enumerate() {
            let low = 100u64 << i;
            let ms = d.as_millis() as u64;
            assert!((low..low + 100).contains(&ms), "retry {}: {} ms", i, ms);
        }
        assert!(backoff(100, 0).is_empty());
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let flaky = FlakyFetcher { failures: 2, calls: AtomicUsize::new(0) };
        let result = tokio_test::block_on(with_retry(vec![Duration::ZERO; 3], || flaky.get_text("u")));
        assert_eq!(result.unwrap(), "<p>ok</p>");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retries_run_out() {
        let flaky = FlakyFetcher { failures: 5, calls: AtomicUsize::new(0) };
        let err = tokio_test::block_on(with_retry(vec![Duration::ZERO; 2], || flaky.get_text("u")))
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_not_found_is_not_retried() {
        let fetcher = FakeFetcher::new([]);
        let calls = AtomicUsize::new(0);
        let err = tokio_test::block_on(with_retry(vec![Duration::ZERO; 3], || {
            calls.fetch_add(1, Ordering::SeqCst);
            fetcher.get_text("missing")
        }))
        .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Records how many requests are in flight at once.
    #[derive(Default)]
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for SlowFetcher {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(url.to_string())
        }
    }

    #[test]
    fn test_fetch_all_caps_requests_in_flight() {
        let fetcher = SlowFetcher::default();
        let urls: Vec<String> = (0..10).map(|i| format!("u{}", i)).collect();

        let report = tokio_test::block_on(fetch_all(&fetcher, &urls, 3));

        assert_eq!(report.pages.len(), 10);
        assert_eq!(report.pages[9].html, "u9");
        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 3);
    }
}
