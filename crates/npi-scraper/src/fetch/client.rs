//! reqwest-backed fetcher with user-agent/proxy rotation and retries.

use super::retry::RetryPolicy;
use super::types::{classify_status, FetchError, FetchOptions, Fetcher, PageFetchResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{redirect, Client, Proxy};
use shared::config::FetchConfig;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// HTTP fetcher for directory pages
pub struct HttpFetcher {
    /// One client per proxy, or a single direct client
    clients: Vec<Client>,
    /// User agents rotated per request
    user_agents: Vec<String>,
    /// Headers sent with every request
    default_headers: HeaderMap,
    /// Statuses reported as anti-bot blocks
    block_statuses: Vec<u16>,
    retry: RetryPolicy,
    /// Interrupts in-flight attempts and backoff sleeps
    cancel: CancellationToken,
    next_client: AtomicUsize,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    /// Create a fetcher from the `[fetch]` config section
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let clients = if config.proxies.is_empty() {
            vec![build_client(None)?]
        } else {
            config
                .proxies
                .iter()
                .map(|proxy| build_client(Some(proxy)))
                .collect::<Result<Vec<_>, _>>()?
        };

        debug!(
            clients = clients.len(),
            user_agents = config.user_agents.len(),
            "HTTP fetcher created"
        );

        Ok(Self {
            clients,
            user_agents: config.user_agents.clone(),
            default_headers: header_map(&config.headers)?,
            block_statuses: config.block_statuses.clone(),
            retry: RetryPolicy::from(&config.retry),
            cancel: CancellationToken::new(),
            next_client: AtomicUsize::new(0),
            next_agent: AtomicUsize::new(0),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Abort requests and retry waits once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Request options matching the `[fetch]` config section
    pub fn options(config: &FetchConfig) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_millis(config.timeout_ms),
            headers: BTreeMap::new(),
        }
    }

    fn next_client(&self) -> &Client {
        let idx = self.next_client.fetch_add(1, Ordering::Relaxed);
        &self.clients[idx % self.clients.len()]
    }

    fn next_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let idx = self.next_agent.fetch_add(1, Ordering::Relaxed);
        Some(self.user_agents[idx % self.user_agents.len()].as_str())
    }

    /// Headers for one attempt: defaults, then rotated agent, then per-request overrides
    fn request_headers(&self, options: &FetchOptions) -> Result<HeaderMap, FetchError> {
        let mut headers = self.default_headers.clone();

        if let Some(agent) = self.next_user_agent() {
            let value = HeaderValue::from_str(agent).map_err(|e| FetchError::InvalidHeader {
                name: USER_AGENT.to_string(),
                message: e.to_string(),
            })?;
            headers.insert(USER_AGENT, value);
        }

        for (name, value) in header_map(&options.headers)? {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }

        Ok(headers)
    }

    /// A single GET without retries
    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<PageFetchResult, FetchError> {
        let headers = self.request_headers(options)?;
        let timeout_ms = options.timeout.as_millis() as u64;

        let response = self
            .next_client()
            .get(url)
            .headers(headers)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| transport_error(url, timeout_ms, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if let Some(err) = classify_status(url, status, &self.block_statuses) {
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(url, timeout_ms, e))?;

        Ok(PageFetchResult {
            status,
            body,
            final_url,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<PageFetchResult, FetchError> {
        let mut attempt = 1;

        loop {
            debug!(url = %url, attempt = attempt, "Fetching page");

            let outcome = tokio::select! {
                result = self.attempt(url, options) => result,
                _ = self.cancel.cancelled() => Err(cancelled(url)),
            };

            match outcome {
                Ok(page) => {
                    debug!(
                        url = %url,
                        final_url = %page.final_url,
                        status = page.status,
                        bytes = page.body.len(),
                        "Page fetched"
                    );
                    return Ok(page);
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        url = %url,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(cancelled(url)),
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(url = %url, attempt = attempt, error = %e, "Fetch failed");
                    return Err(e);
                }
            }
        }
    }
}

fn build_client(proxy: Option<&str>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .redirect(redirect::Policy::limited(10))
        .gzip(true);

    // Only configured proxies are used; environment proxy variables are ignored
    match proxy {
        Some(proxy) => {
            let proxy = Proxy::all(proxy).map_err(|e| FetchError::Client {
                message: format!("invalid proxy {proxy}: {e}"),
            })?;
            builder = builder.proxy(proxy);
        }
        None => builder = builder.no_proxy(),
    }

    builder.build().map_err(|e| FetchError::Client {
        message: e.to_string(),
    })
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
            name: name.clone(),
            message: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn cancelled(url: &str) -> FetchError {
    FetchError::Cancelled {
        url: url.to_string(),
    }
}

fn transport_error(url: &str, timeout_ms: u64, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_ms,
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BackoffStrategy;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection; `respond` gets the
    /// request path and the 0-based request number
    async fn serve<R>(respond: R) -> (String, Arc<AtomicUsize>)
    where
        R: Fn(&str, usize) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while read < buf.len() {
                    let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let n = counter.fetch_add(1, Ordering::SeqCst);

                let _ = socket.write_all(respond(&path, n).as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    fn quick_fetcher(max_attempts: u32) -> HttpFetcher {
        HttpFetcher::new(&FetchConfig::default())
            .unwrap()
            .with_retry(RetryPolicy {
                max_attempts,
                backoff: BackoffStrategy::Fixed(Duration::from_millis(10)),
                jitter: Duration::ZERO,
            })
    }

    fn options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::new(&FetchConfig::default());
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_one_client_per_proxy() {
        let config = FetchConfig {
            proxies: vec![
                "http://127.0.0.1:8080".to_string(),
                "http://127.0.0.1:8081".to_string(),
            ],
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(fetcher.clients.len(), 2);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = FetchConfig::default();
        config
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(FetchError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_user_agents_rotate() {
        let config = FetchConfig {
            user_agents: vec!["agent-a".to_string(), "agent-b".to_string()],
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();

        assert_eq!(fetcher.next_user_agent(), Some("agent-a"));
        assert_eq!(fetcher.next_user_agent(), Some("agent-b"));
        assert_eq!(fetcher.next_user_agent(), Some("agent-a"));
    }

    #[test]
    fn test_request_headers_override_defaults() {
        let config = FetchConfig {
            user_agents: vec!["agent-a".to_string()],
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();

        let mut options = HttpFetcher::options(&config);
        options
            .headers
            .insert("User-Agent".to_string(), "override".to_string());

        let headers = fetcher.request_headers(&options).unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "override");
        assert_eq!(headers.get("accept-language").unwrap(), "en-US,en;q=0.9");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new(&FetchConfig::default())
            .unwrap()
            .with_retry(RetryPolicy::none());
        let options = FetchOptions {
            timeout: Duration::from_secs(5),
            ..Default::default()
        };

        let result = fetcher.fetch("http://127.0.0.1:9/provider", &options).await;
        assert!(matches!(
            result,
            Err(FetchError::Network { .. }) | Err(FetchError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_errors_retried_until_success() {
        let (base, hits) = serve(|_, n| match n {
            0 | 1 => response("503 Service Unavailable", "", "busy"),
            _ => response("200 OK", "", "<html>ok</html>"),
        })
        .await;

        let page = quick_fetcher(3)
            .fetch(&format!("{base}/provider"), &options())
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.body, "<html>ok</html>");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let (base, hits) = serve(|_, n| match n {
            0 => response("429 Too Many Requests", "", ""),
            _ => response("200 OK", "", "ok"),
        })
        .await;

        let page = quick_fetcher(3)
            .fetch(&format!("{base}/provider"), &options())
            .await
            .unwrap();

        assert_eq!(page.body, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forbidden_is_block_without_retry() {
        let (base, hits) = serve(|_, _| response("403 Forbidden", "", "denied")).await;

        let err = quick_fetcher(3)
            .fetch(&format!("{base}/provider"), &options())
            .await
            .unwrap_err();

        assert!(err.is_block());
        assert!(matches!(err, FetchError::AntiBotBlock { status: 403, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (base, hits) = serve(|_, _| response("404 Not Found", "", "")).await;

        let err = quick_fetcher(3)
            .fetch(&format!("{base}/provider"), &options())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let (base, hits) = serve(|_, _| response("502 Bad Gateway", "", "")).await;

        let err = quick_fetcher(3)
            .fetch(&format!("{base}/provider"), &options())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 502, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_redirect_records_final_url() {
        let (base, hits) = serve(|path, _| {
            if path == "/provider?page=9" {
                response("302 Found", "Location: /provider?page=1\r\n", "")
            } else {
                response("200 OK", "", "first page")
            }
        })
        .await;

        let page = quick_fetcher(1)
            .fetch(&format!("{base}/provider?page=9"), &options())
            .await
            .unwrap();

        assert_eq!(page.final_url, format!("{base}/provider?page=1"));
        assert_eq!(page.body, "first page");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let (base, hits) = serve(|_, _| response("503 Service Unavailable", "", "")).await;
        let cancel = CancellationToken::new();
        let fetcher = HttpFetcher::new(&FetchConfig::default())
            .unwrap()
            .with_retry(RetryPolicy {
                max_attempts: 5,
                backoff: BackoffStrategy::Fixed(Duration::from_secs(30)),
                jitter: Duration::ZERO,
            })
            .with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.fetch(&format!("{base}/provider"), &options()),
        )
        .await
        .expect("cancellation should cut the backoff short")
        .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
