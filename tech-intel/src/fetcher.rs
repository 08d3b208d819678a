use crate::types::{CollectError, Error, FetchConfig, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared HTTP client for collectors, with per-host request spacing and
/// uniform mapping of upstream failures onto `CollectError`.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = build_client(&config)?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Sends the request and fails on any non-success status.
    pub async fn execute(&self, request: RequestBuilder) -> std::result::Result<Response, CollectError> {
        let request = request
            .build()
            .map_err(|e| CollectError::Config(format!("invalid request: {}", e)))?;
        let url = request.url().clone();

        self.apply_rate_limit(url.host_str().unwrap_or("")).await;
        debug!("Fetching: {}", url);

        let response = self.client.execute(request).await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url.as_str()));
        }
        Ok(response)
    }

    pub async fn get_text(&self, url: &str, timeout: Duration) -> std::result::Result<String, CollectError> {
        let response = self.execute(self.client.get(url).timeout(timeout)).await?;
        response.text().await.map_err(transport_error)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> std::result::Result<T, CollectError> {
        let response = self.execute(request).await?;
        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(|e| CollectError::Parse(format!("unexpected response body: {}", e)))
    }

    async fn apply_rate_limit(&self, host: &str) {
        let min_interval = self.config.min_host_interval();
        if min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut rate_limiter = self.rate_limiter.lock().await;
            reserve_slot(&mut rate_limiter, host, Instant::now(), min_interval)
        };
        let wait_time = slot.saturating_duration_since(Instant::now());
        if !wait_time.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }
}

/// Claims the next free request slot for `host`, at least `min_interval`
/// after the previously claimed one.
fn reserve_slot(slots: &mut HashMap<String, Instant>, host: &str, now: Instant, min_interval: Duration) -> Instant {
    let slot = match slots.get(host) {
        Some(last) => now.max(*last + min_interval),
        None => now,
    };
    slots.insert(host.to_string(), slot);
    slot
}

/// Client with the configured user agent, timeout and redirect policy.
pub fn build_client(config: &FetchConfig) -> Result<Client> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .build()
        .map_err(Error::Http)
}

/// Maps a non-success status onto the collector error taxonomy.
pub fn status_error(status: StatusCode, context: &str) -> CollectError {
    match status {
        StatusCode::NOT_FOUND => CollectError::NotFound(context.to_string()),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            CollectError::RateLimited(format!("HTTP {} from {}", status.as_u16(), context))
        }
        _ => CollectError::Upstream(format!(
            "HTTP {} {} from {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown"),
            context
        )),
    }
}

pub fn transport_error(err: reqwest::Error) -> CollectError {
    if err.is_timeout() {
        warn!("Request timed out: {}", err);
        CollectError::Upstream(format!("timed out: {}", err))
    } else if err.is_decode() {
        CollectError::Parse(err.to_string())
    } else {
        CollectError::Upstream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_statuses_to_collect_errors() {
        assert!(matches!(status_error(StatusCode::NOT_FOUND, "x"), CollectError::NotFound(_)));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, "x"), CollectError::RateLimited(_)));
        assert!(matches!(status_error(StatusCode::TOO_MANY_REQUESTS, "x"), CollectError::RateLimited(_)));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, "x"), CollectError::Upstream(_)));
    }

    #[test]
    fn slots_queue_per_host() {
        let mut slots = HashMap::new();
        let now = Instant::now();
        let interval = Duration::from_millis(500);

        assert_eq!(reserve_slot(&mut slots, "a.example", now, interval), now);
        assert_eq!(reserve_slot(&mut slots, "a.example", now, interval), now + interval);
        assert_eq!(reserve_slot(&mut slots, "a.example", now, interval), now + interval * 2);
        assert_eq!(reserve_slot(&mut slots, "b.example", now, interval), now);

        let later = now + Duration::from_secs(5);
        assert_eq!(reserve_slot(&mut slots, "a.example", later, interval), later);
    }

    #[tokio::test]
    async fn waiting_on_one_host_does_not_block_another() {
        let config = FetchConfig {
            min_host_interval_ms: 400,
            ..FetchConfig::default()
        };
        let fetcher = Arc::new(Fetcher::new(config).unwrap());
        fetcher.apply_rate_limit("a.example").await;

        let busy = fetcher.clone();
        let queued = tokio::spawn(async move { busy.apply_rate_limit("a.example").await });
        tokio::task::yield_now().await;

        let started = Instant::now();
        fetcher.apply_rate_limit("b.example").await;
        assert!(started.elapsed() < Duration::from_millis(200));
        queued.await.unwrap();
    }
}
