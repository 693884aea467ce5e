use std::time::{Duration, Instant};

use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, warn};

use super::{FetchError, PageFetcher, Result};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Raw page HTML through spider.cloud.
pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    pub fn new(api_key: &str) -> Result<Self> {
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| FetchError::Network(format!("Failed to create Spider client: {}", e)))?;
        Ok(Self { spider })
    }

    async fn scrape_once(&self, url: &str) -> Result<String> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let start = Instant::now();
        let value = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| classify(&e.to_string()))?;
        debug!(url, latency_ms = start.elapsed().as_millis() as u64, "spider response");

        // spider sometimes hands back the JSON array as a string
        let parsed: serde_json::Value = match value.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
            None => value,
        };
        let first = parsed
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| FetchError::Parse("empty spider response".into()))?;

        if let Some(status) = first.get("status").and_then(|s| s.as_u64()) {
            if status == 429 {
                return Err(FetchError::RateLimited(format!("spider status {}", status)));
            }
            if !(200..300).contains(&status) {
                return Err(FetchError::Status {
                    status: status as u16,
                });
            }
        }

        first
            .get("content")
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| FetchError::Parse("no content in spider response".into()))
    }
}

fn classify(message: &str) -> FetchError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        FetchError::RateLimited(message.to_string())
    } else {
        FetchError::Network(message.to_string())
    }
}

fn should_retry(err: &FetchError) -> bool {
    match err {
        FetchError::RateLimited(_) => true,
        FetchError::Status { status } => matches!(status, 500 | 502 | 503),
        _ => false,
    }
}

#[async_trait]
impl PageFetcher for SpiderFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        for attempt in 0..=MAX_RETRIES {
            let result = tokio::time::timeout(timeout, self.scrape_once(url))
                .await
                .unwrap_or(Err(FetchError::Timeout));

            match result {
                Err(e) if should_retry(&e) && attempt < MAX_RETRIES => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "{} on {} (attempt {}/{}), backing off {:.1}s",
                        e,
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
        Err(FetchError::Timeout)
    }

    fn name(&self) -> &str {
        "spider"
    }
}
