pub mod browserless;
pub mod http;
pub mod poll;
pub mod scrapinghub;
pub mod spider;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use browserless::BrowserlessFetcher;
pub use http::HttpFetcher;
pub use scrapinghub::ScrapingHubFetcher;
pub use spider::SpiderFetcher;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out")]
    Timeout,

    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    /// The provider told us to back off. Not a per-row condition.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Unexpected response: {0}")]
    Parse(String),

    #[error("Gave up after {attempts} polls")]
    PollTimeout { attempts: u32 },
}

impl FetchError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimited(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Something that can turn a URL into page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String>;

    /// Drop whatever session state the fetcher keeps and start fresh.
    async fn recycle(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Map a response to its body, turning 429 into `RateLimited` and any other
/// non-2xx into `Status`.
pub(crate) async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    if status.as_u16() == 429 {
        let message = resp.text().await.unwrap_or_default();
        return Err(FetchError::RateLimited(if message.is_empty() {
            "HTTP 429".to_string()
        } else {
            truncate(&message, 120)
        }));
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
        });
    }
    Ok(resp.text().await?)
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
