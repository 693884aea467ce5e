use std::time::Duration;

use async_trait::async_trait;

use super::{read_body, PageFetcher, Result};

/// Fully-rendered HTML through a Browserless `/content` endpoint. Each call
/// gets its own browser page on the Browserless side, so there is nothing to
/// recycle locally.
pub struct BrowserlessFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessFetcher {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "timeout": timeout.as_millis() as u64, "waitUntil": "networkidle2" },
        });

        // leave Browserless a little headroom to report its own navigation timeout
        let resp = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .timeout(timeout + Duration::from_secs(5))
            .json(&body)
            .send()
            .await?;

        read_body(resp).await
    }

    fn name(&self) -> &str {
        "browserless"
    }
}
