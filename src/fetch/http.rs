use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{read_body, FetchError, PageFetcher, Result};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Plain HTTP GET. Recycling swaps in a fresh client, which drops the
/// connection pool.
pub struct HttpFetcher {
    client: RwLock<reqwest::Client>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: RwLock::new(build_client()?),
        })
    }

    fn client(&self) -> Result<reqwest::Client> {
        self.client
            .read()
            .map(|c| c.clone())
            .map_err(|_| FetchError::Network("HTTP client lock poisoned".into()))
    }
}

fn build_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        let resp = self.client()?.get(url).timeout(timeout).send().await?;
        read_body(resp).await
    }

    async fn recycle(&self) -> Result<()> {
        let fresh = build_client()?;
        let mut guard = self
            .client
            .write()
            .map_err(|_| FetchError::Network("HTTP client lock poisoned".into()))?;
        *guard = fresh;
        debug!("HTTP client recycled");
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
