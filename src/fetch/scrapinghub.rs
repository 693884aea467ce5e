use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::poll::{poll_until, PollPolicy};
use super::{read_body, FetchError, PageFetcher, Result};

const RUN_URL: &str = "https://app.scrapinghub.com/api/run.json";
const ITEMS_URL: &str = "https://storage.scrapinghub.com/items";

/// Job-based fetch: schedule a spider run for the URL, wait for it to publish
/// an item, then download the HTML the item points at.
pub struct ScrapingHubFetcher {
    client: reqwest::Client,
    api_key: String,
    project: String,
    spider: String,
    poll: PollPolicy,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    status: String,
    jobid: Option<String>,
    message: Option<String>,
}

impl ScrapingHubFetcher {
    pub fn new(api_key: &str, project: &str, spider: &str, poll: PollPolicy) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            api_key: api_key.to_string(),
            project: project.to_string(),
            spider: spider.to_string(),
            poll,
        })
    }

    async fn start_job(&self, url: &str, timeout: Duration) -> Result<String> {
        let resp = self
            .client
            .post(RUN_URL)
            .basic_auth(&self.api_key, Some(""))
            .timeout(timeout)
            .form(&[
                ("project", self.project.as_str()),
                ("spider", self.spider.as_str()),
                ("add_tag", "lead_vetter"),
                ("input_url", url),
            ])
            .send()
            .await?;
        let run: RunResponse = serde_json::from_str(&read_body(resp).await?)?;
        match (run.status.as_str(), run.jobid) {
            ("ok", Some(jobid)) => Ok(jobid),
            _ => Err(FetchError::Parse(
                run.message.unwrap_or_else(|| format!("job not started ({})", run.status)),
            )),
        }
    }

    async fn job_item(&self, jobid: &str, timeout: Duration) -> Result<Option<String>> {
        let resp = self
            .client
            .get(format!("{}/{}?format=json", ITEMS_URL, jobid))
            .basic_auth(&self.api_key, Some(""))
            .timeout(timeout)
            .send()
            .await?;
        let body = read_body(resp).await?;
        Ok(s3_url(&body))
    }
}

/// Pull `s3_url` from an items payload. An empty body or empty list means the
/// job has not produced anything yet.
fn s3_url(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let item = match &value {
        serde_json::Value::Array(items) => items.first()?,
        other => other,
    };
    item.get("s3_url")
        .and_then(|u| u.as_str())
        .map(String::from)
}

#[async_trait]
impl PageFetcher for ScrapingHubFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        let jobid = self.start_job(url, timeout).await?;
        info!(jobid = %jobid, url, "ScrapingHub job started");

        let jobid = jobid.as_str();
        let s3 = poll_until(self.poll, move |_| self.job_item(jobid, timeout)).await?;

        let resp = self.client.get(&s3).timeout(timeout).send().await?;
        read_body(resp).await
    }

    fn name(&self) -> &str {
        "scrapinghub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_items_mean_not_ready() {
        assert_eq!(s3_url(""), None);
        assert_eq!(s3_url("[]"), None);
        assert_eq!(s3_url("  \n"), None);
    }

    #[test]
    fn reads_s3_url_from_list_or_object() {
        assert_eq!(
            s3_url(r#"[{"s3_url":"https://bucket/a.html"}]"#).as_deref(),
            Some("https://bucket/a.html")
        );
        assert_eq!(
            s3_url(r#"{"s3_url":"https://bucket/b.html"}"#).as_deref(),
            Some("https://bucket/b.html")
        );
    }
}
