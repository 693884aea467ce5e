use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::fetch::{read_body, FetchError, Result};

const AWIS_URL: &str = "https://awis.api.alexa.com/api";

/// Hard cap on URLs per UrlInfo call.
pub const MAX_BATCH: usize = 5;

/// A provider answer that is a bare object for single-URL requests and a list
/// otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RankEntry {
    /// `rank` as the provider sent it; parsing is the caller's business.
    Ranked { url: String, rank: String },
    Failed { code: u16, message: String },
}

/// Batch traffic-rank lookup. Entries come back in request order.
#[async_trait]
pub trait RankProvider: Send + Sync {
    async fn url_info(&self, urls: &[String]) -> Result<OneOrMany<RankEntry>>;
}

pub struct AwisClient {
    client: reqwest::Client,
    api_key: String,
}

impl AwisClient {
    pub fn new(api_key: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            api_key: api_key.to_string(),
        })
    }
}

fn request_params(urls: &[String]) -> Vec<(String, String)> {
    let mut params = vec![
        ("Action".to_string(), "UrlInfo".to_string()),
        ("Output".to_string(), "json".to_string()),
    ];
    if let [url] = urls {
        params.push(("Url".into(), url.clone()));
        params.push(("ResponseGroup".into(), "Rank".into()));
    } else {
        params.push(("UrlInfo.Shared.ResponseGroup".into(), "Rank".into()));
        for (i, url) in urls.iter().take(MAX_BATCH).enumerate() {
            params.push((format!("UrlInfo.{}.Url", i + 1), url.clone()));
        }
    }
    params
}

#[async_trait]
impl RankProvider for AwisClient {
    async fn url_info(&self, urls: &[String]) -> Result<OneOrMany<RankEntry>> {
        let endpoint = reqwest::Url::parse_with_params(AWIS_URL, request_params(urls))
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        debug!(count = urls.len(), "AWIS UrlInfo request");

        let resp = self
            .client
            .get(endpoint)
            .header("Accept", "application/json")
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let body: Value = serde_json::from_str(&read_body(resp).await?)?;
        parse_url_info(&body)
    }
}

/// Flatten an AWIS `UrlInfo` JSON body. A single-URL reply keeps its single
/// object shape.
pub fn parse_url_info(body: &Value) -> Result<OneOrMany<RankEntry>> {
    let results = body
        .pointer("/Awis/Results")
        .ok_or_else(|| FetchError::Parse("missing Awis.Results".into()))?;
    let result = &results["Result"];
    let status = &results["ResponseStatus"];

    match (result, status) {
        (Value::Array(items), Value::Array(statuses)) => Ok(OneOrMany::Many(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| entry(item, statuses.get(i).unwrap_or(&Value::Null)))
                .collect(),
        )),
        (Value::Array(items), single) => Ok(OneOrMany::Many(
            items.iter().map(|item| entry(item, single)).collect(),
        )),
        (Value::Null, _) => Err(FetchError::Parse("missing Awis.Results.Result".into())),
        (item, single) => Ok(OneOrMany::One(entry(item, single))),
    }
}

fn entry(item: &Value, status: &Value) -> RankEntry {
    let code = status_code(&status["StatusCode"]);
    if code != 200 {
        let message = match &item["Response"] {
            Value::Null => format!("status {}", code),
            other => format!("status {}: {}", code, text(other)),
        };
        return RankEntry::Failed { code, message };
    }
    let traffic = &item["Alexa"]["TrafficData"];
    RankEntry::Ranked {
        url: text(&traffic["DataUrl"]),
        rank: text(&traffic["Rank"]),
    }
}

fn status_code(v: &Value) -> u16 {
    match v {
        Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        // a missing status on an otherwise well-formed result means success
        Value::Null => 200,
        _ => 0,
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
