use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::fetch::poll::PollPolicy;
use crate::pipeline::RunOptions;
use crate::steps::LikesPolicy;

const CONFIG_FILE: &str = "lead_vetter";
const ENV_PREFIX: &str = "VETTER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    #[default]
    Http,
    Browserless,
    Spider,
    ScrapingHub,
}

/// Runtime settings from `lead_vetter.toml` (optional) and `VETTER_*`
/// environment variables, the latter winning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub fetch_timeout_secs: u64,
    pub rank_batch_size: usize,
    pub likes_batch_size: usize,
    pub throttle_ms: u64,
    pub recycle_every: usize,
    pub fetcher: FetcherKind,

    pub awis_key: Option<String>,
    /// OAuth bearer token with the spreadsheets scope.
    pub sheets_token: Option<String>,

    pub browserless_url: String,
    pub browserless_token: Option<String>,
    pub spider_key: Option<String>,
    pub scrapinghub_key: Option<String>,
    pub scrapinghub_project: Option<String>,
    pub scrapinghub_spider: Option<String>,

    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub poll_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/vetter.sqlite"),
            fetch_timeout_secs: 10,
            rank_batch_size: 5,
            likes_batch_size: 5,
            throttle_ms: 500,
            recycle_every: 10,
            fetcher: FetcherKind::Http,
            awis_key: None,
            sheets_token: None,
            browserless_url: "https://chrome.browserless.io".to_string(),
            browserless_token: None,
            spider_key: None,
            scrapinghub_key: None,
            scrapinghub_project: None,
            scrapinghub_spider: None,
            poll_interval_secs: 2,
            poll_max_attempts: 60,
            poll_timeout_secs: 180,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn run_options(&self, fetch_all: bool, likes_policy: LikesPolicy) -> RunOptions {
        RunOptions {
            fetch_all,
            likes_policy,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            throttle: Duration::from_millis(self.throttle_ms),
            rank_batch_size: self.rank_batch_size,
            likes_batch_size: self.likes_batch_size,
            recycle_every: self.recycle_every,
            show_progress: true,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
            timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}
