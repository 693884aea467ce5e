//! In-process stand-ins for the network collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::alexa::{OneOrMany, RankEntry, RankProvider};
use crate::fetch::{self, FetchError, PageFetcher};
use crate::pipeline::RunOptions;
use crate::sheets::{self, SheetClient, SheetError};

/// Defaults with the throttle switched off and no progress output.
pub fn test_options() -> RunOptions {
    RunOptions {
        throttle: Duration::ZERO,
        show_progress: false,
        ..RunOptions::default()
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Page(String),
    Timeout,
    Status(u16),
    RateLimited,
}

impl Reply {
    pub fn page(html: &str) -> Self {
        Reply::Page(html.to_string())
    }
}

/// Answers each URL with a scripted reply; unknown URLs get a 404.
#[derive(Default)]
pub struct MockFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    recycles: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, reply: Reply) -> Self {
        self.set(url, reply);
        self
    }

    pub fn set(&self, url: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn recycles(&self) -> usize {
        self.recycles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> fetch::Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        let reply = self.replies.lock().unwrap().get(url).cloned();
        match reply {
            Some(Reply::Page(html)) => Ok(html),
            Some(Reply::Timeout) => Err(FetchError::Timeout),
            Some(Reply::Status(status)) => Err(FetchError::Status { status }),
            Some(Reply::RateLimited) => Err(FetchError::RateLimited("HTTP 429".into())),
            None => Err(FetchError::Status { status: 404 }),
        }
    }

    async fn recycle(&self) -> fetch::Result<()> {
        self.recycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Pops scripted replies in order; once they run out every URL ranks 1000.
#[derive(Default)]
pub struct MockRanks {
    replies: Mutex<VecDeque<fetch::Result<OneOrMany<RankEntry>>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockRanks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, reply: fetch::Result<OneOrMany<RankEntry>>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn ranked(url: &str, rank: &str) -> RankEntry {
    RankEntry::Ranked {
        url: url.to_string(),
        rank: rank.to_string(),
    }
}

#[async_trait]
impl RankProvider for MockRanks {
    async fn url_info(&self, urls: &[String]) -> fetch::Result<OneOrMany<RankEntry>> {
        self.calls.lock().unwrap().push(urls.to_vec());
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        Ok(OneOrMany::Many(urls.iter().map(|u| ranked(u, "1000")).collect()))
    }
}

/// Columns keyed by their A1 range.
#[derive(Default)]
pub struct MockSheet {
    columns: Mutex<HashMap<String, Vec<String>>>,
    titles: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, Vec<String>)>>,
    fail_reads: bool,
}

impl MockSheet {
    pub fn new(titles: &[&str]) -> Self {
        MockSheet {
            titles: Mutex::new(titles.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        MockSheet {
            fail_reads: true,
            ..Default::default()
        }
    }

    pub fn with_column(self, range: &str, cells: &[&str]) -> Self {
        self.columns
            .lock()
            .unwrap()
            .insert(range.to_string(), cells.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(String, Vec<String>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SheetClient for MockSheet {
    async fn read_columns(&self, _sheet_id: &str, ranges: &[String]) -> sheets::Result<Vec<Vec<String>>> {
        if self.fail_reads {
            return Err(SheetError::Api {
                status: 401,
                message: "Request had invalid authentication credentials".into(),
            });
        }
        let columns = self.columns.lock().unwrap();
        Ok(ranges
            .iter()
            .map(|r| columns.get(r).cloned().unwrap_or_default())
            .collect())
    }

    async fn write_columns(
        &self,
        _sheet_id: &str,
        ranges: &[String],
        columns: &[Vec<String>],
    ) -> sheets::Result<()> {
        let mut writes = self.writes.lock().unwrap();
        for (range, column) in ranges.iter().zip(columns) {
            writes.push((range.clone(), column.clone()));
        }
        Ok(())
    }

    async fn sheet_titles(&self, _sheet_id: &str) -> sheets::Result<Vec<String>> {
        Ok(self.titles())
    }

    async fn add_sheet(&self, _sheet_id: &str, title: &str) -> sheets::Result<()> {
        self.titles.lock().unwrap().push(title.to_string());
        Ok(())
    }
}
