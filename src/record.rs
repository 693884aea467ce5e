use std::collections::BTreeMap;
use std::fmt;

use crate::urlnorm;

/// First data row of the sheet; row 1 holds the headers.
pub const HEADER_OFFSET: u32 = 2;

pub const INVALID_URL: &str = "Not a valid URL";

/// Pipeline steps in the order they run. `Ord` follows declaration order, so a
/// `BTreeSet<Step>` iterates in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum Step {
    /// Find the company's Facebook page from its website
    Facebook,
    /// Read the like count of the discovered page
    Likes,
    /// Alexa traffic rank
    Alexa,
    /// Write the enriched columns back to the spreadsheet
    Sheet,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Facebook, Step::Likes, Step::Alexa, Step::Sheet];

    pub fn name(self) -> &'static str {
        match self {
            Step::Facebook => "facebook",
            Step::Likes => "likes",
            Step::Alexa => "alexa",
            Step::Sheet => "sheet",
        }
    }

    /// Key under which the step's last failure is kept in `RowRecord::errors`.
    pub fn error_key(self) -> Option<&'static str> {
        match self {
            Step::Facebook => Some("scrape"),
            Step::Likes => Some("likes"),
            Step::Alexa => Some("alexa"),
            Step::Sheet => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a row stands for one step. `Attempted` only exists inside a step's
/// row loop and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Succeeded,
    Failed,
}

/// Persisted enrichment state for one spreadsheet row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    pub row: u32,
    pub company: String,
    pub url: Option<String>,
    pub facebook: Option<String>,
    pub likes: Option<u64>,
    pub alexa_rank: Option<u64>,
    /// step error key -> last diagnostic
    pub errors: BTreeMap<String, String>,
}

impl RowRecord {
    /// Build the seed record for a sheet cell. `index` is 0-based within the
    /// data range.
    pub fn seeded(index: usize, company: &str, raw_url: &str) -> Self {
        let url = urlnorm::normalize(raw_url);
        let mut errors = BTreeMap::new();
        if url.is_none() {
            errors.insert("scrape".to_string(), INVALID_URL.to_string());
        }
        RowRecord {
            row: index as u32 + HEADER_OFFSET,
            company: company.trim().to_string(),
            url,
            errors,
            ..Default::default()
        }
    }

    pub fn error(&self, step: Step) -> Option<&str> {
        step.error_key()
            .and_then(|k| self.errors.get(k))
            .map(String::as_str)
    }

    pub fn has_value(&self, step: Step) -> bool {
        match step {
            Step::Facebook => self.facebook.is_some(),
            Step::Likes => self.likes.is_some(),
            Step::Alexa => self.alexa_rank.is_some(),
            Step::Sheet => false,
        }
    }

    pub fn state(&self, step: Step) -> StepState {
        if self.has_value(step) {
            StepState::Succeeded
        } else if self.error(step).is_some() {
            StepState::Failed
        } else {
            StepState::Pending
        }
    }
}
