pub mod discovery;
pub mod likes;
pub mod rank;
pub mod writeback;

pub use likes::LikesPolicy;

use std::fmt;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::db::RowStore;
use crate::pipeline::RunOptions;
use crate::record::Step;
use crate::sheets::SheetError;

/// What a step needs besides its own collaborator.
pub struct StepContext<'a> {
    pub store: &'a dyn RowStore,
    pub collection: &'a str,
    pub options: &'a RunOptions,
}

#[derive(Debug, Error)]
pub enum StepError {
    /// The provider asked us to stop. Rows written before the signal stay
    /// written; `report` covers them.
    #[error("{step} halted by provider rate limit: {message}")]
    RateLimited {
        step: Step,
        message: String,
        report: StepReport,
    },

    #[error("No records to write for '{0}'")]
    NothingToWrite(String),

    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StepError>;

/// Row counts for one step run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: Step,
    /// Rows the filter picked.
    pub selected: usize,
    /// Rows handed to a collaborator.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows skipped for lack of a usable URL.
    pub invalid: usize,
}

impl StepReport {
    pub fn new(step: Step, selected: usize) -> Self {
        StepReport {
            step,
            selected,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            invalid: 0,
        }
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<9} selected {:>5} | attempted {:>5} | ok {:>5} | failed {:>5}",
            self.step.name(),
            self.selected,
            self.attempted,
            self.succeeded,
            self.failed
        )?;
        if self.invalid > 0 {
            write!(f, " | invalid {}", self.invalid)?;
        }
        Ok(())
    }
}

pub(crate) fn progress_bar(len: usize, step: Step, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:>9} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(step.name());
    pb
}
