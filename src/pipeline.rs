use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::alexa::RankProvider;
use crate::db::RowStore;
use crate::fetch::PageFetcher;
use crate::record::Step;
use crate::sheets::SheetClient;
use crate::steps::{self, LikesPolicy, StepContext, StepError, StepReport};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Re-run steps on rows that already hold a value.
    pub fetch_all: bool,
    pub likes_policy: LikesPolicy,
    pub fetch_timeout: Duration,
    /// Pause between rank batches and between likes groups.
    pub throttle: Duration,
    pub rank_batch_size: usize,
    pub likes_batch_size: usize,
    /// Recycle the page fetcher after this many fetched rows; 0 never does.
    pub recycle_every: usize,
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            fetch_all: false,
            likes_policy: LikesPolicy::Strict,
            fetch_timeout: Duration::from_secs(10),
            throttle: Duration::from_millis(500),
            rank_batch_size: 5,
            likes_batch_size: 5,
            recycle_every: 10,
            show_progress: false,
        }
    }
}

/// Collaborators the runner owns for the length of a run. Only the ones the
/// requested steps use need to be present.
pub struct Resources {
    pub store: Box<dyn RowStore>,
    pub fetcher: Option<Arc<dyn PageFetcher>>,
    pub ranks: Option<Arc<dyn RankProvider>>,
    pub sheets: Option<Arc<dyn SheetClient>>,
}

pub struct Job {
    pub collection: String,
    pub sheet_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Halt {
    pub step: Step,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub steps: Vec<StepReport>,
    pub halted: Option<Halt>,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "\nRun started {} ({})",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            format_duration(self.elapsed)
        );
        for report in &self.steps {
            println!("  {}", report);
        }
        if let Some(halt) = &self.halted {
            println!("\nHalted during {}: {}", halt.step, halt.reason);
            println!("Rerun the same command to resume.");
        }
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

pub struct Pipeline {
    resources: Resources,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(resources: Resources, options: RunOptions) -> Self {
        Pipeline { resources, options }
    }

    pub fn store(&self) -> &dyn RowStore {
        self.resources.store.as_ref()
    }

    fn check_resources(&self, steps: &BTreeSet<Step>) -> Result<()> {
        for step in steps {
            let present = match step {
                Step::Facebook | Step::Likes => self.resources.fetcher.is_some(),
                Step::Alexa => self.resources.ranks.is_some(),
                Step::Sheet => self.resources.sheets.is_some(),
            };
            if !present {
                bail!("The {} step needs a collaborator that isn't configured", step);
            }
        }
        Ok(())
    }

    /// Run the enabled steps in pipeline order. A provider rate limit ends the
    /// run early with `halted` set; store and spreadsheet failures are errors.
    pub async fn run(&self, job: &Job, steps: &BTreeSet<Step>) -> Result<RunSummary> {
        self.check_resources(steps)?;

        let started_at = Utc::now();
        let start = Instant::now();
        let ctx = StepContext {
            store: self.store(),
            collection: &job.collection,
            options: &self.options,
        };

        let mut summary = RunSummary {
            started_at,
            elapsed: Duration::ZERO,
            steps: Vec::new(),
            halted: None,
        };

        for &step in steps {
            info!(step = step.name(), collection = %job.collection, "Starting step");
            match self.run_step(&ctx, job, step).await {
                Ok(report) => summary.steps.push(report),
                Err(StepError::RateLimited { step, message, report }) => {
                    warn!(step = step.name(), reason = %message, "Run halted");
                    summary.steps.push(report);
                    summary.halted = Some(Halt { step, reason: message });
                    break;
                }
                Err(e) => return Err(anyhow::Error::new(e).context(format!("{} step failed", step))),
            }
        }

        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    async fn run_step(&self, ctx: &StepContext<'_>, job: &Job, step: Step) -> steps::Result<StepReport> {
        let missing = || StepError::Store(anyhow::anyhow!("no collaborator for {}", step));
        match step {
            Step::Facebook => {
                let fetcher = self.resources.fetcher.as_deref().ok_or_else(missing)?;
                steps::discovery::run(ctx, fetcher).await
            }
            Step::Likes => {
                let fetcher = self.resources.fetcher.as_deref().ok_or_else(missing)?;
                steps::likes::run(ctx, fetcher).await
            }
            Step::Alexa => {
                let ranks = self.resources.ranks.as_deref().ok_or_else(missing)?;
                steps::rank::run(ctx, ranks).await
            }
            Step::Sheet => {
                let sheets = self.resources.sheets.as_deref().ok_or_else(missing)?;
                steps::writeback::run(ctx, sheets, &job.sheet_id).await
            }
        }
    }
}
