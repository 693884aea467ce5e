mod alexa;
mod collection;
mod config;
mod db;
mod fetch;
mod parser;
mod pipeline;
mod record;
mod seed;
mod sheets;
mod steps;
mod urlnorm;

#[cfg(test)]
mod testutil;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use crate::alexa::{AwisClient, RankProvider};
use crate::collection::CollectionMode;
use crate::config::{FetcherKind, Settings};
use crate::db::SqliteStore;
use crate::fetch::{BrowserlessFetcher, HttpFetcher, PageFetcher, ScrapingHubFetcher, SpiderFetcher};
use crate::pipeline::{format_duration, Job, Pipeline, Resources};
use crate::record::Step;
use crate::sheets::{GoogleSheets, SheetClient};
use crate::steps::LikesPolicy;

#[derive(Parser)]
#[command(name = "lead_vetter", about = "Enrich a spreadsheet of company URLs with Facebook and Alexa data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Google spreadsheet id
    #[arg(long)]
    sheet_id: String,
    /// Sheet (tab) holding the companies
    #[arg(long)]
    sheet: String,
    /// Collection to use instead of the one derived from the sheet
    #[arg(long)]
    collection: Option<String>,
}

impl Target {
    fn collection_name(&self) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| collection::collection_name(&self.sheet_id, &self.sheet))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read the URL column and create one record per row
    Seed {
        #[command(flatten)]
        target: Target,
        /// Column letter holding the URLs
        #[arg(long)]
        url_column: String,
        /// Column letter holding the company names
        #[arg(long, default_value = "A")]
        company_column: String,
        /// Seed into a new collection if this sheet's collection exists
        #[arg(long, conflicts_with = "drop")]
        fresh: bool,
        /// Delete the existing collection before seeding
        #[arg(long)]
        drop: bool,
    },
    /// Run enrichment steps over a seeded collection
    Run {
        #[command(flatten)]
        target: Target,
        /// Steps to run (default: all), always in pipeline order
        #[arg(long, value_enum, value_delimiter = ',')]
        steps: Vec<Step>,
        /// Redo rows that already have a value
        #[arg(long)]
        fetch_all: bool,
        /// Store 0 likes when a page shows no count
        #[arg(long)]
        likes_zero_default: bool,
    },
    /// Per-step progress for a collection
    Stats {
        #[command(flatten)]
        target: Target,
    },
    /// Remove rows whose company appears earlier in the collection
    Dedupe {
        #[command(flatten)]
        target: Target,
    },
    /// List known collections
    Collections,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let store = SqliteStore::open(&settings.db_path)?;

    match cli.command {
        Commands::Seed {
            target,
            url_column,
            company_column,
            fresh,
            drop,
        } => {
            let mode = if fresh {
                CollectionMode::Fresh
            } else if drop {
                CollectionMode::Drop
            } else {
                CollectionMode::Reuse
            };
            let name = collection::resolve(&store, &target.collection_name(), mode)?;
            store.register_collection(&name, &target.sheet_id, &target.sheet)?;

            let source = seed::SeedSource {
                sheet_id: target.sheet_id.clone(),
                sheet_name: target.sheet.clone(),
                url_column: sheets::parse_column(&url_column)?,
                company_column: Some(sheets::parse_column(&company_column)?),
            };
            let client = google_sheets(&settings)?;
            let report = seed::seed(client.as_ref(), &store, &name, &source).await?;

            println!("Collection: {}", name);
            println!(
                "Seeded {} rows ({} already present, {} invalid URLs, {} blank cells)",
                report.seeded, report.existing, report.invalid, report.blank
            );
        }
        Commands::Run {
            target,
            steps,
            fetch_all,
            likes_zero_default,
        } => {
            let collection = target.collection_name();
            if !store.collection_exists(&collection)? {
                bail!("No collection '{}'. Run 'seed' first.", collection);
            }
            let steps: BTreeSet<Step> = if steps.is_empty() {
                Step::ALL.into()
            } else {
                steps.into_iter().collect()
            };

            let needs_fetcher = steps.contains(&Step::Facebook) || steps.contains(&Step::Likes);
            let resources = Resources {
                store: Box::new(store),
                fetcher: needs_fetcher.then(|| build_fetcher(&settings)).transpose()?,
                ranks: steps.contains(&Step::Alexa).then(|| awis(&settings)).transpose()?,
                sheets: steps.contains(&Step::Sheet).then(|| google_sheets(&settings)).transpose()?,
            };
            let policy = if likes_zero_default {
                LikesPolicy::ZeroDefault
            } else {
                LikesPolicy::Strict
            };

            println!("Running {:?} on {}", steps.iter().map(|s| s.name()).collect::<Vec<_>>(), collection);
            let pipeline = Pipeline::new(resources, settings.run_options(fetch_all, policy));
            let job = Job {
                collection,
                sheet_id: target.sheet_id,
            };
            let summary = pipeline.run(&job, &steps).await?;
            summary.print();
        }
        Commands::Stats { target } => {
            let collection = target.collection_name();
            let stats = store.step_stats(&collection)?;
            println!("Collection: {}", collection);
            println!("{:<9} {:>7} {:>7} {:>7} {:>7}", "Step", "Total", "Done", "Failed", "Pending");
            println!("{}", "-".repeat(41));
            for s in stats {
                println!(
                    "{:<9} {:>7} {:>7} {:>7} {:>7}",
                    s.step.name(),
                    s.total,
                    s.succeeded,
                    s.failed,
                    s.pending
                );
            }
        }
        Commands::Dedupe { target } => {
            let collection = target.collection_name();
            let removed = store.remove_duplicates(&collection)?;
            println!("Removed {} duplicate rows from {}", removed, collection);
        }
        Commands::Collections => {
            let rows = store.list_collections()?;
            if rows.is_empty() {
                println!("No collections. Run 'seed' first.");
            }
            for c in rows {
                println!(
                    "{:<40} {:>6} rows  {} / {}  ({})",
                    c.name, c.records, c.sheet_id, c.sheet_name, c.created_at
                );
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn build_fetcher(settings: &Settings) -> anyhow::Result<Arc<dyn PageFetcher>> {
    let fetcher: Arc<dyn PageFetcher> = match settings.fetcher {
        FetcherKind::Http => Arc::new(HttpFetcher::new()?),
        FetcherKind::Browserless => Arc::new(BrowserlessFetcher::new(
            &settings.browserless_url,
            settings.browserless_token.as_deref(),
        )?),
        FetcherKind::Spider => {
            let key = required(&settings.spider_key, "VETTER_SPIDER_KEY")?;
            Arc::new(SpiderFetcher::new(key)?)
        }
        FetcherKind::ScrapingHub => Arc::new(ScrapingHubFetcher::new(
            required(&settings.scrapinghub_key, "VETTER_SCRAPINGHUB_KEY")?,
            required(&settings.scrapinghub_project, "VETTER_SCRAPINGHUB_PROJECT")?,
            required(&settings.scrapinghub_spider, "VETTER_SCRAPINGHUB_SPIDER")?,
            settings.poll_policy(),
        )?),
    };
    tracing::info!(fetcher = fetcher.name(), "Page fetcher ready");
    Ok(fetcher)
}

fn awis(settings: &Settings) -> anyhow::Result<Arc<dyn RankProvider>> {
    let key = required(&settings.awis_key, "VETTER_AWIS_KEY")?;
    Ok(Arc::new(AwisClient::new(key)?))
}

fn google_sheets(settings: &Settings) -> anyhow::Result<Arc<dyn SheetClient>> {
    let token = required(&settings.sheets_token, "VETTER_SHEETS_TOKEN")?;
    Ok(Arc::new(GoogleSheets::new(token)?))
}

fn required<'a>(value: &'a Option<String>, var: &str) -> anyhow::Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} is not set", var))
}
