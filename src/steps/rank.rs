use tracing::{debug, info, warn};

use super::{progress_bar, Result, StepContext, StepError, StepReport};
use crate::alexa::{RankEntry, RankProvider, MAX_BATCH};
use crate::db::{RowFilter, RowPatch};
use crate::record::Step;

const MISSING: &str = "missing from provider response";

/// Look up traffic ranks in provider-sized batches. Entry `i` of a reply
/// belongs to URL `i` of the request.
pub async fn run(ctx: &StepContext<'_>, ranks: &dyn RankProvider) -> Result<StepReport> {
    let opts = ctx.options;
    let rows = ctx
        .store
        .find(ctx.collection, &RowFilter::for_step(Step::Alexa, opts.fetch_all))?;
    let mut report = StepReport::new(Step::Alexa, rows.len());
    let batch_size = opts.rank_batch_size.clamp(1, MAX_BATCH);
    info!(rows = rows.len(), batch_size, "Alexa rank");

    let pb = progress_bar(rows.len(), Step::Alexa, opts.show_progress);
    for batch in rows.chunks(batch_size) {
        let urls: Vec<String> = batch
            .iter()
            .map(|r| r.url.clone().unwrap_or_default())
            .collect();
        report.attempted += batch.len();

        match ranks.url_info(&urls).await {
            Ok(reply) => {
                let mut entries = reply.into_vec().into_iter();
                for record in batch {
                    let patch = match entries.next() {
                        Some(entry) => entry_patch(entry),
                        None => RowPatch::failed(Step::Alexa, MISSING),
                    };
                    if patch.alexa_rank.is_some() {
                        report.succeeded += 1;
                    } else {
                        debug!(row = record.row, patch = ?patch.error, "No rank");
                        report.failed += 1;
                    }
                    ctx.store.upsert(ctx.collection, record.row, &patch)?;
                }
            }
            Err(e) if e.is_rate_limit() => {
                pb.abandon();
                report.attempted -= batch.len();
                warn!(error = %e, "Rate limited, stopping rank lookups");
                return Err(StepError::RateLimited {
                    step: Step::Alexa,
                    message: e.to_string(),
                    report,
                });
            }
            Err(e) => {
                warn!(error = %e, rows = batch.len(), "Rank batch failed");
                let message = e.to_string();
                for record in batch {
                    ctx.store
                        .upsert(ctx.collection, record.row, &RowPatch::failed(Step::Alexa, &message))?;
                }
                report.failed += batch.len();
            }
        }

        pb.inc(batch.len() as u64);
        tokio::time::sleep(opts.throttle).await;
    }
    pb.finish_and_clear();
    Ok(report)
}

fn entry_patch(entry: RankEntry) -> RowPatch {
    match entry {
        RankEntry::Ranked { url, rank } => match parse_rank(&rank) {
            Ok(n) => RowPatch::alexa_rank(n),
            Err(message) => {
                debug!(url = %url, rank = %rank, "Unusable rank");
                RowPatch::failed(Step::Alexa, message)
            }
        },
        RankEntry::Failed { code, message } => {
            debug!(code, "Provider rejected URL");
            RowPatch::failed(Step::Alexa, message)
        }
    }
}

/// Ranks are positive; the provider sends them as text, sometimes with
/// separators, and leaves them blank for unranked sites.
fn parse_rank(raw: &str) -> std::result::Result<u64, String> {
    let digits: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if digits.is_empty() {
        return Err("no rank reported".into());
    }
    match digits.parse::<u64>() {
        Ok(0) | Err(_) => Err(format!("unparseable rank '{}'", raw.trim())),
        Ok(n) => Ok(n),
    }
}
