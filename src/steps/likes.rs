use std::time::Duration;

use tracing::{debug, info, warn};

use super::{progress_bar, Result, StepContext, StepError, StepReport};
use crate::db::{RowFilter, RowPatch};
use crate::fetch::{FetchError, PageFetcher};
use crate::parser::{extract_likes, page_url, widget_url};
use crate::record::Step;

/// How to treat a page that loads but shows no readable count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikesPolicy {
    /// Record an error on the row.
    #[default]
    Strict,
    /// Store 0 likes.
    ZeroDefault,
}

enum Failure {
    Row(String),
    RateLimited(String),
}

/// Read like counts for rows with a known Facebook page. Rows go in groups;
/// a group's results are written together once it completes, so a rate limit
/// leaves the interrupted group and everything after it untouched.
pub async fn run(ctx: &StepContext<'_>, fetcher: &dyn PageFetcher) -> Result<StepReport> {
    let opts = ctx.options;
    let rows = ctx
        .store
        .find(ctx.collection, &RowFilter::for_step(Step::Likes, opts.fetch_all))?;
    let mut report = StepReport::new(Step::Likes, rows.len());
    info!(rows = rows.len(), policy = ?opts.likes_policy, "Facebook likes");

    let pb = progress_bar(rows.len(), Step::Likes, opts.show_progress);
    for (i, group) in rows.chunks(opts.likes_batch_size.max(1)).enumerate() {
        if i > 0 && !opts.throttle.is_zero() {
            tokio::time::sleep(opts.throttle).await;
        }

        let mut patches = Vec::with_capacity(group.len());
        for record in group {
            let Some(facebook) = record.facebook.as_deref() else {
                continue;
            };
            if opts.recycle_every > 0 && report.attempted > 0 && report.attempted % opts.recycle_every == 0 {
                if let Err(e) = fetcher.recycle().await {
                    warn!(error = %e, "Fetcher recycle failed");
                }
            }
            report.attempted += 1;
            match like_count(fetcher, facebook, opts.fetch_timeout, opts.likes_policy).await {
                Ok(count) => {
                    debug!(row = record.row, count, "Likes");
                    patches.push((record.row, RowPatch::likes(count)));
                }
                Err(Failure::Row(message)) => {
                    warn!(row = record.row, facebook, error = %message, "No likes");
                    patches.push((record.row, RowPatch::failed(Step::Likes, message)));
                }
                Err(Failure::RateLimited(message)) => {
                    pb.abandon();
                    report.attempted -= patches.len() + 1;
                    warn!(row = record.row, group = i + 1, "Rate limited, stopping likes");
                    return Err(StepError::RateLimited {
                        step: Step::Likes,
                        message,
                        report,
                    });
                }
            }
        }

        for (row, patch) in &patches {
            ctx.store.upsert(ctx.collection, *row, patch)?;
            if patch.likes.is_some() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        pb.inc(group.len() as u64);
    }
    pb.finish_and_clear();
    Ok(report)
}

/// Widget first, then the page itself.
async fn like_count(
    fetcher: &dyn PageFetcher,
    facebook: &str,
    timeout: Duration,
    policy: LikesPolicy,
) -> std::result::Result<u64, Failure> {
    let widget = match fetcher.fetch(&widget_url(facebook), timeout).await {
        Ok(html) => match extract_likes(&html) {
            Some(count) => return Ok(count),
            None => None,
        },
        Err(FetchError::RateLimited(message)) => return Err(Failure::RateLimited(message)),
        Err(e) => Some(e),
    };

    let page = match fetcher.fetch(&page_url(facebook), timeout).await {
        Ok(html) => match extract_likes(&html) {
            Some(count) => return Ok(count),
            None => None,
        },
        Err(FetchError::RateLimited(message)) => return Err(Failure::RateLimited(message)),
        Err(e) => Some(e),
    };

    match (widget, page) {
        (Some(w), Some(p)) => Err(Failure::Row(format!("widget: {}; page: {}", w, p))),
        _ if policy == LikesPolicy::ZeroDefault => Ok(0),
        _ => Err(Failure::Row("No like count found".into())),
    }
}
