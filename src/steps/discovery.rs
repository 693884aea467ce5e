use tracing::{debug, info, warn};

use super::{progress_bar, Result, StepContext, StepReport};
use crate::db::{RowFilter, RowPatch};
use crate::fetch::PageFetcher;
use crate::parser::first_facebook_link;
use crate::record::{Step, INVALID_URL};

const NO_LINK: &str = "No Facebook link found";

/// Find each row's Facebook page from its website. Fetch and parse failures
/// stay on the row; only store errors end the step.
pub async fn run(ctx: &StepContext<'_>, fetcher: &dyn PageFetcher) -> Result<StepReport> {
    let opts = ctx.options;
    let rows = ctx
        .store
        .find(ctx.collection, &RowFilter::for_step(Step::Facebook, opts.fetch_all))?;
    let mut report = StepReport::new(Step::Facebook, rows.len());
    info!(rows = rows.len(), fetcher = fetcher.name(), "Facebook discovery");

    let pb = progress_bar(rows.len(), Step::Facebook, opts.show_progress);
    for record in &rows {
        pb.inc(1);
        let Some(url) = record.url.as_deref() else {
            ctx.store
                .upsert(ctx.collection, record.row, &RowPatch::failed(Step::Facebook, INVALID_URL))?;
            report.invalid += 1;
            continue;
        };

        if opts.recycle_every > 0 && report.attempted > 0 && report.attempted % opts.recycle_every == 0 {
            if let Err(e) = fetcher.recycle().await {
                warn!(error = %e, "Fetcher recycle failed");
            }
        }
        report.attempted += 1;

        let patch = match fetcher.fetch(url, opts.fetch_timeout).await {
            Ok(html) => match first_facebook_link(&html) {
                Some(facebook) => {
                    debug!(row = record.row, facebook = %facebook, "Found page");
                    report.succeeded += 1;
                    RowPatch::facebook(facebook)
                }
                None => {
                    report.failed += 1;
                    RowPatch::failed(Step::Facebook, NO_LINK)
                }
            },
            Err(e) => {
                warn!(row = record.row, url, error = %e, "Fetch failed");
                report.failed += 1;
                RowPatch::failed(Step::Facebook, e.to_string())
            }
        };
        ctx.store.upsert(ctx.collection, record.row, &patch)?;
    }
    pb.finish_and_clear();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RowStore, SqliteStore};
    use crate::pipeline::RunOptions;
    use crate::record::RowRecord;
    use crate::testutil::{test_options, MockFetcher, Reply};

    fn page(fb: &str) -> Reply {
        Reply::page(&format!(r#"<html><body><a href="{}">fb</a></body></html>"#, fb))
    }

    fn store_with(urls: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for (i, u) in urls.iter().enumerate() {
            store
                .insert("c", &RowRecord::seeded(i, &format!("Co {}", i), u))
                .unwrap();
        }
        store
    }

    fn ctx<'a>(store: &'a SqliteStore, options: &'a RunOptions) -> StepContext<'a> {
        StepContext { store, collection: "c", options }
    }

    #[tokio::test]
    async fn failures_stay_on_their_row() {
        let store = store_with(&["a.com", "b.com", "c.com", "d.com"]);
        let fetcher = MockFetcher::new()
            .with("http://a.com", page("https://facebook.com/alpha"))
            .with("http://b.com", Reply::Timeout)
            .with("http://c.com", Reply::page("<p>no links here</p>"))
            .with("http://d.com", page("https://www.facebook.com/delta"));
        let opts = test_options();

        let report = run(&ctx(&store, &opts), &fetcher).await.unwrap();
        assert_eq!((report.attempted, report.succeeded, report.failed), (4, 2, 2));

        let rows = store.find("c", &RowFilter::all()).unwrap();
        assert_eq!(rows[0].facebook.as_deref(), Some("https://facebook.com/alpha"));
        assert_eq!(rows[1].error(Step::Facebook), Some("Timed out"));
        assert_eq!(rows[2].error(Step::Facebook), Some(NO_LINK));
        assert_eq!(rows[3].facebook.as_deref(), Some("https://www.facebook.com/delta"));
    }

    #[tokio::test]
    async fn resume_skips_found_pages() {
        let store = store_with(&["a.com", "b.com"]);
        let fetcher = MockFetcher::new()
            .with("http://a.com", page("https://facebook.com/alpha"))
            .with("http://b.com", page("https://facebook.com/beta"));
        let opts = test_options();
        run(&ctx(&store, &opts), &fetcher).await.unwrap();
        let first = store.find("c", &RowFilter::all()).unwrap();

        fetcher.clear_calls();
        fetcher.set("http://a.com", page("https://facebook.com/changed"));
        let report = run(&ctx(&store, &opts), &fetcher).await.unwrap();

        assert_eq!(report.selected, 0);
        assert!(fetcher.calls().is_empty());
        assert_eq!(store.find("c", &RowFilter::all()).unwrap(), first);
    }

    #[tokio::test]
    async fn fetch_all_rescans_every_row() {
        let store = store_with(&["a.com"]);
        store.upsert("c", 2, &RowPatch::facebook("facebook.com/old")).unwrap();
        let fetcher = MockFetcher::new().with("http://a.com", page("https://facebook.com/new"));
        let opts = RunOptions { fetch_all: true, ..test_options() };

        run(&ctx(&store, &opts), &fetcher).await.unwrap();
        let row = &store.find("c", &RowFilter::all()).unwrap()[0];
        assert_eq!(row.facebook.as_deref(), Some("https://facebook.com/new"));
    }

    #[tokio::test]
    async fn invalid_rows_are_never_fetched() {
        let store = store_with(&["sales@acme.io", "b.com"]);
        let fetcher = MockFetcher::new().with("http://b.com", page("https://facebook.com/beta"));
        let opts = test_options();

        let report = run(&ctx(&store, &opts), &fetcher).await.unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(fetcher.calls(), vec!["http://b.com".to_string()]);
        let rows = store.find("c", &RowFilter::all()).unwrap();
        assert_eq!(rows[0].error(Step::Facebook), Some(INVALID_URL));
    }

    #[tokio::test]
    async fn rerun_refetches_only_failed_rows() {
        let urls: Vec<String> = (1..=10).map(|i| format!("u{}.com", i)).collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let store = store_with(&refs);

        let fetcher = MockFetcher::new();
        for i in 1..=10 {
            let reply = if [2, 5, 9].contains(&i) {
                Reply::Status(503)
            } else {
                page(&format!("https://facebook.com/co{}", i))
            };
            fetcher.set(&format!("http://u{}.com", i), reply);
        }
        let opts = test_options();
        let first = run(&ctx(&store, &opts), &fetcher).await.unwrap();
        assert_eq!((first.succeeded, first.failed), (7, 3));

        for (i, row) in store.find("c", &RowFilter::all()).unwrap().iter().enumerate() {
            if [2, 5, 9].contains(&(i + 1)) {
                assert_eq!(row.facebook, None);
                assert_eq!(row.error(Step::Facebook), Some("HTTP status 503"));
            } else {
                assert_eq!(row.facebook, Some(format!("https://facebook.com/co{}", i + 1)));
                assert_eq!(row.error(Step::Facebook), None);
            }
        }

        fetcher.clear_calls();
        let report = run(&ctx(&store, &opts), &fetcher).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(
            fetcher.calls(),
            vec!["http://u2.com", "http://u5.com", "http://u9.com"]
        );
    }

    #[tokio::test]
    async fn fetcher_is_recycled_on_schedule() {
        let urls: Vec<String> = (1..=25).map(|i| format!("u{}.com", i)).collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let store = store_with(&refs);
        let fetcher = MockFetcher::new();
        let opts = RunOptions { recycle_every: 10, ..test_options() };

        run(&ctx(&store, &opts), &fetcher).await.unwrap();
        assert_eq!(fetcher.recycles(), 2);
    }
}
