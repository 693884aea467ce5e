use tracing::info;

use super::{Result, StepContext, StepError, StepReport};
use crate::db::RowFilter;
use crate::record::{RowRecord, Step};
use crate::sheets::{self, SheetClient};

pub const OUTPUT_SHEET: &str = "AV Data";

const COLUMNS: [(&str, &str); 6] = [
    ("A", "Row"),
    ("B", "Company"),
    ("C", "URL"),
    ("D", "Facebook"),
    ("E", "Likes"),
    ("F", "Alexa"),
];

/// Write every row with a URL to the output sheet, one column per field,
/// headers in the first row and records in row order below.
pub async fn run(ctx: &StepContext<'_>, sheets: &dyn SheetClient, sheet_id: &str) -> Result<StepReport> {
    let rows = ctx.store.find(ctx.collection, &RowFilter::for_step(Step::Sheet, true))?;
    if rows.is_empty() {
        return Err(StepError::NothingToWrite(ctx.collection.to_string()));
    }

    if sheets.ensure_sheet(sheet_id, OUTPUT_SHEET).await? {
        info!(sheet = OUTPUT_SHEET, "Created output sheet");
    }

    let ranges: Vec<String> = COLUMNS
        .iter()
        .map(|(col, _)| sheets::full_column(OUTPUT_SHEET, col))
        .collect();
    let columns = columns(&rows);
    sheets.write_columns(sheet_id, &ranges, &columns).await?;
    info!(rows = rows.len(), sheet = OUTPUT_SHEET, "Wrote enriched columns");

    let mut report = StepReport::new(Step::Sheet, rows.len());
    report.attempted = rows.len();
    report.succeeded = rows.len();
    Ok(report)
}

fn columns(rows: &[RowRecord]) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = COLUMNS
        .iter()
        .map(|(_, header)| {
            let mut col = Vec::with_capacity(rows.len() + 1);
            col.push(header.to_string());
            col
        })
        .collect();
    for r in rows {
        let cells = [
            r.row.to_string(),
            r.company.clone(),
            r.url.clone().unwrap_or_default(),
            r.facebook.clone().unwrap_or_default(),
            r.likes.map(|n| n.to_string()).unwrap_or_default(),
            r.alexa_rank.map(|n| n.to_string()).unwrap_or_default(),
        ];
        for (col, cell) in out.iter_mut().zip(cells) {
            col.push(cell);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RowPatch, RowStore, SqliteStore};
    use crate::testutil::{test_options, MockSheet};

    #[tokio::test]
    async fn writes_dense_columns_in_row_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("c", &RowRecord::seeded(3, "Globex", "globex.com")).unwrap();
        store.insert("c", &RowRecord::seeded(0, "Acme", "acme.io")).unwrap();
        store.insert("c", &RowRecord::seeded(1, "Mailbox", "hi@mailbox.co")).unwrap();
        store.upsert("c", 2, &RowPatch::facebook("facebook.com/acme")).unwrap();
        store.upsert("c", 2, &RowPatch::likes(1200)).unwrap();
        store.upsert("c", 5, &RowPatch::alexa_rank(88)).unwrap();

        let sheet = MockSheet::new(&["Leads"]);
        let opts = test_options();
        let ctx = StepContext { store: &store, collection: "c", options: &opts };
        let report = run(&ctx, &sheet, "sheet-id").await.unwrap();
        assert_eq!(report.succeeded, 2);

        assert_eq!(sheet.titles(), vec!["Leads", OUTPUT_SHEET]);
        let writes = sheet.writes();
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[0], ("'AV Data'!A:A".to_string(), vec!["Row".into(), "2".into(), "5".into()]));
        assert_eq!(writes[2].1, vec!["URL", "http://acme.io", "http://globex.com"]);
        assert_eq!(writes[3].1, vec!["Facebook", "facebook.com/acme", ""]);
        assert_eq!(writes[4].1, vec!["Likes", "1200", ""]);
        assert_eq!(writes[5].1, vec!["Alexa", "", "88"]);
    }

    #[tokio::test]
    async fn existing_output_sheet_is_reused() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("c", &RowRecord::seeded(0, "Acme", "acme.io")).unwrap();
        let sheet = MockSheet::new(&["Leads", OUTPUT_SHEET]);
        let opts = test_options();
        let ctx = StepContext { store: &store, collection: "c", options: &opts };

        run(&ctx, &sheet, "sheet-id").await.unwrap();
        assert_eq!(sheet.titles().len(), 2);
    }

    #[tokio::test]
    async fn empty_collection_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let sheet = MockSheet::new(&[]);
        let opts = test_options();
        let ctx = StepContext { store: &store, collection: "c", options: &opts };

        let err = run(&ctx, &sheet, "sheet-id").await.unwrap_err();
        assert!(matches!(err, StepError::NothingToWrite(_)));
        assert!(sheet.writes().is_empty());
    }
}
