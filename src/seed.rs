use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::db::RowStore;
use crate::record::RowRecord;
use crate::sheets::{self, SheetClient};

/// Where the company names and URLs live in the spreadsheet.
#[derive(Debug, Clone)]
pub struct SeedSource {
    pub sheet_id: String,
    pub sheet_name: String,
    pub url_column: String,
    pub company_column: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub seeded: usize,
    pub existing: usize,
    pub invalid: usize,
    pub blank: usize,
}

/// Create one record per non-blank URL cell. Rows already in the collection
/// are left alone, so seeding twice is harmless.
pub async fn seed(
    sheets: &dyn SheetClient,
    store: &dyn RowStore,
    collection: &str,
    source: &SeedSource,
) -> Result<SeedReport> {
    let mut ranges = vec![sheets::data_column(&source.sheet_name, &source.url_column)];
    if let Some(col) = &source.company_column {
        ranges.push(sheets::data_column(&source.sheet_name, col));
    }

    let mut columns = sheets
        .read_columns(&source.sheet_id, &ranges)
        .await
        .with_context(|| format!("Failed to read {}", ranges.join(", ")))?
        .into_iter();
    let urls = columns.next().unwrap_or_default();
    let companies = columns.next().unwrap_or_default();
    info!(collection, cells = urls.len(), "Read URL column");

    let mut report = SeedReport::default();
    for (index, raw) in urls.iter().enumerate() {
        if raw.trim().is_empty() {
            report.blank += 1;
            continue;
        }
        let company = companies.get(index).map(String::as_str).unwrap_or("");
        let record = RowRecord::seeded(index, company, raw);
        if record.url.is_none() {
            debug!(row = record.row, raw = %raw, "Invalid URL cell");
            report.invalid += 1;
        }
        if store.insert(collection, &record)? {
            report.seeded += 1;
        } else {
            report.existing += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RowFilter, SqliteStore};
    use crate::record::{Step, INVALID_URL};
    use crate::testutil::MockSheet;

    fn source() -> SeedSource {
        SeedSource {
            sheet_id: "1AbCdEfGhIjK".into(),
            sheet_name: "Leads".into(),
            url_column: "C".into(),
            company_column: Some("A".into()),
        }
    }

    fn sheet() -> MockSheet {
        MockSheet::new(&["Leads"])
            .with_column("'Leads'!C2:C", &["acme.io", "", "sales@globex.com", "initech.com, initech.net"])
            .with_column("'Leads'!A2:A", &["Acme", "Nobody", "Globex", "Initech"])
    }

    #[tokio::test]
    async fn rows_follow_sheet_positions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = seed(&sheet(), &store, "c", &source()).await.unwrap();
        assert_eq!(
            report,
            SeedReport { seeded: 3, existing: 0, invalid: 1, blank: 1 }
        );

        let rows = store.find("c", &RowFilter::all()).unwrap();
        let nums: Vec<u32> = rows.iter().map(|r| r.row).collect();
        assert_eq!(nums, vec![2, 4, 5]);
        assert_eq!(rows[0].company, "Acme");
        assert_eq!(rows[0].url.as_deref(), Some("http://acme.io"));
        assert_eq!(rows[1].url, None);
        assert_eq!(rows[1].error(Step::Facebook), Some(INVALID_URL));
        assert_eq!(rows[2].url.as_deref(), Some("http://initech.com"));
    }

    #[tokio::test]
    async fn reseeding_keeps_existing_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed(&sheet(), &store, "c", &source()).await.unwrap();
        store
            .upsert("c", 2, &crate::db::RowPatch::facebook("facebook.com/acme"))
            .unwrap();

        let again = seed(&sheet(), &store, "c", &source()).await.unwrap();
        assert_eq!(again.seeded, 0);
        assert_eq!(again.existing, 3);
        let acme = &store.find("c", &RowFilter::all()).unwrap()[0];
        assert_eq!(acme.facebook.as_deref(), Some("facebook.com/acme"));
    }

    #[tokio::test]
    async fn unreadable_sheet_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = seed(&MockSheet::failing(), &store, "c", &source()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
        assert!(store.find("c", &RowFilter::all()).unwrap().is_empty());
    }
}
