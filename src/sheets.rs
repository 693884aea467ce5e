use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

const BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub type Result<T> = std::result::Result<T, SheetError>;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Sheets API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Bad column '{0}'")]
    BadColumn(String),
}

impl From<reqwest::Error> for SheetError {
    fn from(err: reqwest::Error) -> Self {
        SheetError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SheetError {
    fn from(err: serde_json::Error) -> Self {
        SheetError::Parse(err.to_string())
    }
}

/// Column-oriented spreadsheet access. Each range is one column; a column comes
/// back as its cells top to bottom, trailing empty cells cut off.
#[async_trait]
pub trait SheetClient: Send + Sync {
    async fn read_columns(&self, sheet_id: &str, ranges: &[String]) -> Result<Vec<Vec<String>>>;

    async fn write_columns(
        &self,
        sheet_id: &str,
        ranges: &[String],
        columns: &[Vec<String>],
    ) -> Result<()>;

    async fn sheet_titles(&self, sheet_id: &str) -> Result<Vec<String>>;

    /// Add a sheet with this title unless it exists. Returns whether one was
    /// created.
    async fn ensure_sheet(&self, sheet_id: &str, title: &str) -> Result<bool> {
        if self.sheet_titles(sheet_id).await?.iter().any(|t| t == title) {
            return Ok(false);
        }
        self.add_sheet(sheet_id, title).await?;
        Ok(true)
    }

    async fn add_sheet(&self, sheet_id: &str, title: &str) -> Result<()>;
}

/// Upper-cased column letters, or an error for anything that isn't one.
pub fn parse_column(raw: &str) -> Result<String> {
    let col = raw.trim().to_ascii_uppercase();
    if col.is_empty() || col.len() > 3 || !col.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(SheetError::BadColumn(raw.to_string()));
    }
    Ok(col)
}

/// A1 range on a named sheet, quoting the title so spaces and apostrophes
/// survive.
pub fn sheet_range(sheet: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), cells)
}

/// Data cells of one column, below the header row.
pub fn data_column(sheet: &str, column: &str) -> String {
    sheet_range(sheet, &format!("{}2:{}", column, column))
}

/// Whole column, header included.
pub fn full_column(sheet: &str, column: &str) -> String {
    sheet_range(sheet, &format!("{}:{}", column, column))
}

pub struct GoogleSheets {
    client: reqwest::Client,
    token: String,
}

impl GoogleSheets {
    pub fn new(token: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            token: token.to_string(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SheetError::Api {
                status: status.as_u16(),
                message: api_message(&body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SheetClient for GoogleSheets {
    async fn read_columns(&self, sheet_id: &str, ranges: &[String]) -> Result<Vec<Vec<String>>> {
        let mut query: Vec<(&str, &str)> = ranges.iter().map(|r| ("ranges", r.as_str())).collect();
        query.push(("majorDimension", "COLUMNS"));

        debug!(sheet_id, ?ranges, "values:batchGet");
        let resp = self
            .client
            .get(format!("{}/{}/values:batchGet", BASE_URL, sheet_id))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;
        let body = Self::check(resp).await?;
        parse_value_ranges(&body, ranges.len())
    }

    async fn write_columns(
        &self,
        sheet_id: &str,
        ranges: &[String],
        columns: &[Vec<String>],
    ) -> Result<()> {
        let data: Vec<Value> = ranges
            .iter()
            .zip(columns)
            .map(|(range, column)| {
                json!({
                    "range": range,
                    "majorDimension": "COLUMNS",
                    "values": [column],
                })
            })
            .collect();

        let resp = self
            .client
            .post(format!("{}/{}/values:batchUpdate", BASE_URL, sheet_id))
            .bearer_auth(&self.token)
            .json(&json!({ "valueInputOption": "USER_ENTERED", "data": data }))
            .send()
            .await?;
        let body = Self::check(resp).await?;
        info!(
            sheet_id,
            cells = body["totalUpdatedCells"].as_u64().unwrap_or(0),
            "values:batchUpdate done"
        );
        Ok(())
    }

    async fn sheet_titles(&self, sheet_id: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/{}", BASE_URL, sheet_id))
            .bearer_auth(&self.token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await?;
        let body = Self::check(resp).await?;
        Ok(parse_titles(&body))
    }

    async fn add_sheet(&self, sheet_id: &str, title: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/{}:batchUpdate", BASE_URL, sheet_id))
            .bearer_auth(&self.token)
            .json(&json!({ "requests": [{ "addSheet": { "properties": { "title": title } } }] }))
            .send()
            .await?;
        Self::check(resp).await?;
        info!(sheet_id, title, "Added sheet");
        Ok(())
    }
}

fn parse_value_ranges(body: &Value, expected: usize) -> Result<Vec<Vec<String>>> {
    let ranges = body["valueRanges"]
        .as_array()
        .ok_or_else(|| SheetError::Parse("missing valueRanges".into()))?;
    let mut columns: Vec<Vec<String>> = ranges
        .iter()
        .map(|vr| {
            vr["values"]
                .get(0)
                .and_then(Value::as_array)
                .map(|cells| cells.iter().map(cell_text).collect())
                .unwrap_or_default()
        })
        .collect();
    columns.resize(expected.max(columns.len()), Vec::new());
    Ok(columns)
}

fn parse_titles(body: &Value) -> Vec<String> {
    body["sheets"]
        .as_array()
        .map(|sheets| {
            sheets
                .iter()
                .filter_map(|s| s["properties"]["title"].as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| crate::fetch::truncate(body, 200))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_validated() {
        assert_eq!(parse_column(" c ").unwrap(), "C");
        assert!(parse_column("").is_err());
        assert!(parse_column("C2").is_err());
        assert!(parse_column("ABCD").is_err());
    }

    #[test]
    fn ranges_quote_sheet_titles() {
        assert_eq!(data_column("Leads", "C"), "'Leads'!C2:C");
        assert_eq!(full_column("Bob's list", "A"), "'Bob''s list'!A:A");
    }

    #[test]
    fn value_ranges_keep_request_order() {
        let body = json!({
            "spreadsheetId": "x",
            "valueRanges": [
                {"range": "'Leads'!A2:A1000", "majorDimension": "COLUMNS", "values": [["Acme", "", "Globex"]]},
                {"range": "'Leads'!C2:C1000", "majorDimension": "COLUMNS"}
            ]
        });
        let cols = parse_value_ranges(&body, 2).unwrap();
        assert_eq!(cols[0], vec!["Acme", "", "Globex"]);
        assert!(cols[1].is_empty());
    }

    #[test]
    fn missing_value_ranges_is_an_error() {
        assert!(parse_value_ranges(&json!({}), 1).is_err());
    }

    #[test]
    fn titles_and_api_messages() {
        let body = json!({"sheets": [
            {"properties": {"title": "Leads"}},
            {"properties": {"title": "AV Data"}}
        ]});
        assert_eq!(parse_titles(&body), vec!["Leads", "AV Data"]);
        assert_eq!(
            api_message(r#"{"error":{"code":403,"message":"The caller does not have permission"}}"#),
            "The caller does not have permission"
        );
        assert_eq!(api_message("gateway down"), "gateway down");
    }
}
