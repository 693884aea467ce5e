use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::record::{RowRecord, Step, StepState};

/// Read/write contract the enrichment steps rely on. Rows come back ordered by
/// row number; writes are applied immediately, one row at a time.
pub trait RowStore {
    fn find(&self, collection: &str, filter: &RowFilter) -> Result<Vec<RowRecord>>;

    /// Insert a seed record unless the row already exists. Returns whether a
    /// record was created.
    fn insert(&self, collection: &str, record: &RowRecord) -> Result<bool>;

    /// Apply `patch` to a row, creating a bare record if the row is missing.
    fn upsert(&self, collection: &str, row: u32, patch: &RowPatch) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub with_url: bool,
    pub with_facebook: bool,
    /// Only rows that don't yet hold this step's value.
    pub missing: Option<Step>,
}

impl RowFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Rows a step should work on: every eligible row for a full re-scan,
    /// otherwise only the ones still missing the step's value.
    pub fn for_step(step: Step, fetch_all: bool) -> Self {
        let missing = if fetch_all || step == Step::Sheet {
            None
        } else {
            Some(step)
        };
        match step {
            // url-less rows stay in the set so they get annotated
            Step::Facebook => RowFilter {
                missing,
                ..Default::default()
            },
            Step::Likes => RowFilter {
                with_facebook: true,
                missing,
                ..Default::default()
            },
            Step::Alexa | Step::Sheet => RowFilter {
                with_url: true,
                missing,
                ..Default::default()
            },
        }
    }
}

/// Field changes for one row. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPatch {
    pub facebook: Option<String>,
    pub likes: Option<u64>,
    pub alexa_rank: Option<u64>,
    /// Set (`Some(msg)`) or clear (`None`) one step's error key.
    pub error: Option<(Step, Option<String>)>,
}

impl RowPatch {
    pub fn facebook(url: impl Into<String>) -> Self {
        RowPatch {
            facebook: Some(url.into()),
            error: Some((Step::Facebook, None)),
            ..Default::default()
        }
    }

    pub fn likes(count: u64) -> Self {
        RowPatch {
            likes: Some(count),
            error: Some((Step::Likes, None)),
            ..Default::default()
        }
    }

    pub fn alexa_rank(rank: u64) -> Self {
        RowPatch {
            alexa_rank: Some(rank),
            error: Some((Step::Alexa, None)),
            ..Default::default()
        }
    }

    pub fn failed(step: Step, message: impl Into<String>) -> Self {
        RowPatch {
            error: Some((step, Some(message.into()))),
            ..Default::default()
        }
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = SqliteStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let store = SqliteStore {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collections (
                name        TEXT PRIMARY KEY,
                sheet_id    TEXT NOT NULL,
                sheet_name  TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS records (
                id          INTEGER PRIMARY KEY,
                collection  TEXT NOT NULL,
                row_num     INTEGER NOT NULL,
                company     TEXT NOT NULL DEFAULT '',
                url         TEXT,
                facebook    TEXT,
                likes       INTEGER,
                alexa_rank  INTEGER,
                errors      TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at  TEXT,
                UNIQUE(collection, row_num)
            );
            CREATE INDEX IF NOT EXISTS idx_records_company ON records(collection, company);
            ",
        )?;
        Ok(())
    }

    // ── Collections ──

    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1
                 UNION SELECT 1 FROM records WHERE collection = ?1 LIMIT 1",
                [name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn register_collection(&self, name: &str, sheet_id: &str, sheet_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO collections (name, sheet_id, sheet_name) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, sheet_id, sheet_name],
        )?;
        Ok(())
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, c.sheet_id, c.sheet_name, c.created_at,
                    (SELECT COUNT(*) FROM records r WHERE r.collection = c.name)
             FROM collections c
             ORDER BY c.created_at, c.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CollectionInfo {
                    name: row.get(0)?,
                    sheet_id: row.get(1)?,
                    sheet_name: row.get(2)?,
                    created_at: row.get(3)?,
                    records: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn drop_collection(&self, name: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM records WHERE collection = ?1", [name])?;
        tx.execute("DELETE FROM collections WHERE name = ?1", [name])?;
        tx.commit()?;
        Ok(removed)
    }

    // ── Maintenance ──

    /// Delete records that share a company name with an earlier row, keeping
    /// the lowest row. Rows with a blank company are never touched.
    pub fn remove_duplicates(&self, collection: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM records
             WHERE collection = ?1
               AND company != ''
               AND row_num NOT IN (
                   SELECT MIN(row_num) FROM records
                   WHERE collection = ?1 AND company != ''
                   GROUP BY company
               )",
            [collection],
        )?;
        Ok(removed)
    }

    pub fn step_stats(&self, collection: &str) -> Result<Vec<StepStats>> {
        let records = self.find(collection, &RowFilter::all())?;
        let stats = [Step::Facebook, Step::Likes, Step::Alexa]
            .into_iter()
            .map(|step| {
                let mut s = StepStats {
                    step,
                    total: records.len(),
                    ..Default::default()
                };
                for r in &records {
                    match r.state(step) {
                        StepState::Pending => s.pending += 1,
                        StepState::Succeeded => s.succeeded += 1,
                        StepState::Failed => s.failed += 1,
                    }
                }
                s
            })
            .collect();
        Ok(stats)
    }
}

pub struct CollectionInfo {
    pub name: String,
    pub sheet_id: String,
    pub sheet_name: String,
    pub created_at: String,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepStats {
    pub step: Step,
    pub total: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Default for StepStats {
    fn default() -> Self {
        StepStats {
            step: Step::Facebook,
            total: 0,
            pending: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

// ── Records ──

struct RawRecord {
    row: u32,
    company: String,
    url: Option<String>,
    facebook: Option<String>,
    likes: Option<i64>,
    alexa_rank: Option<i64>,
    errors: String,
}

impl RawRecord {
    fn into_record(self) -> Result<RowRecord> {
        let errors: BTreeMap<String, String> = serde_json::from_str(&self.errors)
            .with_context(|| format!("Corrupt errors column on row {}", self.row))?;
        Ok(RowRecord {
            row: self.row,
            company: self.company,
            url: self.url,
            facebook: self.facebook,
            likes: self.likes.map(|n| n as u64),
            alexa_rank: self.alexa_rank.map(|n| n as u64),
            errors,
        })
    }
}

impl RowStore for SqliteStore {
    fn find(&self, collection: &str, filter: &RowFilter) -> Result<Vec<RowRecord>> {
        let mut conditions = vec!["collection = ?1".to_string()];
        if filter.with_url {
            conditions.push("url IS NOT NULL AND url != ''".into());
        }
        if filter.with_facebook {
            conditions.push("facebook IS NOT NULL AND facebook != ''".into());
        }
        match filter.missing {
            Some(Step::Facebook) => conditions.push("facebook IS NULL".into()),
            Some(Step::Likes) => conditions.push("likes IS NULL".into()),
            Some(Step::Alexa) => conditions.push("alexa_rank IS NULL".into()),
            Some(Step::Sheet) | None => {}
        }

        let sql = format!(
            "SELECT row_num, company, url, facebook, likes, alexa_rank, errors
             FROM records
             WHERE {}
             ORDER BY row_num",
            conditions.join(" AND ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map([collection], |row| {
                Ok(RawRecord {
                    row: row.get(0)?,
                    company: row.get(1)?,
                    url: row.get(2)?,
                    facebook: row.get(3)?,
                    likes: row.get(4)?,
                    alexa_rank: row.get(5)?,
                    errors: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawRecord::into_record).collect()
    }

    fn insert(&self, collection: &str, record: &RowRecord) -> Result<bool> {
        let errors = serde_json::to_string(&record.errors)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO records
             (collection, row_num, company, url, facebook, likes, alexa_rank, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                collection,
                record.row,
                record.company,
                record.url,
                record.facebook,
                record.likes.map(|n| n as i64),
                record.alexa_rank.map(|n| n as i64),
                errors,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn upsert(&self, collection: &str, row: u32, patch: &RowPatch) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO records (collection, row_num) VALUES (?1, ?2)",
            rusqlite::params![collection, row],
        )?;
        tx.execute(
            "UPDATE records
             SET facebook   = COALESCE(?3, facebook),
                 likes      = COALESCE(?4, likes),
                 alexa_rank = COALESCE(?5, alexa_rank),
                 updated_at = datetime('now')
             WHERE collection = ?1 AND row_num = ?2",
            rusqlite::params![
                collection,
                row,
                patch.facebook,
                patch.likes.map(|n| n as i64),
                patch.alexa_rank.map(|n| n as i64),
            ],
        )?;

        // merge into the JSON object so other steps' keys survive
        if let Some((step, message)) = &patch.error {
            if let Some(key) = step.error_key() {
                let path = format!("$.{}", key);
                match message {
                    Some(msg) => tx.execute(
                        "UPDATE records SET errors = json_set(errors, ?3, ?4)
                         WHERE collection = ?1 AND row_num = ?2",
                        rusqlite::params![collection, row, path, msg],
                    )?,
                    None => tx.execute(
                        "UPDATE records SET errors = json_remove(errors, ?3)
                         WHERE collection = ?1 AND row_num = ?2",
                        rusqlite::params![collection, row, path],
                    )?,
                };
            }
        }
        tx.commit()?;
        Ok(())
    }
}
