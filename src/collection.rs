use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::db::SqliteStore;

/// Fresh-name attempts stop here.
const NAME_LIMIT: u32 = 100;

/// What to do when a sheet's collection already holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionMode {
    /// Keep the existing records and resume on them.
    #[default]
    Reuse,
    /// Pick the next free `<name>_<n>`.
    Fresh,
    /// Delete the existing records and start over under the same name.
    Drop,
}

/// `<first 10 chars of sheet id>_<sheet name>`, with anything outside
/// `[A-Za-z0-9_]` replaced by `_`.
pub fn collection_name(sheet_id: &str, sheet_name: &str) -> String {
    let head: String = sheet_id.chars().take(10).collect();
    format!("{}_{}", head, sheet_name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Settle on the collection a seed should write into.
pub fn resolve(store: &SqliteStore, base: &str, mode: CollectionMode) -> Result<String> {
    if !store.collection_exists(base)? {
        return Ok(base.to_string());
    }
    match mode {
        CollectionMode::Reuse => {
            info!(collection = base, "Reusing existing collection");
            Ok(base.to_string())
        }
        CollectionMode::Drop => {
            let removed = store.drop_collection(base)?;
            warn!(collection = base, removed, "Dropped existing collection");
            Ok(base.to_string())
        }
        CollectionMode::Fresh => {
            for n in 2..NAME_LIMIT {
                let candidate = format!("{}_{}", base, n);
                if !store.collection_exists(&candidate)? {
                    info!(collection = %candidate, "Collection name taken, using next free name");
                    return Ok(candidate);
                }
            }
            bail!("Failed creating a unique collection name for '{}'", base)
        }
    }
}
