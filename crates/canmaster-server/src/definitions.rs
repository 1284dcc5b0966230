//! Definition Registry (C2): a read-mostly arbitration-ID → definition map,
//! loaded once from a CSV export at start-up.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use canmaster_core::model::Definition;

/// The CSV file could not be opened or read at all. Distinct from a
/// per-row parse failure, which is logged and skipped per §4.2.
#[derive(Debug)]
pub struct DefinitionsError(String);

impl fmt::Display for DefinitionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to load definitions CSV: {}", self.0)
    }
}

impl std::error::Error for DefinitionsError {}

/// Number of leading rows (CSV metadata + header) skipped before data rows.
const HEADER_ROWS: usize = 6;
/// Minimum column count a data row must have to be considered.
const MIN_COLUMNS: usize = 16;

/// Read-mostly map from decimal arbitration ID to [`Definition`]. Readers
/// never take a lock — the registry is immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    by_id: HashMap<u32, Definition>,
}

impl DefinitionRegistry {
    /// An empty registry (used when no CSV path is configured).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from already-parsed definitions, e.g. ones loaded
    /// back from the persistence layer's `message_definitions` table.
    #[must_use]
    pub fn from_definitions(definitions: Vec<Definition>) -> Self {
        Self { by_id: definitions.into_iter().map(|d| (d.id_dec, d)).collect() }
    }

    /// Load definitions from a CSV export, per §4.2's column layout.
    /// Per-row failures are logged at `warn` and skipped; a partial
    /// registry is an acceptable outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionsError`] only if the file itself can't be opened
    /// or read — never for a malformed individual row.
    pub fn load_from_csv(path: impl AsRef<Path>) -> Result<Self, DefinitionsError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path.as_ref())
            .map_err(|e| DefinitionsError(e.to_string()))?;

        let mut by_id = HashMap::new();
        for (row_idx, record) in reader.records().enumerate() {
            if row_idx < HEADER_ROWS {
                continue;
            }
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(row = row_idx, error = %e, "skipping unreadable definitions row");
                    continue;
                }
            };
            match parse_row(&record) {
                Ok(def) => {
                    by_id.insert(def.id_dec, def);
                }
                Err(reason) => {
                    tracing::warn!(row = row_idx, reason, "skipping malformed definitions row");
                }
            }
        }

        Ok(Self { by_id })
    }

    /// The human-readable name for a decoded frame's arbitration ID, or
    /// `None` if the registry has no entry for it.
    #[must_use]
    pub fn name_for(&self, id_dec: u32) -> Option<&str> {
        self.by_id.get(&id_dec).map(|d| d.name.as_str())
    }

    /// All definitions, sorted by decimal arbitration ID, for handing to an
    /// operator on connect or on `GET_DEFINITIONS`.
    #[must_use]
    pub fn all(&self) -> Vec<Definition> {
        let mut defs: Vec<Definition> = self.by_id.values().cloned().collect();
        defs.sort_by_key(|d| d.id_dec);
        defs
    }
}

fn parse_row(record: &csv::StringRecord) -> Result<Definition, &'static str> {
    if record.len() < MIN_COLUMNS {
        return Err("fewer than 16 columns");
    }
    let category = record.get(1).ok_or("missing category column")?.to_string();
    let id_hex = record.get(3).ok_or("missing id column")?.trim().to_string();
    if !id_hex.starts_with("0x") && !id_hex.starts_with("0X") {
        return Err("id column is not 0x-prefixed");
    }
    let id_dec =
        u32::from_str_radix(id_hex.trim_start_matches("0x").trim_start_matches("0X"), 16)
            .map_err(|_| "id column is not valid hex")?;
    let dlc = record.get(4).and_then(|s| s.trim().parse::<u8>().ok()).unwrap_or(8);
    let name = record.get(14).ok_or("missing name column")?.to_string();
    let description = record.get(15).ok_or("missing description column")?.to_string();

    Ok(Definition { id_dec, id_hex, name, dlc, category, description })
}
