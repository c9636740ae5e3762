use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::{CellValue, RawRecord};

/// Logical field names looked up through alias tables.
pub mod field {
    pub const DATE: &str = "date";
    pub const CAMPAIGN: &str = "campaign";
    pub const RECORD_ID: &str = "record_id";
    pub const SOURCE_LABEL: &str = "source_label";
    pub const STAGE: &str = "stage";
    pub const SCORE: &str = "score";
    pub const AMOUNT: &str = "amount";
    pub const UTM_SOURCE: &str = "utm_source";
    pub const UTM_MEDIUM: &str = "utm_medium";
}

/// Ordered header aliases for one logical field. Earlier aliases win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAliases {
    pub field: String,
    pub aliases: Vec<String>,
}

impl ColumnAliases {
    pub fn new(field: &str, aliases: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Lowercases, trims and folds whitespace runs and dashes into `_`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('_');
            pending_sep = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Field to header resolution for one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    /// field -> normalized header
    resolved: BTreeMap<String, String>,
    /// normalized header -> first raw spelling seen
    raw_names: BTreeMap<String, String>,
}

impl ColumnMap {
    /// Resolves every field in `table` against the union of headers in `rows`.
    pub fn resolve(table: &[ColumnAliases], rows: &[RawRecord]) -> Self {
        let mut raw_names = BTreeMap::new();
        let headers: BTreeSet<&str> = rows.iter().flat_map(RawRecord::headers).collect();
        for header in headers {
            raw_names
                .entry(normalize_header(header))
                .or_insert_with(|| header.to_string());
        }

        let mut resolved = BTreeMap::new();
        for entry in table {
            let hit = entry
                .aliases
                .iter()
                .map(|alias| normalize_header(alias))
                .find(|alias| raw_names.contains_key(alias));
            if let Some(alias) = hit {
                resolved.insert(entry.field.clone(), alias);
            }
        }
        Self {
            resolved,
            raw_names,
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.resolved.contains_key(field)
    }

    /// Reads `field` from `row`, tolerating rows whose header spelling
    /// differs from the first one seen.
    pub fn cell<'r>(&self, row: &'r RawRecord, field: &str) -> Option<&'r CellValue> {
        let normalized = self.resolved.get(field)?;
        if let Some(raw) = self.raw_names.get(normalized) {
            if let Some(cell) = row.get(raw) {
                return Some(cell);
            }
        }
        row.cells()
            .find(|(header, _)| normalize_header(header) == *normalized)
            .map(|(_, cell)| cell)
    }

    /// field -> raw header, for diagnostics.
    pub fn resolved_headers(&self) -> BTreeMap<String, String> {
        self.resolved
            .iter()
            .map(|(field, normalized)| {
                let raw = self
                    .raw_names
                    .get(normalized)
                    .cloned()
                    .unwrap_or_else(|| normalized.clone());
                (field.clone(), raw)
            })
            .collect()
    }

    pub fn missing(&self, table: &[ColumnAliases]) -> Vec<String> {
        table
            .iter()
            .filter(|entry| !self.has(&entry.field))
            .map(|entry| entry.field.clone())
            .collect()
    }
}

/// Puts caller supplied aliases ahead of the built-in ones for the same field.
pub fn apply_overrides(table: &mut Vec<ColumnAliases>, overrides: &BTreeMap<String, Vec<String>>) {
    for (field, aliases) in overrides {
        match table.iter_mut().find(|entry| entry.field == *field) {
            Some(entry) => {
                let mut merged = aliases.clone();
                merged.extend(entry.aliases.iter().filter(|a| !aliases.contains(a)).cloned());
                entry.aliases = merged;
            }
            None => table.push(ColumnAliases {
                field: field.clone(),
                aliases: aliases.clone(),
            }),
        }
    }
}
