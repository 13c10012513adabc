// Static reference data: administrative-division codes to names
//
// Loaded once at startup from CSV files (one file per table, columns
// "code" and "name"), read-only afterward. Refreshing swaps the whole
// set behind an Arc so concurrent jobs never observe a half-updated
// table.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("lookup table {table}: missing required column {column}")]
    MissingColumn { table: String, column: String },
}

/// An immutable set of code-to-name lookup tables.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    tables: HashMap<String, HashMap<String, String>>,
}

impl LookupTables {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `*.csv` file in a directory; the file stem names the
    /// table ("changwat.csv" becomes table "changwat").
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let mut tables = Self::empty();

        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let table = stem.to_lowercase();
            let file = std::fs::File::open(&path)?;
            tables.load_csv(&table, file)?;
        }

        Ok(tables)
    }

    /// Load one table from CSV with `code` and `name` columns.
    pub fn load_csv(&mut self, table: &str, reader: impl Read) -> Result<(), LoadError> {
        let mut csv_reader = csv::Reader::from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let find = |column: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column))
                .ok_or_else(|| LoadError::MissingColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                })
        };
        let code_idx = find("code")?;
        let name_idx = find("name")?;

        let mut entries = HashMap::new();
        for result in csv_reader.records() {
            let record = result?;
            let code = record.get(code_idx).unwrap_or("").trim();
            let name = record.get(name_idx).unwrap_or("").trim();
            if code.is_empty() {
                continue;
            }
            entries.insert(code.to_string(), name.to_string());
        }

        self.tables.insert(table.to_lowercase(), entries);
        Ok(())
    }

    /// Resolve a code against a table. `None` for an unknown table or
    /// an unknown code; the caller decides whether that is a warning.
    pub fn resolve(&self, table: &str, code: &str) -> Option<&str> {
        self.tables
            .get(table)?
            .get(code.trim())
            .map(|s| s.as_str())
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    pub fn entry_count(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }
}

/// Shared handle over the current lookup table set.
///
/// Readers take an `Arc` snapshot and hold no lock while resolving;
/// `reload` swaps the whole set in one pointer assignment.
pub struct LookupService {
    inner: RwLock<Arc<LookupTables>>,
}

impl LookupService {
    pub fn new(tables: LookupTables) -> Self {
        Self {
            inner: RwLock::new(Arc::new(tables)),
        }
    }

    /// Snapshot of the current table set. A job takes one snapshot for
    /// its whole run, so a mid-run reload never changes its view.
    pub fn current(&self) -> Arc<LookupTables> {
        self.inner
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Replace the whole table set atomically.
    pub fn reload(&self, tables: LookupTables) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Arc::new(tables);
        }
    }

    pub fn reload_dir(&self, dir: impl AsRef<Path>) -> Result<(), LoadError> {
        let tables = LookupTables::load_dir(dir)?;
        self.reload(tables);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGWAT_CSV: &str = "code,name\n10,Bangkok\n50,Chiang Mai\n90,Songkhla\n";

    fn sample_tables() -> LookupTables {
        let mut tables = LookupTables::empty();
        tables
            .load_csv("changwat", CHANGWAT_CSV.as_bytes())
            .unwrap();
        tables
    }

    #[test]
    fn test_resolve_known_code() {
        let tables = sample_tables();
        assert_eq!(tables.resolve("changwat", "50"), Some("Chiang Mai"));
        assert_eq!(tables.resolve("changwat", " 10 "), Some("Bangkok"));
    }

    #[test]
    fn test_resolve_unknown_code_or_table() {
        let tables = sample_tables();
        assert_eq!(tables.resolve("changwat", "99"), None);
        assert_eq!(tables.resolve("amphur", "10"), None);
    }

    #[test]
    fn test_load_csv_missing_column() {
        let mut tables = LookupTables::empty();
        let err = tables
            .load_csv("changwat", "id,label\n1,x\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn { .. }));
    }

    #[test]
    fn test_csv_headers_case_insensitive() {
        let mut tables = LookupTables::empty();
        tables
            .load_csv("amphur", "Code,Name\n5001,Mueang Chiang Mai\n".as_bytes())
            .unwrap();
        assert_eq!(
            tables.resolve("amphur", "5001"),
            Some("Mueang Chiang Mai")
        );
    }

    #[test]
    fn test_service_swap_is_atomic_for_held_snapshots() {
        let service = LookupService::new(sample_tables());
        let before = service.current();

        let mut replacement = LookupTables::empty();
        replacement
            .load_csv("changwat", "code,name\n10,Krung Thep\n".as_bytes())
            .unwrap();
        service.reload(replacement);

        // The held snapshot still resolves with the old data.
        assert_eq!(before.resolve("changwat", "10"), Some("Bangkok"));
        // A fresh snapshot sees the new set.
        assert_eq!(
            service.current().resolve("changwat", "10"),
            Some("Krung Thep")
        );
        assert_eq!(service.current().resolve("changwat", "50"), None);
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("changwat.csv"), CHANGWAT_CSV).unwrap();
        std::fs::write(
            dir.path().join("amphur.csv"),
            "code,name\n5001,Mueang Chiang Mai\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tables = LookupTables::load_dir(dir.path()).unwrap();
        assert_eq!(tables.table_names().len(), 2);
        assert_eq!(tables.entry_count(), 4);
        assert_eq!(tables.resolve("changwat", "90"), Some("Songkhla"));
    }
}
