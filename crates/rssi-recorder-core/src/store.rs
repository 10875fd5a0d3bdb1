//! Workbook storage: named sheets of cell rows in a single file.
//!
//! # Storage Format
//!
//! The store is one JSON document:
//!
//! ```json
//! { "format": 1,
//!   "sheets": [ { "name": "Survey", "rows": [["location", "x"], ["p1", 1.0]] } ] }
//! ```
//!
//! Every write is a full snapshot. The new document is written to a temporary
//! file next to the target and renamed over it, so readers only ever see the
//! old or the new workbook.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// One table cell. Numbers stay numeric, everything else is text; an empty
/// string marks a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// A named sheet. The first row is the header when one is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }
}

/// All sheets of one store file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default = "default_format")]
    pub format: u32,
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

fn default_format() -> u32 {
    FORMAT_VERSION
}

impl Default for Workbook {
    fn default() -> Self {
        Self {
            format: FORMAT_VERSION,
            sheets: Vec::new(),
        }
    }
}

impl Workbook {
    /// Index of the sheet for `keyword`: the first sheet whose name contains
    /// it (case-insensitive), else the first sheet, else `None`.
    pub fn find_sheet(&self, keyword: &str) -> Option<usize> {
        let keyword = keyword.to_lowercase();
        self.sheets
            .iter()
            .position(|s| s.name.to_lowercase().contains(&keyword))
            .or_else(|| (!self.sheets.is_empty()).then_some(0))
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// What was found at the store path.
#[derive(Debug)]
pub enum LoadOutcome {
    Absent,
    Loaded(Workbook),
    /// The file exists but is not a workbook.
    Corrupt { reason: String },
}

/// File-backed workbook store.
#[derive(Debug, Clone)]
pub struct WorkbookStore {
    path: PathBuf,
}

impl WorkbookStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the workbook. I/O failures other than "not found" are errors;
    /// content that does not parse is reported as `Corrupt`.
    pub fn load(&self) -> Result<LoadOutcome> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Absent),
            Err(e) => return Err(Error::store_io(&self.path, e)),
        };

        match serde_json::from_slice::<Workbook>(&bytes) {
            Ok(wb) if wb.format <= FORMAT_VERSION => Ok(LoadOutcome::Loaded(wb)),
            Ok(wb) => Ok(LoadOutcome::Corrupt {
                reason: format!("unsupported format version {}", wb.format),
            }),
            Err(e) => Ok(LoadOutcome::Corrupt {
                reason: e.to_string(),
            }),
        }
    }

    /// Replace the store file with `workbook` in one rename.
    pub fn save(&self, workbook: &Workbook) -> Result<()> {
        let json = serde_json::to_vec_pretty(workbook)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| Error::store_io(&dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".rssi-recorder-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| Error::store_io(&dir, e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::store_io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::store_io(&self.path, e.error))?;
        Ok(())
    }

    /// Move an unreadable store aside as `<file>.corrupt-<timestamp>` and
    /// return the backup path.
    pub fn back_up_corrupt(&self) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{stamp}"));
        let backup = self.path.with_file_name(name);
        fs::rename(&self.path, &backup).map_err(|e| Error::store_io(&self.path, e))?;
        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workbook() -> Workbook {
        Workbook {
            format: FORMAT_VERSION,
            sheets: vec![
                Sheet {
                    name: "Notes".to_string(),
                    rows: vec![vec![Cell::text("free text")]],
                },
                Sheet {
                    name: "Survey".to_string(),
                    rows: vec![
                        vec![Cell::text("location"), Cell::text("x")],
                        vec![Cell::text("p1"), Cell::Number(1.5)],
                    ],
                },
            ],
        }
    }

    // -----------------------------------------------------------------------
    // Cells
    // -----------------------------------------------------------------------

    #[test]
    fn cell_json_shape() {
        let row = vec![Cell::text("a"), Cell::Number(-60.6), Cell::empty()];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"["a",-60.6,""]"#);
        let parsed: Vec<Cell> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, row);
    }

    #[test]
    fn cell_display() {
        assert_eq!(Cell::Number(-63.0).to_string(), "-63");
        assert_eq!(Cell::Number(2.5).to_string(), "2.5");
        assert_eq!(Cell::empty().to_string(), "");
        assert!(Cell::text("  ").is_empty());
        assert!(!Cell::Number(0.0).is_empty());
    }

    // -----------------------------------------------------------------------
    // Sheet lookup
    // -----------------------------------------------------------------------

    #[test]
    fn find_sheet_prefers_keyword() {
        let wb = sample_workbook();
        assert_eq!(wb.find_sheet("survey"), Some(1));
        assert_eq!(wb.find_sheet("SURV"), Some(1));
    }

    #[test]
    fn find_sheet_falls_back_to_first() {
        let wb = sample_workbook();
        assert_eq!(wb.find_sheet("calibration"), Some(0));
        assert_eq!(Workbook::default().find_sheet("survey"), None);
    }

    // -----------------------------------------------------------------------
    // File I/O
    // -----------------------------------------------------------------------

    #[test]
    fn load_missing_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WorkbookStore::new(tmp.path().join("nope.json"));
        assert!(matches!(store.load().unwrap(), LoadOutcome::Absent));
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WorkbookStore::new(tmp.path().join("nested/dir/store.json"));
        let wb = sample_workbook();
        store.save(&wb).unwrap();

        match store.load().unwrap() {
            LoadOutcome::Loaded(loaded) => assert_eq!(loaded, wb),
            other => panic!("expected workbook, got {other:?}"),
        }
        // Only the store itself remains; the temp file was renamed away.
        let entries: Vec<_> = std::fs::read_dir(tmp.path().join("nested/dir"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn garbage_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, b"PK\x03\x04 definitely not json").unwrap();
        let store = WorkbookStore::new(&path);
        assert!(matches!(store.load().unwrap(), LoadOutcome::Corrupt { .. }));
    }

    #[test]
    fn future_format_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, br#"{"format": 99, "sheets": []}"#).unwrap();
        let store = WorkbookStore::new(&path);
        assert!(matches!(store.load().unwrap(), LoadOutcome::Corrupt { .. }));
    }

    #[test]
    fn back_up_corrupt_moves_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");
        std::fs::write(&path, b"junk").unwrap();
        let store = WorkbookStore::new(&path);

        let backup = store.back_up_corrupt().unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read(&backup).unwrap(), b"junk");
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("store.json.corrupt-"), "{name}");
    }
}
