//! Merging measurement rows into the persisted workbook.
//!
//! Each merge is one load → reconcile → append → rewrite pass over the whole
//! store file, serialized by an in-process lock:
//!
//! 1. Load the workbook. A missing store starts empty; an unreadable one is
//!    moved aside to a `.corrupt-<timestamp>` backup and also starts empty.
//! 2. Pick the sheet: name contains the tool keyword, else the first sheet,
//!    else a new sheet.
//! 3. If the first row is not a header for this tool, insert one.
//! 4. Grow the schema with the row's sources and remap existing rows.
//! 5. Append the row and write the workbook back in one atomic replace.
//!    Other sheets are carried over untouched.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{info, warn};
use serde::Serialize;

use crate::context::ToolVariant;
use crate::error::Result;
use crate::measurement::MeasurementRow;
use crate::schema::{TableSchema, remap_row};
use crate::store::{Cell, LoadOutcome, Sheet, Workbook, WorkbookStore};

/// What a merge did to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub sheet: String,
    /// Data rows in the sheet after the merge, header excluded.
    pub rows: usize,
    pub columns: Vec<String>,
    pub added_columns: Vec<String>,
    /// A header row had to be synthesized for existing data.
    pub synthesized_header: bool,
    /// Backup of an unreadable store that was replaced by a fresh one.
    pub corrupt_backup: Option<PathBuf>,
}

/// A tool's sheet as read from the store, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub sheet: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Appends rows to one tool's sheet of a workbook store.
pub struct MergeEngine {
    store: WorkbookStore,
    variant: ToolVariant,
    lock: Mutex<()>,
}

impl MergeEngine {
    pub fn new(path: impl Into<PathBuf>, variant: ToolVariant) -> Self {
        Self {
            store: WorkbookStore::new(path),
            variant,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn variant(&self) -> ToolVariant {
        self.variant
    }

    /// Merge `row` into the store.
    pub fn merge(&self, row: &MeasurementRow) -> Result<MergeReport> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut workbook, corrupt_backup) = self.load_or_recover()?;
        let keyword = self.variant.sheet_keyword();
        let index = match workbook.find_sheet(keyword) {
            Some(i) => i,
            None => {
                workbook.sheets.push(Sheet::new(capitalize(keyword)));
                workbook.sheets.len() - 1
            }
        };
        let sheet = &mut workbook.sheets[index];

        let existing = sheet
            .rows
            .first()
            .and_then(|h| TableSchema::from_header(self.variant, h));
        let synthesized_header = existing.is_none();
        let schema = existing.unwrap_or_else(|| TableSchema::new(self.variant));
        let old_header = if synthesized_header {
            let header = schema.header_cells();
            sheet.rows.insert(0, header.clone());
            header
        } else {
            sheet.rows[0].clone()
        };
        if synthesized_header && sheet.rows.len() > 1 {
            warn!(
                "sheet '{}' in {} had no header; synthesized one above {} existing rows",
                sheet.name,
                self.store.path().display(),
                sheet.rows.len() - 1
            );
        }

        let (schema, added_columns) = schema.with_sources(row.column_sources());
        if !added_columns.is_empty() {
            info!(
                "sheet '{}' gains {} column(s): {}",
                sheet.name,
                added_columns.len(),
                added_columns.join(", ")
            );
        }

        let mut rows = Vec::with_capacity(sheet.rows.len() + 1);
        rows.push(schema.header_cells());
        rows.extend(
            sheet.rows[1..]
                .iter()
                .map(|r| remap_row(r, &old_header, &schema)),
        );
        rows.push(row.to_cells(&schema));
        sheet.rows = rows;

        let report = MergeReport {
            sheet: sheet.name.clone(),
            rows: sheet.rows.len() - 1,
            columns: schema.columns(),
            added_columns,
            synthesized_header,
            corrupt_backup,
        };

        self.store.save(&workbook)?;
        info!(
            "appended row {} to sheet '{}' in {}",
            report.rows,
            report.sheet,
            self.store.path().display()
        );
        Ok(report)
    }

    /// Read this tool's sheet without modifying anything.
    ///
    /// Returns `None` when the store or the sheet does not exist. An
    /// unreadable store is an empty view here; only `merge` backs it up.
    pub fn read_table(&self) -> Result<Option<TableView>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let workbook = match self.store.load()? {
            LoadOutcome::Loaded(wb) => wb,
            LoadOutcome::Absent => return Ok(None),
            LoadOutcome::Corrupt { reason } => {
                warn!("store {} is unreadable: {reason}", self.store.path().display());
                return Ok(None);
            }
        };
        let Some(index) = workbook.find_sheet(self.variant.sheet_keyword()) else {
            return Ok(None);
        };
        let sheet = &workbook.sheets[index];
        let (columns, rows) = match sheet
            .rows
            .first()
            .and_then(|h| TableSchema::from_header(self.variant, h))
        {
            Some(schema) => (
                schema.columns(),
                sheet.rows[1..]
                    .iter()
                    .map(|r| remap_row(r, &sheet.rows[0], &schema))
                    .collect(),
            ),
            None => (
                TableSchema::new(self.variant).columns(),
                sheet.rows.clone(),
            ),
        };
        Ok(Some(TableView {
            sheet: sheet.name.clone(),
            columns,
            rows,
        }))
    }

    fn load_or_recover(&self) -> Result<(Workbook, Option<PathBuf>)> {
        match self.store.load()? {
            LoadOutcome::Absent => Ok((Workbook::default(), None)),
            LoadOutcome::Loaded(wb) => Ok((wb, None)),
            LoadOutcome::Corrupt { reason } => {
                let backup = self.store.back_up_corrupt()?;
                warn!(
                    "store {} is unreadable ({reason}); moved it to {} and starting a fresh table",
                    self.store.path().display(),
                    backup.display()
                );
                Ok((Workbook::default(), Some(backup)))
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn survey_row(location: &str, readings: &[(&str, f64)]) -> MeasurementRow {
        let readings: BTreeMap<String, f64> = readings
            .iter()
            .map(|(id, v)| (id.to_string(), *v))
            .collect();
        MeasurementRow {
            variant: ToolVariant::Survey,
            context: vec![
                Cell::text(location),
                Cell::Number(0.0),
                Cell::Number(0.0),
                Cell::Number(0.0),
                Cell::Number(readings.len() as f64),
                Cell::text("2026-01-01 00:00:00"),
            ],
            observed_sources: readings.keys().cloned().collect::<BTreeSet<_>>(),
            readings,
        }
    }

    fn load(engine: &MergeEngine) -> Workbook {
        match engine.store.load().unwrap() {
            LoadOutcome::Loaded(wb) => wb,
            other => panic!("expected workbook, got {other:?}"),
        }
    }

    #[test]
    fn first_merge_creates_store() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = MergeEngine::new(tmp.path().join("survey.json"), ToolVariant::Survey);
        let report = engine.merge(&survey_row("p1", &[("X1", -71.0)])).unwrap();

        assert_eq!(report.sheet, "Survey");
        assert_eq!(report.rows, 1);
        assert_eq!(report.added_columns, ["X1"]);
        assert!(report.synthesized_header);
        assert!(report.corrupt_backup.is_none());

        let wb = load(&engine);
        assert_eq!(wb.sheets[0].rows.len(), 2);
    }

    #[test]
    fn columns_only_grow() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = MergeEngine::new(tmp.path().join("s.json"), ToolVariant::Survey);
        engine.merge(&survey_row("p1", &[("X3", -60.0)])).unwrap();
        let report = engine.merge(&survey_row("p2", &[("X1", -50.0)])).unwrap();

        assert_eq!(&report.columns[6..], ["X1", "X3"]);
        let wb = load(&engine);
        let rows = &wb.sheets[0].rows;
        // First row keeps its X3 value under the X3 header.
        assert_eq!(rows[1][6], Cell::empty());
        assert_eq!(rows[1][7], Cell::Number(-60.0));
        assert_eq!(rows[2][6], Cell::Number(-50.0));
        assert_eq!(rows[2][7], Cell::empty());
    }

    #[test]
    fn sources_spelled_like_fixed_columns_keep_their_values() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = MergeEngine::new(tmp.path().join("s.json"), ToolVariant::Survey);
        let at = |location: &str, x: f64, readings: &[(&str, f64)]| {
            let mut row = survey_row(location, readings);
            row.context[1] = Cell::Number(x);
            row
        };

        engine.merge(&at("p1", 7.0, &[("X", -50.0)])).unwrap();
        let report = engine.merge(&at("p2", 9.0, &[("A1", -60.0)])).unwrap();
        assert_eq!(&report.columns[6..], ["A1", "X"]);
        let report = engine
            .merge(&at("p3", 3.0, &[("X", -40.0), ("SAMPLES", -45.0)]))
            .unwrap();
        assert_eq!(&report.columns[6..], ["A1", "SAMPLES", "X"]);

        let rows = &load(&engine).sheets[0].rows;
        assert!(rows.iter().all(|r| r.len() == 9));
        // p1: x stays 7, X keeps -50.
        assert_eq!(rows[1][1], Cell::Number(7.0));
        assert_eq!(&rows[1][6..], &[Cell::empty(), Cell::empty(), Cell::Number(-50.0)]);
        // p2: nothing under SAMPLES or X.
        assert_eq!(rows[2][1], Cell::Number(9.0));
        assert_eq!(&rows[2][6..], &[Cell::Number(-60.0), Cell::empty(), Cell::empty()]);
        // p3: sample count and the SAMPLES source are separate cells.
        assert_eq!(rows[3][4], Cell::Number(2.0));
        assert_eq!(&rows[3][6..], &[
            Cell::empty(),
            Cell::Number(-45.0),
            Cell::Number(-40.0),
        ]);
    }

    #[test]
    fn other_sheets_are_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("book.json");
        let notes = Sheet {
            name: "Notes".to_string(),
            rows: vec![vec![Cell::text("keep me")]],
        };
        let survey = Sheet::new("Site survey");
        WorkbookStore::new(&path)
            .save(&Workbook {
                sheets: vec![notes.clone(), survey],
                ..Workbook::default()
            })
            .unwrap();

        let engine = MergeEngine::new(&path, ToolVariant::Survey);
        let report = engine.merge(&survey_row("p1", &[("X1", -1.0)])).unwrap();
        assert_eq!(report.sheet, "Site survey");

        let wb = load(&engine);
        assert_eq!(wb.sheets[0], notes);
        assert_eq!(wb.sheets[1].rows.len(), 2);
    }

    #[test]
    fn corrupt_store_is_backed_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("survey.json");
        std::fs::write(&path, b"{ this is not a workbook").unwrap();

        let engine = MergeEngine::new(&path, ToolVariant::Survey);
        let report = engine.merge(&survey_row("p1", &[("X1", -1.0)])).unwrap();

        let backup = report.corrupt_backup.unwrap();
        assert_eq!(std::fs::read(backup).unwrap(), b"{ this is not a workbook");
        assert_eq!(report.rows, 1);
    }

    #[test]
    fn read_table_returns_none_without_store() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = MergeEngine::new(tmp.path().join("x.json"), ToolVariant::Calibration);
        assert!(engine.read_table().unwrap().is_none());
    }

    #[test]
    fn capitalize_words() {
        assert_eq!(capitalize("survey"), "Survey");
        assert_eq!(capitalize(""), "");
    }
}
