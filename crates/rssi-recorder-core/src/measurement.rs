//! The durable row written for every completed window.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::context::{CollectionContext, ToolVariant};
use crate::schema::TableSchema;
use crate::stats::Reduction;
use crate::store::Cell;

/// Timestamp layout of the `recorded_at` column.
pub const RECORDED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Context metadata plus rounded per-source means for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub variant: ToolVariant,
    /// Values for the variant's fixed columns, in column order.
    pub context: Vec<Cell>,
    /// Source id to mean rounded to two decimals. Empty for calibration rows,
    /// whose single mean lives in `context`.
    pub readings: BTreeMap<String, f64>,
    /// Every source seen this window, with or without samples.
    pub observed_sources: BTreeSet<String>,
}

impl MeasurementRow {
    /// Build the row for a closed window. Returns `None` when the reduction
    /// has nothing for the context to record.
    pub fn build(
        context: &CollectionContext,
        reduction: &Reduction,
        observed_sources: &BTreeSet<String>,
        recorded_at: DateTime<Local>,
    ) -> Option<Self> {
        let summary = reduction.summary.as_ref()?;
        let stamp = Cell::text(recorded_at.format(RECORDED_AT_FORMAT).to_string());

        let row = match context {
            CollectionContext::Point {
                source_filter,
                distance_m,
                note,
            } => {
                let stats = reduction.per_source.get(source_filter)?;
                Self {
                    variant: ToolVariant::Calibration,
                    context: vec![
                        Cell::text(source_filter.as_str()),
                        Cell::Number(*distance_m),
                        Cell::Number(stats.rounded_mean()),
                        note.as_deref().map_or_else(Cell::empty, Cell::text),
                        stamp,
                    ],
                    readings: BTreeMap::new(),
                    observed_sources: BTreeSet::from([source_filter.clone()]),
                }
            }
            CollectionContext::Survey { location, x, y, z } => {
                let readings: BTreeMap<String, f64> = reduction
                    .per_source
                    .iter()
                    .map(|(id, s)| (id.clone(), s.rounded_mean()))
                    .collect();
                let mut observed = observed_sources.clone();
                observed.extend(readings.keys().cloned());
                Self {
                    variant: ToolVariant::Survey,
                    context: vec![
                        Cell::text(location.as_str()),
                        Cell::Number(*x),
                        Cell::Number(*y),
                        Cell::Number(*z),
                        Cell::Number(summary.samples as f64),
                        stamp,
                    ],
                    readings,
                    observed_sources: observed,
                }
            }
        };
        Some(row)
    }

    /// Sources that should have a column after this row is merged.
    pub fn column_sources(&self) -> impl Iterator<Item = &str> {
        self.observed_sources
            .iter()
            .map(String::as_str)
            .filter(|_| self.variant.has_source_columns())
    }

    fn reading_for(&self, column: &str) -> Option<f64> {
        self.readings.get(column).copied().or_else(|| {
            self.readings
                .iter()
                .find(|(id, _)| id.eq_ignore_ascii_case(column))
                .map(|(_, v)| *v)
        })
    }

    /// Lay the row out under `schema`: context cells, then one cell per
    /// source column (empty where this window had no reading).
    pub fn to_cells(&self, schema: &TableSchema) -> Vec<Cell> {
        let mut cells = self.context.clone();
        cells.extend(schema.source_columns().iter().map(|column| {
            self.reading_for(column)
                .map_or_else(Cell::empty, Cell::Number)
        }));
        cells
    }
}
