//! Table schema: fixed context columns followed by discovered source columns.
//!
//! Columns are only ever added. New source columns are merged into the
//! source block at their sorted position, and existing rows are remapped by
//! column name so each value stays under its original header.

use crate::context::ToolVariant;
use crate::store::Cell;

/// Ordered column set of one tool's sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    variant: ToolVariant,
    source_columns: Vec<String>,
}

impl TableSchema {
    /// Schema with only the fixed columns of `variant`.
    pub fn new(variant: ToolVariant) -> Self {
        Self {
            variant,
            source_columns: Vec::new(),
        }
    }

    /// Parse an existing header row.
    ///
    /// The fixed columns must lead the row in order (names compared
    /// case-insensitively); otherwise the row is data rather than a header
    /// and `None` is returned. Every non-blank name after them is a source
    /// column, even one spelled like a fixed column.
    pub fn from_header(variant: ToolVariant, header: &[Cell]) -> Option<Self> {
        let names = header_names(header);
        let fixed = variant.fixed_columns();
        if !has_fixed_prefix(&names, fixed) {
            return None;
        }

        let mut source_columns: Vec<String> = Vec::new();
        for name in &names[fixed.len()..] {
            if name.is_empty() || source_columns.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                continue;
            }
            source_columns.push(name.to_string());
        }
        Some(Self {
            variant,
            source_columns,
        })
    }

    pub fn variant(&self) -> ToolVariant {
        self.variant
    }

    pub fn source_columns(&self) -> &[String] {
        &self.source_columns
    }

    /// Full column order: fixed columns, then source columns.
    pub fn columns(&self) -> Vec<String> {
        self.variant
            .fixed_columns()
            .iter()
            .map(|c| c.to_string())
            .chain(self.source_columns.iter().cloned())
            .collect()
    }

    pub fn header_cells(&self) -> Vec<Cell> {
        self.columns().into_iter().map(Cell::Text).collect()
    }

    /// Add every source in `observed` that has no column yet.
    ///
    /// Returns the grown schema and the names that were added, sorted.
    pub fn with_sources<'a>(
        &self,
        observed: impl IntoIterator<Item = &'a str>,
    ) -> (Self, Vec<String>) {
        let mut added: Vec<String> = observed
            .into_iter()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .filter(|id| {
                !self
                    .source_columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(id))
            })
            .map(str::to_string)
            .collect();
        added.sort();
        added.dedup();

        let mut source_columns = self.source_columns.clone();
        for id in &added {
            let at = source_columns
                .iter()
                .position(|c| c.as_str() > id.as_str())
                .unwrap_or(source_columns.len());
            source_columns.insert(at, id.clone());
        }

        (
            Self {
                variant: self.variant,
                source_columns,
            },
            added,
        )
    }
}

/// Rebuild `row`, laid out under `old_header`, in the column order of
/// `schema`.
///
/// Fixed columns are taken from their own positions at the front of the old
/// header. Source columns are looked up by name among the remaining
/// positions, exact spelling first. Columns missing from the old header
/// become empty cells. Cells the old header does not name (blank headers, or
/// cells past its end) are kept after the schema's columns so nothing is
/// lost.
pub fn remap_row(row: &[Cell], old_header: &[Cell], schema: &TableSchema) -> Vec<Cell> {
    let old_names = header_names(old_header);
    let fixed = schema.variant().fixed_columns();
    let fixed_len = if has_fixed_prefix(&old_names, fixed) {
        fixed.len()
    } else {
        0
    };

    let mut claimed = vec![false; old_names.len()];
    claimed[..fixed_len].fill(true);
    let mut used = vec![false; row.len()];
    let mut take = |position: Option<usize>| {
        match position.and_then(|i| row.get(i).map(|cell| (i, cell))) {
            Some((i, cell)) => {
                used[i] = true;
                cell.clone()
            }
            None => Cell::empty(),
        }
    };

    let mut out: Vec<Cell> = (0..fixed.len())
        .map(|i| take((i < fixed_len).then_some(i)))
        .collect();
    for column in schema.source_columns() {
        let free = |i: &usize| !claimed[*i] && !old_names[*i].is_empty();
        let position = (0..old_names.len())
            .filter(free)
            .find(|&i| old_names[i] == column.as_str())
            .or_else(|| {
                (0..old_names.len())
                    .filter(free)
                    .find(|&i| old_names[i].eq_ignore_ascii_case(column))
            });
        if let Some(i) = position {
            claimed[i] = true;
        }
        out.push(take(position));
    }

    out.extend(
        row.iter()
            .zip(used)
            .filter(|(cell, used)| !used && !cell.is_empty())
            .map(|(cell, _)| cell.clone()),
    );
    out
}

fn header_names(header: &[Cell]) -> Vec<&str> {
    header
        .iter()
        .map(|c| c.as_text().map_or("", str::trim))
        .collect()
}

fn has_fixed_prefix(names: &[&str], fixed: &[&str]) -> bool {
    names.len() >= fixed.len()
        && names
            .iter()
            .zip(fixed)
            .all(|(name, column)| name.eq_ignore_ascii_case(column))
}
