//! `rssi-recorder show`: print a tool's table from the store.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rssi_recorder_core::{MergeEngine, RecorderConfig, TableView, ToolVariant};

/// Run the show command.
pub fn run(tool: &str, store: Option<&str>, config: Option<&str>) -> anyhow::Result<()> {
    let variant: ToolVariant = tool.parse()?;
    let path = match store {
        Some(store) => PathBuf::from(store),
        None => {
            RecorderConfig::load(variant, config.map(Path::new))
                .context("failed to load configuration")?
                .store_path
        }
    };

    let engine = MergeEngine::new(&path, variant);
    match engine
        .read_table()
        .with_context(|| format!("cannot read {}", path.display()))?
    {
        Some(view) => {
            println!("{}: sheet '{}' ({} rows)", path.display(), view.sheet, view.rows.len());
            println!();
            print!("{}", render_table(&view));
        }
        None => println!("No {variant} table in {}", path.display()),
    }
    Ok(())
}

/// Lay the table out in left-aligned columns, header first.
fn render_table(view: &TableView) -> String {
    let width = view
        .rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(view.columns.len()))
        .max()
        .unwrap_or(0);

    let mut cells: Vec<Vec<String>> = Vec::with_capacity(view.rows.len() + 1);
    cells.push(view.columns.clone());
    cells.extend(
        view.rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect()),
    );

    let mut widths = vec![0usize; width];
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in &cells {
        let line: Vec<String> = (0..width)
            .map(|i| {
                let cell = row.get(i).map_or("", String::as_str);
                format!("{cell:<w$}", w = widths[i])
            })
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rssi_recorder_core::Cell;

    #[test]
    fn table_is_aligned() {
        let view = TableView {
            sheet: "Survey".to_string(),
            columns: vec!["location".to_string(), "X1".to_string()],
            rows: vec![
                vec![Cell::text("a"), Cell::Number(-61.25)],
                vec![Cell::text("hall-2"), Cell::empty()],
            ],
        };
        assert_eq!(
            render_table(&view),
            "location  X1\na         -61.25\nhall-2\n"
        );
    }

    #[test]
    fn missing_store_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("none.json");
        run("survey", Some(path.to_str().unwrap()), None).unwrap();
    }
}
