//! Inspection commands: `jh list`, `jh query`, `jh purge`, `jh export`.
//!
//! Read-only apart from `purge`. Output goes to stdout; diagnostics go
//! through `tracing` on stderr.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use tracing::info;

use job_harvest_core::models::TableName;
use job_harvest_core::store::{QueryResult, RecordStore, TableRows};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Cells of this column are shortened in `jh query` output.
const LONG_COLUMN: &str = "job_description";
const TRUNCATE_AT: usize = 80;

pub async fn run_list(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let tables = store.list_tables().await?;
    println!("Tables in the database:");
    for t in &tables {
        println!("- {}", t);
    }
    Ok(())
}

pub async fn run_query(config: &Config, table: &str, limit: usize) -> Result<()> {
    let table = TableName::parse(table)?;
    let store = SqliteStore::connect(config).await?;
    match store.query(&table, limit).await? {
        QueryResult::Found(rows) => {
            print!("{}", render_grid(&truncate_long_cells(rows)));
            Ok(())
        }
        QueryResult::NotFound => bail!("table not found: {}", table),
    }
}

pub async fn run_purge(config: &Config, table: &str) -> Result<()> {
    let table = TableName::parse(table)?;
    let store = SqliteStore::connect(config).await?;
    store.purge(&table).await?;
    println!("Table '{}' has been purged.", table);
    Ok(())
}

/// Export formats for `jh export`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

pub async fn run_export(
    config: &Config,
    table: &str,
    format: ExportFormat,
    out: Option<&Path>,
) -> Result<()> {
    let table = TableName::parse(table)?;
    let store = SqliteStore::connect(config).await?;
    let rows = match store.dump(&table).await? {
        QueryResult::Found(rows) => rows,
        QueryResult::NotFound => bail!("table not found: {}", table),
    };

    let mut buf = Vec::new();
    match format {
        ExportFormat::Csv => write_csv(&rows, &mut buf)?,
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut buf, &rows_as_objects(&rows))?;
            buf.push(b'\n');
        }
    }

    match out {
        Some(path) => {
            std::fs::write(path, &buf)
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            info!(%table, rows = rows.rows.len(), path = %path.display(), "exported table");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&buf)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn write_csv<W: Write>(rows: &TableRows, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&rows.columns)?;
    for row in &rows.rows {
        writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

fn rows_as_objects(rows: &TableRows) -> Vec<Value> {
    rows.rows
        .iter()
        .map(|row| {
            let obj: Map<String, Value> = rows
                .columns
                .iter()
                .zip(row)
                .map(|(col, cell)| {
                    let v = cell.as_ref().map(|s| Value::String(s.clone())).unwrap_or(Value::Null);
                    (col.clone(), v)
                })
                .collect();
            Value::Object(obj)
        })
        .collect()
}

/// Shorten `s` to `max` characters plus `...` when longer.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn truncate_long_cells(mut rows: TableRows) -> TableRows {
    if let Some(idx) = rows.columns.iter().position(|c| c == LONG_COLUMN) {
        for row in &mut rows.rows {
            if let Some(Some(cell)) = row.get_mut(idx) {
                *cell = truncate_chars(cell, TRUNCATE_AT);
            }
        }
    }
    rows
}

/// Render `rows` as a box-drawn grid. Cells may span several lines.
pub fn render_grid(rows: &TableRows) -> String {
    let ncols = rows.columns.len();
    let cell_lines = |cell: &Option<String>| -> Vec<String> {
        match cell {
            Some(s) if !s.is_empty() => s.lines().map(|l| l.to_string()).collect(),
            _ => vec![String::new()],
        }
    };

    let header: Vec<Vec<String>> = rows.columns.iter().map(|c| vec![c.clone()]).collect();
    let body: Vec<Vec<Vec<String>>> = rows
        .rows
        .iter()
        .map(|r| (0..ncols).map(|i| cell_lines(&r.get(i).cloned().flatten())).collect())
        .collect();

    let mut widths = vec![0usize; ncols];
    for row in std::iter::once(&header).chain(body.iter()) {
        for (i, cell) in row.iter().enumerate() {
            for line in cell {
                widths[i] = widths[i].max(line.chars().count());
            }
        }
    }

    let rule = |left: &str, fill: &str, mid: &str, right: &str| -> String {
        let segs: Vec<String> = widths.iter().map(|w| fill.repeat(w + 2)).collect();
        format!("{}{}{}\n", left, segs.join(mid), right)
    };
    let render_row = |row: &Vec<Vec<String>>| -> String {
        let height = row.iter().map(|c| c.len()).max().unwrap_or(1);
        let mut out = String::new();
        for line_no in 0..height {
            out.push('│');
            for (i, cell) in row.iter().enumerate() {
                let text = cell.get(line_no).map(String::as_str).unwrap_or("");
                let pad = widths[i] - text.chars().count();
                out.push(' ');
                out.push_str(text);
                out.push_str(&" ".repeat(pad));
                out.push_str(" │");
            }
            out.push('\n');
        }
        out
    };

    let mut out = rule("╒", "═", "╤", "╕");
    out.push_str(&render_row(&header));
    if body.is_empty() {
        out.push_str(&rule("╘", "═", "╧", "╛"));
        return out;
    }
    out.push_str(&rule("╞", "═", "╪", "╡"));
    for (i, row) in body.iter().enumerate() {
        out.push_str(&render_row(row));
        if i + 1 < body.len() {
            out.push_str(&rule("├", "─", "┼", "┤"));
        }
    }
    out.push_str(&rule("╘", "═", "╧", "╛"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableRows {
        TableRows {
            columns: vec!["job_id".into(), "job_description".into()],
            rows: vec![
                vec![Some("1".into()), Some("x".repeat(100))],
                vec![Some("22".into()), None],
            ],
        }
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("short", 80), "short");
        assert_eq!(truncate_chars(&"a".repeat(80), 80), "a".repeat(80));
        assert_eq!(truncate_chars(&"a".repeat(81), 80), format!("{}...", "a".repeat(80)));
        assert_eq!(truncate_chars("ééééé", 3), "ééé...");
    }

    #[test]
    fn only_description_is_truncated() {
        let mut rows = sample();
        rows.rows[0][0] = Some("k".repeat(100));
        let t = truncate_long_cells(rows);
        assert_eq!(t.rows[0][0].as_ref().unwrap().len(), 100);
        assert_eq!(t.rows[0][1].as_ref().unwrap().chars().count(), 83);
        assert_eq!(t.rows[1][1], None);
    }

    #[test]
    fn grid_has_borders_and_aligned_rows() {
        let rows = TableRows {
            columns: vec!["job_id".into(), "job_title".into()],
            rows: vec![
                vec![Some("1".into()), Some("Engineer".into())],
                vec![Some("22".into()), Some("PM".into())],
            ],
        };
        let grid = render_grid(&rows);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines[0], "╒════════╤═══════════╕");
        assert_eq!(lines[1], "│ job_id │ job_title │");
        assert_eq!(lines[2], "╞════════╪═══════════╡");
        assert_eq!(lines[3], "│ 1      │ Engineer  │");
        assert_eq!(lines[4], "├────────┼───────────┤");
        assert_eq!(lines[5], "│ 22     │ PM        │");
        assert_eq!(lines[6], "╘════════╧═══════════╛");
    }

    #[test]
    fn multiline_cells_expand_rows() {
        let rows = TableRows {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Some("x".into()), Some("one\ntwo".into())]],
        };
        let grid = render_grid(&rows);
        assert!(grid.contains("│ x │ one │\n│   │ two │\n"));
    }

    #[test]
    fn empty_result_renders_header_only() {
        let rows = TableRows {
            columns: vec!["a".into()],
            rows: vec![],
        };
        assert_eq!(render_grid(&rows), "╒═══╕\n│ a │\n╘═══╛\n");
    }

    #[test]
    fn csv_export_writes_header_and_blank_nulls() {
        let mut buf = Vec::new();
        write_csv(&sample(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("job_id,job_description"));
        assert!(lines.next().unwrap().starts_with("1,xxxx"));
        assert_eq!(lines.next(), Some("22,"));
    }

    #[test]
    fn json_export_keys_by_column() {
        let objs = rows_as_objects(&sample());
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0]["job_id"], "1");
        assert!(objs[1]["job_description"].is_null());
    }
}
