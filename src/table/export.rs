use std::fmt::Write as _;
use std::io::Write;

use anyhow::Context;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{ColumnDefinition, TabularReport};
use crate::format::{escape_html, strip_markup};

pub const EMPTY_TABLE_NOTICE: &str = "Nothing to display";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Markdown,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
        }
    }

    /// Whether cells are written as plain text rather than markup.
    pub fn is_text(self) -> bool {
        !matches!(self, ExportFormat::Html)
    }
}

/// Writes every row of `report` without pagination. Returns the row count.
pub fn write_export<R, W>(report: &R, format: ExportFormat, mut writer: W) -> anyhow::Result<usize>
where
    R: TabularReport,
    W: Write,
{
    let columns = report.table().columns();
    let rows: Vec<Vec<String>> = report
        .rows()
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let cell = report.format_cell(row, &column.key);
                    if format.is_text() {
                        strip_markup(&cell)
                    } else {
                        cell
                    }
                })
                .collect()
        })
        .collect();

    match format {
        ExportFormat::Csv => write_csv(&columns, &rows, &mut writer)?,
        ExportFormat::Json => write_json(&columns, &rows, &mut writer)?,
        ExportFormat::Markdown => {
            let output = build_markdown(report.table().caption(), &columns, &rows);
            writer.write_all(output.as_bytes())?;
        }
        ExportFormat::Html => {
            let output = build_html(report.table().caption(), &columns, &rows);
            writer.write_all(output.as_bytes())?;
        }
    }
    writer.flush().context("failed to flush export output")?;

    Ok(rows.len())
}

fn write_csv<W: Write>(
    columns: &[ColumnDefinition],
    rows: &[Vec<String>],
    writer: W,
) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(columns.iter().map(|column| column.header.as_str()))?;
    for row in rows {
        csv.write_record(row)?;
    }
    csv.flush()?;
    Ok(())
}

fn write_json<W: Write>(
    columns: &[ColumnDefinition],
    rows: &[Vec<String>],
    mut writer: W,
) -> anyhow::Result<()> {
    let records: Vec<Map<String, Value>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .zip(row)
                .map(|(column, cell)| (column.key.clone(), Value::String(cell.clone())))
                .collect()
        })
        .collect();
    serde_json::to_writer_pretty(&mut writer, &records)?;
    writeln!(writer)?;
    Ok(())
}

fn markdown_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

fn build_markdown(caption: &str, columns: &[ColumnDefinition], rows: &[Vec<String>]) -> String {
    let mut output = String::new();

    if !caption.is_empty() {
        let _ = writeln!(output, "# {}", caption);
        let _ = writeln!(output);
    }

    if rows.is_empty() {
        let _ = writeln!(output, "{}.", EMPTY_TABLE_NOTICE);
        return output;
    }

    let headers: Vec<String> = columns.iter().map(|c| markdown_cell(&c.header)).collect();
    let _ = writeln!(output, "| {} |", headers.join(" | "));
    let _ = writeln!(output, "|{}", " --- |".repeat(columns.len()));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|cell| markdown_cell(cell)).collect();
        let _ = writeln!(output, "| {} |", cells.join(" | "));
    }

    output
}

fn build_html(caption: &str, columns: &[ColumnDefinition], rows: &[Vec<String>]) -> String {
    let mut output = String::new();
    let title = escape_html(caption);

    let _ = writeln!(output, "<!DOCTYPE html>");
    let _ = writeln!(output, "<html>");
    let _ = writeln!(output, "<head><meta charset=\"utf-8\"><title>{}</title></head>", title);
    let _ = writeln!(output, "<body>");
    let _ = writeln!(output, "<table>");
    let _ = writeln!(output, "<thead><tr>");
    for column in columns {
        let _ = writeln!(output, "<th>{}</th>", escape_html(&column.header));
    }
    let _ = writeln!(output, "</tr></thead>");
    let _ = writeln!(output, "<tbody>");
    for row in rows {
        let _ = write!(output, "<tr>");
        for cell in row {
            let _ = write!(output, "<td>{}</td>", cell);
        }
        let _ = writeln!(output, "</tr>");
    }
    let _ = writeln!(output, "</tbody>");
    let _ = writeln!(output, "</table>");
    let _ = writeln!(output, "</body>");
    let _ = writeln!(output, "</html>");

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    struct Fruit {
        table: Table,
        rows: Vec<(String, u32)>,
    }

    impl Fruit {
        fn new(rows: &[(&str, u32)]) -> Self {
            let mut table = Table::new("fruit");
            table.set_caption("Fruit");
            table.define_columns(["name", "count"]);
            table.define_headers(["Name", "Count"]).unwrap();
            Self {
                table,
                rows: rows.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
            }
        }
    }

    impl TabularReport for Fruit {
        type Row = (String, u32);

        fn table(&self) -> &Table {
            &self.table
        }

        fn rows(&self) -> &[Self::Row] {
            &self.rows
        }

        fn format_cell(&self, row: &Self::Row, column: &str) -> String {
            match column {
                "name" => format!("<em>{}</em>", escape_html(&row.0)),
                "count" => row.1.to_string(),
                _ => String::new(),
            }
        }
    }

    fn export(report: &Fruit, format: ExportFormat) -> (usize, String) {
        let mut buffer = Vec::new();
        let written = write_export(report, format, &mut buffer).unwrap();
        (written, String::from_utf8(buffer).unwrap())
    }

    #[test]
    fn csv_has_headers_and_plain_cells() {
        let report = Fruit::new(&[("Fig & Date", 3), ("Pear", 1)]);
        let (written, output) = export(&report, ExportFormat::Csv);
        assert_eq!(written, 2);
        assert_eq!(output, "Name,Count\nFig & Date,3\nPear,1\n");
    }

    #[test]
    fn json_is_keyed_by_column() {
        let report = Fruit::new(&[("Pear", 1)]);
        let (_, output) = export(&report, ExportFormat::Json);
        let parsed: Vec<Map<String, Value>> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["name"], "Pear");
        assert_eq!(parsed[0]["count"], "1");
    }

    #[test]
    fn markdown_escapes_pipes() {
        let report = Fruit::new(&[("a|b", 2)]);
        let (_, output) = export(&report, ExportFormat::Markdown);
        assert!(output.starts_with("# Fruit\n"));
        assert!(output.contains("| Name | Count |"));
        assert!(output.contains("| a\\|b | 2 |"));
    }

    #[test]
    fn markdown_notes_empty_table() {
        let report = Fruit::new(&[]);
        let (written, output) = export(&report, ExportFormat::Markdown);
        assert_eq!(written, 0);
        assert!(output.contains(EMPTY_TABLE_NOTICE));
    }

    #[test]
    fn html_keeps_cell_markup() {
        let report = Fruit::new(&[("Pear", 1)]);
        let (_, output) = export(&report, ExportFormat::Html);
        assert!(output.contains("<td><em>Pear</em></td><td>1</td>"));
        assert!(!output.contains("page="));
    }
}
