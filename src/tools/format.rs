//! Output formatting for tabular tool results.
//!
//! `execute_query` always returns structured rows; the non-JSON formats add a pre-rendered
//! `formatted_result` string alongside them.

use crate::models::{ColumnMetadata, Row};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured rows only (default)
    #[default]
    Json,
    /// RFC 4180 CSV with a header line
    Csv,
    /// ASCII table (like the cockroach sql shell)
    Table,
    /// Markdown table
    Markdown,
}

impl OutputFormat {
    /// Render rows in this format. `None` for [`OutputFormat::Json`].
    pub fn render(self, columns: &[ColumnMetadata], rows: &[Row], duration: f64) -> Option<String> {
        match self {
            Self::Json => None,
            Self::Csv => Some(format_as_csv(columns, rows)),
            Self::Table => Some(format_as_table(columns, rows, duration)),
            Self::Markdown => Some(format_as_markdown(columns, rows)),
        }
    }
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

fn cell<'a>(row: &'a Row, column: &ColumnMetadata) -> &'a JsonValue {
    row.get(&column.name).unwrap_or(&JsonValue::Null)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn format_as_csv(columns: &[ColumnMetadata], rows: &[Row]) -> String {
    let mut output = String::new();
    let header: Vec<String> = columns.iter().map(|c| csv_field(&c.name)).collect();
    output.push_str(&header.join(","));
    output.push_str("\r\n");

    for row in rows {
        let fields: Vec<String> = columns
            .iter()
            .map(|col| match cell(row, col) {
                JsonValue::Null => String::new(),
                value => csv_field(&format_value(value)),
            })
            .collect();
        output.push_str(&fields.join(","));
        output.push_str("\r\n");
    }

    output
}

pub fn format_as_table(columns: &[ColumnMetadata], rows: &[Row], duration: f64) -> String {
    if columns.is_empty() {
        return "Empty set".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.name.width()).collect();
    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            widths[i] = widths[i].max(format_value(cell(row, col)).width());
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(&col.name, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in rows {
        let line: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = cell(row, col);
                let formatted = format_value(value);
                let padding = " ".repeat(w.saturating_sub(formatted.width()));
                if matches!(value, JsonValue::Number(_)) {
                    format!("| {}{} ", padding, formatted)
                } else {
                    format!("| {}{} ", formatted, padding)
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }

    output.push_str(&separator);

    let row_text = if rows.len() == 1 { "row" } else { "rows" };
    output.push_str(&format!("({} {}, {:.3} sec)\n", rows.len(), row_text, duration));

    output
}

fn pad_center(text: &str, width: usize) -> String {
    let total = width.saturating_sub(text.width());
    let left = total / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(total - left))
}

pub fn format_as_markdown(columns: &[ColumnMetadata], rows: &[Row]) -> String {
    if columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let escape = |s: &str| s.replace('|', "\\|").replace('\n', " ");
    let mut output = String::new();

    let header: String = columns
        .iter()
        .map(|c| format!("| {} ", escape(&c.name)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in rows {
        let line: String = columns
            .iter()
            .map(|col| format!("| {} ", escape(&format_value(cell(row, col)))))
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }

    output.push_str(&format!("\n*{} rows*", rows.len()));

    output
}
