//! Output formatting for the query CLI.
//!
//! Shaped results print one value per line; unshaped results print as an
//! aligned ASCII table.

use crate::models::{QueryOutput, QueryRows, Row};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Render a single value the way the per-line output shows it.
pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "None".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) => format!("{:.4}", f),
            None => n.to_string(),
        },
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => format!("\"{}\"", s),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

fn format_cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::String(s) => s.clone(),
        other => format_value(other),
    }
}

fn format_row(row: &Row) -> String {
    let values: Vec<String> = row.values().iter().map(format_value).collect();
    format!("({})", values.join(", "))
}

/// Render rows as an aligned table. Empty input renders as "Empty set".
pub fn format_as_table(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() && rows.is_empty() {
        return "Empty set\n".to_string();
    }

    let column_count = rows
        .iter()
        .map(Row::len)
        .max()
        .unwrap_or(0)
        .max(columns.len());
    let mut widths: Vec<usize> = (0..column_count)
        .map(|i| columns.get(i).map_or(0, |c| c.width()))
        .collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.values().iter().map(format_cell).collect())
        .collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.width());
        }
    }

    let pad = |text: &str, width: usize| {
        let fill = width.saturating_sub(text.width());
        format!("| {}{} ", text, " ".repeat(fill))
    };

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    let mut output = String::new();
    output.push_str(&separator);
    if !columns.is_empty() {
        let header: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| pad(columns.get(i).map_or("", String::as_str), *w))
            .collect::<String>()
            + "|\n";
        output.push_str(&header);
        output.push_str(&separator);
    }
    for row in &cells {
        let line: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| pad(row.get(i).map_or("", String::as_str), *w))
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }
    output.push_str(&separator);
    output
}

/// Rendered text of a query result plus the number of rows it returned.
///
/// The count is `None` when the result is a single value rather than a list.
pub fn format_output(output: &QueryOutput) -> (String, Option<usize>) {
    match output {
        QueryOutput::Raw(QueryRows { columns, rows, .. }) => {
            if rows.is_empty() {
                (String::new(), Some(0))
            } else {
                (format_as_table(columns, rows), Some(rows.len()))
            }
        }
        QueryOutput::Rows(rows) => {
            let text: String = rows.iter().map(|r| format_row(r) + "\n").collect();
            (text, Some(rows.len()))
        }
        QueryOutput::Values(values) => {
            let text: String = values.iter().map(|v| format_value(v) + "\n").collect();
            (text, Some(values.len()))
        }
        QueryOutput::Row(row) => {
            let text = row.as_ref().map_or_else(|| "None".to_string(), format_row);
            (text + "\n", None)
        }
        QueryOutput::Value(value) => {
            let text = value
                .as_ref()
                .map_or_else(|| "None".to_string(), format_value);
            (text + "\n", None)
        }
        QueryOutput::Custom(JsonValue::Array(values)) => {
            let text: String = values.iter().map(|v| format_value(v) + "\n").collect();
            (text, Some(values.len()))
        }
        QueryOutput::Custom(value) => (format_value(value) + "\n", None),
    }
}
