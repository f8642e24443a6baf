//! # Rendering
//!
//! Turns command [`Output`] into terminal text. Layout (column widths,
//! truncation, padding) is computed with `unicode-width`; colour comes from
//! `colored` and is switched off globally when stdout is not a terminal.

use colored::Colorize;
use nsh::output::{ObjectItem, Output, Table};
use nsh::task::{TaskRecord, TaskStatus};
use nsh::value::Value;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const MAX_CELL_WIDTH: usize = 40;
const COLUMN_GAP: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

pub fn render(output: &Output, format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string_pretty(&output.to_json()).unwrap_or_default(),
        Format::Text => render_text(output),
    }
}

fn render_text(output: &Output) -> String {
    match output {
        Output::None => String::new(),
        Output::Value(value) => value.to_string(),
        Output::Text(text) => text.clone(),
        Output::Table(table) => render_table(table),
        Output::Object(items) => render_object(items),
        Output::Task(promise) => render_task(&promise.record()),
        Output::Sequence(items) => items
            .iter()
            .map(render_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn render_table(table: &Table) -> String {
    if table.is_empty() {
        return "No entries.".dimmed().to_string();
    }

    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            table
                .columns
                .iter()
                .map(|col| truncate_to_width(&cell_text(&table.cell(row, col)), MAX_CELL_WIDTH))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            cells
                .iter()
                .map(|row| row[i].width())
                .chain(std::iter::once(col.label.width()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = table
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, width)| pad(&col.label, *width).bold().to_string())
        .collect();

    let mut lines = vec![header.join(COLUMN_GAP).trim_end().to_string()];
    for row in cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect();
        lines.push(line.join(COLUMN_GAP).trim_end().to_string());
    }
    lines.join("\n")
}

fn render_object(items: &[ObjectItem]) -> String {
    let width = items.iter().map(|item| item.name.width()).max().unwrap_or(0);
    items
        .iter()
        .map(|item| {
            let name = pad(&item.name, width);
            let name = if item.editable {
                name.normal()
            } else {
                name.dimmed()
            };
            format!("{}{}{}", name, COLUMN_GAP, cell_text(&item.value))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_task(record: &TaskRecord) -> String {
    let status = record.status.to_string();
    let status = match record.status {
        TaskStatus::Finished => status.green(),
        TaskStatus::Failed | TaskStatus::Aborted => status.red(),
        TaskStatus::Pending | TaskStatus::Running => status.yellow(),
    };
    let mut line = format!("Task #{} {} {}", record.id, record.method, status);
    if let Some(progress) = record.progress.filter(|_| !record.status.is_terminal()) {
        line.push_str(&format!(" ({}%)", progress));
    }
    if let Some(error) = &record.error {
        line.push_str(&format!(": {}", error.red()));
    }
    line
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        other => other.to_string().replace('\n', " "),
    }
}

fn pad(text: &str, width: usize) -> String {
    format!("{}{}", text, " ".repeat(width.saturating_sub(text.width())))
}

fn truncate_to_width(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }

    let mut result = String::new();
    let mut current_width = 0;
    for c in s.chars() {
        let char_width = c.width().unwrap_or(0);
        if current_width + char_width > max_width.saturating_sub(1) {
            break;
        }
        result.push(c);
        current_width += char_width;
    }
    result.push('…');
    result
}
