//! Audio memory export: the backend's CSV dump, parsed into records.

use chrono::NaiveDateTime;
use serde::Serialize;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One analysed audio memory from the export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryRecord {
    pub timestamp: Option<NaiveDateTime>,
    pub input_text: String,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: String,
    pub memory_references: String,
    pub routine_references: String,
    pub time_indicators: String,
    pub location_indicators: String,
    pub severity_indicators: String,
    pub potential_concerns: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("export is empty")]
    Empty,
    #[error("export has no input_text column")]
    MissingText,
    #[error("unterminated quoted field starting on line {0}")]
    UnterminatedQuote(usize),
}

/// Parse the export body. Columns are matched by header name, rows without
/// text are skipped and the result is ordered newest first.
pub fn parse_memory_export(text: &str) -> Result<Vec<MemoryRecord>, ExportError> {
    let mut rows = split_rows(text.trim_start_matches('\u{feff}'))?.into_iter();
    let header = rows.next().ok_or(ExportError::Empty)?;
    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let text_at = column("input_text").ok_or(ExportError::MissingText)?;
    let columns = [
        column("timestamp"),
        column("sentiment_score"),
        column("sentiment_label"),
        column("memory_references"),
        column("routine_references"),
        column("time_indicators"),
        column("location_indicators"),
        column("severity_indicators"),
        column("potential_concerns"),
    ];

    let mut records: Vec<MemoryRecord> = rows
        .filter_map(|row| {
            let input_text = row.get(text_at)?.trim();
            if input_text.is_empty() {
                return None;
            }
            let field = |i: usize| {
                columns[i]
                    .and_then(|at| row.get(at))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            Some(MemoryRecord {
                timestamp: NaiveDateTime::parse_from_str(&field(0), TIMESTAMP_FORMAT).ok(),
                input_text: input_text.to_string(),
                sentiment_score: field(1).parse().ok(),
                sentiment_label: field(2),
                memory_references: field(3),
                routine_references: field(4),
                time_indicators: field(5),
                location_indicators: field(6),
                severity_indicators: field(7),
                potential_concerns: field(8),
            })
        })
        .collect();

    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(records)
}

/// Split comma-separated text into rows of fields. Handles quoted fields with
/// embedded commas, newlines and doubled quotes. Blank lines are dropped.
fn split_rows(text: &str) -> Result<Vec<Vec<String>>, ExportError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;
    let mut quote_line = 0;
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => {
                quoted = true;
                quote_line = line;
            }
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                end_row(&mut rows, &mut row, &mut field);
            }
            _ => field.push(c),
        }
    }
    if quoted {
        return Err(ExportError::UnterminatedQuote(quote_line));
    }
    end_row(&mut rows, &mut row, &mut field);
    Ok(rows)
}

fn end_row(rows: &mut Vec<Vec<String>>, row: &mut Vec<String>, field: &mut String) {
    row.push(std::mem::take(field));
    let row = std::mem::take(row);
    if !(row.len() == 1 && row[0].is_empty()) {
        rows.push(row);
    }
}
