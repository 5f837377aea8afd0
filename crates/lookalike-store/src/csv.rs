//! Legacy flat-file embeddings.
//!
//! One row per sample: `name,embedding_0,…,embedding_{N-1}`. Files written
//! by the 128-dimensional dlib pipeline use `encoding_{i}` column names
//! instead; both are accepted.

use crate::sqlite::FaceStore;
use crate::StoreError;
use lookalike_core::{is_reserved_label, Embedding};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

const VALUE_COLUMN_PREFIXES: [&str; 2] = ["embedding_", "encoding_"];

#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {message}")]
pub struct CsvError {
    pub line: usize,
    pub message: String,
}

impl CsvError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// One parsed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRow {
    pub name: String,
    pub values: Vec<f32>,
}

/// Parse the legacy CSV layout. An empty input yields no rows.
pub fn parse_csv(text: &str) -> Result<Vec<LegacyRow>, CsvError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let Some((header_line, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = split_record(header).map_err(|m| CsvError::new(header_line, m))?;
    if columns.first().map(String::as_str) != Some("name") {
        return Err(CsvError::new(header_line, "first column must be 'name'"));
    }
    if let Some(bad) = columns[1..]
        .iter()
        .find(|c| !VALUE_COLUMN_PREFIXES.iter().any(|p| c.starts_with(p)))
    {
        return Err(CsvError::new(header_line, format!("unexpected column '{bad}'")));
    }
    let dims = columns.len() - 1;
    if dims == 0 {
        return Err(CsvError::new(header_line, "no embedding columns"));
    }

    let mut rows = Vec::new();
    for (line, record) in lines {
        let fields = split_record(record).map_err(|m| CsvError::new(line, m))?;
        if fields.len() != columns.len() {
            return Err(CsvError::new(
                line,
                format!("expected {} fields, found {}", columns.len(), fields.len()),
            ));
        }
        let name = &fields[0];
        if is_reserved_label(name) {
            return Err(CsvError::new(
                line,
                format!("name '{name}' is reserved for unrecognized faces"),
            ));
        }
        let values = fields[1..]
            .iter()
            .enumerate()
            .map(|(i, f)| parse_value(line, i + 1, f))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(LegacyRow {
            name: name.clone(),
            values,
        });
    }
    Ok(rows)
}

fn parse_value(line: usize, column: usize, field: &str) -> Result<f32, CsvError> {
    match field.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(CsvError::new(
            line,
            format!("column {column}: '{field}' is not a finite number"),
        )),
        Err(_) => Err(CsvError::new(
            line,
            format!("column {column}: '{field}' is not a number"),
        )),
    }
}

/// Render rows in the legacy layout with `embedding_{i}` columns.
///
/// All rows must have the same length. Names are quoted when they contain
/// a comma or a double quote; line breaks cannot be represented.
pub fn write_csv(rows: &[LegacyRow]) -> Result<String, CsvError> {
    let Some(first) = rows.first() else {
        return Ok(String::new());
    };
    let dims = first.values.len();

    let mut out = String::from("name");
    for i in 0..dims {
        let _ = write!(out, ",embedding_{i}");
    }
    out.push('\n');

    for (i, row) in rows.iter().enumerate() {
        let line = i + 2;
        if row.values.len() != dims {
            return Err(CsvError::new(
                line,
                format!("expected {dims} values, found {}", row.values.len()),
            ));
        }
        if row.name.contains(['\n', '\r']) {
            return Err(CsvError::new(line, "name contains a line break"));
        }
        out.push_str(&quote_field(&row.name));
        for v in &row.values {
            let _ = write!(out, ",{v}");
        }
        out.push('\n');
    }
    Ok(out)
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one record on commas, honouring double-quoted fields with `""`
/// escapes.
fn split_record(record: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = record.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    if quoted {
        return Err("unterminated quoted field".into());
    }
    fields.push(field);
    Ok(fields)
}

/// Load a legacy CSV file into `store`. Returns the number of rows imported.
///
/// A missing file means there is nothing to import.
pub async fn import_csv(
    store: &FaceStore,
    path: &Path,
    model_version: Option<&str>,
) -> Result<usize, StoreError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no legacy CSV to import");
        return Ok(0);
    }

    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rows = parse_csv(&text).map_err(|source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    let count = rows.len();
    for row in rows {
        store
            .insert(
                &row.name,
                Embedding {
                    values: row.values,
                    model_version: model_version.map(str::to_string),
                },
            )
            .await?;
    }
    tracing::info!(path = %path.display(), count, "imported legacy CSV");
    Ok(count)
}

/// Write every stored face to `path` in the legacy layout. Returns the
/// number of rows written.
pub async fn export_csv(store: &FaceStore, path: &Path) -> Result<usize, StoreError> {
    let rows: Vec<LegacyRow> = store
        .snapshot()
        .await?
        .into_iter()
        .map(|face| LegacyRow {
            name: face.label,
            values: face.embedding.values,
        })
        .collect();

    let text = write_csv(&rows).map_err(|source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), count = rows.len(), "exported legacy CSV");
    Ok(rows.len())
}
