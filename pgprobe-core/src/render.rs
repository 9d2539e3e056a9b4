//! Dynamic row rendering
//!
//! The probe query is arbitrary, so rows are decoded column by column
//! using the reported Postgres type, preserving column order. Types
//! without a native decoding fall back to their text form and, failing
//! that, a `<typename>` placeholder rather than an error.

use clap::ValueEnum;
use serde_json::{json, Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::Result;

/// Row output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `name=value` pairs joined by ` | `
    Text,
    /// One JSON object per row
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = crate::error::ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(crate::error::ProbeError::config(format!(
                "unknown output format '{}' (expected text or json)",
                other
            ))),
        }
    }
}

/// Decode a row into column-name/value pairs, preserving column order.
pub fn decode_row(row: &PgRow) -> Result<Vec<(String, Value)>> {
    let mut fields = Vec::with_capacity(row.len());
    for column in row.columns() {
        let idx = column.ordinal();
        fields.push((column.name().to_string(), decode_value(row, idx)?));
    }
    Ok(fields)
}

fn decode_value(row: &PgRow, idx: usize) -> Result<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "INT2" => json!(row.try_get::<i16, _>(idx)?),
        "INT4" => json!(row.try_get::<i32, _>(idx)?),
        "INT8" => json!(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => json!(row.try_get::<f32, _>(idx)?),
        "FLOAT8" => json!(row.try_get::<f64, _>(idx)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            Value::String(row.try_get::<String, _>(idx)?)
        }
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(row.try_get::<chrono::NaiveDateTime, _>(idx)?.to_string()),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        _ => match row.try_get::<String, _>(idx) {
            Ok(text) => Value::String(text),
            Err(_) => Value::String(format!("<{}>", type_name)),
        },
    };

    Ok(value)
}

/// Render a decoded row in the requested format.
pub fn render_row(fields: &[(String, Value)], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, render_scalar(value)))
            .collect::<Vec<_>>()
            .join(" | "),
        OutputFormat::Json => {
            let map: Map<String, Value> = fields.iter().cloned().collect();
            Value::Object(map).to_string()
        }
    }
}

/// Render a fan-out worker's row. Text mode gets a `[worker N]`
/// prefix; json mode keeps every line parseable by carrying the
/// worker id as a field instead.
pub fn render_worker_row(worker: usize, fields: &[(String, Value)], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("[worker {}] {}", worker, render_row(fields, format)),
        OutputFormat::Json => {
            let mut tagged = Vec::with_capacity(fields.len() + 1);
            tagged.push(("worker".to_string(), json!(worker)));
            tagged.extend_from_slice(fields);
            render_row(&tagged, OutputFormat::Json)
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        // Bare string, no JSON quoting in text mode
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
