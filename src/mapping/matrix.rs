//! Normalizes a resolved job's payload into the matrix the UI renders.
//!
//! Accepts either `{ "matrix": { ... } }` or the matrix object itself:
//!
//! ```json
//! { "headers": ["region", "revenue"],
//!   "rows": [["north", 10], { "region": "south", "revenue": 7 }],
//!   "meta": { "rowCount": 1200, "truncated": true } }
//! ```
//!
//! Rows may be arrays or objects keyed by header. Anything missing defaults.

use serde::Serialize;
use serde_json::Value;

use crate::types::JobEvent;

/// A rectangular view of a result payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixView {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Total rows on the backend; may exceed `rows.len()` when truncated.
    pub row_count: usize,
    pub truncated: bool,
}

fn header_name(header: &Value) -> String {
    match header {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn normalize_row(row: &Value, headers: &[String]) -> Option<Vec<Value>> {
    match row {
        Value::Array(cells) => Some(cells.clone()),
        Value::Object(obj) => Some(
            headers
                .iter()
                .map(|h| obj.get(h).cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        _ => None,
    }
}

/// Normalizes a result payload. Never fails; unusable parts are dropped.
pub fn normalize_matrix(payload: &Value) -> MatrixView {
    let matrix = payload.get("matrix").unwrap_or(payload);

    let headers: Vec<String> = matrix
        .get("headers")
        .and_then(Value::as_array)
        .map(|hs| hs.iter().map(header_name).collect())
        .unwrap_or_default();

    let rows: Vec<Vec<Value>> = matrix
        .get("rows")
        .and_then(Value::as_array)
        .map(|rs| rs.iter().filter_map(|r| normalize_row(r, &headers)).collect())
        .unwrap_or_default();

    let meta = matrix.get("meta");
    let row_count = meta
        .and_then(|m| m.get("rowCount"))
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(rows.len());
    let truncated = meta
        .and_then(|m| m.get("truncated"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    MatrixView {
        headers,
        rows,
        row_count,
        truncated,
    }
}

/// Normalizes the result carried by a resolved job event, if it has one.
pub fn normalize_event(event: &JobEvent) -> Option<MatrixView> {
    event.request.data.as_ref().map(normalize_matrix)
}
