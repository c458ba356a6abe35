//! Shapes an ETL work order into the instantiate wire format.
//!
//! The UI edits a richer structure than the backend accepts: fields carry UI
//! state, may be disabled, and may be renamed through an alias. Shaping drops
//! everything the backend must not see.
//!
//! ```json
//! {
//!   "projectId": "p1",
//!   "sources": [
//!     { "filename": "sales.csv", "headerRow": 0,
//!       "fields": [ { "name": "region", "source": "Region", "purpose": "subject" } ] }
//!   ],
//!   "options": {}
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// What a field contributes to the matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldPurpose {
    /// Identifies the row (e.g. a customer or region).
    Subject,
    /// A categorical measure. The default for fields with no purpose set.
    #[default]
    Quality,
    /// A numeric measure.
    Quantity,
    /// A date or period.
    Time,
}

/// One column of a source file as edited in the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldConfig {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub purpose: Option<FieldPurpose>,
    /// Fields are enabled unless explicitly disabled.
    pub enabled: Option<bool>,
    /// Editor state; never sent to the backend.
    pub ui_state: Option<Value>,
}

/// One uploaded source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceConfig {
    pub filename: Option<String>,
    pub header_row: Option<u32>,
    pub fields: Vec<FieldConfig>,
}

/// An ETL work order as held by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkOrder {
    pub project_id: Option<String>,
    pub sources: Vec<SourceConfig>,
    pub options: Option<Value>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn shape_field(field: &FieldConfig) -> Option<Value> {
    if field.enabled == Some(false) {
        return None;
    }
    let source = non_blank(&field.name)?;
    let name = non_blank(&field.alias).unwrap_or(source);

    Some(json!({
        "name": name,
        "source": source,
        "purpose": field.purpose.unwrap_or_default(),
    }))
}

fn shape_source(source: &SourceConfig) -> Option<Value> {
    let fields: Vec<Value> = source.fields.iter().filter_map(shape_field).collect();
    if fields.is_empty() {
        return None;
    }

    Some(json!({
        "filename": non_blank(&source.filename).unwrap_or_default(),
        "headerRow": source.header_row.unwrap_or(0),
        "fields": fields,
    }))
}

/// Produces the instantiate payload for a work order.
///
/// Disabled and unnamed fields are dropped, aliases replace names, and
/// sources left with no fields are dropped.
pub fn shape_work_order(order: &WorkOrder) -> Value {
    let sources: Vec<Value> = order.sources.iter().filter_map(shape_source).collect();
    let options = match &order.options {
        Some(Value::Object(options)) => Value::Object(options.clone()),
        _ => Value::Object(Map::new()),
    };

    json!({
        "projectId": non_blank(&order.project_id),
        "sources": sources,
        "options": options,
    })
}
