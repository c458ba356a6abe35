//! Pure transformations between domain shapes and backend payloads.
//!
//! Nothing here performs IO, and nothing panics on partial input.

pub mod matrix;
pub mod work_order;

pub use matrix::{MatrixView, normalize_event, normalize_matrix};
pub use work_order::{FieldConfig, FieldPurpose, SourceConfig, WorkOrder, shape_work_order};
