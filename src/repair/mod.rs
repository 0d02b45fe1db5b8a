//! Structural and field-level repair of uploaded CSV rows.

pub mod field;
pub mod header;
pub mod row;

pub use field::{repair_at, repair_field, FieldError, FieldOutcome};
pub use header::{header_tokens, validate_headers, HeaderCheck};
pub use row::{join_fields, parse_line, reconstruct, repair_delimiters, repair_quotes, Reconstructed};
