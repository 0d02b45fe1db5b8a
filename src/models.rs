use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

// ---------------------------------------------------------------------------
// Import types and their column layouts
// ---------------------------------------------------------------------------

const PAYMENT_STATUSES: &[&str] = &["completed", "pending", "failed", "refunded"];
const FINE_STATUSES: &[&str] = &["paid", "unpaid", "pending", "disputed"];
const AGREEMENT_STATUSES: &[&str] = &["active", "pending", "closed", "cancelled"];
const ALL_STATUSES: &[&str] = &[
    "completed", "pending", "failed", "refunded", "paid", "unpaid", "disputed", "active",
    "closed", "cancelled",
];

/// Semantic type of a column, used to pick a repair strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Date,
    Numeric,
    Status(&'static [&'static str]),
    Text,
}

impl FieldKind {
    /// Infer a kind from a bare column name.
    pub fn from_header(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        if name.contains("date") {
            Self::Date
        } else if name == "status" || name.ends_with("_status") {
            Self::Status(ALL_STATUSES)
        } else if name.ends_with("_amount")
            || ["amount", "price", "cost", "total", "balance"].contains(&name.as_str())
        {
            Self::Numeric
        } else {
            Self::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl ColumnSpec {
    pub fn new(name: &str, kind: FieldKind, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required,
        }
    }
}

/// Ordered set of expected columns for one kind of upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSchema {
    pub columns: Vec<ColumnSpec>,
}

impl ImportSchema {
    /// Build a schema from bare header names; every column is optional.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let columns = headers
            .iter()
            .map(|h| {
                let name = h.as_ref().trim().to_lowercase();
                let kind = FieldKind::from_header(&name);
                ColumnSpec {
                    name,
                    kind,
                    required: false,
                }
            })
            .collect();
        Self { columns }
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportType {
    Payments,
    TrafficFines,
    Agreements,
}

const ALL_IMPORT_TYPES: &[ImportType] = &[
    ImportType::Payments,
    ImportType::TrafficFines,
    ImportType::Agreements,
];

impl ImportType {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::TrafficFines => "traffic_fines",
            Self::Agreements => "agreements",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Payments => "Payments",
            Self::TrafficFines => "Traffic Fines",
            Self::Agreements => "Agreements",
        }
    }

    /// Destination table for committed rows.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::TrafficFines => "traffic_fines",
            Self::Agreements => "agreements",
        }
    }

    pub fn from_key(key: &str) -> Result<Self> {
        let normalized = key.trim().to_lowercase().replace('-', "_");
        ALL_IMPORT_TYPES
            .iter()
            .find(|t| t.key() == normalized)
            .copied()
            .ok_or_else(|| FleetError::UnknownImportType(key.to_string()))
    }

    pub fn schema(&self) -> ImportSchema {
        use FieldKind::*;
        let columns = match self {
            Self::Payments => vec![
                ColumnSpec::new("agreement_number", Text, true),
                ColumnSpec::new("payment_date", Date, true),
                ColumnSpec::new("amount", Numeric, true),
                ColumnSpec::new("payment_method", Text, false),
                ColumnSpec::new("description", Text, false),
                ColumnSpec::new("status", Status(PAYMENT_STATUSES), false),
            ],
            Self::TrafficFines => vec![
                ColumnSpec::new("serial_number", Text, true),
                ColumnSpec::new("violation_number", Text, true),
                ColumnSpec::new("violation_date", Date, true),
                ColumnSpec::new("license_plate", Text, true),
                ColumnSpec::new("fine_amount", Numeric, true),
                ColumnSpec::new("violation_charge", Text, false),
                ColumnSpec::new("payment_status", Status(FINE_STATUSES), false),
            ],
            Self::Agreements => vec![
                ColumnSpec::new("agreement_number", Text, true),
                ColumnSpec::new("customer_name", Text, true),
                ColumnSpec::new("license_plate", Text, true),
                ColumnSpec::new("start_date", Date, true),
                ColumnSpec::new("end_date", Date, false),
                ColumnSpec::new("rent_amount", Numeric, true),
                ColumnSpec::new("status", Status(AGREEMENT_STATUSES), false),
            ],
        };
        ImportSchema { columns }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Analysis report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HeaderMismatch,
    ProcessingError,
    FatalError,
    InvalidDate,
    InvalidNumeric,
    InvalidStatus,
    MissingValue,
    MissingField,
    UnexpectedField,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeaderMismatch => "header_mismatch",
            Self::ProcessingError => "processing_error",
            Self::FatalError => "fatal_error",
            Self::InvalidDate => "invalid_date",
            Self::InvalidNumeric => "invalid_numeric",
            Self::InvalidStatus => "invalid_status",
            Self::MissingValue => "missing_value",
            Self::MissingField => "missing_field",
            Self::UnexpectedField => "unexpected_field",
        }
    }

    /// True for failures caused by a value not matching its column type.
    pub fn is_data_type_issue(&self) -> bool {
        matches!(
            self,
            Self::InvalidDate | Self::InvalidNumeric | Self::InvalidStatus
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub row: usize,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// One correction applied to one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRepair {
    pub column: String,
    pub original: String,
    pub corrected: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairedRow {
    pub row_number: usize,
    pub repairs: Vec<String>,
    #[serde(default)]
    pub field_repairs: Vec<FieldRepair>,
    pub final_data: Vec<String>,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patterns {
    pub common_errors: BTreeMap<String, usize>,
    pub problematic_columns: Vec<String>,
    pub data_type_issues: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub is_valid: bool,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub errors: Vec<ErrorRecord>,
    pub patterns: Patterns,
    pub repaired_rows: Vec<RepairedRow>,
}

// ---------------------------------------------------------------------------
// Stored uploads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Analyzed,
    Committed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzed => "analyzed",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "committed" => Self::Committed,
            "failed" => Self::Failed,
            _ => Self::Analyzed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub id: i64,
    pub filename: String,
    pub import_type: ImportType,
    pub checksum: String,
    pub uploaded_at: String,
    pub status: ImportStatus,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub committed_rows: Option<usize>,
    pub report: AnalysisReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_from_header() {
        assert_eq!(FieldKind::from_header("payment_date"), FieldKind::Date);
        assert_eq!(FieldKind::from_header(" Amount "), FieldKind::Numeric);
        assert_eq!(FieldKind::from_header("fine_amount"), FieldKind::Numeric);
        assert_eq!(FieldKind::from_header("payment_status"), FieldKind::Status(ALL_STATUSES));
        assert_eq!(FieldKind::from_header("customer_name"), FieldKind::Text);
        assert_eq!(FieldKind::from_header("a"), FieldKind::Text);
    }

    #[test]
    fn test_import_type_from_key() {
        assert_eq!(ImportType::from_key("payments").unwrap(), ImportType::Payments);
        assert_eq!(ImportType::from_key("Traffic-Fines").unwrap(), ImportType::TrafficFines);
        assert!(matches!(
            ImportType::from_key("invoices"),
            Err(FleetError::UnknownImportType(_))
        ));
    }

    #[test]
    fn test_schemas_have_required_columns() {
        for t in ALL_IMPORT_TYPES {
            let schema = t.schema();
            assert!(schema.columns.iter().any(|c| c.required), "{t} has no required column");
            assert!(schema.columns.iter().any(|c| c.kind == FieldKind::Date));
            assert!(schema.columns.iter().any(|c| c.kind == FieldKind::Numeric));
        }
    }

    #[test]
    fn test_error_record_serializes_kind_as_type() {
        let rec = ErrorRecord {
            row: 3,
            kind: ErrorKind::InvalidDate,
            details: "bad".to_string(),
            column: None,
            data: Some("x".to_string()),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "invalid_date");
        assert_eq!(json["data"], "x");
        assert!(json.get("column").is_none());
    }

    #[test]
    fn test_report_uses_camel_case_keys() {
        let json = serde_json::to_value(AnalysisReport::default()).unwrap();
        for key in ["isValid", "totalRows", "validRows", "errorRows", "repairedRows"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert!(json["patterns"].get("commonErrors").is_some());
    }
}
