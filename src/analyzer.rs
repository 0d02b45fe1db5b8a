use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};
use crate::models::{
    AnalysisReport, ColumnSpec, ErrorKind, ErrorRecord, FieldKind, FieldRepair, ImportSchema,
    Patterns, RepairedRow,
};
use crate::repair::{header_tokens, reconstruct, repair_at, validate_headers};

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// One logical data row after repair, in the order it appeared in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedRow {
    pub row_number: usize,
    pub values: Vec<String>,
    pub has_error: bool,
}

/// The report plus every row's final values, for callers that go on to commit.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub report: AnalysisReport,
    pub rows: Vec<AnalyzedRow>,
    /// Column names in the order `AnalyzedRow::values` uses.
    pub columns: Vec<String>,
}

struct RowOutcome {
    row_number: usize,
    raw: String,
    values: Vec<String>,
    repairs: Vec<String>,
    field_repairs: Vec<FieldRepair>,
    errors: Vec<ErrorRecord>,
    consumed_next: bool,
}

/// Counters and records accumulated over one pass.
#[derive(Default)]
struct RowTally {
    total_rows: usize,
    valid_rows: usize,
    error_rows: usize,
    errors: Vec<ErrorRecord>,
    repaired_rows: Vec<RepairedRow>,
    rows: Vec<AnalyzedRow>,
}

impl RowTally {
    fn record(&mut self, outcome: RowOutcome) {
        self.total_rows += 1;
        let has_error = !outcome.errors.is_empty();
        if has_error {
            self.error_rows += 1;
        } else {
            self.valid_rows += 1;
        }
        if !outcome.repairs.is_empty() {
            debug!(row = outcome.row_number, repairs = outcome.repairs.len(), "row repaired");
            self.repaired_rows.push(RepairedRow {
                row_number: outcome.row_number,
                repairs: outcome.repairs,
                field_repairs: outcome.field_repairs,
                final_data: outcome.values.clone(),
                raw: outcome.raw,
            });
        }
        self.errors.extend(outcome.errors);
        self.rows.push(AnalyzedRow {
            row_number: outcome.row_number,
            values: outcome.values,
            has_error,
        });
    }

    fn record_failure(&mut self, row_number: usize, raw: &str, err: FleetError) {
        warn!(row = row_number, error = %err, "row processing failed");
        self.total_rows += 1;
        self.error_rows += 1;
        self.errors.push(ErrorRecord {
            row: row_number,
            kind: ErrorKind::ProcessingError,
            details: err.to_string(),
            column: None,
            data: Some(raw.to_string()),
        });
        self.rows.push(AnalyzedRow {
            row_number,
            values: Vec::new(),
            has_error: true,
        });
    }

    fn into_report(self, header_errors: Vec<ErrorRecord>) -> (AnalysisReport, Vec<AnalyzedRow>) {
        let mut errors = header_errors;
        errors.extend(self.errors);
        let report = AnalysisReport {
            is_valid: errors.is_empty(),
            total_rows: self.total_rows,
            valid_rows: self.valid_rows,
            error_rows: self.error_rows,
            patterns: patterns(&errors),
            errors,
            repaired_rows: self.repaired_rows,
        };
        (report, self.rows)
    }
}

fn patterns(errors: &[ErrorRecord]) -> Patterns {
    let mut common_errors: BTreeMap<String, usize> = BTreeMap::new();
    let mut problematic_columns: Vec<String> = Vec::new();
    let mut data_type_issues: BTreeMap<String, usize> = BTreeMap::new();
    for err in errors {
        *common_errors.entry(err.kind.as_str().to_string()).or_default() += 1;
        if let Some(column) = &err.column {
            if !problematic_columns.contains(column) {
                problematic_columns.push(column.clone());
            }
            if err.kind.is_data_type_issue() {
                *data_type_issues.entry(column.clone()).or_default() += 1;
            }
        }
    }
    Patterns {
        common_errors,
        problematic_columns,
        data_type_issues,
    }
}

fn fatal_report(err: &FleetError) -> AnalysisReport {
    warn!(error = %err, "CSV analysis aborted");
    let errors = vec![ErrorRecord {
        row: 0,
        kind: ErrorKind::FatalError,
        details: err.to_string(),
        column: None,
        data: None,
    }];
    AnalysisReport {
        is_valid: false,
        patterns: patterns(&errors),
        errors,
        ..AnalysisReport::default()
    }
}

/// Single-pass validator and repairer for one uploaded CSV file.
pub struct Analyzer {
    schema: ImportSchema,
    max_line_bytes: usize,
}

impl Analyzer {
    pub fn new(schema: ImportSchema) -> Self {
        Self {
            schema,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn analyze(&self, content: &str) -> AnalysisReport {
        self.analyze_detailed(content).report
    }

    /// Analyze raw bytes; input that is not UTF-8 text yields a fatal report.
    pub fn analyze_bytes(&self, bytes: &[u8]) -> AnalysisReport {
        match std::str::from_utf8(bytes) {
            Ok(content) => self.analyze(content),
            Err(e) => fatal_report(&FleetError::InvalidInput(format!("not UTF-8 text ({e})"))),
        }
    }

    pub fn analyze_detailed(&self, content: &str) -> Analysis {
        match self.run(content) {
            Ok(analysis) => analysis,
            Err(e) => Analysis {
                report: fatal_report(&e),
                rows: Vec::new(),
                columns: Vec::new(),
            },
        }
    }

    fn run(&self, content: &str) -> Result<Analysis> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !line.trim().is_empty());

        let (header_number, header_line) = lines
            .next()
            .ok_or_else(|| FleetError::InvalidInput("file has no header line".to_string()))?;
        let data: Vec<(usize, &str)> = lines.collect();

        let mut header_errors = Vec::new();
        let check = validate_headers(&self.schema.header_names(), header_line);
        if !check.is_valid {
            warn!(missing = ?check.missing, "header mismatch");
            header_errors.push(ErrorRecord {
                row: header_number,
                kind: ErrorKind::HeaderMismatch,
                details: format!("Missing required columns: {}", check.missing.join(", ")),
                column: None,
                data: Some(header_line.to_string()),
            });
        }
        let layout = self.layout(header_line);

        let mut tally = RowTally::default();
        let mut idx = 0;
        while idx < data.len() {
            let (row_number, raw) = data[idx];
            let next = data.get(idx + 1).copied();
            match self.process_row(row_number, raw, next, &layout) {
                Ok(outcome) => {
                    if outcome.consumed_next {
                        idx += 1;
                    }
                    tally.record(outcome);
                }
                Err(e) => tally.record_failure(row_number, raw, e),
            }
            idx += 1;
        }

        let (report, rows) = tally.into_report(header_errors);
        info!(
            total = report.total_rows,
            valid = report.valid_rows,
            errors = report.error_rows,
            repaired = report.repaired_rows.len(),
            "CSV analysis complete"
        );
        Ok(Analysis {
            report,
            rows,
            columns: layout.into_iter().map(|c| c.name).collect(),
        })
    }

    /// Column spec for each position of the file's own header; unknown names are free text.
    fn layout(&self, header_line: &str) -> Vec<ColumnSpec> {
        header_tokens(header_line)
            .into_iter()
            .map(|name| {
                self.schema
                    .column(&name)
                    .cloned()
                    .unwrap_or_else(|| ColumnSpec::new(&name, FieldKind::Text, false))
            })
            .collect()
    }

    fn process_row(
        &self,
        row_number: usize,
        raw: &str,
        next: Option<(usize, &str)>,
        layout: &[ColumnSpec],
    ) -> Result<RowOutcome> {
        if raw.len() > self.max_line_bytes {
            return Err(FleetError::LineTooLong {
                len: raw.len(),
                limit: self.max_line_bytes,
            });
        }
        let next = next.filter(|(_, line)| line.len() <= self.max_line_bytes);

        let rebuilt = reconstruct(raw, next.map(|(_, line)| line), layout)?;
        let mut repairs = rebuilt.repairs;
        if rebuilt.consumed_next {
            if let Some((next_number, _)) = next {
                repairs.push(format!(
                    "Merged continuation line {next_number} into row {row_number}"
                ));
            }
        }

        let mut values = Vec::with_capacity(rebuilt.fields.len());
        let mut field_repairs = Vec::new();
        let mut errors = Vec::new();
        let error = |kind: ErrorKind, details: String, column: Option<String>| ErrorRecord {
            row: row_number,
            kind,
            details,
            column,
            data: Some(rebuilt.raw.clone()),
        };

        for (i, original) in rebuilt.fields.iter().enumerate() {
            if i >= layout.len() {
                let value = original.trim().to_string();
                errors.push(error(
                    ErrorKind::UnexpectedField,
                    format!(
                        "Unexpected value '{value}' in position {}, only {} columns expected",
                        i + 1,
                        layout.len()
                    ),
                    None,
                ));
                values.push(value);
                continue;
            }
            let column = &layout[i];
            let outcome = repair_at(&rebuilt.fields, i, layout)?;
            if let Some(description) = outcome.description.filter(|_| outcome.repaired) {
                field_repairs.push(FieldRepair {
                    column: column.name.clone(),
                    original: original.clone(),
                    corrected: outcome.value.clone(),
                    reason: description.clone(),
                });
                repairs.push(description);
            }
            if let Some(err) = outcome.error {
                errors.push(error(err.kind, err.details, Some(column.name.clone())));
            }
            values.push(outcome.value);
        }

        for column in layout.iter().skip(rebuilt.fields.len()) {
            errors.push(error(
                ErrorKind::MissingField,
                format!(
                    "Row has {} fields, expected {}: {} is missing",
                    rebuilt.fields.len(),
                    layout.len(),
                    column.name
                ),
                Some(column.name.clone()),
            ));
        }

        Ok(RowOutcome {
            row_number,
            raw: rebuilt.raw.clone(),
            values,
            repairs,
            field_repairs,
            errors,
            consumed_next: rebuilt.consumed_next,
        })
    }
}

/// Analyze `content` against a bare list of expected header names.
pub fn analyze_csv<S: AsRef<str>>(content: &str, expected_headers: &[S]) -> AnalysisReport {
    Analyzer::new(ImportSchema::from_headers(expected_headers)).analyze(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImportType;
    use crate::repair::join_fields;

    fn assert_balanced(report: &AnalysisReport) {
        assert_eq!(report.valid_rows + report.error_rows, report.total_rows);
    }

    #[test]
    fn test_clean_file_end_to_end() {
        let report = analyze_csv("a,b\n1,x\n2,y", &["a", "b"]);
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.valid_rows, 2);
        assert_eq!(report.error_rows, 0);
        assert!(report.repaired_rows.is_empty());
        assert!(report.errors.is_empty());
        assert!(report.is_valid);
    }

    #[test]
    fn test_invalid_date_marks_row_as_error() {
        let content = "agreement_number,payment_date,amount,payment_method,description,status\n\
                       AG-1,30/02/2024,100,cash,rent,completed\n\
                       AG-2,28/02/2024,100,cash,rent,completed\n";
        let report = Analyzer::new(ImportType::Payments.schema()).analyze(content);
        assert_balanced(&report);
        assert_eq!(report.error_rows, 1);
        assert_eq!(report.valid_rows, 1);
        let err = &report.errors[0];
        assert_eq!(err.kind, ErrorKind::InvalidDate);
        assert_eq!(err.row, 2);
        assert_eq!(err.column.as_deref(), Some("payment_date"));
        assert_eq!(report.patterns.data_type_issues.get("payment_date"), Some(&1));
    }

    #[test]
    fn test_currency_amount_is_repaired() {
        let content = "agreement_number,payment_date,amount\nAG-1,01/03/2024,\"1,000.50 QAR\"\n";
        let report = analyze_csv(content, &["agreement_number", "payment_date", "amount"]);
        assert_balanced(&report);
        assert_eq!(report.valid_rows, 1);
        assert_eq!(report.repaired_rows.len(), 1);
        let repaired = &report.repaired_rows[0];
        assert_eq!(repaired.final_data[2], "1000.50");
        assert_eq!(repaired.field_repairs[0].column, "amount");
        assert_eq!(repaired.field_repairs[0].original, "1,000.50 QAR");
        assert!(repaired.repairs[0].contains("QAR"));
    }

    #[test]
    fn test_header_mismatch_is_advisory() {
        let analysis = Analyzer::new(ImportSchema::from_headers(&["a", "b", "c"]))
            .analyze_detailed("a,c\n1,2\n3,4\n");
        let report = &analysis.report;
        let mismatches: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.kind == ErrorKind::HeaderMismatch)
            .collect();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].row, 1);
        assert!(mismatches[0].details.contains('b'));
        assert_eq!(report.errors.len(), 1);
        assert!(!report.is_valid);
        assert_balanced(report);

        assert_eq!(report.total_rows, 2);
        assert_eq!(report.valid_rows, 2);
        assert!(report.repaired_rows.is_empty());
        assert_eq!(analysis.columns, vec!["a", "c"]);
        assert_eq!(analysis.rows[0].values, vec!["1", "2"]);
        assert_eq!(analysis.rows[1].values, vec!["3", "4"]);
    }

    #[test]
    fn test_header_mismatch_keeps_typed_columns_by_name() {
        let content = "agreement_number,amount,payment_date\nAG-1,100,01/02/2025\nAG-2,abc,02/02/2025\n";
        let report = Analyzer::new(ImportType::Payments.schema()).analyze(content);
        assert_balanced(&report);
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.valid_rows, 1);
        let numeric: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.kind == ErrorKind::InvalidNumeric)
            .collect();
        assert_eq!(numeric.len(), 1);
        assert_eq!(numeric[0].column.as_deref(), Some("amount"));
    }

    #[test]
    fn test_short_independent_rows_are_not_merged() {
        let content = "agreement_number,payment_date,amount,payment_method,description,status\n\
                       AG-1,01/02/2025,100,cash,rent\n\
                       AG-2,02/02/2025,200,card,rent\n";
        let report = Analyzer::new(ImportType::Payments.schema()).analyze(content);
        assert_balanced(&report);
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.error_rows, 2);
        assert!(report.errors.iter().all(|e| e.kind == ErrorKind::MissingField));
        assert!(report.repaired_rows.is_empty());
    }

    #[test]
    fn test_split_record_is_merged() {
        let report = analyze_csv("id,address,city\n1,Main\nstreet,Doha\n2,Park,Wakra\n", &["id", "address", "city"]);
        assert_balanced(&report);
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.valid_rows, 2);
        let merged = &report.repaired_rows[0];
        assert_eq!(merged.row_number, 2);
        assert_eq!(merged.final_data, vec!["1", "Main street", "Doha"]);
        assert!(merged.repairs.iter().any(|r| r.contains("line 3")));
        assert_eq!(merged.raw, "1,Main\nstreet,Doha");
    }

    #[test]
    fn test_merge_looks_ahead_one_line_only() {
        let report = analyze_csv("a,b,c,d\n1\n2\n3,4\n", &["a", "b", "c", "d"]);
        assert_balanced(&report);
        assert!(report.error_rows >= 1);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == ErrorKind::MissingField));
    }

    #[test]
    fn test_short_rows_error_and_long_rows_are_absorbed() {
        let report = analyze_csv("a,b\n1\n1,2,3\n4,5\n", &["a", "b"]);
        assert_balanced(&report);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ErrorKind::MissingField);
        assert_eq!(report.errors[0].column.as_deref(), Some("b"));
        assert_eq!(report.valid_rows, 2);
        assert_eq!(report.repaired_rows[0].final_data, vec!["1", "2,3"]);
    }

    #[test]
    fn test_repaired_row_is_idempotent() {
        let schema = ImportType::Agreements.schema();
        let header = schema.header_names().join(",");
        let content = format!(
            "{header}\nAG-7,\"Sara \"K\" Ali\",123 ABC,1-2-2025,,QAR 2,500,Active\n"
        );
        let analyzer = Analyzer::new(schema);
        let first = analyzer.analyze(&content);
        assert_eq!(first.error_rows, 0, "{:?}", first.errors);
        assert_eq!(first.repaired_rows.len(), 1);

        let final_line = join_fields(&first.repaired_rows[0].final_data).unwrap();
        let second = analyzer.analyze(&format!("{header}\n{final_line}\n"));
        assert!(second.repaired_rows.is_empty(), "{:?}", second.repaired_rows);
        assert!(second.errors.is_empty());
        assert_eq!(second.valid_rows, 1);
    }

    #[test]
    fn test_overlong_line_is_processing_error() {
        let long = format!("1,{}", "x".repeat(100));
        let report = Analyzer::new(ImportSchema::from_headers(&["a", "b"]))
            .with_max_line_bytes(50)
            .analyze(&format!("a,b\n{long}\n2,y\n"));
        assert_balanced(&report);
        assert_eq!(report.errors[0].kind, ErrorKind::ProcessingError);
        assert_eq!(report.valid_rows, 1);
        assert_eq!(report.patterns.common_errors.get("processing_error"), Some(&1));
    }

    #[test]
    fn test_empty_and_binary_input_are_fatal() {
        let analyzer = Analyzer::new(ImportSchema::from_headers(&["a"]));
        for report in [analyzer.analyze("\n\n"), analyzer.analyze_bytes(&[0xff, 0xfe, 0x00])] {
            assert!(!report.is_valid);
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].kind, ErrorKind::FatalError);
            assert_eq!(report.total_rows, 0);
            assert_balanced(&report);
        }
    }

    #[test]
    fn test_blank_lines_are_skipped_and_numbering_kept() {
        let report = analyze_csv("a,b\r\n\r\n1,x\r\n2,y\r\n", &["a", "b"]);
        assert_eq!(report.total_rows, 2);
        let detailed = Analyzer::new(ImportSchema::from_headers(&["a", "b"]))
            .analyze_detailed("a,b\n\n1,x\n");
        assert_eq!(detailed.rows[0].row_number, 3);
    }

    #[test]
    fn test_columns_follow_file_header_order() {
        let analysis = Analyzer::new(ImportSchema::from_headers(&["amount", "note"]))
            .analyze_detailed("note,amount\nrent,\"$1,200\"\n");
        assert_eq!(analysis.columns, vec!["note", "amount"]);
        assert_eq!(analysis.rows[0].values, vec!["rent", "1200"]);
    }

    #[test]
    fn test_problematic_columns_are_listed_once() {
        let report = analyze_csv("amount\nx\ny\n", &["amount"]);
        assert_eq!(report.patterns.problematic_columns, vec!["amount"]);
        assert_eq!(report.patterns.common_errors.get("invalid_numeric"), Some(&2));
    }
}
