use std::path::Path;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::analyzer::{AnalyzedRow, Analyzer};
use crate::error::{FleetError, Result};
use crate::models::{AnalysisReport, ErrorKind, FieldKind, ImportRecord, ImportStatus, ImportType};
use crate::repair::field::date_to_iso;
use crate::settings::Settings;

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn analyzer_for(import_type: ImportType, settings: &Settings) -> Analyzer {
    Analyzer::new(import_type.schema()).with_max_line_bytes(settings.max_line_bytes)
}

// ---------------------------------------------------------------------------
// Upload + analysis
// ---------------------------------------------------------------------------

pub struct UploadResult {
    pub import_id: i64,
    pub duplicate_file: bool,
    pub report: AnalysisReport,
}

/// Analyze a file and store it with its report for operator review.
pub fn upload_and_analyze(
    conn: &Connection,
    file_path: &Path,
    import_type: ImportType,
    settings: &Settings,
) -> Result<UploadResult> {
    let data = std::fs::read(file_path)?;
    let checksum = compute_checksum(&data);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM imports WHERE checksum = ?1 AND import_type = ?2",
            rusqlite::params![checksum, import_type.key()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        info!(import_id = id, file = %file_path.display(), "file already uploaded");
        let record = get_import(conn, id)?;
        return Ok(UploadResult {
            import_id: id,
            duplicate_file: true,
            report: record.report,
        });
    }

    let report = analyzer_for(import_type, settings).analyze_bytes(&data);
    let content = String::from_utf8_lossy(&data).into_owned();
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    conn.execute(
        "INSERT INTO imports (filename, import_type, checksum, status, total_rows, valid_rows, error_rows, content, max_line_bytes, report_json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            filename,
            import_type.key(),
            checksum,
            ImportStatus::Analyzed.as_str(),
            report.total_rows as i64,
            report.valid_rows as i64,
            report.error_rows as i64,
            content,
            settings.max_line_bytes as i64,
            serde_json::to_string(&report)?,
        ],
    )?;
    let import_id = conn.last_insert_rowid();
    info!(
        import_id,
        import_type = %import_type,
        total = report.total_rows,
        errors = report.error_rows,
        "upload analyzed"
    );

    Ok(UploadResult {
        import_id,
        duplicate_file: false,
        report,
    })
}

// ---------------------------------------------------------------------------
// Stored uploads
// ---------------------------------------------------------------------------

const IMPORT_COLUMNS: &str = "id, filename, import_type, checksum, uploaded_at, status, \
     total_rows, valid_rows, error_rows, committed_rows, report_json";

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ImportRecordRaw, String)> {
    Ok((
        ImportRecordRaw {
            id: row.get(0)?,
            filename: row.get(1)?,
            import_type: row.get(2)?,
            checksum: row.get(3)?,
            uploaded_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            status: row.get(5)?,
            total_rows: row.get(6)?,
            valid_rows: row.get(7)?,
            error_rows: row.get(8)?,
            committed_rows: row.get(9)?,
        },
        row.get(10)?,
    ))
}

struct ImportRecordRaw {
    id: i64,
    filename: String,
    import_type: String,
    checksum: String,
    uploaded_at: String,
    status: String,
    total_rows: i64,
    valid_rows: i64,
    error_rows: i64,
    committed_rows: Option<i64>,
}

impl ImportRecordRaw {
    fn into_record(self, report_json: &str) -> Result<ImportRecord> {
        Ok(ImportRecord {
            id: self.id,
            filename: self.filename,
            import_type: ImportType::from_key(&self.import_type)?,
            checksum: self.checksum,
            uploaded_at: self.uploaded_at,
            status: ImportStatus::from_db(&self.status),
            total_rows: self.total_rows as usize,
            valid_rows: self.valid_rows as usize,
            error_rows: self.error_rows as usize,
            committed_rows: self.committed_rows.map(|n| n as usize),
            report: serde_json::from_str(report_json)?,
        })
    }
}

pub fn get_import(conn: &Connection, import_id: i64) -> Result<ImportRecord> {
    let (raw, report_json) = conn
        .query_row(
            &format!("SELECT {IMPORT_COLUMNS} FROM imports WHERE id = ?1"),
            [import_id],
            record_from_row,
        )
        .optional()?
        .ok_or(FleetError::UnknownImport(import_id))?;
    raw.into_record(&report_json)
}

pub fn list_imports(conn: &Connection) -> Result<Vec<ImportRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {IMPORT_COLUMNS} FROM imports ORDER BY id"))?;
    let rows = stmt
        .query_map([], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(raw, json)| raw.into_record(&json))
        .collect()
}

// ---------------------------------------------------------------------------
// Commit ("implement") with bounded verification retry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CommitResult {
    pub committed: usize,
    pub skipped: usize,
    pub attempts: u32,
}

fn to_sql_value(kind: FieldKind, value: &str) -> Value {
    if value.is_empty() {
        return Value::Null;
    }
    match kind {
        FieldKind::Date => date_to_iso(value).map_or(Value::Null, Value::Text),
        FieldKind::Numeric => value.parse::<f64>().map_or(Value::Null, Value::Real),
        FieldKind::Status(_) | FieldKind::Text => Value::Text(value.to_string()),
    }
}

/// Replace this import's rows in the destination table with `rows`.
fn write_rows(
    conn: &Connection,
    import_id: i64,
    import_type: ImportType,
    positions: &[(String, FieldKind, Option<usize>)],
    rows: &[&AnalyzedRow],
) -> Result<()> {
    let table = import_type.table();
    let names: Vec<&str> = positions.iter().map(|(n, _, _)| n.as_str()).collect();
    let placeholders: Vec<String> = (1..=names.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} (import_id, {}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );

    let tx = conn.unchecked_transaction()?;
    tx.execute(&format!("DELETE FROM {table} WHERE import_id = ?1"), [import_id])?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for row in rows {
            let mut params = vec![Value::Integer(import_id)];
            params.extend(positions.iter().map(|(_, kind, pos)| {
                let value = pos.and_then(|p| row.values.get(p)).map_or("", String::as_str);
                to_sql_value(*kind, value)
            }));
            stmt.execute(rusqlite::params_from_iter(params))?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn count_rows(conn: &Connection, import_type: ImportType, import_id: i64) -> Result<usize> {
    let n: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {} WHERE import_id = ?1", import_type.table()),
        [import_id],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

fn set_status(conn: &Connection, import_id: i64, status: ImportStatus, committed: Option<usize>) -> Result<()> {
    conn.execute(
        "UPDATE imports SET status = ?1, committed_rows = ?2, \
         committed_at = CASE WHEN ?1 = 'committed' THEN datetime('now') ELSE NULL END \
         WHERE id = ?3",
        rusqlite::params![status.as_str(), committed.map(|n| n as i64), import_id],
    )?;
    Ok(())
}

/// Write the rows without errors into the import type's table and verify they landed.
pub fn commit_import(conn: &Connection, import_id: i64, settings: &Settings) -> Result<CommitResult> {
    let record = get_import(conn, import_id)?;
    if record.status == ImportStatus::Committed {
        return Err(FleetError::AlreadyCommitted(import_id));
    }
    if record.report.errors.iter().any(|e| e.kind == ErrorKind::FatalError) {
        return Err(FleetError::NotCommittable {
            id: import_id,
            reason: "the file could not be analyzed".to_string(),
        });
    }
    let (content, max_line_bytes): (String, i64) = conn.query_row(
        "SELECT content, max_line_bytes FROM imports WHERE id = ?1",
        [import_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    // Re-analyze under the limits the reviewed report was produced with.
    let import_type = record.import_type;
    let analysis = Analyzer::new(import_type.schema())
        .with_max_line_bytes(max_line_bytes as usize)
        .analyze_detailed(&content);
    let reviewed = &record.report;
    if analysis.report.valid_rows != reviewed.valid_rows
        || analysis.report.error_rows != reviewed.error_rows
    {
        return Err(FleetError::NotCommittable {
            id: import_id,
            reason: format!(
                "analysis now finds {} valid and {} error rows, the reviewed report had {} and {}",
                analysis.report.valid_rows,
                analysis.report.error_rows,
                reviewed.valid_rows,
                reviewed.error_rows
            ),
        });
    }
    let accepted: Vec<&AnalyzedRow> = analysis.rows.iter().filter(|r| !r.has_error).collect();
    let skipped = analysis.rows.len() - accepted.len();

    let positions: Vec<(String, FieldKind, Option<usize>)> = import_type
        .schema()
        .columns
        .into_iter()
        .map(|c| {
            let pos = analysis.columns.iter().position(|n| *n == c.name);
            (c.name, c.kind, pos)
        })
        .collect();

    let attempts = settings.commit_retry_attempts.max(1);
    let delay = Duration::from_millis(settings.commit_retry_delay_ms);
    let mut found = 0;
    for attempt in 1..=attempts {
        write_rows(conn, import_id, import_type, &positions, &accepted)?;
        found = count_rows(conn, import_type, import_id)?;
        if found == accepted.len() {
            set_status(conn, import_id, ImportStatus::Committed, Some(found))?;
            info!(import_id, committed = found, skipped, attempt, "import committed");
            return Ok(CommitResult {
                committed: found,
                skipped,
                attempts: attempt,
            });
        }
        warn!(
            import_id,
            attempt,
            expected = accepted.len(),
            found,
            "commit verification mismatch"
        );
        if attempt < attempts {
            std::thread::sleep(delay);
        }
    }

    set_status(conn, import_id, ImportStatus::Failed, None)?;
    Err(FleetError::CommitVerification {
        attempts,
        expected: accepted.len(),
        found,
    })
}
