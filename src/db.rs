use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    import_type TEXT NOT NULL,
    checksum TEXT NOT NULL,
    uploaded_at TEXT DEFAULT (datetime('now')),
    status TEXT NOT NULL DEFAULT 'analyzed',
    total_rows INTEGER NOT NULL DEFAULT 0,
    valid_rows INTEGER NOT NULL DEFAULT 0,
    error_rows INTEGER NOT NULL DEFAULT 0,
    committed_rows INTEGER,
    committed_at TEXT,
    content TEXT NOT NULL,
    max_line_bytes INTEGER NOT NULL,
    report_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY,
    import_id INTEGER NOT NULL,
    agreement_number TEXT,
    payment_date TEXT,
    amount REAL,
    payment_method TEXT,
    description TEXT,
    status TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (import_id) REFERENCES imports(id)
);

CREATE TABLE IF NOT EXISTS traffic_fines (
    id INTEGER PRIMARY KEY,
    import_id INTEGER NOT NULL,
    serial_number TEXT,
    violation_number TEXT,
    violation_date TEXT,
    license_plate TEXT,
    fine_amount REAL,
    violation_charge TEXT,
    payment_status TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (import_id) REFERENCES imports(id)
);

CREATE TABLE IF NOT EXISTS agreements (
    id INTEGER PRIMARY KEY,
    import_id INTEGER NOT NULL,
    agreement_number TEXT,
    customer_name TEXT,
    license_plate TEXT,
    start_date TEXT,
    end_date TEXT,
    rent_amount REAL,
    status TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (import_id) REFERENCES imports(id)
);

CREATE INDEX IF NOT EXISTS idx_imports_checksum ON imports(checksum, import_type);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &["imports", "payments", "traffic_fines", "agreements"] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_destination_tables_match_schemas() {
        use crate::models::ImportType;
        let (_dir, conn) = test_db();
        for t in [ImportType::Payments, ImportType::TrafficFines, ImportType::Agreements] {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", t.table())).unwrap();
            let cols: Vec<String> = stmt
                .query_map([], |row| row.get(1))
                .unwrap()
                .collect::<std::result::Result<Vec<_>, _>>()
                .unwrap();
            for column in t.schema().header_names() {
                assert!(cols.contains(&column.to_string()), "{} lacks {column}", t.table());
            }
        }
    }
}
