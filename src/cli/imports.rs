use comfy_table::{Cell, Table};

use fleetdesk::error::Result;
use fleetdesk::importer::{get_import, list_imports};
use fleetdesk::settings::load_settings;

use crate::cli::open_db;
use crate::cli::output::print_report;

pub fn list() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let records = list_imports(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Type", "Status", "Total", "Valid", "Errors", "Uploaded"]);
    for r in records {
        table.add_row(vec![
            Cell::new(r.id),
            Cell::new(r.filename),
            Cell::new(r.import_type.key()),
            Cell::new(r.status.as_str()),
            Cell::new(r.total_rows),
            Cell::new(r.valid_rows),
            Cell::new(r.error_rows),
            Cell::new(r.uploaded_at),
        ]);
    }
    println!("Imports\n{table}");
    Ok(())
}

pub fn show(id: i64, json: bool) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let record = get_import(&conn, id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record.report)?);
        return Ok(());
    }

    println!("Import #{}: {} ({})", record.id, record.filename, record.import_type.name());
    println!("Status:   {}", record.status.as_str());
    println!("Uploaded: {}", record.uploaded_at);
    println!("Checksum: {}", record.checksum);
    if let Some(n) = record.committed_rows {
        println!("Committed rows: {n}");
    }
    print_report(&record.report);
    Ok(())
}
