use std::io::Write;

use fleetdesk::error::Result;
use fleetdesk::importer::{commit_import, get_import};
use fleetdesk::settings::load_settings;

use crate::cli::open_db;

fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush().ok();
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).ok();
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn run(id: i64, yes: bool) -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let record = get_import(&conn, id)?;

    if !yes {
        let prompt = format!(
            "Commit {} valid {} rows from {} ({} rows with errors will be skipped)?",
            record.valid_rows,
            record.import_type.name(),
            record.filename,
            record.error_rows
        );
        if !confirm(&prompt) {
            println!("Nothing committed.");
            return Ok(());
        }
    }

    let result = commit_import(&conn, id, &settings)?;
    println!(
        "{} committed, {} skipped (errors)",
        result.committed, result.skipped
    );
    Ok(())
}
