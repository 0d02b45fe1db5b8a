use std::path::PathBuf;

use fleetdesk::error::Result;
use fleetdesk::importer::upload_and_analyze;
use fleetdesk::models::ImportType;
use fleetdesk::settings::load_settings;

use crate::cli::open_db;
use crate::cli::output::print_summary;

pub fn run(file: &str, import_type: &str) -> Result<()> {
    let import_type = ImportType::from_key(import_type)?;
    let settings = load_settings();
    let conn = open_db(&settings)?;

    let result = upload_and_analyze(&conn, &PathBuf::from(file), import_type, &settings)?;

    if result.duplicate_file {
        println!(
            "This file has already been uploaded as import #{} (duplicate checksum).",
            result.import_id
        );
        return Ok(());
    }

    println!("Stored as import #{}", result.import_id);
    print_summary(&result.report);
    println!(
        "\nReview with `fleetdesk show {id}`, then `fleetdesk commit {id}`.",
        id = result.import_id
    );
    Ok(())
}
