use std::path::PathBuf;

use serde::Serialize;

use fleetdesk::analyzer::Analyzer;
use fleetdesk::error::Result;
use fleetdesk::models::ImportType;
use fleetdesk::settings::load_settings;

use crate::cli::output::print_report;

#[derive(Serialize)]
struct ErrorCsvRow<'a> {
    row: usize,
    #[serde(rename = "type")]
    kind: &'a str,
    column: &'a str,
    details: &'a str,
    data: &'a str,
}

pub fn run(file: &str, import_type: &str, json: bool, errors_csv: Option<&str>) -> Result<()> {
    let import_type = ImportType::from_key(import_type)?;
    let settings = load_settings();
    let data = std::fs::read(PathBuf::from(file))?;

    let report = Analyzer::new(import_type.schema())
        .with_max_line_bytes(settings.max_line_bytes)
        .analyze_bytes(&data);

    if let Some(path) = errors_csv {
        let mut writer = csv::Writer::from_path(path)?;
        for err in &report.errors {
            writer.serialize(ErrorCsvRow {
                row: err.row,
                kind: err.kind.as_str(),
                column: err.column.as_deref().unwrap_or(""),
                details: &err.details,
                data: err.data.as_deref().unwrap_or(""),
            })?;
        }
        writer.flush()?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} analysis of {file}", import_type.name());
        print_report(&report);
    }
    Ok(())
}
