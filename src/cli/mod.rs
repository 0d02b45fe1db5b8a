pub mod analyze;
pub mod commit;
pub mod import;
pub mod imports;
pub mod init;
pub mod output;
pub mod status;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use fleetdesk::db::get_connection;
use fleetdesk::error::{FleetError, Result};
use fleetdesk::settings::Settings;

/// Open the configured database, refusing to create one outside `init`.
pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(FleetError::Settings(format!(
            "No database found at {}\nRun `fleetdesk init` to create one.",
            db_path.display()
        )));
    }
    get_connection(&db_path)
}

#[derive(Parser)]
#[command(
    name = "fleetdesk",
    version,
    about = "Validate, repair and import rental back-office CSV files."
)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for fleetdesk data (default: ~/Documents/fleetdesk)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Analyze a CSV file without storing anything.
    Analyze {
        /// Path to the CSV file
        file: String,
        /// Import type: payments, traffic_fines, agreements
        #[arg(long = "type")]
        import_type: String,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Also write the error records to this CSV file
        #[arg(long = "errors-csv")]
        errors_csv: Option<String>,
    },
    /// Upload a CSV file, analyze it and keep it for review.
    Import {
        /// Path to the CSV file
        file: String,
        /// Import type: payments, traffic_fines, agreements
        #[arg(long = "type")]
        import_type: String,
    },
    /// List uploaded files.
    Imports,
    /// Show the stored analysis report of an upload.
    Show {
        /// Import ID
        id: i64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Commit the valid rows of an analyzed upload.
    Commit {
        /// Import ID
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show the data directory and summary statistics.
    Status,
}
