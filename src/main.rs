mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn init_tracing(verbose: bool) {
    let default = if verbose { "fleetdesk=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Analyze {
            file,
            import_type,
            json,
            errors_csv,
        } => cli::analyze::run(&file, &import_type, json, errors_csv.as_deref()),
        Commands::Import { file, import_type } => cli::import::run(&file, &import_type),
        Commands::Imports => cli::imports::list(),
        Commands::Show { id, json } => cli::imports::show(id, json),
        Commands::Commit { id, yes } => cli::commit::run(id, yes),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
