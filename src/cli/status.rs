use fleetdesk::db::get_connection;
use fleetdesk::error::Result;
use fleetdesk::models::ImportType;
use fleetdesk::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `fleetdesk init` to set up.");
        return Ok(());
    }

    let conn = get_connection(&db_path)?;
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };

    println!();
    println!("Imports:    {}", count("SELECT count(*) FROM imports")?);
    println!(
        "Pending:    {}",
        count("SELECT count(*) FROM imports WHERE status = 'analyzed'")?
    );
    for t in [ImportType::Payments, ImportType::TrafficFines, ImportType::Agreements] {
        let n = count(format!("SELECT count(*) FROM {}", t.table()).as_str())?;
        println!("{:<12}{n}", format!("{}:", t.name()));
    }
    Ok(())
}
