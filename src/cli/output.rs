use colored::Colorize;
use comfy_table::{Cell, Table};

use fleetdesk::models::AnalysisReport;

pub fn print_summary(report: &AnalysisReport) {
    let verdict = if report.is_valid {
        "VALID".green().bold()
    } else {
        "NEEDS REVIEW".red().bold()
    };
    println!("Result:   {verdict}");
    println!(
        "Rows:     {} total, {} valid, {} with errors",
        report.total_rows, report.valid_rows, report.error_rows
    );
    println!("Repaired: {}", report.repaired_rows.len());
    if !report.patterns.common_errors.is_empty() {
        let kinds: Vec<String> = report
            .patterns
            .common_errors
            .iter()
            .map(|(kind, n)| format!("{kind} ({n})"))
            .collect();
        println!("Errors:   {}", kinds.join(", "));
    }
    if !report.patterns.problematic_columns.is_empty() {
        println!("Columns:  {}", report.patterns.problematic_columns.join(", "));
    }
}

pub fn print_report(report: &AnalysisReport) {
    print_summary(report);

    if !report.errors.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Row", "Type", "Column", "Details"]);
        for err in &report.errors {
            table.add_row(vec![
                Cell::new(err.row),
                Cell::new(err.kind.as_str().red()),
                Cell::new(err.column.as_deref().unwrap_or("")),
                Cell::new(&err.details),
            ]);
        }
        println!("\nErrors\n{table}");
    }

    if !report.repaired_rows.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Row", "Repairs", "Final data"]);
        for row in &report.repaired_rows {
            table.add_row(vec![
                Cell::new(row.row_number),
                Cell::new(row.repairs.join("\n").yellow()),
                Cell::new(row.final_data.join(" | ")),
            ]);
        }
        println!("\nRepaired rows\n{table}");
    }
}
