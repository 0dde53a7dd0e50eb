//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use restcheck_common::{ExecutionStatus, Stats};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = new_table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

/// One row of a run summary
#[derive(Debug, Clone, Serialize)]
pub struct StatsRow {
    pub id: String,
    pub stats: Stats,
}

/// Print per-group statistics followed by a total line
pub fn print_stats(title: &str, rows: &[StatsRow], total: &Stats) {
    let mut table = new_table();
    table.set_header(vec![title, "Total", "Passed", "Failed", "Skipped", "Pending", "Pass rate"]);
    for row in rows {
        table.add_row(stats_cells(&row.id, &row.stats));
    }
    table.add_row(stats_cells("all", total));
    println!("{table}");
}

fn stats_cells(label: &str, stats: &Stats) -> Vec<Cell> {
    let failed = Cell::new(stats.failed);
    let failed = if stats.failed > 0 {
        failed.fg(Color::Red)
    } else {
        failed
    };
    vec![
        Cell::new(label),
        Cell::new(stats.total),
        Cell::new(stats.passed).fg(Color::Green),
        failed,
        Cell::new(stats.skipped),
        Cell::new(stats.pending),
        Cell::new(format!("{:.1}%", stats.pass_rate())),
    ]
}

/// One line per finished test
pub fn print_execution(id: &str, status: ExecutionStatus, error: Option<&str>) {
    match status {
        ExecutionStatus::Completed => println!("  {} {}", "✓".green(), id),
        ExecutionStatus::Skipped => println!("  {} {}", "○".dimmed(), id.dimmed()),
        _ => {
            println!("  {} {}", "✗".red(), id.bold());
            if let Some(error) = error {
                println!("      {}", error.red());
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}
