use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, Emoji, Term};
use std::io::Write;

use netops_core::orchestrator::RunResult;

pub struct Symbols;
impl Symbols {
    pub const SUCCESS: Emoji<'static, 'static> = Emoji("✔", "+");
    pub const ERROR: Emoji<'static, 'static> = Emoji("✖", "x");
    pub const WARNING: Emoji<'static, 'static> = Emoji("⚠", "!");
    pub const INFO: Emoji<'static, 'static> = Emoji("ℹ", "i");
    pub const ARROW: Emoji<'static, 'static> = Emoji("➜", ">");
    pub const STEP: Emoji<'static, 'static> = Emoji("⚡", "*");
}

pub fn print_header(title: &str) {
    println!();
    println!("{} {}", Symbols::STEP, style(title).bold().underlined());
    println!();
}

pub fn print_success(message: &str) {
    println!("  {} {}", style(Symbols::SUCCESS).green(), message);
}

pub fn print_error(message: &str) {
    println!("  {} {}", style(Symbols::ERROR).red(), message);
}

pub fn print_warning(message: &str) {
    println!("  {} {}", style(Symbols::WARNING).yellow(), message);
}

pub fn print_info(message: &str) {
    println!("  {} {}", style(Symbols::INFO).blue(), message);
}

pub fn log_detail(key: &str, value: &str) {
    println!("    {}: {}", style(key).dim(), value);
}

/// 读取一行输入
pub fn prompt_line(message: &str) -> String {
    print!("  {} {}: ", style("?").blue(), message);
    let _ = std::io::stdout().flush();
    Term::stdout().read_line().unwrap_or_default()
}

pub fn confirm_action(message: &str) -> bool {
    println!();
    println!("  {} {}", style("?").blue(), message);
    print!("  {} (y/N): ", style(Symbols::ARROW).cyan());
    let _ = std::io::stdout().flush();

    let input = Term::stdout().read_line().unwrap_or_default();
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes" | "true")
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        header
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

/// 每台设备一行的运行汇总
pub fn results_table(results: &[RunResult]) -> Table {
    let mut table = new_table(&["PROPERTY", "SYSTEM", "ROWS", "STATUS"]);
    for result in results {
        let status = if result.is_error() {
            let message = result
                .table
                .rows
                .first()
                .and_then(|row| row.last())
                .cloned()
                .unwrap_or_else(|| "Error".to_string());
            Cell::new(message).fg(Color::Red)
        } else {
            Cell::new("OK").fg(Color::Green)
        };
        let rows = if result.is_error() {
            "-".to_string()
        } else {
            result.table.rows.len().to_string()
        };
        table.add_row(vec![
            Cell::new(&result.property),
            Cell::new(&result.system),
            Cell::new(rows),
            status,
        ]);
    }
    table
}

/// 简单的键值两列表
pub fn key_value_table(header: [&str; 2], rows: &[(String, String)]) -> Table {
    let mut table = new_table(&header);
    for (k, v) in rows {
        table.add_row(vec![Cell::new(k), Cell::new(v)]);
    }
    table
}
