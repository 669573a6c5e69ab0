//! Output formatting for CLI
//!
//! Unified table/JSON/YAML rendering shared by every command.

use chrono::{NaiveDate, Utc};
use colored::Colorize;
use nsgov_engine::{DiagnosticBucket, Priority, Stage};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "yaml" | "yml" => OutputFormat::Yaml,
            _ => OutputFormat::Table,
        }
    }
}

/// Print data as a table using the tabled crate
pub fn print_table<T: Tabled>(data: Vec<T>) {
    if data.is_empty() {
        println!("{}", "No results found".yellow());
        return;
    }

    let table = Table::new(data);
    println!("{}", table);
}

/// Print data as pretty-printed JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(data)?;
    println!("{}", yaml);
    Ok(())
}

/// Print a structured value when a machine format was requested
///
/// Returns `false` for table output so the caller renders its own view.
pub fn print_structured<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<bool> {
    match format {
        OutputFormat::Json => print_json(data)?,
        OutputFormat::Yaml => print_yaml(data)?,
        OutputFormat::Table => return Ok(false),
    }
    Ok(true)
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message with blue i
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message with yellow triangle
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an aligned `key: value` line
pub fn print_field(key: &str, value: impl std::fmt::Display) {
    println!("  {:<22} {}", format!("{}:", key).bold(), value);
}

pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Days from today until `date`, e.g. "in 12d" or "3d ago"
pub fn format_relative_date(date: Option<NaiveDate>) -> String {
    let Some(date) = date else {
        return "-".to_string();
    };

    let days = (date - Utc::now().date_naive()).num_days();
    match days {
        0 => "today".to_string(),
        d if d > 0 => format!("in {}d", d),
        d => format!("{}d ago", -d),
    }
}

pub fn colored_stage(stage: Stage) -> String {
    let name = stage.to_string();
    match stage {
        Stage::Development => name.cyan().to_string(),
        Stage::Testing => name.blue().to_string(),
        Stage::Production => name.green().to_string(),
        Stage::Deprecated => name.yellow().to_string(),
        Stage::Archived => name.dimmed().to_string(),
        Stage::Deleting => name.red().to_string(),
    }
}

pub fn colored_bucket(bucket: DiagnosticBucket) -> String {
    let name = bucket.to_string();
    match bucket {
        DiagnosticBucket::Excellent => name.green().bold().to_string(),
        DiagnosticBucket::Good => name.green().to_string(),
        DiagnosticBucket::Fair => name.yellow().to_string(),
        DiagnosticBucket::Poor => name.red().bold().to_string(),
    }
}

pub fn colored_priority(priority: Priority) -> String {
    let name = priority.to_string();
    match priority {
        Priority::High => name.red().to_string(),
        Priority::Medium => name.yellow().to_string(),
        Priority::Low => name.dimmed().to_string(),
    }
}

/// Truncate a string to max length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
