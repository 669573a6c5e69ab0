//! Namespace diagnostics command

use crate::output::{self, OutputFormat};
use anyhow::Result;
use colored::Colorize;
use nsgov_engine::diagnostics::{CheckResult, Recommendation};
use nsgov_engine::GovernanceEngine;
use tabled::Tabled;

#[derive(Tabled)]
struct CheckRow {
    category: String,
    check: String,
    result: String,
    detail: String,
}

impl From<&CheckResult> for CheckRow {
    fn from(c: &CheckResult) -> Self {
        Self {
            category: c.category.to_string(),
            check: c.check.title().to_string(),
            result: if c.passed {
                "pass".green().to_string()
            } else {
                "fail".red().to_string()
            },
            detail: c.detail.clone(),
        }
    }
}

#[derive(Tabled)]
struct RecommendationRow {
    priority: String,
    category: String,
    recommendation: String,
}

impl From<&Recommendation> for RecommendationRow {
    fn from(r: &Recommendation) -> Self {
        Self {
            priority: output::colored_priority(r.priority),
            category: r.category.to_string(),
            recommendation: r.message.clone(),
        }
    }
}

/// Print a namespace's readiness report; a low score is not an error
pub async fn handle_diagnose(
    engine: &GovernanceEngine,
    name: &str,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let report = engine.diagnose(name).await?;
    if output::print_structured(&report, format)? {
        return Ok(());
    }

    println!("Namespace {}:", report.namespace.bold());
    output::print_field(
        "Score",
        format!(
            "{}/{} ({}%) {}",
            report.score,
            report.max_score,
            report.percentage,
            output::colored_bucket(report.bucket)
        ),
    );
    println!();

    let checks: Vec<CheckRow> = report
        .checks
        .iter()
        .filter(|c| verbose || !c.passed)
        .map(CheckRow::from)
        .collect();
    if !checks.is_empty() {
        output::print_table(checks);
    }

    if !report.recommendations.is_empty() {
        println!("\nRecommendations:");
        let rows: Vec<RecommendationRow> = report.recommendations.iter().map(RecommendationRow::from).collect();
        output::print_table(rows);
    }

    for missing in &report.unavailable {
        output::print_warning(&format!(
            "{} could not be evaluated: {}",
            missing.check.title(),
            missing.error
        ));
    }

    Ok(())
}
