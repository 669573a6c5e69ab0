//! Expiration sweep command

use crate::output::{self, OutputFormat};
use anyhow::Result;
use chrono::Utc;
use nsgov_engine::{GovernanceEngine, ReclaimAction, ReclaimOutcome};
use tabled::Tabled;

#[derive(Tabled)]
struct ActionRow {
    namespace: String,
    stage: String,
    expired: String,
    outcome: String,
    detail: String,
}

impl From<&ReclaimAction> for ActionRow {
    fn from(a: &ReclaimAction) -> Self {
        let detail = match &a.outcome {
            ReclaimOutcome::Eligible => "dry run".to_string(),
            ReclaimOutcome::Reclaimed { backup } => backup.location().to_string(),
            ReclaimOutcome::AlreadyGone => "deleted by someone else".to_string(),
            ReclaimOutcome::InProgress { since } => format!("claimed at {}", since.to_rfc3339()),
            ReclaimOutcome::Failed { kind, message } => format!("{}: {}", kind, message),
        };

        Self {
            namespace: a.name.clone(),
            stage: a
                .stage
                .map(output::colored_stage)
                .unwrap_or_else(|| "?".to_string()),
            expired: output::format_date(a.expires_at),
            outcome: a.outcome.label().to_string(),
            detail: output::truncate(&detail, 80),
        }
    }
}

/// Reclaim expired namespaces; per-namespace failures are reported, not fatal
pub async fn handle_sweep(
    engine: &GovernanceEngine,
    grace_days: Option<u32>,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let grace_days = grace_days.unwrap_or_else(|| engine.grace_days());
    let actions = engine.sweep(Utc::now(), grace_days, dry_run).await?;

    if output::print_structured(&actions, format)? {
        return Ok(());
    }

    if actions.is_empty() {
        output::print_info(&format!(
            "No namespaces past expiry plus {} days grace",
            grace_days
        ));
        return Ok(());
    }

    let failed = actions
        .iter()
        .filter(|a| matches!(a.outcome, ReclaimOutcome::Failed { .. }))
        .count();
    let rows: Vec<ActionRow> = actions.iter().map(ActionRow::from).collect();
    output::print_table(rows);

    if dry_run {
        output::print_info(&format!("{} namespace(s) would be reclaimed", actions.len() - failed));
    }
    if failed > 0 {
        output::print_warning(&format!("{} namespace(s) could not be reclaimed", failed));
    }

    Ok(())
}
