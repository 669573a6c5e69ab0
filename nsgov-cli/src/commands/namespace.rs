//! Namespace lifecycle commands

use crate::output::{self, OutputFormat};
use crate::Commands;
use anyhow::{bail, Result};
use colored::Colorize;
use nsgov_engine::{BackupHandle, CreateRequest, GovernanceEngine, NamespaceRecord, TransitionOutcome};
use tabled::Tabled;

#[derive(Tabled)]
struct NamespaceRow {
    name: String,
    stage: String,
    team: String,
    environment: String,
    expires: String,
    review: String,
    policy: String,
}

impl From<&NamespaceRecord> for NamespaceRow {
    fn from(r: &NamespaceRecord) -> Self {
        Self {
            name: r.name.clone(),
            stage: output::colored_stage(r.stage),
            team: r.team.clone(),
            environment: r.environment.clone(),
            expires: format!(
                "{} ({})",
                output::format_date(r.expires_at),
                output::format_relative_date(r.expires_at)
            ),
            review: output::format_date(r.review_at),
            policy: output::truncate(r.policy_ref.as_deref().unwrap_or("-"), 24),
        }
    }
}

/// Split repeated `key=value` arguments
fn parse_pairs(kind: &str, raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("Invalid {} '{}': expected key=value", kind, entry),
        })
        .collect()
}

fn print_record(record: &NamespaceRecord) {
    println!("Namespace {}:", record.name.bold());
    output::print_field("Stage", output::colored_stage(record.stage));
    if let Some(previous) = record.previous_stage {
        output::print_field("Previous stage", previous);
    }
    output::print_field("Team", &record.team);
    output::print_field("Environment", &record.environment);
    output::print_field("Created", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    output::print_field("Retention", format!("{} days", record.retention_days));
    output::print_field(
        "Expires",
        format!(
            "{} ({})",
            output::format_date(record.expires_at),
            output::format_relative_date(record.expires_at)
        ),
    );
    output::print_field("Review", output::format_date(record.review_at));
    output::print_field("Policy", record.policy_ref.as_deref().unwrap_or("-"));
    if let (Some(at), Some(reason)) = (&record.last_transition_at, &record.last_transition_reason) {
        output::print_field("Last transition", format!("{} ({})", at.format("%Y-%m-%d %H:%M:%S UTC"), reason));
    }
    if let Some(backup) = &record.last_backup {
        output::print_field("Last backup", backup);
    }
    if let Some(since) = &record.deletion_started_at {
        output::print_field("Reclaiming since", since.to_rfc3339().red());
    }
    for (key, value) in &record.labels {
        output::print_field("Label", format!("{}={}", key, value));
    }
    for (key, value) in &record.annotations {
        output::print_field("Annotation", format!("{}={}", key, value));
    }
}

fn print_backup(backup: &BackupHandle) {
    output::print_field("Backup", backup.location());
    output::print_field("Checksum", backup.checksum());
    output::print_field("Resources", backup.resource_count());
}

pub async fn handle_namespace_command(
    command: Commands,
    engine: &GovernanceEngine,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::Create {
            name,
            team,
            environment,
            stage,
            retention_days,
            labels,
            annotations,
        } => {
            let mut request = CreateRequest::new(name, team, environment);
            if let Some(stage) = stage {
                request = request.stage(stage);
            }
            if let Some(days) = retention_days {
                request = request.retention_days(days);
            }
            for (key, value) in parse_pairs("label", &labels)? {
                request = request.label(key, value);
            }
            for (key, value) in parse_pairs("annotation", &annotations)? {
                request = request.annotation(key, value);
            }

            let record = engine.create(request).await?;
            if !output::print_structured(&record, format)? {
                output::print_success(&format!("Namespace '{}' created", record.name));
                print_record(&record);
            }
        }

        Commands::Transition {
            name, stage, reason, ..
        } => {
            let outcome = engine.transition(&name, stage, &reason).await?;
            if output::print_structured(&outcome, format)? {
                return Ok(());
            }

            match &outcome {
                TransitionOutcome::Unchanged { record } => {
                    output::print_info(&format!("Namespace '{}' is already {}", name, record.stage));
                }
                TransitionOutcome::Transitioned { record, backup } => {
                    output::print_success(&format!(
                        "Namespace '{}' moved to {}",
                        name,
                        output::colored_stage(record.stage)
                    ));
                    if let Some(backup) = backup {
                        print_backup(backup);
                    }
                    print_record(record);
                }
                TransitionOutcome::Reclaimed { backup } => {
                    output::print_success(&format!("Namespace '{}' backed up and deleted", name));
                    print_backup(backup);
                }
            }
        }

        Commands::Delete { name } => {
            let backup = engine.delete(&name).await?;
            if !output::print_structured(&backup, format)? {
                output::print_success(&format!("Namespace '{}' backed up and deleted", name));
                print_backup(&backup);
            }
        }

        Commands::List { stage, team } => {
            let records: Vec<NamespaceRecord> = engine
                .list()
                .await?
                .into_iter()
                .filter(|r| stage.map_or(true, |s| r.stage == s))
                .filter(|r| team.as_deref().map_or(true, |t| r.team == t))
                .collect();

            if !output::print_structured(&records, format)? {
                let rows: Vec<NamespaceRow> = records.iter().map(NamespaceRow::from).collect();
                output::print_table(rows);
            }
        }

        Commands::Show { name } => {
            let record = engine.get(&name).await?;
            if !output::print_structured(&record, format)? {
                print_record(&record);
            }
        }

        Commands::Renew { name, retention_days } => {
            let record = engine.renew(&name, retention_days).await?;
            if !output::print_structured(&record, format)? {
                output::print_success(&format!(
                    "Namespace '{}' renewed until {}",
                    name,
                    output::format_date(record.expires_at)
                ));
            }
        }

        Commands::Diagnose { .. }
        | Commands::Sweep { .. }
        | Commands::Policies { .. }
        | Commands::Config { .. }
        | Commands::Completions { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs("label", &["cost-center=cc-42".to_string(), "tier=".to_string()]).unwrap();
        assert_eq!(pairs[0], ("cost-center".to_string(), "cc-42".to_string()));
        assert_eq!(pairs[1], ("tier".to_string(), String::new()));

        assert!(parse_pairs("label", &["novalue".to_string()]).is_err());
        assert!(parse_pairs("label", &["=x".to_string()]).is_err());
    }
}
