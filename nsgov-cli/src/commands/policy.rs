//! Policy catalog and configuration commands

use crate::output::{self, OutputFormat};
use crate::ConfigCommands;
use anyhow::Result;
use nsgov_engine::{GovernanceConfig, PolicyBundle, PolicyCatalog, Stage};
use tabled::Tabled;

#[derive(Tabled)]
struct PolicyRow {
    stage: String,
    cpu: String,
    memory: String,
    pods: u32,
    services: u32,
    pvcs: u32,
    retention: String,
    review: String,
    reference: String,
}

impl From<&PolicyBundle> for PolicyRow {
    fn from(b: &PolicyBundle) -> Self {
        Self {
            stage: output::colored_stage(b.stage),
            cpu: format!("{} / {}", b.quota.cpu_requests, b.quota.cpu_limits),
            memory: format!("{} / {}", b.quota.memory_requests, b.quota.memory_limits),
            pods: b.quota.max_pods,
            services: b.quota.max_services,
            pvcs: b.quota.max_pvcs,
            retention: format!("{}d", b.retention_days),
            review: format!("{}d", b.review_interval_days),
            reference: b.reference(),
        }
    }
}

#[derive(Tabled)]
struct LimitRow {
    scope: &'static str,
    min: String,
    default_request: String,
    default_limit: String,
    max: String,
}

fn limit_rows(bundle: &PolicyBundle) -> Vec<LimitRow> {
    let l = &bundle.limits;
    vec![
        LimitRow {
            scope: "container",
            min: l.container_min.to_string(),
            default_request: l.container_default_request.to_string(),
            default_limit: l.container_default_limit.to_string(),
            max: l.container_max.to_string(),
        },
        LimitRow {
            scope: "pod",
            min: l.pod_min.to_string(),
            default_request: "-".to_string(),
            default_limit: "-".to_string(),
            max: l.pod_max.to_string(),
        },
    ]
}

pub fn handle_policies_command(catalog: &PolicyCatalog, stage: Option<Stage>, format: OutputFormat) -> Result<()> {
    let bundles: Vec<&PolicyBundle> = catalog
        .bundles()
        .filter(|b| stage.map_or(true, |s| b.stage == s))
        .collect();

    if output::print_structured(&bundles, format)? {
        return Ok(());
    }

    output::print_table(bundles.iter().copied().map(PolicyRow::from).collect());

    // Limit ranges only fit on screen one stage at a time
    if let [bundle] = bundles.as_slice() {
        println!("\nLimit range:");
        output::print_table(limit_rows(bundle));
    }

    Ok(())
}

pub fn handle_config_command(command: ConfigCommands, config: &GovernanceConfig, format: OutputFormat) -> Result<()> {
    match command {
        ConfigCommands::Sample => {
            print!("{}", GovernanceConfig::generate_sample());
        }
        ConfigCommands::Show => {
            if !output::print_structured(config, format)? {
                print!("{}", toml::to_string_pretty(config)?);
            }
        }
        ConfigCommands::Validate => {
            config.validate()?;
            output::print_success("Configuration is valid");
        }
    }

    Ok(())
}
