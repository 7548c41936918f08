//! Component health and readiness

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthReport, Readiness};
use crate::output::{color_status, format_unix, print_json, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
}

#[derive(Serialize)]
struct HealthOutput {
    health: HealthReport,
    readiness: Readiness,
}

/// Show component health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthReport) = client.probe("healthz").await?;
    let (_, readiness): (_, Readiness) = client.probe("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&HealthOutput { health, readiness })?,
        OutputFormat::Table => {
            println!("{}", "Bridge Health".bold());
            println!("{}", "=".repeat(50));
            println!("Overall:  {}", color_status(&health.status));
            println!();

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&c.status),
                    message: c.message.clone().unwrap_or_else(|| "-".to_string()),
                    last_check: format_unix(c.last_check_timestamp),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!();

            if readiness.ready {
                print_success("Ready");
            } else {
                print_warning(&format!(
                    "Not ready: {}",
                    readiness.reason.as_deref().unwrap_or("unknown")
                ));
            }
        }
    }

    Ok(())
}
