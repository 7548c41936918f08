//! Sink delivery status

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, BridgeStatus, SinkStatus};
use crate::output::{
    color_status, format_age, format_secs, print_json, print_success, print_warning,
    OutputFormat,
};

/// Row for the sinks table
#[derive(Tabled)]
struct SinkRow {
    #[tabled(rename = "Sink")]
    name: String,
    #[tabled(rename = "Delivery")]
    delivery: String,
    #[tabled(rename = "Gate")]
    gate: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

impl From<&SinkStatus> for SinkRow {
    fn from(s: &SinkStatus) -> Self {
        let delivery = if s.dirty { "dirty" } else { "clean" };
        let gate = if s.open {
            color_status("open")
        } else {
            format!(
                "{} ({})",
                color_status("cooling"),
                format_secs(s.cooldown_remaining_secs)
            )
        };

        Self {
            name: s.name.clone(),
            delivery: color_status(delivery),
            gate,
            failures: s.consecutive_failures,
            last_error: s.last_error.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Show the latest snapshot summary and per-sink delivery state
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: BridgeStatus = client.get("status").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Bridge Status".bold());
            println!("{}", "=".repeat(60));
            println!("Generation:  {}", status.generation.to_string().cyan());
            match &status.snapshot {
                Some(snapshot) => {
                    println!(
                        "Captured:    {} ({})",
                        snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        format_age(snapshot.captured_at, Utc::now())
                    );
                    println!("Fields:      {}", snapshot.fields.len());
                }
                None => println!("Captured:    {}", "no snapshot yet".yellow()),
            }
            println!();

            let rows: Vec<SinkRow> = status.sinks.iter().map(SinkRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            let pending = status.sinks.iter().filter(|s| s.dirty).count();
            if pending == 0 {
                print_success("Every sink has the latest snapshot");
            } else {
                print_warning(&format!(
                    "{} of {} sinks still waiting for the latest snapshot",
                    pending,
                    status.sinks.len()
                ));
            }
        }
    }

    Ok(())
}
