//! Current snapshot contents

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, BridgeStatus};
use crate::output::{format_age, print_info, print_json, print_warning, OutputFormat};

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Render a JSON scalar without quoting strings
fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Show every field of the latest snapshot
pub async fn show_snapshot(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: BridgeStatus = client.get("status").await?;

    let Some(snapshot) = status.snapshot else {
        print_warning("No snapshot has been polled yet");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => {
            println!("{}", "Latest Snapshot".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Captured:   {} ({})",
                snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
                format_age(snapshot.captured_at, Utc::now())
            );
            println!("Generation: {}", status.generation);
            println!();

            let rows: Vec<FieldRow> = snapshot
                .fields
                .iter()
                .map(|(name, value)| FieldRow {
                    name: name.clone(),
                    value: display_value(value),
                })
                .collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            match &snapshot.position {
                Some(p) => {
                    println!();
                    println!("{}", "Position".bold());
                    println!("{}", "-".repeat(50));
                    println!("Latitude:   {:.6}", p.latitude);
                    println!("Longitude:  {:.6}", p.longitude);
                    if let Some(heading) = p.heading {
                        println!("Heading:    {:.1}°", heading);
                    }
                    if let Some(altitude) = p.altitude {
                        println!("Altitude:   {:.1} m", altitude);
                    }
                }
                None => print_info("No position attached"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("P")), "P");
        assert_eq!(display_value(&json!(80)), "80");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(12.5)), "12.5");
    }
}
