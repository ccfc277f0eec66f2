//! Monitor health and readiness

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, Health, Readiness};
use crate::output::{color_status, print_json, print_rows, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct StatusReport {
    health: Health,
    readiness: Readiness,
}

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, Health) = client.get_with_status("healthz").await?;
    let (_, readiness): (_, Readiness) = client.get_with_status("readyz").await?;

    if format == OutputFormat::Json {
        return print_json(&StatusReport { health, readiness });
    }

    println!("{}", "Monitor Status".bold());
    println!("{}", "=".repeat(50));
    println!("Overall:  {}", color_status(&health.status));
    println!(
        "Ready:    {}",
        color_status(if readiness.ready { "ready" } else { "not ready" })
    );
    println!();

    let rows = health
        .components
        .iter()
        .map(|(name, c)| ComponentRow {
            name: name.clone(),
            status: color_status(&c.status),
            failures: c.consecutive_failures,
            message: c.message.clone().unwrap_or_default(),
        })
        .collect();
    print_rows(rows, "No components registered");

    match readiness.reason {
        None if readiness.ready => print_success("Monitor is accepting data"),
        Some(reason) => print_warning(&reason),
        None => {}
    }

    Ok(())
}
