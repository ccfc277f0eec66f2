//! Vibration Monitor CLI
//!
//! Queries hourly/daily rollups, recent anomalies and service health from
//! a running monitor.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use commands::{anomalies, history, status};

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Vibration Monitor CLI
#[derive(Parser)]
#[command(name = "vmon")]
#[command(author, version, about = "CLI for the Vibration Monitor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via VMON_API_URL env var)
    #[arg(long, env = "VMON_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show hourly averages for one day
    Day {
        /// Day to show (YYYY-MM-DD)
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
    },

    /// Show daily averages over a date range
    Range {
        /// First day (YYYY-MM-DD)
        #[arg(value_parser = parse_date)]
        start: NaiveDate,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(value_parser = parse_date)]
        end: NaiveDate,
    },

    /// Show the most recent anomalies
    Anomalies {
        /// Maximum number of events
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Show monitor health and readiness
    Status,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| format!("expected YYYY-MM-DD, got '{}'", raw))
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let saved = config::Config::load()?;

    let api_url = cli
        .api_url
        .or(saved.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let format = cli
        .format
        .or_else(|| saved.default_format.as_deref().and_then(output::OutputFormat::from_name))
        .unwrap_or_default();

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Day { date } => history::show_day(&client, date, format).await?,
        Commands::Range { start, end } => history::show_range(&client, start, end, format).await?,
        Commands::Anomalies { limit } => anomalies::show_anomalies(&client, limit, format).await?,
        Commands::Status => status::show_status(&client, format).await?,
    }

    Ok(())
}
