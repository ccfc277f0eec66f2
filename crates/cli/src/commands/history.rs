//! Hourly and daily rollup queries

use anyhow::Result;
use chrono::NaiveDate;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, History};
use crate::output::{format_reading, format_timestamp, print_info, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct RollupRow {
    #[tabled(rename = "Machine")]
    machine: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Left Vib")]
    left: String,
    #[tabled(rename = "Right Vib")]
    right: String,
    #[tabled(rename = "Temp")]
    temp: String,
}

fn rows(history: &History) -> Vec<RollupRow> {
    history
        .by_machine()
        .map(|(machine, r)| RollupRow {
            machine: machine.to_string(),
            time: format_timestamp(&r.timestamp),
            left: format_reading(r.avg_left),
            right: format_reading(r.avg_right),
            temp: format_reading(r.avg_temp),
        })
        .collect()
}

/// Hourly averages of both machines for one day
pub async fn show_day(client: &ApiClient, date: NaiveDate, format: OutputFormat) -> Result<()> {
    let history: History = client.get(&format!("history/{}", date)).await?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            println!("{} {}", "Hourly averages for".bold(), date.to_string().cyan());
            print_rows(rows(&history), "No hourly rollups recorded for this day");
        }
    }

    Ok(())
}

/// Daily averages of both machines over an inclusive range
pub async fn show_range(
    client: &ApiClient,
    start: NaiveDate,
    end: NaiveDate,
    format: OutputFormat,
) -> Result<()> {
    if start > end {
        anyhow::bail!("start date {} is after end date {}", start, end);
    }

    let history: History = client.get(&format!("history/{}/{}", start, end)).await?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            println!(
                "{} {} .. {}",
                "Daily averages".bold(),
                start.to_string().cyan(),
                end.to_string().cyan()
            );
            if !history.is_empty() {
                let days = (end - start).num_days() + 1;
                print_info(&format!(
                    "{} of {} days recorded for machine1, {} for machine2",
                    history.machine_1.len(),
                    days,
                    history.machine_2.len()
                ));
            }
            print_rows(rows(&history), "No daily rollups recorded in this range");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Rollup;

    #[test]
    fn test_rows_are_tagged_and_formatted() {
        let rollup = |ts: &str, v: f64| Rollup {
            timestamp: ts.to_string(),
            avg_left: v,
            avg_right: v,
            avg_temp: v,
        };
        let history = History {
            machine_1: vec![rollup("2024-03-01T10:00:00", 1.0)],
            machine_2: vec![rollup("2024-03-01T10:00:00", 2.25), rollup("2024-03-01T11:00:00", 3.0)],
        };

        let rows = rows(&history);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].machine, "machine1");
        assert_eq!(rows[1].machine, "machine2");
        assert_eq!(rows[1].left, "2.250");
        assert_eq!(rows[2].time, "2024-03-01 11:00");
    }

    #[tokio::test]
    async fn test_range_rejects_reversed_dates() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let err = show_range(&client, start, end, OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after end date"));
    }

    #[tokio::test]
    async fn test_show_day_requests_date_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/history/2024-03-01")
            .with_body(r#"{"machine_1":[],"machine_2":[]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        show_day(&client, date, OutputFormat::Table).await.unwrap();

        mock.assert_async().await;
    }
}
