//! Recent anomaly events

use anyhow::Result;
use tabled::Tabled;

use crate::client::{Anomaly, ApiClient};
use crate::output::{color_score, format_reading, format_timestamp, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Machine")]
    machine: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
}

pub async fn show_anomalies(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let anomalies: Vec<Anomaly> = client.get(&format!("anomalies?limit={}", limit)).await?;

    match format {
        OutputFormat::Json => print_json(&anomalies)?,
        OutputFormat::Table => {
            let rows = anomalies
                .iter()
                .map(|a| AnomalyRow {
                    time: format_timestamp(&a.timestamp),
                    machine: a.machine_name.clone(),
                    score: color_score(a.score, a.threshold),
                    threshold: format_reading(a.threshold),
                })
                .collect();
            print_rows(rows, "No anomalies recorded");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_is_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/anomalies")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "5".into()))
            .with_body(
                r#"[{"machine_name":"machine2","score":14.2,"threshold":12.0,"timestamp":"2024-03-01T10:05:00"}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        show_anomalies(&client, 5, OutputFormat::Table).await.unwrap();

        mock.assert_async().await;
    }
}
