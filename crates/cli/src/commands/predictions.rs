//! Prediction commands: latest, history, on-demand predict and watch

use anyhow::Result;
use colored::Colorize;
use std::time::Duration;
use tabled::Tabled;

use crate::client::{ApiClient, Prediction};
use crate::output::{
    color_confidence, color_status, format_confidence, format_timestamp, print_info, print_json,
    print_table, print_warning, OutputFormat,
};

/// Row for history table
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "AQI")]
    aqi: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

impl From<&Prediction> for PredictionRow {
    fn from(p: &Prediction) -> Self {
        Self {
            timestamp: format_timestamp(&p.timestamp),
            aqi: format!("{:.1}", p.aqi),
            status: color_status(&p.predicted_status),
            confidence: color_confidence(p.confidence()),
        }
    }
}

#[derive(Tabled)]
struct ProbabilityRow {
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Probability")]
    probability: String,
}

fn print_prediction(prediction: &Prediction) {
    println!("{}", "AQI Prediction".bold());
    println!("{}", "=".repeat(50));
    println!("AQI:                    {:.1}", prediction.aqi);
    println!(
        "Status:                 {}",
        color_status(&prediction.predicted_status)
    );
    println!(
        "Confidence:             {}",
        color_confidence(prediction.confidence())
    );
    println!(
        "Timestamp:              {}",
        format_timestamp(&prediction.timestamp).dimmed()
    );
    println!();

    let mut rows: Vec<_> = prediction.probabilities.iter().collect();
    rows.sort_by(|a, b| b.1.total_cmp(a.1));
    let rows: Vec<ProbabilityRow> = rows
        .into_iter()
        .map(|(class, p)| ProbabilityRow {
            class: color_status(class),
            probability: format_confidence(*p),
        })
        .collect();
    print_table(&rows);
}

/// Show the latest stream prediction
pub async fn show_latest(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let Some(latest) = client.latest().await? else {
        print_warning("No predictions received yet");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&latest)?,
        OutputFormat::Table => print_prediction(&latest),
    }
    Ok(())
}

/// Show recent stream predictions, oldest first
pub async fn show_history(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let history = client.history(limit).await?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            let rows: Vec<PredictionRow> = history.history.iter().map(PredictionRow::from).collect();
            print_table(&rows);
            println!();
            print_info(&format!("{} prediction(s)", history.count));
        }
    }
    Ok(())
}

/// Request an on-demand prediction
pub async fn predict(client: &ApiClient, aqi: f64, format: OutputFormat) -> Result<()> {
    let prediction = client.predict(aqi).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => print_prediction(&prediction),
    }
    Ok(())
}

/// Poll `/latest` until Ctrl-C, printing each new prediction once
pub async fn watch(client: &ApiClient, interval: Duration, format: OutputFormat) -> Result<()> {
    print_info(&format!(
        "Watching {} every {}s (Ctrl-C to stop)",
        client.base_url(),
        interval.as_secs_f64()
    ));

    let mut ticker = tokio::time::interval(interval);
    let mut last_seen: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        let latest = match client.latest().await {
            Ok(Some(latest)) => latest,
            Ok(None) => continue,
            Err(e) => {
                print_warning(&format!("{:#}", e));
                continue;
            }
        };

        if last_seen.as_deref() == Some(latest.timestamp.as_str()) {
            continue;
        }

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&latest)?),
            OutputFormat::Table => println!(
                "{}  AQI {:>6.1}  {}  {}",
                format_timestamp(&latest.timestamp).dimmed(),
                latest.aqi,
                color_status(&latest.predicted_status),
                color_confidence(latest.confidence())
            ),
        }
        last_seen = Some(latest.timestamp);
    }

    Ok(())
}
