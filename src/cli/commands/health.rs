use anyhow::Context;
use clap::Args;
use std::time::Duration;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::diagnostics::{DiagnosticReport, ServiceState};

#[derive(Args)]
pub struct HealthArgs {
    #[arg(long, default_value = "http://localhost:3000", help = "Server base URL")]
    pub url: String,

    #[arg(long, default_value_t = 5, help = "Request timeout in seconds")]
    pub timeout: u64,
}

#[derive(serde::Deserialize)]
struct Envelope {
    data: DiagnosticReport,
}

pub async fn handle(args: HealthArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()
        .context("creating HTTP client")?;

    let url = format!("{}/health", args.url.trim_end_matches('/'));
    let envelope: Envelope = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?
        .json()
        .await
        .context("parsing diagnostic report")?;
    let report = envelope.data;

    match output_format {
        OutputFormat::Json => {
            output_success(output_format, "Diagnostic report", Some(serde_json::to_value(&report)?))?;
        }
        OutputFormat::Text => {
            println!("Overall: {:?}", report.status);
            for service in &report.services {
                match &service.reason {
                    Some(reason) => println!("  {:<16} {:?} ({})", service.name, service.status, reason),
                    None => println!("  {:<16} {:?}", service.name, service.status),
                }
            }
        }
    }

    if report.status == ServiceState::Unavailable {
        anyhow::bail!("server reports unavailable services");
    }
    Ok(())
}
