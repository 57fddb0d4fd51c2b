use anyhow::{Context, Result};
use clap::Parser;
use governor::{
    api::{LeaseParams, StatusResponse},
    cli::{Cli, Commands},
    config::NodeConfig,
    inventory,
};
use governor_lease::Lease;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    match cli.command {
        Commands::Run(args) => {
            let config = NodeConfig::load_or_default(cli.config.as_deref())?.with_overrides(&args);
            governor::run(config).await
        }
        Commands::Lease { duration, api } => {
            let response = reqwest::Client::new()
                .post(format!("{api}/lease"))
                .json(&LeaseParams {
                    duration_secs: duration,
                })
                .send()
                .await
                .with_context(|| format!("contacting {api}"))?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("lease refused ({status}): {body}");
            }
            let lease: Lease = response.json().await.context("decoding lease")?;
            println!("{}", serde_json::to_string_pretty(&lease)?);
            Ok(())
        }
        Commands::Status { api } => {
            let status: StatusResponse = reqwest::get(format!("{api}/status"))
                .await
                .with_context(|| format!("contacting {api}"))?
                .json()
                .await
                .context("decoding status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Inventory { host } => {
            let config = NodeConfig::load_or_default(cli.config.as_deref())?;
            let host = host.unwrap_or_else(|| config.host());
            let resources = inventory::load(config.inventory.as_deref()).list_resources(&host);
            println!("{}", serde_json::to_string_pretty(&resources)?);
            Ok(())
        }
    }
}
