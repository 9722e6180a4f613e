//! `wabridge connect`: ask a running server to connect its session.

use anyhow::{Context, Result};
use wabridge::lifecycle::ConnectOutcome;

pub async fn run(config_path: &str, server: Option<&str>) -> Result<()> {
    let client = super::client_for(config_path, server).await?;
    let response = client
        .connect()
        .await
        .context("Failed to request connection")?;

    let message = match response.outcome {
        ConnectOutcome::Started => "Connection attempt started",
        ConnectOutcome::AlreadyConnected => "Already connected",
        ConnectOutcome::InProgress => "Connection attempt already in progress",
    };
    println!("{message} (state: {})", response.state);
    Ok(())
}
