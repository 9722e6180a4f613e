//! `wabridge status`: print the connection state of a running server.

use anyhow::{Context, Result};

pub async fn run(config_path: &str, server: Option<&str>) -> Result<()> {
    let client = super::client_for(config_path, server).await?;
    let status = client
        .status()
        .await
        .context("Failed to query server status")?;

    println!("instance:  {}", status.instance);
    println!("state:     {}", status.state);
    println!("connected: {}", status.connected);
    if let Some(account) = status.account {
        println!("account:   {account}");
    }
    println!("updated:   {}", status.updated_at.to_rfc3339());
    Ok(())
}
