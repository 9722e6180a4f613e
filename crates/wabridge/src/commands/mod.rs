pub mod connect;
pub mod serve;
pub mod status;

use anyhow::Result;

use wabridge::client::BridgeClient;
use wabridge::config::Config;

/// Build a client for a running server from the config file, or `server` if given.
async fn client_for(config_path: &str, server: Option<&str>) -> Result<BridgeClient> {
    let config = Config::load(config_path).await?;
    let base_url = server
        .map(str::to_string)
        .unwrap_or_else(|| config.server.local_url());
    Ok(BridgeClient::new(&base_url, config.instance.api_key))
}
