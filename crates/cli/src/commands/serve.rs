//! `chatrelay serve` — Start the HTTP gateway.

use std::path::Path;

use anyhow::Context;
use chatrelay_config::AppConfig;

pub async fn run(config_path: &Path, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config =
        AppConfig::load(config_path).context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("chatrelay gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Database:  {}", config.store.db_path);
    if !config.has_api_key() {
        println!("   ⚠️  No API key configured; generation requests will be rejected");
    }

    chatrelay_gateway::start(config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Gateway exited with an error")?;

    Ok(())
}
