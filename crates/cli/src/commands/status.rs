//! `chatrelay status` — Show effective configuration.

use std::path::Path;

use anyhow::Context;
use chatrelay_config::AppConfig;

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).context("Failed to load config")?;

    println!("chatrelay status");
    println!("================");
    println!("  Config file:    {}", config_path.display());
    println!("  Gateway:        {}:{}", config.gateway.host, config.gateway.port);
    println!("  Database:       {}", config.store.db_path);
    println!("  Backend:        {}", config.backend.base_url);
    println!("  Primary model:  {}", config.backend.primary_model);
    println!("  Reasoning:      {}", config.backend.reasoning_model);
    println!("  Max tokens:     {}", config.backend.max_tokens);
    println!("  Temperature:    {}", config.backend.temperature);
    println!("  History window: {}", config.pipeline.history_window);
    println!("  Client buffer:  {}", config.pipeline.client_buffer);
    println!("  Known tokens:   {}", config.gateway.tokens.len());

    if config.has_api_key() {
        println!("\n  ✅ API key configured");
    } else {
        println!("\n  ⚠️  No API key; set DEEPSEEK_API_KEY or edit the config");
    }

    Ok(())
}
