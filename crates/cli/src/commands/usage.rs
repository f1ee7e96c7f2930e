//! `chatrelay usage` — Show a user's usage overview.

use std::path::Path;

use anyhow::Context;
use chatrelay_config::AppConfig;
use chatrelay_core::UsageStore;
use chatrelay_store::SqliteStore;

pub async fn run(config_path: &Path, user: &str) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).context("Failed to load config")?;

    let store = SqliteStore::new(&config.store.db_path)
        .await
        .context("Failed to open database")?;
    let overview = store
        .overview(user)
        .await
        .context("Failed to read usage records")?;

    println!("📊 Usage for {user}");
    println!("─────────────────────────────────────");
    println!("  Conversations:  {}", overview.total_conversations);
    println!("  Messages:       {}", overview.total_messages);
    println!("  Requests:       {}", overview.total_requests);
    println!("  Input tokens:   {}", overview.total_input_tokens);
    println!("  Output tokens:  {}", overview.total_output_tokens);
    println!("  Total tokens:   {}", overview.total_tokens);
    println!("  Estimated cost: ${:.6}", overview.estimated_cost);

    Ok(())
}
