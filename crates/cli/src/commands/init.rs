//! `chatrelay init` — Write a default config file.

use std::path::Path;

use anyhow::Context;
use chatrelay_config::AppConfig;

pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run init.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
    }

    std::fs::write(config_path, AppConfig::default_toml())
        .context("Failed to write config file")?;
    println!("✅ Created config at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Edit {} and add your API key", config_path.display());
    println!("      (or set DEEPSEEK_API_KEY in the environment)");
    println!("   2. Run: chatrelay serve");

    Ok(())
}
