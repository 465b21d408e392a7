//! `deskpilot config`: Show the effective configuration.

use anyhow::Context;
use deskpilot_config::AppConfig;

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");

    if !config.has_api_key() {
        eprintln!("No API key set (set DESKPILOT_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)");
    }
    Ok(())
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}
