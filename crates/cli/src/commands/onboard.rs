//! `deskpilot onboard`: First-time setup.

use deskpilot_config::AppConfig;
use std::path::Path;

pub fn run() -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();

    println!("DeskPilot, first-time setup");
    println!("===========================\n");

    if write_default_config(&config_dir)? {
        let config_path = config_dir.join("config.toml");
        println!("Created config.toml at: {}", config_path.display());
        println!("\nNext steps:");
        println!("   1. Edit {} and add your API key", config_path.display());
        println!("   2. Run: deskpilot chat");
        println!("   3. Or serve the HTTP API: deskpilot serve\n");
    } else {
        println!(
            "Config already exists at: {}",
            config_dir.join("config.toml").display()
        );
        println!("   Edit it manually or delete and re-run onboard.\n");
    }

    Ok(())
}

/// Write the default config into `dir`. Returns `false` when one exists.
pub fn write_default_config(dir: &Path) -> std::io::Result<bool> {
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    Ok(true)
}
