//! `deskpilot serve`: Start the HTTP API server.

use anyhow::Context;
use deskpilot_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("DeskPilot Gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store:      {}", config.store.backend);
    println!("   Assistants: {}", config.assistants.keys().cloned().collect::<Vec<_>>().join(", "));

    deskpilot_gateway::start(config).await?;

    Ok(())
}
