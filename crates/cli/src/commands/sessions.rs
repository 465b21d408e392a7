//! `deskpilot sessions`: List one user's stored sessions.

use anyhow::Context;
use deskpilot_config::AppConfig;
use deskpilot_core::store::MessageStore;

pub async fn run(tenant: &str, user: &str) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let store = deskpilot_gateway::open_store(&config).await?;
    let sessions = store.sessions(tenant, user).await?;

    if sessions.is_empty() {
        println!("No sessions for {tenant}/{user}.");
        return Ok(());
    }

    println!("{:<38} {:>5}  {:<20} TITLE", "SESSION", "MSGS", "UPDATED");
    for session in sessions {
        println!(
            "{:<38} {:>5}  {:<20} {}",
            session.session_id,
            session.message_count,
            session.updated_at.format("%Y-%m-%d %H:%M:%S"),
            session.title.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
