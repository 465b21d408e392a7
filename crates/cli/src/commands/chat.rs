//! `deskpilot chat`: Interactive or single-message chat mode.

use anyhow::{Context, bail};
use deskpilot_agent::{ChatService, TurnEvent};
use deskpilot_config::AppConfig;
use deskpilot_core::message::SessionKey;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::debug;

pub struct ChatArgs {
    pub assistant: String,
    pub session: Option<String>,
    pub message: Option<String>,
    pub tenant: String,
    pub user: String,
}

pub async fn run(args: ChatArgs) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;

    // Check for API key early and give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY=sk-or-v1-...   (recommended)");
        eprintln!("    OPENAI_API_KEY=sk-...             (for OpenAI direct)");
        eprintln!("    DESKPILOT_API_KEY=sk-...          (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let state = deskpilot_gateway::build_state(&config).await?;
    let service = state.service;
    if service.assistant(&args.assistant).is_none() {
        let known: Vec<&str> = service.assistants().map(|p| p.name.as_str()).collect();
        bail!(
            "Unknown assistant '{}'. Configured: {}",
            args.assistant,
            known.join(", ")
        );
    }

    let key = match args.session {
        Some(id) => SessionKey::new(&args.tenant, &args.user, id),
        None => SessionKey::generate(&args.tenant, &args.user),
    };
    debug!(session = %key, assistant = %args.assistant, "Chat session ready");

    if let Some(message) = args.message {
        return send(&service, &args.assistant, &key, &message).await;
    }

    println!();
    println!("  DeskPilot, interactive mode");
    println!();
    println!("  Assistant: {}", args.assistant);
    println!("  Model:     {}", config.default_model);
    println!("  Session:   {}", key.session_id);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        print!("  Assistant > ");
        if let Err(e) = send(&service, &args.assistant, &key, line).await {
            eprintln!("  [Error] {e:#}");
        }
        println!();
    }

    println!();
    println!("  Session saved as {}", key.session_id);
    Ok(())
}

/// Submit one turn and print the relayed chunks as they arrive.
async fn send(
    service: &ChatService,
    assistant: &str,
    key: &SessionKey,
    text: &str,
) -> anyhow::Result<()> {
    let mut reply = service.submit_turn(assistant, key, text).await?;
    let mut stdout = std::io::stdout();

    while let Some(event) = reply.events.next().await {
        match event {
            TurnEvent::Chunk { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            TurnEvent::Done => break,
        }
    }
    writeln!(stdout)?;
    Ok(())
}
