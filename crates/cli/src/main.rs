//! DeskPilot CLI, the main entry point.
//!
//! Commands:
//! - `onboard` : Write the default config
//! - `serve`   : Start the HTTP gateway
//! - `chat`    : Interactive or single-message chat with an assistant
//! - `sessions`: List stored sessions
//! - `config`  : Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "deskpilot",
    about = "DeskPilot, tool-calling assistants for a business dashboard",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with an assistant
    Chat {
        /// Assistant profile to talk to
        #[arg(short, long, default_value = "ops")]
        assistant: String,

        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Tenant the session belongs to
        #[arg(long, env = "DESKPILOT_TENANT", default_value = "demo")]
        tenant: String,

        /// User the session belongs to
        #[arg(long, env = "DESKPILOT_USER", default_value = "local")]
        user: String,
    },

    /// List stored sessions
    Sessions {
        #[arg(long, env = "DESKPILOT_TENANT", default_value = "demo")]
        tenant: String,

        #[arg(long, env = "DESKPILOT_USER", default_value = "local")]
        user: String,
    },

    /// Show the effective configuration with secrets redacted
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run()?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            assistant,
            session,
            message,
            tenant,
            user,
        } => {
            commands::chat::run(commands::chat::ChatArgs {
                assistant,
                session,
                message,
                tenant,
                user,
            })
            .await?
        }
        Commands::Sessions { tenant, user } => commands::sessions::run(&tenant, &user).await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path();
            } else {
                commands::config_cmd::show()?;
            }
        }
    }

    Ok(())
}
