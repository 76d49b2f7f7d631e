// Vibe orchestrator
// Main entry point for the vibe binary

use clap::Parser;
use vibe_engine::cli::{Cli, Command};
use vibe_engine::config::{ChatMode, Config};
use vibe_engine::handlers::{
    handle_chat, handle_conversations, handle_serve, handle_show, OutputFormat,
};
use vibe_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Vibe orchestrator v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Serve { host, port, sync } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if sync {
                config.server.mode = ChatMode::Sync;
            }
            handle_serve(&config).await
        }

        Command::Chat {
            message,
            conversation,
        } => handle_chat(message, conversation, &config, format).await,

        Command::Conversations { limit } => handle_conversations(limit, &config, format).await,

        Command::Show { id } => handle_show(id, &config, format).await,
    }
}
