//! CLI interface for Vibe
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for the orchestrator binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vibe conversational workflow orchestrator
///
/// Carries a coding task through clarification, permission, planning and
/// generation by delegating to remote decide/plan/generate services.
#[derive(Parser, Debug)]
#[command(name = "vibe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Answer POST /chat synchronously instead of returning 202
        #[arg(long)]
        sync: bool,
    },

    /// Run a single turn and print the reply
    Chat {
        /// The user message
        message: String,

        /// Continue an existing conversation
        #[arg(short, long, value_name = "ID")]
        conversation: Option<String>,
    },

    /// List recently updated conversations
    Conversations {
        /// Number of conversations to show (default: 20)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a stored conversation
    Show {
        /// Conversation ID
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::parse_from(["vibe", "--json", "serve", "--port", "9000", "--sync"]);
        assert!(cli.json);
        match cli.command {
            Command::Serve { host, port, sync } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
                assert!(sync);
            }
            other => panic!("Expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_with_conversation() {
        let cli = Cli::parse_from(["vibe", "chat", "yes", "--conversation", "abc"]);
        match cli.command {
            Command::Chat {
                message,
                conversation,
            } => {
                assert_eq!(message, "yes");
                assert_eq!(conversation.as_deref(), Some("abc"));
            }
            other => panic!("Expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_conversations_default_limit() {
        let cli = Cli::parse_from(["vibe", "conversations"]);
        assert!(matches!(cli.command, Command::Conversations { limit: 20 }));
    }
}
