//! Vibe SDK
//!
//! Shared vocabulary of the orchestrator: the conversation data model and
//! the error taxonomy. Used by the engine, its stores and the HTTP surface.

/// Error types and handling
pub mod errors;

/// Conversation data model
pub mod types;

// Re-export commonly used types
pub use errors::{OrchestratorError, OrchestratorErrorExt};
pub use types::{
    Action, Artifact, Conversation, ConversationSummary, Decision, Message, MessageContent,
    MessageStatus, Phase, Plan, ReplyPayload, Role,
};
