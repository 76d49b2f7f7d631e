//! Error types and handling
//!
//! This module provides the error types used throughout the orchestrator.
//! All errors implement the `OrchestratorErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! The hint returned for any error is a static string. Causes reported by
//! remote capabilities or the store (URLs, status bodies, SQL messages) are
//! kept in the `Display` output for logs and never reach the end user.

use thiserror::Error;

/// Trait for orchestrator error extensions
pub trait OrchestratorErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// remote endpoints, store internals or the failing cause.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may succeed when the user simply tries again.
    /// Non-recoverable errors point at a protocol or configuration fault.
    fn is_recoverable(&self) -> bool;
}

/// Main orchestrator error type
///
/// # Error Categories
///
/// - **Request**: malformed input from the caller
/// - **Capability**: a remote Decide/Plan/Generate call failed
/// - **Protocol**: the decision service produced something the turn cannot act on
/// - **Store**: conversation persistence failures and revision conflicts
/// - **Configuration**: invalid or unreadable configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{OrchestratorError, OrchestratorErrorExt};
///
/// let error = OrchestratorError::CapabilityUnavailable {
///     capability: "decide".to_string(),
///     cause: "connection refused".to_string(),
/// };
/// assert!(!error.user_hint().contains("connection refused"));
/// assert!(error.is_recoverable());
///
/// assert!(!OrchestratorError::MissingPlan.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum OrchestratorError {
    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Remote capability errors
    #[error("Capability '{capability}' unavailable: {cause}")]
    CapabilityUnavailable { capability: String, cause: String },

    // Protocol errors
    #[error("Engineer action dispatched with no plan on record")]
    MissingPlan,

    #[error("Unknown action returned by decision service: {0}")]
    UnknownAction(String),

    // Store errors
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Conversation revision conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Shorthand for a failed remote call
    pub fn capability(capability: impl Into<String>, cause: impl ToString) -> Self {
        Self::CapabilityUnavailable {
            capability: capability.into(),
            cause: cause.to_string(),
        }
    }

    /// Name of the capability involved, if any
    pub fn capability_name(&self) -> Option<&str> {
        match self {
            Self::CapabilityUnavailable { capability, .. } => Some(capability),
            _ => None,
        }
    }
}

impl OrchestratorErrorExt for OrchestratorError {
    fn user_hint(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "Invalid request: 'message' key is required.",

            Self::CapabilityUnavailable { .. } => {
                "Sorry, I'm having trouble reaching my assistants right now. Please try again in a moment."
            }

            Self::MissingPlan | Self::UnknownAction(_) => {
                "Sorry, something went wrong while working on your request. Please try again."
            }

            Self::ConversationNotFound(_) => "Conversation not found",

            Self::Conflict(_) | Self::Store(_) => {
                "Sorry, I couldn't save our conversation. Please try again."
            }

            Self::Config(_) => "Check your config.toml file for errors",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::MissingPlan | Self::UnknownAction(_) | Self::Config(_) => false,

            _ => true,
        }
    }
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
