//! Vibe Engine Library
//!
//! Core of the conversational workflow orchestrator: the turn executor, the
//! phase guard, the async runner and their store / capability collaborators.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Conversation persistence module
pub mod store;

/// Remote Decide / Plan / Generate client
pub mod capability;

/// Permission-gated phase state machine
pub mod guard;

/// Synchronous turn execution
pub mod executor;

/// Fire-and-forget turn execution behind a placeholder
pub mod runner;

/// HTTP surface
pub mod api;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
