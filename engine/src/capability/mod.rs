//! Remote Capability Client
//!
//! The orchestrator delegates all reasoning to three stateless services:
//!
//! - **Decide**: given the message history, choose the next [`Action`](sdk::types::Action)
//! - **Plan**: given a task description, produce an ordered [`Plan`]
//! - **Generate**: given one plan step, produce an [`Artifact`]
//!
//! Each call is a single attempt. Any failure to complete it surfaces as
//! `OrchestratorError::CapabilityUnavailable` naming the capability.

use async_trait::async_trait;
use sdk::errors::Result;
use sdk::types::{Artifact, Decision, Message, Plan};
use std::fmt;

pub mod http;

pub use http::HttpCapabilityClient;

/// The three remote capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Decide,
    Plan,
    Generate,
}

impl Capability {
    /// Name used in logs and error reports
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Decide => "decide",
            Capability::Plan => "plan",
            Capability::Generate => "generate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Client for the Decide / Plan / Generate services
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Ask the decision service what to do next given the full history
    async fn decide(&self, history: &[Message]) -> Result<Decision>;

    /// Turn a task description into an ordered plan
    async fn plan(&self, task: &str) -> Result<Plan>;

    /// Generate the artifact for a single plan step
    async fn generate(&self, step: &str) -> Result<Artifact>;
}
