//! HTTP capability client
//!
//! Every capability is one `POST` carrying `{"data": ...}` and answering
//! `{"result": ...}`. Transport errors, timeouts, non-2xx statuses and bodies
//! that don't match the expected shape all map to
//! `CapabilityUnavailable`; only an unrecognised Decide action gets its own
//! `UnknownAction` error.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{Action, Artifact, Decision, Message, MessageContent, Plan, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Capability, CapabilityClient};
use crate::config::CapabilitiesConfig;

/// reqwest-backed [`CapabilityClient`]
#[derive(Debug, Clone)]
pub struct HttpCapabilityClient {
    decide_url: String,
    plan_url: String,
    generate_url: String,
    client: Client,
}

impl HttpCapabilityClient {
    /// Build a client for the configured endpoints
    ///
    /// The configured timeout applies to each call as a whole.
    pub fn new(config: &CapabilitiesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            decide_url: config.decide_url.clone(),
            plan_url: config.plan_url.clone(),
            generate_url: config.generate_url.clone(),
            client,
        })
    }

    fn url(&self, capability: Capability) -> &str {
        match capability {
            Capability::Decide => &self.decide_url,
            Capability::Plan => &self.plan_url,
            Capability::Generate => &self.generate_url,
        }
    }

    /// Send `{data}` and unwrap `{result}`
    async fn invoke<D, R>(&self, capability: Capability, data: D) -> Result<R>
    where
        D: Serialize + Send,
        R: DeserializeOwned + Send,
    {
        let url = self.url(capability);
        let start = std::time::Instant::now();

        tracing::debug!(capability = %capability, "Invoking capability at {}", url);

        let response = self
            .client
            .post(url)
            .json(&Envelope { data })
            .send()
            .await
            .map_err(|e| {
                let cause = if e.is_timeout() {
                    "request timed out".to_string()
                } else if e.is_connect() {
                    format!("cannot connect to {}", url)
                } else {
                    e.to_string()
                };
                OrchestratorError::capability(capability.name(), cause)
            })?;

        tracing::debug!(
            capability = %capability,
            "Capability responded in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::capability(
                capability.name(),
                format!("HTTP {}: {}", status, body),
            ));
        }

        let reply: ResultEnvelope<R> = response.json().await.map_err(|e| {
            OrchestratorError::capability(capability.name(), format!("malformed response: {}", e))
        })?;

        Ok(reply.result)
    }
}

#[async_trait]
impl CapabilityClient for HttpCapabilityClient {
    async fn decide(&self, history: &[Message]) -> Result<Decision> {
        let request = DecideRequest {
            history: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        };

        let raw: RawDecision = self.invoke(Capability::Decide, request).await?;
        let action: Action = raw.action.parse()?;

        Ok(Decision {
            action,
            text: raw.text,
            task: raw.task,
        })
    }

    async fn plan(&self, task: &str) -> Result<Plan> {
        let wire: WirePlan = self.invoke(Capability::Plan, PlanRequest { task }).await?;
        Ok(match wire {
            WirePlan::Object(plan) => plan,
            WirePlan::Steps(steps) => Plan::new(steps),
        })
    }

    async fn generate(&self, step: &str) -> Result<Artifact> {
        let wire: WireArtifact = self
            .invoke(Capability::Generate, GenerateRequest { step })
            .await?;
        Ok(match wire {
            WireArtifact::Object(artifact) => artifact,
            WireArtifact::Code(code_file) => Artifact {
                summary: None,
                code_file,
            },
        })
    }
}

#[derive(Debug, Serialize)]
struct Envelope<D> {
    data: D,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope<R> {
    result: R,
}

#[derive(Debug, Serialize)]
struct DecideRequest<'a> {
    history: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a MessageContent,
}

#[derive(Debug, Serialize)]
struct PlanRequest<'a> {
    task: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    step: &'a str,
}

/// Decide result before the action is validated
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    task: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePlan {
    Object(Plan),
    Steps(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireArtifact {
    Object(Artifact),
    Code(String),
}
