//! Conversation data model
//!
//! Shared by the engine, its stores and the HTTP surface. The serialized
//! form of [`Conversation`] is the persisted document:
//! `{id, messages: [{id, role, content, timestamp, status?}], state, plan, lastUpdated, revision}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::OrchestratorError;

/// Author of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Position of a conversation in the clarify / permission / plan cycle
///
/// Transitions belong to the phase guard; nothing else assigns a phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Clarifying,
    AwaitingPermission,
    Planning,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Clarifying => "CLARIFYING",
            Phase::AwaitingPermission => "AWAITING_PERMISSION",
            Phase::Planning => "PLANNING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action chosen by the decision service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ReplyToUser,
    CallArchitect,
    CallEngineer,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ReplyToUser => "reply_to_user",
            Action::CallArchitect => "call_architect",
            Action::CallEngineer => "call_engineer",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reply_to_user" => Ok(Action::ReplyToUser),
            "call_architect" => Ok(Action::CallArchitect),
            "call_engineer" => Ok(Action::CallEngineer),
            other => Err(OrchestratorError::UnknownAction(other.to_string())),
        }
    }
}

/// Output of the Decide capability. Never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,

    /// Natural-language intent or summary for the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Free-form instruction forwarded to the Plan capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl Decision {
    /// A plain reply to the user
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            action: Action::ReplyToUser,
            text: Some(text.into()),
            task: None,
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Ordered list of free-form step instructions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<String>,
}

impl Plan {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// The step currently dispatched to the Generate capability
    pub fn first_step(&self) -> Option<&str> {
        self.steps.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Output of the Generate capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub code_file: String,
}

/// Lifecycle of a placeholder message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Thinking,
    Complete,
    Error,
}

/// Structured assistant content
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyPayload {
    pub reply: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyPayload {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            ..Default::default()
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_code_file(mut self, code_file: impl Into<String>) -> Self {
        self.code_file = Some(code_file.into());
        self
    }

    /// Payload shown in place of a failed turn
    pub fn failure(hint: impl Into<String>) -> Self {
        let hint = hint.into();
        Self {
            reply: hint.clone(),
            error: Some(hint),
            ..Default::default()
        }
    }
}

/// Message body: plain text (user input) or a structured payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Payload(ReplyPayload),
}

impl MessageContent {
    /// Human-readable text of the content
    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Payload(payload) => &payload.reply,
        }
    }
}

impl From<ReplyPayload> for MessageContent {
    fn from(payload: ReplyPayload) -> Self {
        MessageContent::Payload(payload)
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One entry of the conversation history. Immutable once appended,
/// except for a placeholder leaving the `thinking` state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,

    pub role: Role,

    pub content: MessageContent,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl Message {
    /// Create a new user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::User,
            content: MessageContent::Text(text.into()),
            timestamp: Utc::now(),
            status: None,
        }
    }

    /// Create a new assistant message
    pub fn assistant(payload: ReplyPayload) -> Self {
        Self {
            id: new_message_id(),
            role: Role::Assistant,
            content: payload.into(),
            timestamp: Utc::now(),
            status: None,
        }
    }

    /// Create an assistant placeholder in the `thinking` state
    pub fn placeholder() -> Self {
        Self {
            id: new_message_id(),
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
            timestamp: Utc::now(),
            status: Some(MessageStatus::Thinking),
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.status == Some(MessageStatus::Thinking)
    }

    /// Move a placeholder to a terminal state
    pub fn finalize(&mut self, payload: ReplyPayload, status: MessageStatus) {
        self.content = payload.into();
        self.status = Some(status);
        self.timestamp = Utc::now();
    }
}

/// A persisted conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,

    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(rename = "state", default)]
    pub phase: Phase,

    #[serde(default)]
    pub plan: Option<Plan>,

    pub last_updated: DateTime<Utc>,

    /// Bumped by the store on every write
    #[serde(default)]
    pub revision: u64,
}

impl Conversation {
    /// A fresh conversation: empty history, CLARIFYING
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            phase: Phase::default(),
            plan: None,
            last_updated: Utc::now(),
            revision: 0,
        }
    }

    /// Title shown in listings: the first stored message
    pub fn title(&self) -> String {
        self.messages
            .first()
            .map(|m| m.content.as_text().to_string())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title(),
        }
    }
}

/// Listing entry for `GET /conversations`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_str() {
        assert_eq!(
            "call_architect".parse::<Action>().unwrap(),
            Action::CallArchitect
        );
        let err = "summon_wizard".parse::<Action>().unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAction(a) if a == "summon_wizard"));
    }

    #[test]
    fn test_phase_wire_names() {
        let json = serde_json::to_string(&Phase::AwaitingPermission).unwrap();
        assert_eq!(json, r#""AWAITING_PERMISSION""#);
        assert_eq!(Phase::default(), Phase::Clarifying);
    }

    #[test]
    fn test_message_content_untagged() {
        let text: MessageContent = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, MessageContent::Text("hello".into()));

        let payload: MessageContent =
            serde_json::from_str(r#"{"reply":"here","plan":{"steps":["a"]}}"#).unwrap();
        match payload {
            MessageContent::Payload(p) => {
                assert_eq!(p.reply, "here");
                assert_eq!(p.plan.unwrap().first_step(), Some("a"));
            }
            _ => panic!("Expected structured payload"),
        }
    }

    #[test]
    fn test_placeholder_finalize() {
        let mut msg = Message::placeholder();
        assert!(msg.is_thinking());
        assert_eq!(msg.role, Role::Assistant);

        msg.finalize(ReplyPayload::reply("done"), MessageStatus::Complete);
        assert!(!msg.is_thinking());
        assert_eq!(msg.content.as_text(), "done");
    }

    #[test]
    fn test_conversation_document_shape() {
        let mut conv = Conversation::new("c1");
        conv.messages.push(Message::user("Build me a todo app"));

        let value = serde_json::to_value(&conv).unwrap();
        assert_eq!(value["state"], "CLARIFYING");
        assert!(value["plan"].is_null());
        assert!(value.get("lastUpdated").is_some());
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value["messages"][0].get("status").is_none());
        assert_eq!(conv.title(), "Build me a todo app");
    }
}
