//! Phase Guard
//!
//! Enforces the permission gate of the clarify / permission / plan cycle:
//!
//! ```text
//! CLARIFYING ──(permission asked)──▶ AWAITING_PERMISSION ──(affirmative)──▶ PLANNING
//!      ▲                                                                        │
//!      └──────────────────────────(plan presented)─────────────────────────────┘
//! ```
//!
//! The decision service is not trusted to respect the gate. A `call_architect`
//! decision outside PLANNING is replaced by a confirmation request, so no
//! plan is ever produced without the user saying yes first.
//!
//! Free-text classification (affirmatives, permission requests) goes through
//! the [`PhraseClassifier`] trait; the default [`PhraseSet`] is a
//! case-insensitive substring match over a configured phrase list.

use regex::{RegexSet, RegexSetBuilder};
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{Action, Decision, Phase};
use std::sync::Arc;

use crate::config::GuardConfig;

/// Classifies free text against a small phrase vocabulary
pub trait PhraseClassifier: Send + Sync {
    fn matches(&self, text: &str) -> bool;
}

/// Case-insensitive substring matcher over a fixed phrase list
#[derive(Debug, Clone)]
pub struct PhraseSet {
    set: RegexSet,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(&p))
            .collect();

        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| OrchestratorError::Config(format!("Invalid guard phrase: {}", e)))?;

        Ok(Self { set })
    }
}

impl PhraseClassifier for PhraseSet {
    fn matches(&self, text: &str) -> bool {
        self.set.is_match(text)
    }
}

/// Outcome of running a decision through the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardVerdict {
    /// Decision to dispatch; differs from the input when overridden
    pub decision: Decision,
    /// Phase in effect while the decision is dispatched
    pub phase: Phase,
    /// True when a `call_architect` was replaced by a confirmation request
    pub overridden: bool,
}

/// Permission-gated phase state machine
pub struct PhaseGuard {
    affirmatives: Arc<dyn PhraseClassifier>,
    permission_requests: Arc<dyn PhraseClassifier>,
    confirmation_prompt: String,
}

impl PhaseGuard {
    pub fn new(
        affirmatives: Arc<dyn PhraseClassifier>,
        permission_requests: Arc<dyn PhraseClassifier>,
        confirmation_prompt: impl Into<String>,
    ) -> Self {
        Self {
            affirmatives,
            permission_requests,
            confirmation_prompt: confirmation_prompt.into(),
        }
    }

    /// Guard built from the `[guard]` config section
    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(PhraseSet::new(&config.affirmative_tokens)?),
            Arc::new(PhraseSet::new(&config.permission_phrases)?),
            config.confirmation_prompt.clone(),
        ))
    }

    /// Phase after the user's text is taken into account, before the
    /// decision is interpreted
    pub fn on_user_text(&self, phase: Phase, user_text: &str) -> Phase {
        if phase == Phase::AwaitingPermission && self.affirmatives.matches(user_text) {
            Phase::Planning
        } else {
            phase
        }
    }

    /// Apply the transition rules to one decision.
    ///
    /// Rules run in order: affirmative grant, architect override,
    /// permission request detection, architect pass-through.
    pub fn evaluate(&self, phase: Phase, user_text: &str, decision: Decision) -> GuardVerdict {
        let mut phase = self.on_user_text(phase, user_text);
        let mut decision = decision;
        let mut overridden = false;

        if decision.action == Action::CallArchitect && phase != Phase::Planning {
            tracing::warn!(
                phase = %phase,
                task = decision.task.as_deref().unwrap_or_default(),
                "Decision service asked for a plan without permission, requesting confirmation"
            );
            decision = Decision::reply(self.confirmation_prompt.clone());
            phase = Phase::AwaitingPermission;
            overridden = true;
        }

        if decision.action == Action::ReplyToUser
            && self.permission_requests.matches(decision.text_or_empty())
        {
            phase = Phase::AwaitingPermission;
        }

        GuardVerdict {
            decision,
            phase,
            overridden,
        }
    }

    /// Phase after `action` has been dispatched successfully
    pub fn settle(&self, phase: Phase, action: Action) -> Phase {
        match (phase, action) {
            (Phase::Planning, Action::CallArchitect) => Phase::Clarifying,
            _ => phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PhaseGuard {
        PhaseGuard::from_config(&GuardConfig::default()).unwrap()
    }

    fn architect(task: &str) -> Decision {
        Decision {
            action: Action::CallArchitect,
            text: Some("On it".to_string()),
            task: Some(task.to_string()),
        }
    }

    #[test]
    fn test_phrase_set_is_case_insensitive_substring() {
        let set = PhraseSet::new(["shall i proceed", "a.b"]).unwrap();
        assert!(set.matches("Great idea. SHALL I PROCEED?"));
        assert!(set.matches("see a.b"));
        // Phrases are literal, not patterns
        assert!(!set.matches("see axb"));
        assert!(!set.matches("nothing here"));
    }

    #[test]
    fn test_empty_phrase_set_matches_nothing() {
        let set = PhraseSet::new(Vec::<String>::new()).unwrap();
        assert!(!set.matches("yes"));
    }

    #[test]
    fn test_architect_overridden_in_clarifying() {
        let verdict = guard().evaluate(Phase::Clarifying, "Build me a todo app", architect("todo"));

        assert!(verdict.overridden);
        assert_eq!(verdict.decision.action, Action::ReplyToUser);
        assert_eq!(verdict.phase, Phase::AwaitingPermission);
        assert!(verdict
            .decision
            .text_or_empty()
            .to_lowercase()
            .contains("shall i proceed"));
    }

    #[test]
    fn test_architect_overridden_when_permission_not_granted() {
        let verdict = guard().evaluate(Phase::AwaitingPermission, "hmm, not sure", architect("x"));
        assert!(verdict.overridden);
        assert_eq!(verdict.phase, Phase::AwaitingPermission);
    }

    #[test]
    fn test_affirmative_grants_planning() {
        let verdict = guard().evaluate(Phase::AwaitingPermission, "Yes please", architect("todo"));

        assert!(!verdict.overridden);
        assert_eq!(verdict.decision.action, Action::CallArchitect);
        assert_eq!(verdict.phase, Phase::Planning);
    }

    #[test]
    fn test_affirmative_ignored_outside_awaiting_permission() {
        let g = guard();
        assert_eq!(g.on_user_text(Phase::Clarifying, "yes"), Phase::Clarifying);
        assert_eq!(g.on_user_text(Phase::AwaitingPermission, "YES"), Phase::Planning);
    }

    #[test]
    fn test_permission_request_detected_in_reply() {
        let verdict = guard().evaluate(
            Phase::Clarifying,
            "a todo app with tags",
            Decision::reply("Got it: tags and due dates. Shall I proceed?"),
        );
        assert!(!verdict.overridden);
        assert_eq!(verdict.phase, Phase::AwaitingPermission);
    }

    #[test]
    fn test_plain_reply_keeps_phase() {
        let verdict = guard().evaluate(
            Phase::Clarifying,
            "hello",
            Decision::reply("Hi! What would you like to build?"),
        );
        assert_eq!(verdict.phase, Phase::Clarifying);
        assert_eq!(verdict.decision, Decision::reply("Hi! What would you like to build?"));
    }

    #[test]
    fn test_settle_resets_after_plan() {
        let g = guard();
        assert_eq!(g.settle(Phase::Planning, Action::CallArchitect), Phase::Clarifying);
        assert_eq!(g.settle(Phase::Planning, Action::ReplyToUser), Phase::Planning);
        assert_eq!(
            g.settle(Phase::AwaitingPermission, Action::ReplyToUser),
            Phase::AwaitingPermission
        );
    }

    struct Always;

    impl PhraseClassifier for Always {
        fn matches(&self, _text: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_classifier_is_pluggable() {
        let g = PhaseGuard::new(Arc::new(Always), Arc::new(Always), "Proceed?");
        let verdict = g.evaluate(Phase::AwaitingPermission, "anything", architect("x"));
        assert_eq!(verdict.phase, Phase::Planning);
        assert!(!verdict.overridden);
    }
}
