//! Test doubles shared by the integration suites.

use anyhow::{Result, anyhow};
use promptdesk_core::{EditRequest, EditorEvent, LlmResponse};
use promptdesk_llm::EditProvider;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Provider that replays canned reply texts in order and remembers the
/// requests it was given.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    requests: Arc<Mutex<Vec<EditRequest>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of the requests seen so far; stays valid after the provider
    /// is boxed into an orchestrator.
    pub fn requests(&self) -> Arc<Mutex<Vec<EditRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_response(&self) -> Result<String> {
        let mut guard = self
            .responses
            .lock()
            .map_err(|_| anyhow!("scripted provider mutex poisoned"))?;
        guard
            .pop_front()
            .ok_or_else(|| anyhow!("scripted provider exhausted"))
    }
}

impl EditProvider for ScriptedProvider {
    fn suggest_edits(&self, req: &EditRequest) -> Result<LlmResponse> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req.clone());
        }
        Ok(LlmResponse {
            text: self.next_response()?,
            finish_reason: "stop".to_string(),
            model: "scripted".to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Provider whose every call fails, standing in for network or auth errors.
pub struct FailingProvider {
    message: String,
}

impl FailingProvider {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl EditProvider for FailingProvider {
    fn suggest_edits(&self, _req: &EditRequest) -> Result<LlmResponse> {
        Err(anyhow!("{}", self.message))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// One suggestion in the provider's wire format.
pub fn suggestion(kind: &str, original: &str, suggested: &str, confidence: f64) -> Value {
    json!({
        "type": kind,
        "originalText": original,
        "suggestedText": suggested,
        "confidence": confidence,
        "reasoning": format!("{kind} '{original}'"),
    })
}

/// A complete reply body carrying `suggestions`.
pub fn response_json(suggestions: Vec<Value>) -> String {
    json!({
        "suggestions": suggestions,
        "overallReasoning": "scripted reply",
    })
    .to_string()
}

/// Collects every event delivered to the listeners it hands out.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<EditorEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> impl FnMut(&EditorEvent) + Send + 'static {
        let events = Arc::clone(&self.events);
        move |event| {
            if let Ok(mut guard) = events.lock() {
                guard.push(event.clone());
            }
        }
    }

    pub fn events(&self) -> Vec<EditorEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn count(&self, event_type: promptdesk_core::EventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptdesk_core::AutonomyLevel;
    use promptdesk_llm::parse_suggestions;

    fn request() -> EditRequest {
        EditRequest {
            original_text: "text".to_string(),
            instruction: "tidy".to_string(),
            context: None,
            autonomy_level: AutonomyLevel::Partial,
            model: "m".to_string(),
            temperature: 0.0,
            max_tokens: 16,
            include_reasoning: true,
            include_intermediate_steps: false,
        }
    }

    #[test]
    fn scripted_provider_replays_in_order_then_runs_dry() {
        let provider = ScriptedProvider::new(vec!["first".to_string(), "second".to_string()]);
        let seen = provider.requests();
        assert_eq!(provider.suggest_edits(&request()).expect("first").text, "first");
        assert_eq!(provider.suggest_edits(&request()).expect("second").text, "second");
        assert!(provider.suggest_edits(&request()).is_err());
        assert_eq!(seen.lock().expect("lock").len(), 3);
    }

    #[test]
    fn fixtures_parse() {
        let body = response_json(vec![suggestion("replacement", "hey", "Hello", 0.85)]);
        let parsed = parse_suggestions(&body).expect("parse");
        assert_eq!(parsed.suggestions.len(), 1);
        assert_eq!(parsed.suggestions[0].suggested_text, "Hello");
        assert_eq!(parsed.overall_reasoning, "scripted reply");
    }

    #[test]
    fn failing_provider_reports_its_message() {
        let err = FailingProvider::new("rate limited")
            .suggest_edits(&request())
            .expect_err("fails");
        assert_eq!(err.to_string(), "rate limited");
    }
}
