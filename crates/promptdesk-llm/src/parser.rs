use chrono::Utc;
use promptdesk_core::{EditError, EditSuggestion, EditType};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use uuid::Uuid;

/// Suggestions decoded from one model response, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub suggestions: Vec<EditSuggestion>,
    pub overall_reasoning: String,
    pub intermediate_steps: Vec<String>,
    pub citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    suggestions: Vec<WireSuggestion>,
    #[serde(default)]
    overall_reasoning: String,
    #[serde(default)]
    intermediate_steps: Vec<String>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSuggestion {
    #[serde(rename = "type")]
    edit_type: EditType,
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    suggested_text: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    intermediate_steps: Vec<String>,
    #[serde(default)]
    citations: Vec<String>,
}

/// Strict decode of a model response.
pub fn parse_suggestions(text: &str) -> Result<ParsedResponse, EditError> {
    let snippet = extract_json_snippet(text)
        .ok_or_else(|| EditError::Parse("no JSON object in response".to_string()))?;
    let wire: WireResponse =
        serde_json::from_str(snippet).map_err(|e| EditError::Parse(e.to_string()))?;
    let timestamp = Utc::now();
    let suggestions = wire
        .suggestions
        .into_iter()
        .map(|s| EditSuggestion {
            id: Uuid::now_v7(),
            edit_type: s.edit_type,
            original_text: s.original_text,
            suggested_text: s.suggested_text,
            confidence: clamp_confidence(s.confidence),
            reasoning: s.reasoning,
            intermediate_steps: s.intermediate_steps,
            citations: s.citations,
            timestamp,
        })
        .collect();
    Ok(ParsedResponse {
        suggestions,
        overall_reasoning: wire.overall_reasoning,
        intermediate_steps: wire.intermediate_steps,
        citations: wire.citations,
    })
}

/// Never fails: malformed input yields no suggestions plus the parse condition.
pub fn parse_or_empty(text: &str) -> (ParsedResponse, Option<EditError>) {
    match parse_suggestions(text) {
        Ok(parsed) => (parsed, None),
        Err(err) => (ParsedResponse::default(), Some(err)),
    }
}

fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid regex")
    })
}

pub(crate) fn extract_json_snippet(text: &str) -> Option<&str> {
    if let Some(caps) = fenced_block().captures(text)
        && let Some(inner) = caps.get(1)
    {
        return Some(inner.as_str());
    }
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && end > start
    {
        return Some(text[start..=end].trim());
    }
    None
}
