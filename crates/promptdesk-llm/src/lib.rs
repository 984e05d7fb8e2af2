use anyhow::{Context, Result, anyhow};
use promptdesk_core::{EditRequest, LlmResponse};
use std::fs;
use std::path::{Path, PathBuf};

pub mod parser;

pub use parser::{ParsedResponse, parse_or_empty, parse_suggestions};

/// Capability boundary to whatever model backend produces edit suggestions.
///
/// Implementations own transport concerns (auth, retries, timeouts). The reply
/// text is untrusted and always goes through [`parse_suggestions`].
pub trait EditProvider {
    fn suggest_edits(&self, req: &EditRequest) -> Result<LlmResponse>;

    /// Short label recorded in the audit trail.
    fn name(&self) -> &str {
        "provider"
    }
}

/// Serves a previously recorded model response from disk.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    path: PathBuf,
}

impl ReplayProvider {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl EditProvider for ReplayProvider {
    fn suggest_edits(&self, req: &EditRequest) -> Result<LlmResponse> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read recorded response {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Err(anyhow!(
                "recorded response {} is empty",
                self.path.display()
            ));
        }
        Ok(LlmResponse {
            text,
            finish_reason: "stop".to_string(),
            model: req.model.clone(),
        })
    }

    fn name(&self) -> &str {
        "replay"
    }
}

const RESPONSE_SCHEMA: &str = r#"{
  "suggestions": [
    { "type": "replacement|insertion|deletion|formatting|custom",
      "originalText": string, "suggestedText": string,
      "confidence": number (0..1), "reasoning": string,
      "intermediateSteps": [string], "citations": [string] }
  ],
  "overallReasoning": string,
  "intermediateSteps": [string],
  "citations": [string]
}"#;

/// System prompt and user message for an edit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPrompt {
    pub system: String,
    pub user: String,
}

pub fn render_edit_prompt(req: &EditRequest) -> EditPrompt {
    let mut system = String::from(
        "You are an editing assistant for LLM system prompts. Propose precise edits to the \
         text you are given. Every originalText must be copied verbatim from the text so it \
         can be located; use an empty originalText only for pure insertions.\n",
    );
    system.push_str(&format!(
        "The editor runs in '{}' autonomy mode; calibrate confidence honestly, edits above \
         the mode's threshold may be applied without review.\n",
        req.autonomy_level
    ));
    if req.include_reasoning {
        system.push_str("Explain each edit in its reasoning field.\n");
    } else {
        system.push_str("Keep reasoning fields empty.\n");
    }
    if req.include_intermediate_steps {
        system.push_str("List the steps you took in intermediateSteps.\n");
    }
    system.push_str("Reply with a single JSON object and nothing else:\n");
    system.push_str(RESPONSE_SCHEMA);

    let mut user = format!("Instruction: {}\n", req.instruction.trim());
    if let Some(context) = req.context.as_deref().filter(|c| !c.trim().is_empty()) {
        user.push_str(&format!("Context:\n{}\n", context.trim_end()));
    }
    user.push_str("Text:\n<<<\n");
    user.push_str(&req.original_text);
    user.push_str("\n>>>");
    EditPrompt { system, user }
}
