//! User-facing error reports for the promptdesk CLI.
//!
//! Pipeline errors (`EditError`) map onto a fixed category with recovery
//! hints; anything else is classified from its message.

use anyhow::Error;
use promptdesk_core::EditError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error with a short title, the underlying message, and what to try next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub error_type: ErrorType,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    /// Settings files, unknown autonomy levels
    Configuration,
    /// The model provider could not be reached or refused the call
    Provider,
    /// The model replied with something that is not a suggestion list
    Response,
    /// Chunks that no longer fit the buffer, superseded rounds
    Conflict,
    /// Bad flags or input files
    Validation,
    /// Nothing left to undo or redo
    Boundary,
    Unknown,
}

impl EnhancedError {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            suggestions: Vec::new(),
            error_type,
            context: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn into_error(self) -> Error {
        Error::new(self)
    }

    /// Report for a pipeline error.
    pub fn from_edit_error(err: &EditError) -> Self {
        let message = err.to_string();
        match err {
            EditError::Parse(_) => Self::new("Unreadable Model Reply", message, ErrorType::Response)
                .with_suggestions(vec![
                    "Regenerate the suggestions".to_string(),
                    "Check that the recorded response is a JSON object with a suggestions array"
                        .to_string(),
                ]),
            EditError::Provider(_) => Self::new("Provider Error", message, ErrorType::Provider)
                .with_suggestions(vec![
                    "Check the provider endpoint and credentials".to_string(),
                    "Try again in a few moments".to_string(),
                ]),
            EditError::OffsetOutOfRange { .. } => {
                Self::new("Suggestion No Longer Fits", message, ErrorType::Conflict)
                    .with_suggestions(vec![
                        "The text changed after the suggestion was made".to_string(),
                        "Regenerate suggestions for the current text".to_string(),
                    ])
            }
            EditError::AtBoundary(_) => Self::new("Nothing To Do", message, ErrorType::Boundary),
            EditError::UnknownAutonomyLevel(_) => {
                Self::new("Unknown Autonomy Level", message, ErrorType::Configuration)
                    .with_suggestions(vec![
                        "Use one of manual, partial, assisted, autonomous".to_string(),
                        "Fix autonomy.level in .promptdesk/settings.json".to_string(),
                    ])
            }
            EditError::GenerationInFlight => {
                Self::new("Generation In Progress", message, ErrorType::Conflict)
                    .with_suggestion("Wait for the current round or cancel it")
            }
            EditError::StaleRound { .. } => {
                Self::new("Stale Response", message, ErrorType::Conflict)
                    .with_suggestion("The response belongs to an earlier request and was ignored")
            }
            EditError::UnknownSuggestion(_) => {
                Self::new("Unknown Suggestion", message, ErrorType::Validation)
                    .with_suggestion("List pending suggestions and use one of their ids")
            }
        }
    }

    pub fn format(&self, verbose: bool) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}: {}\n", self.error_type.emoji(), self.title));
        output.push_str(&format!("  {}\n", self.message));

        if verbose && let Some(context) = &self.context {
            output.push_str(&format!("\n  Context: {context}\n"));
        }

        if !self.suggestions.is_empty() {
            output.push_str("\n  Suggestions:\n");
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("    {}. {}\n", i + 1, suggestion));
            }
        }
        output
    }
}

impl ErrorType {
    pub fn emoji(&self) -> &'static str {
        match self {
            ErrorType::Configuration => "🔧",
            ErrorType::Provider => "🌐",
            ErrorType::Response => "📨",
            ErrorType::Conflict => "⚡",
            ErrorType::Validation => "📋",
            ErrorType::Boundary => "↩",
            ErrorType::Unknown => "❓",
        }
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

impl std::error::Error for EnhancedError {}

/// Turns any `anyhow::Error` into an [`EnhancedError`] report.
pub struct ErrorHandler {
    verbose: bool,
    show_suggestions: bool,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            verbose: false,
            show_suggestions: true,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn show_suggestions(mut self, show: bool) -> Self {
        self.show_suggestions = show;
        self
    }

    pub fn enhance(&self, error: &Error) -> EnhancedError {
        let mut enhanced = if let Some(enhanced) = error.downcast_ref::<EnhancedError>() {
            enhanced.clone()
        } else if let Some(edit) = error.downcast_ref::<EditError>() {
            EnhancedError::from_edit_error(edit)
        } else {
            classify_error(&error.to_string())
        };
        if enhanced.context.is_none() && error.chain().len() > 1 {
            enhanced.context = Some(format!("{error:#}"));
        }
        if !self.show_suggestions {
            enhanced.suggestions.clear();
        }
        enhanced
    }

    pub fn handle(&self, error: &Error) -> String {
        self.enhance(error).format(self.verbose)
    }
}

fn classify_error(error_message: &str) -> EnhancedError {
    let lower_error = error_message.to_lowercase();

    if lower_error.contains("settings") || lower_error.contains("config") {
        return EnhancedError::new("Configuration Error", error_message, ErrorType::Configuration)
            .with_suggestions(vec![
                "Check .promptdesk/settings.json and ~/.promptdesk/settings.json".to_string(),
                "Run `promptdesk config` to see the merged configuration".to_string(),
            ]);
    }

    if lower_error.contains("network")
        || lower_error.contains("timeout")
        || lower_error.contains("connection")
    {
        return EnhancedError::new("Network Error", error_message, ErrorType::Provider)
            .with_suggestions(vec![
                "Check your internet connection".to_string(),
                "Try again in a few moments".to_string(),
            ]);
    }

    if lower_error.contains("no such file") || lower_error.contains("failed to read") {
        return EnhancedError::new("File Error", error_message, ErrorType::Validation)
            .with_suggestion("Check the file path");
    }

    EnhancedError::new("Error", error_message, ErrorType::Unknown)
        .with_suggestion("Re-run with --verbose for details")
}

/// Constructors for errors the CLI raises itself.
pub mod errors {
    use super::*;

    pub fn file_not_found(path: &str) -> EnhancedError {
        EnhancedError::new(
            "File Not Found",
            format!("The file '{path}' does not exist."),
            ErrorType::Validation,
        )
        .with_suggestions(vec![
            "Check the file path".to_string(),
            "Use a path relative to the current directory or an absolute path".to_string(),
        ])
    }

    pub fn invalid_selection(raw: &str) -> EnhancedError {
        EnhancedError::new(
            "Invalid Selection",
            format!("'{raw}' is not a START:END character range."),
            ErrorType::Validation,
        )
        .with_suggestion("Pass --select as two character offsets, e.g. --select 0:42")
    }

    pub fn missing_response() -> EnhancedError {
        EnhancedError::new(
            "No Model Response",
            "suggest needs a recorded model response to replay.",
            ErrorType::Validation,
        )
        .with_suggestion("Pass --response <FILE> with the JSON reply to apply")
    }
}
