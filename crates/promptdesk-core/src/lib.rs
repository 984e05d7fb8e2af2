use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub const DEFAULT_EDIT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AUDIT_CAP: usize = 1000;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".promptdesk")
}

/// Errors produced by the edit pipeline.
///
/// Parse and offset conditions are recovered inside the component that detects
/// them and reported alongside a partial result; provider failures propagate to
/// the caller of the round.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("unparseable model response: {0}")]
    Parse(String),
    #[error("provider call failed: {0}")]
    Provider(String),
    #[error("chunk range {start}..{end} is outside a buffer of {len} characters")]
    OffsetOutOfRange { start: i64, end: i64, len: usize },
    #[error("nothing to {0}")]
    AtBoundary(&'static str),
    #[error("unknown autonomy level '{0}' (expected manual|partial|assisted|autonomous)")]
    UnknownAutonomyLevel(String),
    #[error("a generation round is already in flight")]
    GenerationInFlight,
    #[error("response for round {round} arrived after round {latest} started")]
    StaleRound { round: u64, latest: u64 },
    #[error("no pending suggestion with id {0}")]
    UnknownSuggestion(Uuid),
}

impl EditError {
    /// Conditions the caller may recover from by retrying or regenerating.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::UnknownAutonomyLevel(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditType {
    Replacement,
    Insertion,
    Deletion,
    Formatting,
    Custom,
}

impl EditType {
    pub const ALL: &'static [EditType] = &[
        Self::Replacement,
        Self::Insertion,
        Self::Deletion,
        Self::Formatting,
        Self::Custom,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replacement => "replacement",
            Self::Insertion => "insertion",
            Self::Deletion => "deletion",
            Self::Formatting => "formatting",
            Self::Custom => "custom",
        }
    }
}

/// Policy tier, ordered from most to least conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    Manual,
    Partial,
    Assisted,
    Autonomous,
}

impl AutonomyLevel {
    pub const ALL: &'static [AutonomyLevel] = &[
        Self::Manual,
        Self::Partial,
        Self::Assisted,
        Self::Autonomous,
    ];
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Partial => write!(f, "partial"),
            Self::Assisted => write!(f, "assisted"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = EditError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "partial" => Ok(Self::Partial),
            "assisted" => Ok(Self::Assisted),
            "autonomous" => Ok(Self::Autonomous),
            other => Err(EditError::UnknownAutonomyLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSuggestion {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub edit_type: EditType,
    pub original_text: String,
    pub suggested_text: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub intermediate_steps: Vec<String>,
    #[serde(default)]
    pub citations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Addition,
    Deletion,
    Modification,
    Unchanged,
}

/// One positioned, classified unit of change.
///
/// `start_index`/`end_index` are half-open character offsets into the buffer the
/// chunk was generated against. A chunk whose original text could not be found
/// carries [`DiffChunk::UNLOCATED`] in both fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffChunk {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub diff_type: DiffType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_text: Option<String>,
    pub start_index: i64,
    pub end_index: i64,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion_id: Option<Uuid>,
}

impl DiffChunk {
    pub const UNLOCATED: i64 = -1;

    #[must_use]
    pub fn is_located(&self) -> bool {
        self.start_index >= 0 && self.end_index >= self.start_index
    }

    /// Character range of the chunk, or `None` for the unlocatable sentinel.
    #[must_use]
    pub fn span(&self) -> Option<std::ops::Range<usize>> {
        if !self.is_located() {
            return None;
        }
        Some(self.start_index as usize..self.end_index as usize)
    }

    #[must_use]
    pub fn original(&self) -> &str {
        self.original_text.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn replacement(&self) -> &str {
        self.new_text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutonomyConfig {
    pub level: AutonomyLevel,
    pub auto_apply_threshold: f64,
    pub require_confirmation: bool,
    pub max_batch_size: usize,
    pub allowed_edit_types: Vec<EditType>,
}

impl AutonomyConfig {
    #[must_use]
    pub fn allows(&self, edit_type: EditType) -> bool {
        self.allowed_edit_types.contains(&edit_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub text_before: String,
    pub text_after: String,
    pub applied_chunks: Vec<DiffChunk>,
    pub reasoning: String,
    pub autonomy_level: AutonomyLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Edit,
    Suggestion,
    Apply,
    Reject,
    Undo,
    Redo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub session_id: Uuid,
    pub changes: Vec<DiffChunk>,
    pub reasoning: String,
    pub autonomy_level: AutonomyLevel,
    pub model_used: String,
    pub confidence: f64,
}

/// Result of a diff construction: the chunks plus aggregate figures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditDiff {
    pub chunks: Vec<DiffChunk>,
    pub overall_confidence: f64,
    pub total_changes: usize,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub original_text: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub autonomy_level: AutonomyLevel,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub include_reasoning: bool,
    pub include_intermediate_steps: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffGranularity {
    #[default]
    Line,
    Word,
    Sentence,
    Paragraph,
}

impl std::str::FromStr for DiffGranularity {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "word" => Ok(Self::Word),
            "sentence" => Ok(Self::Sentence),
            "paragraph" => Ok(Self::Paragraph),
            other => Err(anyhow::anyhow!(
                "invalid granularity '{}' (expected line|word|sentence|paragraph)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    pub original_text: String,
    pub new_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub granularity: DiffGranularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

/// Raw provider reply. The text is untrusted and goes through the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    SuggestionGenerated,
    EditApplied,
    EditRejected,
    AutonomyChanged,
    DiffGenerated,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuggestionGenerated => "suggestion-generated",
            Self::EditApplied => "edit-applied",
            Self::EditRejected => "edit-rejected",
            Self::AutonomyChanged => "autonomy-changed",
            Self::DiffGenerated => "diff-generated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EditorEvent {
    SuggestionGenerated {
        suggestions: Vec<EditSuggestion>,
        diff: EditDiff,
    },
    EditApplied {
        suggestion_id: Uuid,
        new_text: String,
        chunks: Vec<DiffChunk>,
        reasoning: String,
    },
    EditRejected {
        suggestion_id: Uuid,
    },
    AutonomyChanged {
        level: AutonomyLevel,
        config: AutonomyConfig,
    },
    DiffGenerated {
        diff: EditDiff,
    },
}

impl EditorEvent {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SuggestionGenerated { .. } => EventType::SuggestionGenerated,
            Self::EditApplied { .. } => EventType::EditApplied,
            Self::EditRejected { .. } => EventType::EditRejected,
            Self::AutonomyChanged { .. } => EventType::AutonomyChanged,
            Self::DiffGenerated { .. } => EventType::DiffGenerated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub event: EditorEvent,
}

/// Number of characters in `text`. All chunk offsets are expressed in these units.
#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the character at `char_idx`, allowing one-past-the-end.
#[must_use]
pub fn byte_offset(text: &str, char_idx: usize) -> Option<usize> {
    if char_idx == 0 {
        return Some(0);
    }
    match text.char_indices().nth(char_idx) {
        Some((byte, _)) => Some(byte),
        None if char_len(text) == char_idx => Some(text.len()),
        None => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub autonomy: AutonomySettings,
    pub llm: LlmSettings,
    pub ledger: LedgerSettings,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomySettings {
    pub level: AutonomyLevel,
}

impl Default for AutonomySettings {
    fn default() -> Self {
        Self {
            level: AutonomyLevel::Partial,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub include_reasoning: bool,
    pub include_intermediate_steps: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_EDIT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 2048,
            include_reasoning: true,
            include_intermediate_steps: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub audit_cap: usize,
    /// Maximum undo depth. `None` keeps every checkpoint.
    pub history_cap: Option<usize>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            audit_cap: DEFAULT_AUDIT_CAP,
            history_cap: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".promptdesk/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::legacy_toml_path(workspace).exists()
            || Self::user_settings_path().is_some_and(|p| p.exists())
        {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
