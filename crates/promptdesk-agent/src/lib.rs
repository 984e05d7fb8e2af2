use anyhow::Result;
use chrono::{DateTime, Utc};
use promptdesk_core::{
    AppConfig, AuditAction, AuditTrailEntry, AutonomyConfig, AutonomyLevel, DiffChunk,
    DiffRequest, EditDiff, EditError, EditHistoryEntry, EditRequest, EditSuggestion, EditorEvent,
    EventEnvelope, EventType, LedgerSettings, LlmResponse, LlmSettings, char_len,
};
use promptdesk_diff::{
    apply_chunk, apply_order, chunk_matches, fingerprint, from_request, from_suggestions_near,
    overall_confidence, rebase_chunk, relocate, restore_cursor,
};
use promptdesk_ledger::Ledger;
use promptdesk_llm::{EditProvider, parse_or_empty};
use promptdesk_observe::Observer;
use promptdesk_policy::{AutonomyPolicy, partition_for_auto_apply};
use std::path::Path;
use uuid::Uuid;

pub mod buffer;
pub mod events;

pub use buffer::{MemoryBuffer, Selection, TextBuffer};
pub use events::{EventBus, Listener};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub session_id: Uuid,
    pub clock: fn() -> DateTime<Utc>,
    pub autonomy_level: AutonomyLevel,
    pub llm: LlmSettings,
    pub ledger: LedgerSettings,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            session_id: Uuid::now_v7(),
            clock: Utc::now,
            autonomy_level: AutonomyLevel::Partial,
            llm: LlmSettings::default(),
            ledger: LedgerSettings::default(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            autonomy_level: cfg.autonomy.level,
            llm: cfg.llm.clone(),
            ledger: cfg.ledger.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Generating { round: u64 },
    AutoApplying { round: u64 },
    /// Waiting on the user to accept or reject pending suggestions.
    Holding,
}

/// What the user asked for. `selection` overrides the buffer's own selection;
/// an empty selection sends the whole buffer.
#[derive(Debug, Clone, Default)]
pub struct EditInstruction {
    pub instruction: String,
    pub context: Option<String>,
    pub selection: Option<Selection>,
}

impl EditInstruction {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// Handle for an in-flight round. Hand it back to [`Orchestrator::complete_round`]
/// together with the provider's result.
#[derive(Debug, Clone)]
pub struct RoundTicket {
    pub round: u64,
    pub request: EditRequest,
    /// Policy snapshot taken when the round started.
    pub config: AutonomyConfig,
    /// Span of the buffer that was sent, in characters.
    pub selection: Selection,
}

#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub round: u64,
    pub suggestions: Vec<EditSuggestion>,
    pub diff: EditDiff,
    pub auto_applied: Vec<Uuid>,
    pub pending: Vec<Uuid>,
    /// Set when the response could not be parsed; the round then has no suggestions.
    pub parse_error: Option<EditError>,
    /// Set when auto-application stopped early; the remainder is pending.
    pub auto_apply_error: Option<EditError>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub applied: Vec<Uuid>,
    pub discarded: Vec<(Uuid, EditError)>,
}

#[derive(Debug, Clone)]
pub struct PendingSuggestion {
    pub suggestion: EditSuggestion,
    pub chunk: DiffChunk,
    pub model: String,
}

/// Drives edit rounds against one text buffer: asks the provider, positions the
/// suggestions, auto-applies what the autonomy policy allows and holds the rest
/// for review. All buffer writes go through here.
pub struct Orchestrator {
    provider: Box<dyn EditProvider + Send + Sync>,
    buffer: Box<dyn TextBuffer + Send>,
    policy: AutonomyPolicy,
    ledger: Ledger,
    events: EventBus,
    observer: Observer,
    options: OrchestratorOptions,
    state: RoundState,
    latest_round: u64,
    event_seq: u64,
    pending: Vec<PendingSuggestion>,
    known_fingerprint: String,
}

impl Orchestrator {
    pub fn new(
        provider: Box<dyn EditProvider + Send + Sync>,
        buffer: Box<dyn TextBuffer + Send>,
        options: OrchestratorOptions,
    ) -> Self {
        let known_fingerprint = fingerprint(&buffer.value());
        Self {
            provider,
            buffer,
            policy: AutonomyPolicy::new(options.autonomy_level),
            ledger: Ledger::from_settings(&options.ledger),
            events: EventBus::new(),
            observer: Observer::disabled(),
            options,
            state: RoundState::Idle,
            latest_round: 0,
            event_seq: 0,
            pending: Vec::new(),
            known_fingerprint,
        }
    }

    /// Orchestrator configured from `workspace` settings, logging to its runtime dir.
    pub fn for_workspace(
        workspace: &Path,
        provider: Box<dyn EditProvider + Send + Sync>,
        buffer: Box<dyn TextBuffer + Send>,
    ) -> Result<Self> {
        let cfg = AppConfig::ensure(workspace)?;
        let observer = Observer::new(workspace, &cfg.telemetry)?;
        let options = OrchestratorOptions::from_config(&cfg);
        Ok(Self::new(provider, buffer, options).with_observer(observer))
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.options.session_id
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn current_round(&self) -> u64 {
        self.latest_round
    }

    pub fn autonomy(&self) -> &AutonomyConfig {
        self.policy.config()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn pending(&self) -> &[PendingSuggestion] {
        &self.pending
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn buffer(&self) -> &dyn TextBuffer {
        &*self.buffer
    }

    /// Direct access for the widget. Writes made here are out-of-band and
    /// invalidate pending suggestions on the next check.
    pub fn buffer_mut(&mut self) -> &mut dyn TextBuffer {
        &mut *self.buffer
    }

    pub fn observer_mut(&mut self) -> &mut Observer {
        &mut self.observer
    }

    pub fn on<F>(&mut self, event_type: EventType, listener: F) -> bool
    where
        F: FnMut(&EditorEvent) + Send + 'static,
    {
        self.events.on(event_type, listener)
    }

    pub fn off(&mut self, event_type: EventType) -> bool {
        self.events.off(event_type)
    }

    pub fn begin_round(&mut self, instruction: EditInstruction) -> Result<RoundTicket, EditError> {
        if matches!(
            self.state,
            RoundState::Generating { .. } | RoundState::AutoApplying { .. }
        ) {
            return Err(EditError::GenerationInFlight);
        }
        self.sync_with_buffer();

        let text = self.buffer.value();
        let len = char_len(&text);
        let selection = instruction
            .selection
            .unwrap_or_else(|| self.buffer.selection())
            .clamp(len);
        let (selection, original_text) = if selection.is_empty() {
            (Selection::new(0, len), text)
        } else {
            (selection, selection.slice(&text).to_string())
        };

        self.latest_round += 1;
        let round = self.latest_round;
        let config = self.policy.snapshot();
        let llm = &self.options.llm;
        let request = EditRequest {
            original_text,
            instruction: instruction.instruction,
            context: instruction.context,
            autonomy_level: config.level,
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            include_reasoning: llm.include_reasoning,
            include_intermediate_steps: llm.include_intermediate_steps,
        };
        self.state = RoundState::Generating { round };
        self.observer.verbose_log(&format!(
            "round {round} started ({} autonomy, chars {}..{})",
            config.level, selection.start, selection.end
        ));
        Ok(RoundTicket {
            round,
            request,
            config,
            selection,
        })
    }

    pub fn complete_round(
        &mut self,
        ticket: RoundTicket,
        response: Result<LlmResponse>,
    ) -> Result<RoundOutcome, EditError> {
        let in_flight =
            matches!(self.state, RoundState::Generating { round } if round == ticket.round);
        if !in_flight || ticket.round != self.latest_round {
            self.observer.warn_log(&format!(
                "discarding response for stale round {} (latest {})",
                ticket.round, self.latest_round
            ));
            return Err(EditError::StaleRound {
                round: ticket.round,
                latest: self.latest_round,
            });
        }

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.state = self.resting_state();
                self.observer
                    .warn_log(&format!("round {} provider failure: {err:#}", ticket.round));
                self.emit(EditorEvent::SuggestionGenerated {
                    suggestions: Vec::new(),
                    diff: EditDiff::default(),
                });
                return Err(EditError::Provider(format!("{err:#}")));
            }
        };

        self.sync_with_buffer();
        let (parsed, parse_error) = parse_or_empty(&response.text);
        if let Some(err) = &parse_error {
            self.observer.warn_log(&format!("round {}: {err}", ticket.round));
        }
        if !self.pending.is_empty() {
            self.observer.verbose_log(&format!(
                "round {} supersedes {} pending suggestion(s)",
                ticket.round,
                self.pending.len()
            ));
            self.pending.clear();
        }

        let model = if response.model.is_empty() {
            ticket.request.model.clone()
        } else {
            response.model.clone()
        };
        let text = self.buffer.value();
        let mut diff = from_suggestions_near(&text, &parsed.suggestions, ticket.selection.start);
        diff.reasoning = parsed.overall_reasoning.clone();
        self.audit(
            AuditAction::Suggestion,
            diff.chunks.clone(),
            diff.reasoning.clone(),
            ticket.config.level,
            model.clone(),
            diff.overall_confidence,
        );

        self.pending = parsed
            .suggestions
            .iter()
            .cloned()
            .zip(diff.chunks.iter().cloned())
            .map(|(suggestion, chunk)| PendingSuggestion {
                suggestion,
                chunk,
                model: model.clone(),
            })
            .collect();

        // Unlocatable suggestions never take a batch slot.
        let located: Vec<usize> = (0..diff.chunks.len())
            .filter(|&idx| diff.chunks[idx].is_located())
            .collect();
        let candidates: Vec<EditSuggestion> = located
            .iter()
            .map(|&idx| parsed.suggestions[idx].clone())
            .collect();
        let plan = partition_for_auto_apply(&candidates, &ticket.config);
        let eligible: Vec<usize> = plan.auto_apply.into_iter().map(|k| located[k]).collect();
        let eligible_chunks: Vec<DiffChunk> =
            eligible.iter().map(|&idx| diff.chunks[idx].clone()).collect();

        let mut auto_applied = Vec::new();
        let mut auto_apply_error = None;
        if !eligible.is_empty() {
            self.state = RoundState::AutoApplying {
                round: ticket.round,
            };
        }
        for idx in apply_order(&eligible_chunks).into_iter().map(|k| eligible[k]) {
            let id = parsed.suggestions[idx].id;
            let Ok(pos) = self.position(id) else {
                continue;
            };
            let item = self.pending.remove(pos);
            let result = if item.chunk.is_located() {
                self.commit(&item, item.chunk.clone(), ticket.config.level)
            } else {
                Err(stale_chunk(&self.buffer.value(), &diff.chunks[idx]))
            };
            match result {
                Ok(()) => auto_applied.push(id),
                Err(err) => {
                    self.observer
                        .warn_log(&format!("auto-apply stopped at suggestion {id}: {err}"));
                    self.pending.insert(pos, item);
                    auto_apply_error = Some(err);
                    break;
                }
            }
        }

        let pending = self.pending.iter().map(|p| p.suggestion.id).collect();
        self.state = self.resting_state();
        self.emit(EditorEvent::SuggestionGenerated {
            suggestions: parsed.suggestions.clone(),
            diff: diff.clone(),
        });

        Ok(RoundOutcome {
            round: ticket.round,
            suggestions: parsed.suggestions,
            diff,
            auto_applied,
            pending,
            parse_error,
            auto_apply_error,
        })
    }

    /// Blocking round: begin, call the provider, complete.
    pub fn request_edit(
        &mut self,
        instruction: EditInstruction,
    ) -> Result<RoundOutcome, EditError> {
        let ticket = self.begin_round(instruction)?;
        let response = self.provider.suggest_edits(&ticket.request);
        self.complete_round(ticket, response)
    }

    /// Abandon the in-flight round. A response that arrives later is stale.
    pub fn cancel_round(&mut self) -> bool {
        let RoundState::Generating { round } = self.state else {
            return false;
        };
        self.state = self.resting_state();
        self.observer.verbose_log(&format!("round {round} cancelled"));
        self.emit(EditorEvent::SuggestionGenerated {
            suggestions: Vec::new(),
            diff: EditDiff::default(),
        });
        true
    }

    /// Apply a pending suggestion. Suggestions without a position are placed by
    /// search first; one that cannot be placed is discarded.
    pub fn accept(&mut self, suggestion_id: Uuid) -> Result<(), EditError> {
        self.sync_with_buffer();
        let idx = self.position(suggestion_id)?;
        let item = self.pending.remove(idx);
        let level = self.policy.level();
        let text = self.buffer.value();

        let result = match resolve_chunk(&text, &item.chunk) {
            Some(chunk) => self.commit(&item, chunk, level),
            None => Err(stale_chunk(&text, &item.chunk)),
        };
        if let Err(err) = &result {
            self.observer.warn_log(&format!("discarded suggestion {suggestion_id}: {err}"));
        }
        self.settle();
        result
    }

    pub fn reject(&mut self, suggestion_id: Uuid) -> Result<(), EditError> {
        let idx = self.position(suggestion_id)?;
        let item = self.pending.remove(idx);
        self.record_rejection(item);
        self.settle();
        Ok(())
    }

    /// Apply every pending suggestion in descending offset order, validating
    /// each one against the buffer just before it is applied.
    pub fn accept_all(&mut self) -> BatchOutcome {
        self.sync_with_buffer();
        let level = self.policy.level();
        let text = self.buffer.value();
        let mut outcome = BatchOutcome::default();

        let mut placed = Vec::new();
        for mut item in std::mem::take(&mut self.pending) {
            match resolve_chunk(&text, &item.chunk) {
                Some(chunk) => {
                    item.chunk = chunk;
                    placed.push(item);
                }
                None => outcome
                    .discarded
                    .push((item.suggestion.id, stale_chunk(&text, &item.chunk))),
            }
        }

        let chunks: Vec<DiffChunk> = placed.iter().map(|p| p.chunk.clone()).collect();
        let queue: Vec<(Uuid, DiffChunk)> = apply_order(&chunks)
            .into_iter()
            .map(|idx| (placed[idx].suggestion.id, chunks[idx].clone()))
            .collect();
        self.pending = placed;
        for (id, first_placed) in queue {
            let Ok(pos) = self.position(id) else {
                continue;
            };
            let item = self.pending.remove(pos);
            // A chunk overlapped by an earlier edit in this batch is not re-searched.
            let result = if item.chunk.is_located() {
                self.commit(&item, item.chunk.clone(), level)
            } else {
                Err(stale_chunk(&self.buffer.value(), &first_placed))
            };
            match result {
                Ok(()) => outcome.applied.push(id),
                Err(err) => outcome.discarded.push((id, err)),
            }
        }
        for (id, err) in &outcome.discarded {
            self.observer.warn_log(&format!("discarded suggestion {id}: {err}"));
        }
        self.settle();
        outcome
    }

    pub fn reject_all(&mut self) -> Vec<Uuid> {
        let items = std::mem::take(&mut self.pending);
        let ids = items.iter().map(|p| p.suggestion.id).collect();
        for item in items {
            self.record_rejection(item);
        }
        self.settle();
        ids
    }

    /// Restore the text before the most recent applied edit.
    pub fn undo(&mut self) -> Result<EditHistoryEntry, EditError> {
        self.sync_with_buffer();
        let entry = self.ledger.history.undo()?.clone();
        self.write_buffer(&entry.text_before);
        self.after_history_move(AuditAction::Undo, &entry);
        Ok(entry)
    }

    pub fn redo(&mut self) -> Result<EditHistoryEntry, EditError> {
        self.sync_with_buffer();
        let entry = self.ledger.history.redo()?.clone();
        self.write_buffer(&entry.text_after);
        self.after_history_move(AuditAction::Redo, &entry);
        Ok(entry)
    }

    /// Switch autonomy level between rounds. Returns whether the level changed.
    pub fn set_autonomy_level(&mut self, level: AutonomyLevel) -> Result<bool, EditError> {
        if matches!(
            self.state,
            RoundState::Generating { .. } | RoundState::AutoApplying { .. }
        ) {
            return Err(EditError::GenerationInFlight);
        }
        if !self.policy.set_level(level) {
            return Ok(false);
        }
        self.observer.verbose_log(&format!("autonomy level set to {level}"));
        let config = self.policy.snapshot();
        self.emit(EditorEvent::AutonomyChanged { level, config });
        Ok(true)
    }

    pub fn set_autonomy_level_named(&mut self, level: &str) -> Result<bool, EditError> {
        self.set_autonomy_level(level.parse()?)
    }

    /// Called by the widget after the user edits the buffer. Returns the number
    /// of pending suggestions discarded because their offsets no longer hold.
    pub fn notify_buffer_changed(&mut self) -> usize {
        self.sync_with_buffer()
    }

    /// Compare two texts without involving the provider.
    pub fn generate_diff(&mut self, req: &DiffRequest) -> EditDiff {
        let diff = from_request(req);
        self.emit(EditorEvent::DiffGenerated { diff: diff.clone() });
        diff
    }

    fn position(&self, suggestion_id: Uuid) -> Result<usize, EditError> {
        self.pending
            .iter()
            .position(|p| p.suggestion.id == suggestion_id)
            .ok_or(EditError::UnknownSuggestion(suggestion_id))
    }

    /// Apply one chunk to the live buffer and record it.
    fn commit(
        &mut self,
        item: &PendingSuggestion,
        chunk: DiffChunk,
        level: AutonomyLevel,
    ) -> Result<(), EditError> {
        let before = self.buffer.value();
        if !chunk_matches(&before, &chunk) {
            return Err(stale_chunk(&before, &chunk));
        }
        let after = apply_chunk(&before, &chunk)?;
        let mut chunk = chunk;
        chunk.applied = true;
        self.write_buffer(&after);
        self.rebase_pending(&chunk);

        let reasoning = item.suggestion.reasoning.clone();
        self.ledger.history.record(EditHistoryEntry {
            id: Uuid::now_v7(),
            timestamp: self.now(),
            text_before: before,
            text_after: after.clone(),
            applied_chunks: vec![chunk.clone()],
            reasoning: reasoning.clone(),
            autonomy_level: level,
        });
        self.audit(
            AuditAction::Apply,
            vec![chunk.clone()],
            reasoning.clone(),
            level,
            item.model.clone(),
            item.suggestion.confidence,
        );
        self.emit(EditorEvent::EditApplied {
            suggestion_id: item.suggestion.id,
            new_text: after,
            chunks: vec![chunk],
            reasoning,
        });
        Ok(())
    }

    /// Keep pending chunks positioned against the buffer after `applied` went in.
    /// A chunk the edit overlapped loses its position.
    fn rebase_pending(&mut self, applied: &DiffChunk) {
        for item in &mut self.pending {
            if let Some(moved) = rebase_chunk(&item.chunk, applied) {
                item.chunk = moved;
            } else {
                self.observer.verbose_log(&format!(
                    "suggestion {} overlaps an applied edit; position cleared",
                    item.suggestion.id
                ));
                item.chunk.start_index = DiffChunk::UNLOCATED;
                item.chunk.end_index = DiffChunk::UNLOCATED;
            }
        }
    }

    fn record_rejection(&mut self, item: PendingSuggestion) {
        let level = self.policy.level();
        self.audit(
            AuditAction::Reject,
            Vec::new(),
            item.suggestion.reasoning,
            level,
            item.model,
            item.suggestion.confidence,
        );
        self.emit(EditorEvent::EditRejected {
            suggestion_id: item.suggestion.id,
        });
    }

    fn after_history_move(&mut self, action: AuditAction, entry: &EditHistoryEntry) {
        if !self.pending.is_empty() {
            self.observer.warn_log(&format!(
                "{} pending suggestion(s) discarded by {:?}",
                self.pending.len(),
                action
            ));
            self.pending.clear();
        }
        let level = self.policy.level();
        let model = self.options.llm.model.clone();
        self.audit(
            action,
            entry.applied_chunks.clone(),
            entry.reasoning.clone(),
            level,
            model,
            overall_confidence(&entry.applied_chunks),
        );
        self.settle();
    }

    /// Detect edits made behind our back. Pending chunks were positioned against
    /// the old text, so all of them are dropped.
    fn sync_with_buffer(&mut self) -> usize {
        let current = fingerprint(&self.buffer.value());
        if current == self.known_fingerprint {
            return 0;
        }
        self.known_fingerprint = current;
        let discarded = self.pending.len();
        self.pending.clear();
        if discarded > 0 {
            self.observer.warn_log(&format!(
                "buffer changed outside the editor; discarded {discarded} pending suggestion(s)"
            ));
        }
        let level = self.policy.level();
        let model = self.options.llm.model.clone();
        self.audit(
            AuditAction::Edit,
            Vec::new(),
            format!("buffer edited directly; {discarded} pending suggestion(s) discarded"),
            level,
            model,
            0.0,
        );
        self.settle();
        discarded
    }

    /// Programmatic write that keeps the caret where it was, clamped to the new text.
    fn write_buffer(&mut self, text: &str) {
        let selection = self.buffer.selection();
        let len = char_len(text);
        self.buffer.set_value(text);
        self.buffer.set_selection(Selection::new(
            restore_cursor(selection.start, len),
            restore_cursor(selection.end, len),
        ));
        self.known_fingerprint = fingerprint(text);
    }

    fn resting_state(&self) -> RoundState {
        if self.pending.is_empty() {
            RoundState::Idle
        } else {
            RoundState::Holding
        }
    }

    fn settle(&mut self) {
        if matches!(self.state, RoundState::Idle | RoundState::Holding) {
            self.state = self.resting_state();
        }
    }

    fn audit(
        &mut self,
        action: AuditAction,
        changes: Vec<DiffChunk>,
        reasoning: String,
        level: AutonomyLevel,
        model: String,
        confidence: f64,
    ) {
        let entry = AuditTrailEntry {
            id: Uuid::now_v7(),
            timestamp: self.now(),
            action,
            session_id: self.options.session_id,
            changes,
            reasoning,
            autonomy_level: level,
            model_used: model,
            confidence,
        };
        self.ledger.audit.append(entry);
    }

    fn emit(&mut self, event: EditorEvent) {
        self.event_seq += 1;
        let envelope = EventEnvelope {
            seq_no: self.event_seq,
            at: self.now(),
            session_id: self.options.session_id,
            event,
        };
        if let Err(err) = self.observer.record_event(&envelope) {
            self.observer.warn_log(&format!("failed to record event: {err:#}"));
        }
        self.events.emit(&envelope.event);
    }

    fn now(&self) -> DateTime<Utc> {
        (self.options.clock)()
    }
}

/// Located chunks are used as stored and must still match. Only chunks with
/// no position are searched for.
fn resolve_chunk(text: &str, chunk: &DiffChunk) -> Option<DiffChunk> {
    if chunk.is_located() {
        return chunk_matches(text, chunk).then(|| chunk.clone());
    }
    relocate(text, chunk, 0)
}

fn stale_chunk(text: &str, chunk: &DiffChunk) -> EditError {
    EditError::OffsetOutOfRange {
        start: chunk.start_index,
        end: chunk.end_index,
        len: char_len(text),
    }
}
