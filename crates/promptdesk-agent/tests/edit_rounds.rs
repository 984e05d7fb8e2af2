use promptdesk_agent::{
    EditInstruction, MemoryBuffer, Orchestrator, OrchestratorOptions, RoundState, Selection,
};
use promptdesk_core::{
    AuditAction, AutonomyLevel, DiffGranularity, DiffRequest, EditError, EventType, LlmResponse,
};
use promptdesk_testkit::{EventLog, FailingProvider, ScriptedProvider, response_json, suggestion};

const EVENT_TYPES: [EventType; 5] = [
    EventType::SuggestionGenerated,
    EventType::EditApplied,
    EventType::EditRejected,
    EventType::AutonomyChanged,
    EventType::DiffGenerated,
];

fn orchestrator_with(
    text: &str,
    level: AutonomyLevel,
    provider: Box<dyn promptdesk_llm::EditProvider + Send + Sync>,
) -> (Orchestrator, EventLog) {
    let options = OrchestratorOptions {
        autonomy_level: level,
        ..OrchestratorOptions::default()
    };
    let mut orch = Orchestrator::new(provider, Box::new(MemoryBuffer::new(text)), options);
    let log = EventLog::new();
    for event_type in EVENT_TYPES {
        orch.on(event_type, log.listener());
    }
    (orch, log)
}

fn scripted(text: &str, level: AutonomyLevel, replies: Vec<String>) -> (Orchestrator, EventLog) {
    orchestrator_with(text, level, Box::new(ScriptedProvider::new(replies)))
}

fn reply(text: String) -> anyhow::Result<LlmResponse> {
    Ok(LlmResponse {
        text,
        finish_reason: "stop".to_string(),
        model: "manual".to_string(),
    })
}

fn formal_reply(confidence: f64) -> String {
    response_json(vec![suggestion(
        "replacement",
        "hey what's up",
        "Hello, how are you?",
        confidence,
    )])
}

#[test]
fn assisted_round_auto_applies_confident_suggestion() {
    let (mut orch, log) = scripted(
        "hey what's up",
        AutonomyLevel::Assisted,
        vec![formal_reply(0.85)],
    );

    let outcome = orch
        .request_edit(EditInstruction::new("make this more formal"))
        .expect("round");

    assert_eq!(orch.buffer().value(), "Hello, how are you?");
    assert_eq!(outcome.auto_applied.len(), 1);
    assert!(outcome.pending.is_empty());
    assert!(outcome.parse_error.is_none());
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Apply).len(), 1);
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Suggestion).len(), 1);
    assert_eq!(orch.ledger().history.len(), 1);
    assert_eq!(log.count(EventType::EditApplied), 1);
    assert_eq!(log.count(EventType::SuggestionGenerated), 1);
    assert_eq!(orch.state(), RoundState::Idle);
}

#[test]
fn partial_round_holds_even_high_confidence_suggestions() {
    let (mut orch, log) = scripted(
        "hey what's up",
        AutonomyLevel::Partial,
        vec![formal_reply(0.95)],
    );

    let outcome = orch
        .request_edit(EditInstruction::new("make this more formal"))
        .expect("round");

    assert_eq!(orch.buffer().value(), "hey what's up");
    assert!(outcome.auto_applied.is_empty());
    assert_eq!(outcome.pending.len(), 1);
    assert_eq!(orch.state(), RoundState::Holding);
    assert!(orch.ledger().audit.by_action(AuditAction::Apply).is_empty());
    assert_eq!(log.count(EventType::EditApplied), 0);

    orch.accept(outcome.pending[0]).expect("accept");
    assert_eq!(orch.buffer().value(), "Hello, how are you?");
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Apply).len(), 1);
    assert_eq!(log.count(EventType::EditApplied), 1);
    assert_eq!(orch.state(), RoundState::Idle);
}

#[test]
fn request_carries_round_settings() {
    let provider = ScriptedProvider::new(vec![response_json(vec![])]);
    let seen = provider.requests();
    let (mut orch, _log) =
        orchestrator_with("hey what's up", AutonomyLevel::Assisted, Box::new(provider));

    orch.request_edit(
        EditInstruction::new("make this more formal")
            .with_context("support persona")
            .with_selection(Selection::new(4, 10)),
    )
    .expect("round");

    let requests = seen.lock().expect("lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].original_text, "what's");
    assert_eq!(requests[0].autonomy_level, AutonomyLevel::Assisted);
    assert_eq!(requests[0].context.as_deref(), Some("support persona"));
}

#[test]
fn batch_size_bounds_auto_application() {
    let (mut orch, log) = scripted(
        "alpha beta gamma delta epsilon",
        AutonomyLevel::Assisted,
        vec![],
    );
    let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let body = response_json(
        words
            .iter()
            .map(|w| suggestion("replacement", w, &w.to_uppercase(), 0.95))
            .collect(),
    );

    let mut ticket = orch.begin_round(EditInstruction::new("shout")).expect("begin");
    ticket.config.max_batch_size = 3;
    let outcome = orch.complete_round(ticket, reply(body)).expect("complete");

    assert_eq!(outcome.auto_applied.len(), 3);
    assert_eq!(outcome.pending.len(), 2);
    assert_eq!(orch.buffer().value(), "ALPHA BETA GAMMA delta epsilon");
    assert_eq!(
        outcome.pending,
        vec![outcome.suggestions[3].id, outcome.suggestions[4].id]
    );
    assert_eq!(log.count(EventType::EditApplied), 3);

    let batch = orch.accept_all();
    assert_eq!(batch.applied.len(), 2);
    assert!(batch.discarded.is_empty());
    assert_eq!(orch.buffer().value(), "ALPHA BETA GAMMA DELTA EPSILON");
    assert_eq!(orch.ledger().history.len(), 5);
}

#[test]
fn auto_apply_stops_at_the_first_stale_chunk() {
    let (mut orch, log) = scripted(
        "abcdefgh",
        AutonomyLevel::Autonomous,
        vec![response_json(vec![
            suggestion("replacement", "abcde", "X", 0.95),
            suggestion("replacement", "defgh", "Y", 0.95),
        ])],
    );

    let outcome = orch.request_edit(EditInstruction::new("squash")).expect("round");

    assert_eq!(orch.buffer().value(), "abcY");
    assert_eq!(outcome.auto_applied, vec![outcome.suggestions[1].id]);
    assert_eq!(outcome.pending, vec![outcome.suggestions[0].id]);
    assert_eq!(
        outcome.auto_apply_error,
        Some(EditError::OffsetOutOfRange {
            start: 0,
            end: 5,
            len: 4
        })
    );
    assert_eq!(log.count(EventType::EditApplied), 1);
    assert_eq!(orch.state(), RoundState::Holding);
}

#[test]
fn provider_failure_leaves_buffer_and_pending_untouched() {
    let (mut orch, log) = orchestrator_with(
        "hey what's up",
        AutonomyLevel::Partial,
        Box::new(FailingProvider::new("rate limited")),
    );

    let ticket = orch.begin_round(EditInstruction::new("formal")).expect("begin");
    orch.complete_round(ticket, reply(formal_reply(0.95)))
        .expect("first round");
    assert_eq!(orch.pending().len(), 1);

    let err = orch
        .request_edit(EditInstruction::new("again"))
        .expect_err("provider fails");
    assert_eq!(err, EditError::Provider("rate limited".to_string()));
    assert_eq!(orch.buffer().value(), "hey what's up");
    assert_eq!(orch.pending().len(), 1);
    assert_eq!(orch.state(), RoundState::Holding);
    assert_eq!(log.count(EventType::SuggestionGenerated), 2);
}

#[test]
fn late_response_for_superseded_round_is_discarded() {
    let (mut orch, log) = scripted("hey what's up", AutonomyLevel::Assisted, vec![]);

    let first = orch.begin_round(EditInstruction::new("formal")).expect("begin");
    assert_eq!(
        orch.begin_round(EditInstruction::new("again")).map(|t| t.round),
        Err(EditError::GenerationInFlight)
    );
    assert!(orch.cancel_round());
    let second = orch.begin_round(EditInstruction::new("formal")).expect("begin");

    let err = orch
        .complete_round(first, reply(formal_reply(0.99)))
        .expect_err("stale");
    assert_eq!(err, EditError::StaleRound { round: 1, latest: 2 });
    assert_eq!(orch.buffer().value(), "hey what's up");
    assert_eq!(log.count(EventType::EditApplied), 0);

    orch.complete_round(second, reply(response_json(vec![])))
        .expect("current round");
    assert_eq!(log.count(EventType::SuggestionGenerated), 2);
    assert_eq!(orch.state(), RoundState::Idle);
}

#[test]
fn autonomy_level_is_frozen_while_generating() {
    let (mut orch, log) = scripted("text", AutonomyLevel::Partial, vec![]);
    let ticket = orch.begin_round(EditInstruction::new("x")).expect("begin");
    assert_eq!(
        orch.set_autonomy_level(AutonomyLevel::Autonomous),
        Err(EditError::GenerationInFlight)
    );
    orch.complete_round(ticket, reply(response_json(vec![])))
        .expect("complete");

    assert_eq!(orch.set_autonomy_level(AutonomyLevel::Autonomous), Ok(true));
    assert_eq!(orch.set_autonomy_level(AutonomyLevel::Autonomous), Ok(false));
    assert_eq!(orch.autonomy().max_batch_size, 10);
    assert_eq!(log.count(EventType::AutonomyChanged), 1);
}

#[test]
fn out_of_band_edit_discards_pending_suggestions() {
    let (mut orch, _log) = scripted(
        "hey what's up",
        AutonomyLevel::Partial,
        vec![formal_reply(0.95)],
    );
    let outcome = orch.request_edit(EditInstruction::new("formal")).expect("round");
    let id = outcome.pending[0];

    orch.buffer_mut().set_value("hey, what's up");
    assert_eq!(orch.notify_buffer_changed(), 1);
    assert!(orch.pending().is_empty());
    assert_eq!(orch.state(), RoundState::Idle);
    assert_eq!(orch.accept(id), Err(EditError::UnknownSuggestion(id)));
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Edit).len(), 1);
    assert_eq!(orch.notify_buffer_changed(), 0);
}

#[test]
fn accept_shifts_later_chunks_past_earlier_accepts() {
    let (mut orch, _log) = scripted(
        "hey what's up",
        AutonomyLevel::Partial,
        vec![response_json(vec![
            suggestion("replacement", "hey", "Hello there", 0.95),
            suggestion("replacement", "up", "happening", 0.95),
        ])],
    );
    let outcome = orch.request_edit(EditInstruction::new("formal")).expect("round");

    orch.accept(outcome.pending[0]).expect("first");
    assert_eq!(orch.buffer().value(), "Hello there what's up");
    orch.accept(outcome.pending[1]).expect("second");
    assert_eq!(orch.buffer().value(), "Hello there what's happening");
    assert_eq!(orch.ledger().history.len(), 2);
}

#[test]
fn held_chunk_follows_a_growing_edit_that_repeats_its_text() {
    let (mut orch, _log) = scripted(
        "x a",
        AutonomyLevel::Partial,
        vec![response_json(vec![
            suggestion("replacement", "x", "a a", 0.95),
            suggestion("replacement", "a", "Z", 0.95),
        ])],
    );
    let outcome = orch.request_edit(EditInstruction::new("expand")).expect("round");

    orch.accept(outcome.pending[0]).expect("first");
    assert_eq!(orch.buffer().value(), "a a a");
    assert_eq!(orch.pending()[0].chunk.start_index, 4);
    orch.accept(outcome.pending[1]).expect("second");
    assert_eq!(orch.buffer().value(), "a a Z");
}

#[test]
fn held_chunk_follows_an_auto_applied_edit() {
    let (mut orch, _log) = scripted(
        "x a",
        AutonomyLevel::Assisted,
        vec![response_json(vec![
            suggestion("replacement", "x", "a a", 0.9),
            suggestion("replacement", "a", "Z", 0.5),
        ])],
    );
    let outcome = orch.request_edit(EditInstruction::new("expand")).expect("round");
    assert_eq!(outcome.auto_applied, vec![outcome.suggestions[0].id]);
    assert_eq!(orch.buffer().value(), "a a a");

    orch.accept(outcome.pending[0]).expect("held one");
    assert_eq!(orch.buffer().value(), "a a Z");
    assert_eq!(orch.ledger().history.len(), 2);
}

#[test]
fn chunk_overlapped_by_an_accepted_edit_loses_its_position() {
    let (mut orch, _log) = scripted(
        "abcdefgh",
        AutonomyLevel::Partial,
        vec![response_json(vec![
            suggestion("replacement", "abcde", "X", 0.95),
            suggestion("replacement", "defgh", "Y", 0.95),
        ])],
    );
    let outcome = orch.request_edit(EditInstruction::new("squash")).expect("round");

    orch.accept(outcome.pending[1]).expect("second");
    assert_eq!(orch.buffer().value(), "abcY");
    assert!(!orch.pending()[0].chunk.is_located());

    let err = orch.accept(outcome.pending[0]).expect_err("nothing to place");
    assert!(matches!(err, EditError::OffsetOutOfRange { start: -1, len: 4, .. }));
    assert_eq!(orch.buffer().value(), "abcY");
    assert!(orch.pending().is_empty());
}

#[test]
fn unlocatable_suggestion_does_not_use_a_batch_slot() {
    let (mut orch, _log) = scripted("alpha beta gamma", AutonomyLevel::Assisted, vec![]);
    let body = response_json(vec![
        suggestion("replacement", "omega", "OMEGA", 0.95),
        suggestion("replacement", "alpha", "ALPHA", 0.95),
        suggestion("replacement", "beta", "BETA", 0.95),
        suggestion("replacement", "gamma", "GAMMA", 0.95),
    ]);

    let mut ticket = orch.begin_round(EditInstruction::new("shout")).expect("begin");
    ticket.config.max_batch_size = 3;
    let outcome = orch.complete_round(ticket, reply(body)).expect("complete");

    assert_eq!(outcome.auto_applied.len(), 3);
    assert_eq!(orch.buffer().value(), "ALPHA BETA GAMMA");
    assert_eq!(outcome.pending, vec![outcome.suggestions[0].id]);
    assert_eq!(outcome.auto_apply_error, None);
}

#[test]
fn unlocatable_suggestion_is_held_and_fails_on_accept() {
    let (mut orch, _log) = scripted(
        "hey what's up",
        AutonomyLevel::Assisted,
        vec![response_json(vec![suggestion(
            "replacement",
            "not in the text",
            "anything",
            0.95,
        )])],
    );
    let outcome = orch.request_edit(EditInstruction::new("formal")).expect("round");
    assert!(outcome.auto_applied.is_empty());
    assert!(!outcome.diff.chunks[0].is_located());

    let err = orch.accept(outcome.pending[0]).expect_err("cannot place");
    assert!(matches!(err, EditError::OffsetOutOfRange { start: -1, .. }));
    assert!(orch.pending().is_empty());
    assert_eq!(orch.buffer().value(), "hey what's up");
}

#[test]
fn reject_only_touches_the_audit_trail() {
    let (mut orch, log) = scripted(
        "hey what's up",
        AutonomyLevel::Partial,
        vec![formal_reply(0.95)],
    );
    let outcome = orch.request_edit(EditInstruction::new("formal")).expect("round");
    let id = outcome.pending[0];

    orch.reject(id).expect("reject");
    assert_eq!(orch.reject(id), Err(EditError::UnknownSuggestion(id)));

    let rejections = orch.ledger().audit.by_action(AuditAction::Reject);
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].changes.is_empty());
    assert_eq!(orch.ledger().history.index(), 0);
    assert_eq!(orch.buffer().value(), "hey what's up");
    assert_eq!(log.count(EventType::EditRejected), 1);
    assert_eq!(orch.state(), RoundState::Idle);
}

#[test]
fn reject_all_clears_pending() {
    let (mut orch, log) = scripted(
        "one two",
        AutonomyLevel::Manual,
        vec![response_json(vec![
            suggestion("replacement", "one", "1", 0.99),
            suggestion("replacement", "two", "2", 0.99),
        ])],
    );
    let outcome = orch.request_edit(EditInstruction::new("digits")).expect("round");
    assert_eq!(orch.reject_all(), outcome.pending);
    assert_eq!(log.count(EventType::EditRejected), 2);
    assert_eq!(orch.buffer().value(), "one two");
}

#[test]
fn undo_and_redo_restore_text_with_boundaries() {
    let (mut orch, _log) = scripted(
        "hey what's up",
        AutonomyLevel::Assisted,
        vec![formal_reply(0.85)],
    );
    assert_eq!(
        orch.undo().map(|e| e.id),
        Err(EditError::AtBoundary("undo"))
    );
    orch.request_edit(EditInstruction::new("formal")).expect("round");

    orch.undo().expect("undo");
    assert_eq!(orch.buffer().value(), "hey what's up");
    assert_eq!(
        orch.undo().map(|e| e.id),
        Err(EditError::AtBoundary("undo"))
    );

    orch.redo().expect("redo");
    assert_eq!(orch.buffer().value(), "Hello, how are you?");
    assert_eq!(
        orch.redo().map(|e| e.id),
        Err(EditError::AtBoundary("redo"))
    );
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Undo).len(), 1);
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Redo).len(), 1);
}

#[test]
fn cursor_is_clamped_after_programmatic_writes() {
    let provider = ScriptedProvider::new(vec![response_json(vec![suggestion(
        "replacement",
        "hey what's up",
        "Hi",
        0.9,
    )])]);
    let buffer = MemoryBuffer::new("hey what's up").with_selection(Selection::caret(13));
    let mut orch = Orchestrator::new(
        Box::new(provider),
        Box::new(buffer),
        OrchestratorOptions {
            autonomy_level: AutonomyLevel::Assisted,
            ..OrchestratorOptions::default()
        },
    );
    orch.request_edit(EditInstruction::new("shorter")).expect("round");
    assert_eq!(orch.buffer().value(), "Hi");
    assert_eq!(orch.buffer().selection(), Selection::caret(2));
}

#[test]
fn malformed_response_yields_empty_round_with_parse_error() {
    let (mut orch, log) = scripted(
        "hey what's up",
        AutonomyLevel::Autonomous,
        vec!["I think it looks fine!".to_string()],
    );
    let outcome = orch.request_edit(EditInstruction::new("formal")).expect("round");
    assert!(outcome.suggestions.is_empty());
    assert!(matches!(outcome.parse_error, Some(EditError::Parse(_))));
    assert_eq!(log.count(EventType::SuggestionGenerated), 1);
    assert_eq!(orch.ledger().audit.by_action(AuditAction::Suggestion).len(), 1);
    assert_eq!(orch.state(), RoundState::Idle);
}

#[test]
fn text_diff_is_emitted_as_diff_generated() {
    let (mut orch, log) = scripted("", AutonomyLevel::Partial, vec![]);
    let diff = orch.generate_diff(&DiffRequest {
        original_text: "a\nb\n".to_string(),
        new_text: "a\nc\n".to_string(),
        context: None,
        granularity: DiffGranularity::Line,
        model: None,
    });
    assert_eq!(diff.total_changes, 2);
    assert_eq!(log.count(EventType::DiffGenerated), 1);
}

#[test]
fn edit_applied_payload_uses_wire_names() {
    let (mut orch, log) = scripted(
        "hey what's up",
        AutonomyLevel::Assisted,
        vec![formal_reply(0.85)],
    );
    orch.request_edit(EditInstruction::new("formal")).expect("round");
    let applied = log
        .events()
        .into_iter()
        .find(|e| e.event_type() == EventType::EditApplied)
        .expect("edit-applied");
    let value = serde_json::to_value(&applied).expect("json");
    assert_eq!(value["type"], "edit-applied");
    assert_eq!(value["payload"]["newText"], "Hello, how are you?");
    assert_eq!(value["payload"]["chunks"][0]["applied"], true);
}

#[test]
fn workspace_orchestrator_logs_events() {
    let workspace = tempfile::tempdir().expect("workspace");
    let mut orch = Orchestrator::for_workspace(
        workspace.path(),
        Box::new(FailingProvider::new("offline")),
        Box::new(MemoryBuffer::new("text")),
    )
    .expect("orchestrator");
    assert_eq!(orch.provider_name(), "failing");
    let _ = orch.request_edit(EditInstruction::new("x"));

    let log = std::fs::read_to_string(workspace.path().join(".promptdesk/observe.log"))
        .expect("observe log");
    assert!(log.contains("suggestion-generated"));
    assert!(log.contains("provider failure"));
}
