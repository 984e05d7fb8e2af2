use anyhow::{Context, Result};
use promptdesk_agent::{
    BatchOutcome, EditInstruction, MemoryBuffer, Orchestrator, OrchestratorOptions, Selection,
};
use promptdesk_core::{AppConfig, AutonomyLevel};
use promptdesk_errors::errors;
use promptdesk_llm::ReplayProvider;
use promptdesk_observe::Observer;
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::SuggestArgs;
use crate::output::{print_json, render_chunk};

pub(crate) fn run_suggest(
    cwd: &Path,
    args: SuggestArgs,
    json_mode: bool,
    verbose: bool,
) -> Result<()> {
    let file = cwd.join(&args.file);
    if !file.is_file() {
        return Err(errors::file_not_found(&args.file.to_string_lossy()).into_error());
    }
    let Some(response) = args.response.as_ref() else {
        return Err(errors::missing_response().into_error());
    };
    let selection = args.select.as_deref().map(parse_selection).transpose()?;

    let cfg = AppConfig::ensure(cwd)?;
    let mut options = OrchestratorOptions::from_config(&cfg);
    if let Some(level) = &args.level {
        options.autonomy_level = level.parse::<AutonomyLevel>()?;
    }
    if let Some(model) = &args.model {
        options.llm.model = model.clone();
    }
    let mut observer = Observer::new(cwd, &cfg.telemetry)?;
    observer.set_verbose(verbose);

    let original = fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut orch = Orchestrator::new(
        Box::new(ReplayProvider::new(&cwd.join(response))),
        Box::new(MemoryBuffer::new(original.clone())),
        options,
    )
    .with_observer(observer);

    let mut instruction = EditInstruction::new(args.instruction.clone());
    if let Some(context) = &args.context {
        instruction = instruction.with_context(context.clone());
    }
    if let Some(selection) = selection {
        instruction = instruction.with_selection(selection);
    }

    let outcome = orch.request_edit(instruction)?;
    let pending_before: Vec<serde_json::Value> = orch
        .pending()
        .iter()
        .map(|p| {
            json!({
                "id": p.suggestion.id,
                "type": p.suggestion.edit_type,
                "original_text": p.suggestion.original_text,
                "suggested_text": p.suggestion.suggested_text,
                "confidence": p.suggestion.confidence,
                "located": p.chunk.is_located(),
                "reasoning": p.suggestion.reasoning,
            })
        })
        .collect();
    let batch = if args.yes {
        orch.accept_all()
    } else {
        BatchOutcome::default()
    };

    let text = orch.buffer().value();
    let changed = text != original;
    let written = changed && !args.dry_run;
    if written {
        fs::write(&file, &text).with_context(|| format!("failed to write {}", file.display()))?;
    }
    if let Some(path) = &args.audit_out {
        fs::write(cwd.join(path), orch.ledger().audit.export_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if json_mode {
        print_json(&json!({
            "round": outcome.round,
            "autonomy_level": orch.autonomy().level,
            "suggestions": outcome.suggestions.len(),
            "overall_confidence": outcome.diff.overall_confidence,
            "auto_applied": outcome.auto_applied,
            "pending": pending_before,
            "accepted": batch.applied,
            "discarded": batch
                .discarded
                .iter()
                .map(|(id, err)| json!({"id": id, "error": err.to_string()}))
                .collect::<Vec<_>>(),
            "parse_error": outcome.parse_error.as_ref().map(ToString::to_string),
            "auto_apply_error": outcome.auto_apply_error.as_ref().map(ToString::to_string),
            "changed": changed,
            "written": written,
            "text": text,
        }))?;
        return Ok(());
    }

    if let Some(err) = &outcome.parse_error {
        println!("warning: {err}");
    }
    println!(
        "round {}: {} suggestion(s) at {} autonomy",
        outcome.round,
        outcome.suggestions.len(),
        orch.autonomy().level
    );
    for chunk in &outcome.diff.chunks {
        println!("  {}", render_chunk(chunk));
    }
    println!("auto-applied: {}", outcome.auto_applied.len());
    if let Some(err) = &outcome.auto_apply_error {
        println!("auto-apply stopped: {err}");
    }
    if args.yes {
        println!("accepted: {}", batch.applied.len());
        for (id, err) in &batch.discarded {
            println!("discarded {id}: {err}");
        }
    } else if !pending_before.is_empty() {
        println!(
            "pending: {} (re-run with --yes to accept them)",
            pending_before.len()
        );
    }
    match (changed, written) {
        (true, true) => println!("wrote {}", file.display()),
        (true, false) => println!("dry run: {} left unchanged", file.display()),
        _ => println!("no changes"),
    }
    Ok(())
}

fn parse_selection(raw: &str) -> Result<Selection> {
    let parsed = raw.split_once(':').and_then(|(start, end)| {
        let start = start.trim().parse::<usize>().ok()?;
        let end = end.trim().parse::<usize>().ok()?;
        (start <= end).then(|| Selection::new(start, end))
    });
    parsed.ok_or_else(|| errors::invalid_selection(raw).into_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_flag_parsing() {
        assert_eq!(parse_selection("3:9").expect("range"), Selection::new(3, 9));
        assert_eq!(parse_selection(" 0 : 0 ").expect("caret"), Selection::caret(0));
        assert!(parse_selection("9:3").is_err());
        assert!(parse_selection("3-9").is_err());
        assert!(parse_selection("a:b").is_err());
    }
}
