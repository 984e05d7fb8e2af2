use anyhow::{Context, Result};
use promptdesk_core::DiffGranularity;
use std::fs;

use crate::DiffArgs;
use crate::output::{print_json, render_chunk};

pub(crate) fn run_diff(args: DiffArgs, json_mode: bool) -> Result<()> {
    let granularity: DiffGranularity = args.granularity.parse()?;
    let old = fs::read_to_string(&args.old)
        .with_context(|| format!("failed to read {}", args.old.display()))?;
    let new = fs::read_to_string(&args.new)
        .with_context(|| format!("failed to read {}", args.new.display()))?;

    let diff = promptdesk_diff::from_texts(&old, &new, granularity, args.full);
    if json_mode {
        print_json(&diff)?;
        return Ok(());
    }
    if diff.total_changes == 0 && !args.full {
        println!("No differences.");
        return Ok(());
    }
    for chunk in &diff.chunks {
        println!("{}", render_chunk(chunk));
    }
    println!("{} change(s); {}", diff.total_changes, diff.reasoning);
    Ok(())
}
