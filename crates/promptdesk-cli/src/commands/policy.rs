use anyhow::Result;
use promptdesk_core::{AutonomyConfig, AutonomyLevel};
use promptdesk_policy::{resolve_config, resolve_named};

use crate::PolicyArgs;
use crate::output::print_json;

pub(crate) fn run_policy(args: PolicyArgs, json_mode: bool) -> Result<()> {
    let configs: Vec<AutonomyConfig> = match args.level {
        Some(level) => vec![resolve_named(&level)?],
        None => AutonomyLevel::ALL.iter().map(|l| resolve_config(*l)).collect(),
    };
    if json_mode {
        if configs.len() == 1 {
            print_json(&configs[0])?;
        } else {
            print_json(&configs)?;
        }
        return Ok(());
    }
    println!("{:<11} {:>9} {:>8} {:>5}  types", "level", "threshold", "confirm", "batch");
    for cfg in configs {
        let types: Vec<&str> = cfg.allowed_edit_types.iter().map(|t| t.as_str()).collect();
        println!(
            "{:<11} {:>9.2} {:>8} {:>5}  {}",
            cfg.level.to_string(),
            cfg.auto_apply_threshold,
            if cfg.require_confirmation { "yes" } else { "no" },
            cfg.max_batch_size,
            types.join(",")
        );
    }
    Ok(())
}
