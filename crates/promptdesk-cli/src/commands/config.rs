use anyhow::Result;
use promptdesk_core::AppConfig;
use std::path::Path;

use crate::output::print_json;

pub(crate) fn run_config(cwd: &Path, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::ensure(cwd)?;
    if json_mode {
        print_json(&cfg)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
    }
    Ok(())
}
