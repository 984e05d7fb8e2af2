use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use promptdesk_errors::ErrorHandler;
use serde_json::json;
use std::path::PathBuf;

mod commands;
mod output;

use commands::config::run_config;
use commands::diff::run_diff;
use commands::policy::run_policy;
use commands::suggest::run_suggest;
use output::print_json;

#[derive(Parser)]
#[command(name = "promptdesk")]
#[command(about = "Review and apply AI-suggested edits to LLM prompts", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the autonomy policy table, or a single level.
    Policy(PolicyArgs),
    /// Run one edit round on a file against a recorded model response.
    Suggest(SuggestArgs),
    /// Compare two files segment by segment.
    Diff(DiffArgs),
    /// Print the merged configuration.
    Config,
}

#[derive(Args)]
struct PolicyArgs {
    /// manual, partial, assisted or autonomous
    level: Option<String>,
}

#[derive(Args)]
struct SuggestArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    instruction: String,
    #[arg(long)]
    context: Option<String>,
    /// JSON reply recorded from the model.
    #[arg(long)]
    response: Option<PathBuf>,
    /// Autonomy level for this round; defaults to the configured one.
    #[arg(long)]
    level: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Character range START:END sent to the model instead of the whole file.
    #[arg(long)]
    select: Option<String>,
    /// Accept every suggestion left pending after auto-apply.
    #[arg(long)]
    yes: bool,
    /// Do not write the file.
    #[arg(long)]
    dry_run: bool,
    /// Write the session's audit trail as JSON.
    #[arg(long)]
    audit_out: Option<PathBuf>,
}

#[derive(Args)]
struct DiffArgs {
    old: PathBuf,
    new: PathBuf,
    #[arg(long, default_value = "line")]
    granularity: String,
    /// Also report unchanged segments.
    #[arg(long)]
    full: bool,
}

fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;
    let verbose = cli.verbose;
    if let Err(err) = run(cli) {
        let handler = ErrorHandler::new().verbose(verbose);
        if json_mode {
            let _ = print_json(&json!({ "error": handler.enhance(&err) }));
        } else {
            eprint!("{}", handler.handle(&err));
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    match cli.command {
        Commands::Policy(args) => run_policy(args, cli.json),
        Commands::Suggest(args) => run_suggest(&cwd, args, cli.json, cli.verbose),
        Commands::Diff(args) => run_diff(args, cli.json),
        Commands::Config => run_config(&cwd, cli.json),
    }
}
