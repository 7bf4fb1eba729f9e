use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

/// Top-level CLI entry point.
#[derive(Default, Debug, Parser)]
#[command(
    name = "crivo",
    version,
    author,
    about = "Procurement-notice ingestion worker and checklist generator"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the ingestion worker against the durable queue.
    Worker(WorkerArgs),
    /// Generate a checklist for a local file and print it as JSON.
    Process(ProcessArgs),
    /// Push an ingestion job onto the queue.
    Enqueue(EnqueueArgs),
}

#[derive(Debug, Args)]
pub struct WorkerArgs;

/// Options for the one-off `process` command (debugging aid; no queue or
/// database involved).
#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Local notice to analyse (PDF or CSV).
    pub input: PathBuf,
    /// Send the raw PDF to the provider instead of parsing locally.
    #[arg(long)]
    pub pdf_native: bool,
    /// Original file name used for format inference; defaults to the input's.
    #[arg(long)]
    pub file_name: Option<String>,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    #[arg(long)]
    pub document_id: String,
    #[arg(long)]
    pub user_id: String,
    /// Presigned URL the worker will download.
    #[arg(long)]
    pub file_url: String,
    #[arg(long)]
    pub file_name: Option<String>,
    /// Force the PDF-native branch for this job.
    #[arg(long)]
    pub use_pdf_file: bool,
}
