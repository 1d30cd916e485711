use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lantern_types::LogLevel;

#[derive(Parser)]
#[command(
    name = "lantern",
    about = "Inspect, share, and prune Lantern log stores and documents",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show record counts and blob usage of a store or document
    Info(SourceArgs),
    /// List log messages
    Messages(MessagesArgs),
    /// List network tasks
    Tasks(TasksArgs),
    /// Write a stored payload to stdout or a file
    Blob(BlobArgs),
    /// Check every checksum of a document
    Verify(SourceArgs),
    /// Share a store as a document or text transcript
    Export(ExportArgs),
    /// Remove old records from a store
    Prune(PruneArgs),
    /// Print the effective configuration of a store
    Config(ConfigArgs),
}

/// A store directory or a document file.
#[derive(Args)]
pub struct SourceArgs {
    pub path: PathBuf,
}

#[derive(Args)]
pub struct MessagesArgs {
    pub path: PathBuf,
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,
    /// Minimum level
    #[arg(short, long)]
    pub level: Option<LogLevel>,
    #[arg(long)]
    pub label: Option<String>,
    /// Only messages whose text contains this
    #[arg(short, long)]
    pub grep: Option<String>,
    #[arg(long)]
    pub pinned: bool,
    #[arg(long)]
    pub oldest_first: bool,
}

#[derive(Args)]
pub struct TasksArgs {
    pub path: PathBuf,
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,
    #[arg(long)]
    pub host: Vec<String>,
    #[arg(long)]
    pub min_status: Option<u16>,
    #[arg(long)]
    pub max_status: Option<u16>,
    /// Only tasks whose URL contains this
    #[arg(short, long)]
    pub grep: Option<String>,
    #[arg(long)]
    pub oldest_first: bool,
}

#[derive(Args)]
pub struct BlobArgs {
    pub path: PathBuf,
    /// Hex content key
    pub key: String,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum RangeArg {
    Session,
    Hour,
    Today,
    All,
}

#[derive(Args)]
pub struct ExportArgs {
    pub store: PathBuf,
    pub output: PathBuf,
    #[arg(long, value_enum, default_value = "all")]
    pub range: RangeArg,
    #[arg(long)]
    pub min_level: Option<LogLevel>,
    /// Write a text transcript instead of a document
    #[arg(long)]
    pub text: bool,
    #[arg(long)]
    pub no_blobs: bool,
}

#[derive(Args)]
pub struct PruneArgs {
    pub store: PathBuf,
    /// Defaults to the configured retention
    #[arg(long, conflicts_with = "all")]
    pub older_than_days: Option<u32>,
    /// Remove every record
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    pub store: Option<PathBuf>,
}
