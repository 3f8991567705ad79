use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "psdata",
    about = "Encode, decode and hash PsData documents",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

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
    /// Convert a JSON document to the binary token format
    Encode(EncodeArgs),
    /// Convert a binary document back to JSON
    Decode(DecodeArgs),
    /// Print the structural hash of a JSON document
    Hash(DocumentArgs),
    /// Show every node with its key, imprint size and hash
    Inspect(DocumentArgs),
    /// Describe every type of a schema as JSON
    Schema(SchemaArgs),
}

/// A JSON document read against a schema.
#[derive(Args, Clone)]
pub struct DocumentArgs {
    /// TOML schema declaring the types
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Type of the document root
    #[arg(short = 't', long = "type")]
    pub type_name: String,
    #[arg(short, long)]
    pub input: PathBuf,
}

#[derive(Args)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub document: DocumentArgs,
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct DecodeArgs {
    #[arg(short, long)]
    pub input: PathBuf,
    /// Print to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct SchemaArgs {
    /// TOML schema declaring the types
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Print to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
