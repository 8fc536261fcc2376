use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tiercache")]
#[command(about = "Read, write and invalidate tiercache entries")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./tiercache.toml when present)
    #[arg(short, long, global = true, env = "TIERCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backing store URL (overrides the config file)
    #[arg(short, long, global = true, env = "TIERCACHE_URL")]
    pub endpoint: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level for cache internals
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a value
    Get(GetArgs),
    /// Write a JSON value
    Set(SetArgs),
    /// Delete a key from every tier
    Delete(DeleteArgs),
    /// Delete every key carrying one of the given tags
    InvalidateTags(InvalidateTagsArgs),
    /// Delete every key matching a glob pattern
    InvalidatePattern(InvalidatePatternArgs),
    /// Check backing store reachability and breaker state
    Health,
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args)]
pub struct GetArgs {
    pub key: String,
}

#[derive(clap::Args)]
pub struct SetArgs {
    pub key: String,
    /// JSON value, or @path to read it from a file
    pub value: String,
    /// Time to live in seconds (0 = local default)
    #[arg(long, default_value_t = 0)]
    pub ttl: u64,
    /// Tag to attach (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    pub key: String,
}

#[derive(clap::Args)]
pub struct InvalidateTagsArgs {
    #[arg(required = true)]
    pub tags: Vec<String>,
}

#[derive(clap::Args)]
pub struct InvalidatePatternArgs {
    /// Redis-style glob, e.g. "session:*"
    pub pattern: String,
}
