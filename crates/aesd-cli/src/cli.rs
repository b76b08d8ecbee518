use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "aesd",
    about = "aesd: bounded line log with a TCP front end",
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

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BackingKind {
    Ring,
    File,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the log service
    Serve(ServeArgs),
    /// Write a string to a file, replacing its contents
    Write(WriteArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ConfigSource {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Listen address, overrides the configured one
    #[arg(long)]
    pub bind: Option<String>,
    /// Listen port, overrides the port of the listen address
    #[arg(short, long)]
    pub port: Option<u16>,
    #[arg(long, value_enum)]
    pub backing: Option<BackingKind>,
    /// Ring capacity in records
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Path of the plain-file log
    #[arg(long)]
    pub data_file: Option<PathBuf>,
    /// Keep the plain-file log on exit
    #[arg(long)]
    pub keep_data_file: bool,
    /// Disable the periodic timestamp writer
    #[arg(long)]
    pub no_timestamps: bool,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Run in the background, detached from the terminal
    #[arg(short, long)]
    pub daemon: bool,
    /// Report startup success or failure on stdout (set for the background
    /// child by `--daemon`)
    #[arg(long, hide = true)]
    pub notify_ready: bool,
    #[command(flatten)]
    pub source: ConfigSource,
}

#[derive(Args)]
pub struct WriteArgs {
    pub path: PathBuf,
    pub text: String,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub source: ConfigSource,
}
