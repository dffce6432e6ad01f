use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "log-sage", version, about = "Self-analyzing log aggregator")]
pub struct Cli {
    /// Configuration file path (defaults to ./log-sage.{toml,yaml,json} when present)
    #[arg(short, long, global = true, env = "LOG_SAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, default_value = "text", global = true, env = "LOG_SAGE_LOG_FORMAT")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the ingestion server (default)
    Serve,

    /// Analyse a log file once and print the result
    Analyze(AnalyzeArgs),

    /// Test configuration file validity
    Test,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Log file, one entry per line with an optional level prefix; `-` reads stdin
    pub input: PathBuf,

    /// Source file of the failing component, included as an excerpt
    #[arg(long)]
    pub source_file: Option<String>,

    /// Function or operation name reported as the failure site
    #[arg(long, default_value = "cli")]
    pub function: String,

    /// Tag in KEY=VALUE form (repeatable)
    #[arg(short, long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with secrets masked)
    Show,

    /// Validate configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Serve if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("tag key cannot be empty in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
