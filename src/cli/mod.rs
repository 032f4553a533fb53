//! CLI argument parsing using clap 4.x derive macros

use clap::Parser;
use cla_core::config::ConfigOverrides;
use std::path::PathBuf;

/// Turn natural-language requests into shell commands and run them
///
/// Works with a local Ollama server or any OpenAI-compatible endpoint.
/// Without `--execute` the assistant only answers; with it, suggested
/// commands are sanitized, classified and executed in a loop.
#[derive(Parser, Debug)]
#[command(name = "cla")]
#[command(author, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// The request. Read from stdin when omitted and stdin is piped.
    #[arg(num_args = 0..)]
    pub query: Vec<String>,

    /// Start an interactive session
    #[arg(short, long)]
    pub interactive: bool,

    /// Use this config file instead of the system and user files
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Model endpoint URL
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Run suggested commands instead of only answering
    #[arg(short = 'x', long)]
    pub execute: bool,

    /// Run destructive commands without asking
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Keep `sudo` in suggested commands
    #[arg(long = "sudo", alias = "allow-sudo")]
    pub allow_sudo: bool,

    /// Model rounds per request (-1 for unbounded)
    #[arg(long, allow_hyphen_values = true)]
    pub max_iterations: Option<i64>,

    /// Seconds before a command is killed (-1 for unbounded)
    #[arg(long, allow_hyphen_values = true)]
    pub timeout: Option<i64>,

    /// Never attach the directory tree or project files to queries
    #[arg(long)]
    pub no_context: bool,

    /// Print detected platform details and exit
    #[arg(long)]
    pub platform_info: bool,

    /// Also log to stderr at debug level
    #[arg(short, long)]
    pub debug: bool,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

impl Cli {
    /// Flag values that override file and environment settings.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            temperature: self.temperature,
            max_iterations: self.max_iterations,
            timeout: self.timeout,
            allow_sudo: self.allow_sudo.then_some(true),
            auto_confirm: self.yes.then_some(true),
            local_context: self.no_context.then_some(false),
        }
    }

    /// Positional words joined, or `None` when there are none.
    pub fn query_text(&self) -> Option<String> {
        let joined = self.query.join(" ");
        let trimmed = joined.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
