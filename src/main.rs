//! `cla` - a terminal assistant that turns natural-language requests into
//! shell commands, runs them and reports what happened.

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use cla_core::agent::{AutoDeny, ConfirmationGate};
use cla_core::config::{self, Settings};
use cla_core::context::platform;
use cla_core::output::OutputFormatter;

use crate::cli::Cli;
use crate::terminal::approval::TerminalConfirmation;
use crate::terminal::Assistant;

mod cli;
mod logging;
mod terminal;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.version {
        println!(
            "{} v{} ({})",
            Style::new().blue().apply_to("cla"),
            env!("CARGO_PKG_VERSION"),
            env!("CLA_GIT_HASH")
        );
        return Ok(ExitCode::SUCCESS);
    }

    if let Err(e) = logging::init(config::log_path().as_deref(), cli.debug) {
        eprintln!("warning: logging disabled: {:#}", e);
    }

    let platform = platform::detect();
    if cli.platform_info {
        println!("{}", OutputFormatter::new().render_platform(platform));
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;

    let stdin_is_tty = std::io::stdin().is_terminal();
    let query = match cli.query_text() {
        Some(query) => Some(query),
        None if !stdin_is_tty && !cli.interactive => Some(read_piped_stdin().await?),
        None => None,
    };

    // Nobody can answer a prompt when input is piped.
    let gate: Arc<dyn ConfirmationGate> = if stdin_is_tty {
        Arc::new(TerminalConfirmation)
    } else {
        Arc::new(AutoDeny)
    };

    let mut assistant = Assistant::new(&settings, platform.clone(), gate)?;

    match query {
        Some(query) if !cli.interactive => {
            let ok = assistant.one_shot(&query, cli.execute).await?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Some(query) => {
            assistant.one_shot(&query, cli.execute).await?;
            assistant.repl(cli.execute).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            assistant.repl(cli.execute).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn read_piped_stdin() -> Result<String> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read query from stdin")?;
    let input = input.trim().to_string();
    if input.is_empty() {
        anyhow::bail!("no query given and stdin is empty");
    }
    Ok(input)
}
