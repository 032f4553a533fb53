//! Terminal front end: one-shot runs, the interactive session and chat mode

pub mod approval;
pub mod chat;

use anyhow::{Context, Result};
use cla_core::agent::{ConfirmationGate, ExecutionController, LoopReport};
use cla_core::config::{self, Settings};
use cla_core::context::{
    LearningStore, LocalContextCollector, PlatformInfo, QueryEvaluator, Session,
};
use cla_core::executor::sanitizer::sanitize_query;
use cla_core::executor::ShellRunner;
use cla_core::llm::LlmClient;
use cla_core::output::OutputFormatter;
use console::Style;
use futures::StreamExt;
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chat::ChatHistory;

/// Lines kept in the interactive history file.
pub const HISTORY_SIZE: usize = 1000;

/// One line typed at the interactive prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Quit,
    Clear,
    Empty,
    /// `execute:`/`run:` prefix, goes through the loop
    Execute(String),
    /// Plain text, handled per the session's `--execute` mode
    Query(String),
}

impl ReplInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => return ReplInput::Empty,
            "quit" | "exit" | "q" => return ReplInput::Quit,
            "clear" => return ReplInput::Clear,
            _ => {}
        }
        for prefix in ["execute:", "run:"] {
            if line.len() >= prefix.len()
                && line.is_char_boundary(prefix.len())
                && line[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                return ReplInput::Execute(line[prefix.len()..].trim().to_string());
            }
        }
        ReplInput::Query(line.to_string())
    }
}

/// Everything a terminal session needs: the loop, the model for chat mode
/// and the session state shared by both.
pub struct Assistant {
    controller: ExecutionController,
    client: Arc<LlmClient>,
    session: Session,
    chat: ChatHistory,
    learning_file: Option<PathBuf>,
    /// `None` when local context is switched off
    evaluator: Option<QueryEvaluator>,
    collector: LocalContextCollector,
}

impl Assistant {
    pub fn new(
        settings: &Settings,
        platform: PlatformInfo,
        gate: Arc<dyn ConfirmationGate>,
    ) -> Result<Self> {
        let client = Arc::new(
            LlmClient::new(settings.llm_config()).context("Failed to create model client")?,
        );
        let runner = Arc::new(ShellRunner::new());
        let controller = ExecutionController::new(
            client.clone(),
            runner,
            gate,
            settings.loop_config(),
        )
        .with_event_sink(Arc::new(OutputFormatter::new()));

        let learning_file = if settings.execution.persist_learning {
            config::learning_path()
        } else {
            None
        };
        let fixes = match &learning_file {
            Some(path) => LearningStore::load_or_default(path).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable learning file");
                LearningStore::new()
            }),
            None => LearningStore::new(),
        };
        debug!(fixes = fixes.len(), "learned fixes loaded");

        let chat = ChatHistory::new(&platform);
        let session = Session::new(platform).with_learned_fixes(fixes);
        info!(session = %session.id, model = %settings.model.model, "session started");

        Ok(Self {
            controller,
            client,
            session,
            chat,
            learning_file,
            evaluator: settings
                .execution
                .local_context
                .then(QueryEvaluator::default),
            collector: LocalContextCollector::new(),
        })
    }

    /// Project attachment for `query`, if it is about local files.
    fn local_context(&self, query: &str) -> Option<String> {
        let evaluator = self.evaluator.as_ref()?;
        let cwd = std::env::current_dir()
            .map_err(|e| warn!(error = %e, "no working directory, skipping local context"))
            .ok()?;
        let scope = evaluator.evaluate(query, &cwd);
        let target = scope.target?;
        let context = self.collector.collect(&target)?;
        info!(
            query_type = %scope.query_type,
            path = %target.display(),
            files = context.files.len(),
            "attaching local context"
        );
        Some(context.render())
    }

    /// Run `query` through the execution loop. Ctrl+C cancels this run only.
    pub async fn execute(&mut self, query: &str) -> LoopReport {
        self.session.local_context = self.local_context(query);
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let report = self.controller.run(&mut self.session, query, &cancel).await;
        watcher.abort();

        info!(
            terminal = %report.terminal,
            iterations = report.iterations,
            attempts = report.attempts.len(),
            "query finished"
        );
        self.save_learning();
        report
    }

    /// Answer `query` without running anything, streaming the reply.
    pub async fn chat(&mut self, query: &str) -> Result<()> {
        match self.local_context(query) {
            Some(context) => self.chat.push_user(format!("{}\n\n{}", query, context)),
            None => self.chat.push_user(query),
        }
        let client = self.client.clone();
        let messages = self.chat.messages().to_vec();

        let streamed = async {
            let mut reply = String::new();
            let mut stream = client.chat_stream(&messages);
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
                reply.push_str(&chunk);
            }
            Ok::<_, cla_core::ModelError>(reply)
        };

        let outcome = tokio::select! {
            result = streamed => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        println!();

        match outcome {
            Some(Ok(reply)) => {
                self.chat.push_assistant(reply);
                Ok(())
            }
            Some(Err(e)) => {
                self.chat.pop_user();
                Err(e).context("could not reach model")
            }
            None => {
                self.chat.pop_user();
                println!("{}", Style::new().yellow().apply_to("Cancelled."));
                Ok(())
            }
        }
    }

    /// Handle a single query and map the result to a process exit code.
    pub async fn one_shot(&mut self, query: &str, execute: bool) -> Result<bool> {
        let query = sanitize_query(query).context("Invalid query")?;
        if execute {
            Ok(self.execute(&query).await.is_success())
        } else {
            self.chat(&query).await?;
            Ok(true)
        }
    }

    /// Read-eval loop until `quit` or end of input. Lines are kept in a
    /// history file across sessions.
    pub async fn repl(&mut self, execute: bool) -> Result<()> {
        let bold = Style::new().bold();
        let dim = Style::new().dim();
        let red = Style::new().red();

        println!(
            "{} {}",
            bold.apply_to("cla interactive session"),
            dim.apply_to("(quit to leave, clear to reset, execute: <request> to run commands)")
        );

        let config = Config::builder()
            .max_history_size(HISTORY_SIZE)
            .context("Invalid history size")?
            .auto_add_history(false)
            .build();
        let mut editor = DefaultEditor::with_config(config).context("Failed to open terminal")?;
        let history = config::history_path();
        if let Some(path) = &history {
            if let Err(e) = editor.load_history(path) {
                debug!(error = %e, path = %path.display(), "no history loaded");
            }
        }

        loop {
            // The editor owns the terminal while it waits for a line.
            let line = match tokio::task::block_in_place(|| editor.readline("> ")) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => {
                    println!("{}", dim.apply_to("(type quit to leave)"));
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    save_history(&mut editor, history.as_deref());
                    return Err(e).context("Failed to read input");
                }
            };

            let (text, run) = match ReplInput::parse(&line) {
                ReplInput::Quit => break,
                ReplInput::Empty => continue,
                ReplInput::Clear => {
                    self.session.reset();
                    self.chat.clear();
                    println!("{}", dim.apply_to("Conversation cleared."));
                    continue;
                }
                ReplInput::Execute(text) => (text, true),
                ReplInput::Query(text) => (text, execute),
            };
            let _ = editor.add_history_entry(line.trim());

            let query = match sanitize_query(&text) {
                Ok(query) => query,
                Err(e) => {
                    println!("{} {}", red.apply_to("Invalid query:"), e);
                    continue;
                }
            };

            if run {
                self.execute(&query).await;
            } else if let Err(e) = self.chat(&query).await {
                println!("{} {:#}", red.apply_to("Error:"), e);
            }
        }

        save_history(&mut editor, history.as_deref());
        Ok(())
    }

    fn save_learning(&self) {
        let Some(path) = &self.learning_file else {
            return;
        };
        if let Err(e) = self.session.learned_fixes.save(path) {
            warn!(error = %e, path = %path.display(), "could not save learned fixes");
        }
    }
}

fn save_history(editor: &mut DefaultEditor, path: Option<&std::path::Path>) {
    let Some(path) = path else {
        return;
    };
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(error = %e, path = %dir.display(), "could not create history directory");
            return;
        }
    }
    if let Err(e) = editor.save_history(path) {
        warn!(error = %e, path = %path.display(), "could not save history");
    }
}
