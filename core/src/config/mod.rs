//! Configuration
//!
//! One immutable [`Settings`] value is resolved before the loop starts.
//! Precedence, lowest first:
//!
//! 1. built-in defaults
//! 2. system file (`/etc/xdg/command-line-assistant/config.toml`)
//! 3. user file (`~/.config/command-line-assistant/config.toml`)
//! 4. environment (`OLLAMA_*`, `CLA_*`)
//! 5. command-line flags
//!
//! An explicit `--config` file replaces both file layers.

use crate::agent::LoopConfig;
use crate::error::{ClaError, Result};
use crate::llm::{LlmConfig, LlmProvider};
use ::config::{Config as ConfigSource, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Directory name used under the XDG config and data roots.
pub const APP_DIR: &str = "command-line-assistant";
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variables and the settings keys they map to.
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("OLLAMA_ENDPOINT", "model.endpoint"),
    ("OLLAMA_MODEL", "model.model"),
    ("OLLAMA_TEMPERATURE", "model.temperature"),
    ("CLA_MAX_ITERATIONS", "execution.max_iterations"),
    ("CLA_TIMEOUT", "execution.timeout"),
    ("CLA_ALLOW_SUDO", "execution.allow_sudo"),
    ("CLA_AUTO_CONFIRM", "execution.auto_confirm"),
    ("CLA_LOCAL_CONTEXT", "execution.local_context"),
];

/// `[model]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub provider: LlmProvider,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    /// Seconds
    pub request_timeout: u64,
    pub structured_output: bool,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// `[execution]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// `-1` is unbounded
    pub max_iterations: i64,
    /// Seconds per command; `-1` is unbounded
    pub timeout: i64,
    pub allow_sudo: bool,
    pub auto_confirm: bool,
    pub max_command_length: usize,
    pub observation_limit: usize,
    pub persist_learning: bool,
    /// Attach the directory tree and project files to queries about them
    pub local_context: bool,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub model: ModelSettings,
    pub execution: ExecutionSettings,
}

/// Values supplied on the command line. `None` leaves lower layers alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub temperature: Option<f32>,
    pub max_iterations: Option<i64>,
    pub timeout: Option<i64>,
    pub allow_sudo: Option<bool>,
    pub auto_confirm: Option<bool>,
    pub local_context: Option<bool>,
}

/// Where configuration comes from. Built by [`ConfigSources::discover`] in
/// production; tests construct it directly.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub system_file: Option<PathBuf>,
    pub user_file: Option<PathBuf>,
    /// Replaces `system_file` and `user_file`, and must exist
    pub explicit_file: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ConfigSources {
    /// Standard file locations plus the process environment.
    pub fn discover(explicit_file: Option<PathBuf>) -> Self {
        let env = ENV_KEYS
            .iter()
            .filter_map(|(var, _)| std::env::var(var).ok().map(|v| (var.to_string(), v)))
            .collect();
        Self {
            system_file: Some(system_config_path()),
            user_file: user_config_path(),
            explicit_file,
            env,
        }
    }
}

pub fn system_config_path() -> PathBuf {
    Path::new("/etc/xdg").join(APP_DIR).join(CONFIG_FILE)
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// `<data_dir>/command-line-assistant`, home of the log and learning files.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR))
}

pub fn learning_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("learning.json"))
}

pub fn log_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("debug.log"))
}

/// Interactive prompt history, next to the user config file.
pub fn history_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("history"))
}

impl Settings {
    /// Resolve from the standard locations.
    pub fn load(explicit_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        Self::resolve(
            &ConfigSources::discover(explicit_file.map(Path::to_path_buf)),
            overrides,
        )
    }

    /// Merge every layer in precedence order and validate the result.
    pub fn resolve(sources: &ConfigSources, overrides: &ConfigOverrides) -> Result<Self> {
        let mut builder = ConfigSource::builder()
            .set_default("model.provider", "ollama")?
            .set_default("model.endpoint", crate::llm::client::DEFAULT_ENDPOINT)?
            .set_default("model.model", crate::llm::client::DEFAULT_MODEL)?
            .set_default("model.temperature", 0.7)?
            .set_default("model.request_timeout", 120)?
            .set_default("model.structured_output", true)?
            .set_default("execution.max_iterations", 5)?
            .set_default("execution.timeout", 30)?
            .set_default("execution.allow_sudo", false)?
            .set_default("execution.auto_confirm", false)?
            .set_default(
                "execution.max_command_length",
                crate::executor::sanitizer::MAX_COMMAND_LENGTH as i64,
            )?
            .set_default(
                "execution.observation_limit",
                crate::prompt::DEFAULT_OBSERVATION_LIMIT as i64,
            )?
            .set_default("execution.persist_learning", false)?
            .set_default("execution.local_context", true)?;

        match &sources.explicit_file {
            Some(path) => {
                if !path.exists() {
                    return Err(ClaError::invalid_config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                debug!(path = %path.display(), "using explicit config file");
                builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
            }
            None => {
                for path in [&sources.system_file, &sources.user_file].into_iter().flatten() {
                    debug!(path = %path.display(), exists = path.exists(), "config file layer");
                    builder = builder.add_source(
                        File::from(path.as_path())
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        for (var, key) in ENV_KEYS {
            if let Some(value) = sources.env.get(*var) {
                debug!(var, key, "environment override");
                builder = builder.set_override(*key, value.as_str())?;
            }
        }

        builder = builder
            .set_override_option("model.model", overrides.model.clone())?
            .set_override_option("model.endpoint", overrides.endpoint.clone())?
            .set_override_option("model.temperature", overrides.temperature.map(f64::from))?
            .set_override_option("execution.max_iterations", overrides.max_iterations)?
            .set_override_option("execution.timeout", overrides.timeout)?
            .set_override_option("execution.allow_sudo", overrides.allow_sudo)?
            .set_override_option("execution.auto_confirm", overrides.auto_confirm)?
            .set_override_option("execution.local_context", overrides.local_context)?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if !(0.0..=2.0).contains(&model.temperature) {
            return Err(ClaError::invalid_config(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                model.temperature
            )));
        }
        if !(model.endpoint.starts_with("http://") || model.endpoint.starts_with("https://")) {
            return Err(ClaError::invalid_config(format!(
                "endpoint must start with http:// or https://, got '{}'",
                model.endpoint
            )));
        }
        if model.model.trim().is_empty() {
            return Err(ClaError::invalid_config("model name is empty"));
        }
        if model.request_timeout == 0 {
            return Err(ClaError::invalid_config("request_timeout must be positive"));
        }

        let exec = &self.execution;
        if exec.max_iterations != -1 && exec.max_iterations <= 0 {
            return Err(ClaError::invalid_config(format!(
                "max_iterations must be -1 (unbounded) or a positive number, got {}",
                exec.max_iterations
            )));
        }
        if exec.max_iterations > i64::from(u32::MAX) {
            return Err(ClaError::invalid_config("max_iterations is too large"));
        }
        if exec.timeout != -1 && exec.timeout <= 0 {
            return Err(ClaError::invalid_config(format!(
                "timeout must be -1 (unbounded) or a positive number of seconds, got {}",
                exec.timeout
            )));
        }
        if exec.max_command_length == 0 || exec.observation_limit == 0 {
            return Err(ClaError::invalid_config(
                "max_command_length and observation_limit must be positive",
            ));
        }
        Ok(())
    }

    /// Settings consumed by the execution loop.
    pub fn loop_config(&self) -> LoopConfig {
        let exec = &self.execution;
        LoopConfig {
            max_iterations: (exec.max_iterations != -1).then(|| exec.max_iterations as u32),
            timeout: (exec.timeout != -1).then(|| Duration::from_secs(exec.timeout as u64)),
            allow_sudo: exec.allow_sudo,
            auto_confirm: exec.auto_confirm,
            max_command_length: exec.max_command_length,
            observation_limit: exec.observation_limit,
            structured_output: self.model.structured_output,
        }
    }

    /// Settings consumed by the HTTP model client.
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.model.provider,
            endpoint: self.model.endpoint.clone(),
            model: self.model.model.clone(),
            temperature: self.model.temperature,
            request_timeout: Duration::from_secs(self.model.request_timeout),
            structured_output: self.model.structured_output,
            api_key: self.model.api_key.clone(),
        }
    }
}
