use super::*;
use lazy_static::lazy_static;
use std::fs;
use std::sync::Mutex;

// Tests touching process-wide environment variables serialise on this lock.
lazy_static! {
    static ref ENV_LOCK: Mutex<()> = Mutex::new(());
}

fn isolated() -> ConfigSources {
    ConfigSources::default()
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_defaults() {
    let settings = Settings::resolve(&isolated(), &ConfigOverrides::default()).unwrap();
    assert_eq!(settings.model.provider, LlmProvider::Ollama);
    assert_eq!(settings.model.endpoint, "http://localhost:11434/api/generate");
    assert_eq!(settings.model.model, "mistral:instruct");
    assert!((settings.model.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(settings.model.request_timeout, 120);
    assert!(settings.model.structured_output);
    assert_eq!(settings.execution.max_iterations, 5);
    assert_eq!(settings.execution.timeout, 30);
    assert!(!settings.execution.allow_sudo);
    assert!(!settings.execution.auto_confirm);
    assert_eq!(settings.execution.max_command_length, 2000);
    assert!(!settings.execution.persist_learning);
    assert!(settings.execution.local_context);
}

#[test]
fn test_local_context_can_be_switched_off() {
    let mut env = HashMap::new();
    env.insert("CLA_LOCAL_CONTEXT".to_string(), "false".to_string());
    let sources = ConfigSources {
        env,
        ..ConfigSources::default()
    };
    let settings = Settings::resolve(&sources, &ConfigOverrides::default()).unwrap();
    assert!(!settings.execution.local_context);

    let overrides = ConfigOverrides {
        local_context: Some(true),
        ..ConfigOverrides::default()
    };
    let settings = Settings::resolve(&sources, &overrides).unwrap();
    assert!(settings.execution.local_context);
}

#[test]
fn test_layer_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let system = write(
        dir.path(),
        "system.toml",
        "[model]\nmodel = \"system-model\"\ntemperature = 0.1\n[execution]\ntimeout = 10\n",
    );
    let user = write(
        dir.path(),
        "user.toml",
        "[model]\nmodel = \"user-model\"\n[execution]\nmax_iterations = 8\n",
    );
    let mut env = HashMap::new();
    env.insert("OLLAMA_MODEL".to_string(), "env-model".to_string());
    env.insert("CLA_TIMEOUT".to_string(), "45".to_string());

    let sources = ConfigSources {
        system_file: Some(system),
        user_file: Some(user),
        explicit_file: None,
        env,
    };

    let settings = Settings::resolve(&sources, &ConfigOverrides::default()).unwrap();
    assert_eq!(settings.model.model, "env-model");
    assert!((settings.model.temperature - 0.1).abs() < 1e-6);
    assert_eq!(settings.execution.max_iterations, 8);
    assert_eq!(settings.execution.timeout, 45);

    let flags = ConfigOverrides {
        model: Some("flag-model".to_string()),
        timeout: Some(-1),
        allow_sudo: Some(true),
        ..ConfigOverrides::default()
    };
    let settings = Settings::resolve(&sources, &flags).unwrap();
    assert_eq!(settings.model.model, "flag-model");
    assert_eq!(settings.execution.timeout, -1);
    assert!(settings.execution.allow_sudo);
}

#[test]
fn test_explicit_file_replaces_file_layers() {
    let dir = tempfile::tempdir().unwrap();
    let user = write(dir.path(), "user.toml", "[model]\nmodel = \"user-model\"\n");
    let explicit = write(dir.path(), "explicit.toml", "[execution]\nauto_confirm = true\n");

    let sources = ConfigSources {
        user_file: Some(user),
        explicit_file: Some(explicit),
        ..ConfigSources::default()
    };
    let settings = Settings::resolve(&sources, &ConfigOverrides::default()).unwrap();
    assert_eq!(settings.model.model, "mistral:instruct");
    assert!(settings.execution.auto_confirm);
}

#[test]
fn test_missing_explicit_file_is_error() {
    let sources = ConfigSources {
        explicit_file: Some(PathBuf::from("/nonexistent/cla.toml")),
        ..ConfigSources::default()
    };
    let err = Settings::resolve(&sources, &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ClaError::InvalidConfig { .. }));
}

#[test]
fn test_invalid_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let broken = write(dir.path(), "broken.toml", "[model\nmodel = ");
    let sources = ConfigSources {
        user_file: Some(broken),
        ..ConfigSources::default()
    };
    let err = Settings::resolve(&sources, &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ClaError::ConfigSource(_)));
}

#[test]
fn test_validation() {
    let cases = [
        ConfigOverrides {
            max_iterations: Some(0),
            ..ConfigOverrides::default()
        },
        ConfigOverrides {
            max_iterations: Some(-2),
            ..ConfigOverrides::default()
        },
        ConfigOverrides {
            timeout: Some(0),
            ..ConfigOverrides::default()
        },
        ConfigOverrides {
            temperature: Some(2.5),
            ..ConfigOverrides::default()
        },
        ConfigOverrides {
            endpoint: Some("localhost:11434".to_string()),
            ..ConfigOverrides::default()
        },
    ];
    for overrides in cases {
        let err = Settings::resolve(&isolated(), &overrides).unwrap_err();
        assert!(
            matches!(err, ClaError::InvalidConfig { .. }),
            "{overrides:?} gave {err}"
        );
    }
}

#[test]
fn test_loop_config_conversion() {
    let overrides = ConfigOverrides {
        max_iterations: Some(-1),
        timeout: Some(12),
        auto_confirm: Some(true),
        ..ConfigOverrides::default()
    };
    let loop_config = Settings::resolve(&isolated(), &overrides)
        .unwrap()
        .loop_config();
    assert_eq!(loop_config.max_iterations, None);
    assert_eq!(loop_config.timeout, Some(Duration::from_secs(12)));
    assert!(loop_config.auto_confirm);
    assert!(!loop_config.allow_sudo);

    let defaults = Settings::resolve(&isolated(), &ConfigOverrides::default())
        .unwrap()
        .loop_config();
    assert_eq!(defaults, LoopConfig::default());
}

#[test]
fn test_llm_config_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(
        dir.path(),
        "c.toml",
        "[model]\nprovider = \"openai\"\nendpoint = \"https://api.example.com/v1\"\napi_key = \"sk-test\"\nrequest_timeout = 30\n",
    );
    let sources = ConfigSources {
        explicit_file: Some(file),
        ..ConfigSources::default()
    };
    let llm = Settings::resolve(&sources, &ConfigOverrides::default())
        .unwrap()
        .llm_config();
    assert_eq!(llm.provider, LlmProvider::OpenAi);
    assert_eq!(llm.api_key.as_deref(), Some("sk-test"));
    assert_eq!(llm.request_timeout, Duration::from_secs(30));
}

#[test]
fn test_discover_reads_process_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    let original = std::env::var_os("OLLAMA_TEMPERATURE");
    std::env::set_var("OLLAMA_TEMPERATURE", "0.25");

    let mut sources = ConfigSources::discover(None);
    sources.system_file = None;
    sources.user_file = None;
    let settings = Settings::resolve(&sources, &ConfigOverrides::default());

    match original {
        Some(val) => std::env::set_var("OLLAMA_TEMPERATURE", val),
        None => std::env::remove_var("OLLAMA_TEMPERATURE"),
    }

    let settings = settings.unwrap();
    assert!((settings.model.temperature - 0.25).abs() < 1e-6);
}

#[test]
fn test_env_bool_and_int_parsing() {
    let mut env = HashMap::new();
    env.insert("CLA_ALLOW_SUDO".to_string(), "true".to_string());
    env.insert("CLA_MAX_ITERATIONS".to_string(), "-1".to_string());
    let sources = ConfigSources {
        env,
        ..ConfigSources::default()
    };
    let settings = Settings::resolve(&sources, &ConfigOverrides::default()).unwrap();
    assert!(settings.execution.allow_sudo);
    assert_eq!(settings.execution.max_iterations, -1);
}
