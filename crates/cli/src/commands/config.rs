use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fixflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    vec![
        Field {
            key: "database.url",
            env_keys: &["FIXFLOW_DATABASE_URL", "CONVERSATIONS_DB_PATH"],
            value: config.database.url.clone(),
        },
        Field {
            key: "database.max_connections",
            env_keys: &["FIXFLOW_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key: "database.timeout_secs",
            env_keys: &["FIXFLOW_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key: "llm.provider",
            env_keys: &["FIXFLOW_LLM_PROVIDER"],
            value: config.llm.provider.as_str().to_string(),
        },
        Field {
            key: "llm.model",
            env_keys: &["FIXFLOW_LLM_MODEL"],
            value: config.llm.model.clone(),
        },
        Field {
            key: "llm.base_url",
            env_keys: &["FIXFLOW_LLM_BASE_URL"],
            value: config.llm.endpoint_base_url(),
        },
        Field {
            key: "llm.api_key",
            env_keys: &["FIXFLOW_LLM_API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"],
            value: llm_api_key.to_string(),
        },
        Field {
            key: "llm.timeout_secs",
            env_keys: &["FIXFLOW_LLM_TIMEOUT_SECS"],
            value: config.llm.timeout_secs.to_string(),
        },
        Field {
            key: "server.bind_address",
            env_keys: &["FIXFLOW_SERVER_BIND_ADDRESS"],
            value: config.server.bind_address.clone(),
        },
        Field {
            key: "server.port",
            env_keys: &["FIXFLOW_SERVER_PORT"],
            value: config.server.port.to_string(),
        },
        Field {
            key: "server.request_timeout_secs",
            env_keys: &["FIXFLOW_SERVER_REQUEST_TIMEOUT_SECS"],
            value: config.server.request_timeout_secs.to_string(),
        },
        Field {
            key: "guardrails.max_output_tokens",
            env_keys: &["FIXFLOW_GUARDRAILS_MAX_OUTPUT_TOKENS"],
            value: config.guardrails.max_output_tokens.to_string(),
        },
        Field {
            key: "guardrails.tokens_per_word",
            env_keys: &["FIXFLOW_GUARDRAILS_TOKENS_PER_WORD"],
            value: config.guardrails.tokens_per_word.to_string(),
        },
        Field {
            key: "logging.level",
            env_keys: &["FIXFLOW_LOGGING_LEVEL", "FIXFLOW_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key: "logging.format",
            env_keys: &["FIXFLOW_LOGGING_FORMAT", "FIXFLOW_LOG_FORMAT"],
            value: config.logging.format.as_str().to_string(),
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["fixflow.toml", "config/fixflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
