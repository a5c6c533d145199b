use std::env;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub request_timeout_secs: u64,
}

/// Limits for the model-free output-length classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct GuardrailConfig {
    pub max_output_tokens: u32,
    pub tokens_per_word: f64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Every provider is spoken to through the OpenAI-compatible chat-completions API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi | Self::Gemini)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://fixflow.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                timeout_secs: 60,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
                request_timeout_secs: 120,
            },
            guardrails: GuardrailConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self { max_output_tokens: 1000, tokens_per_word: 1.33 }
    }
}

impl LlmConfig {
    pub fn endpoint_base_url(&self) -> String {
        let base = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url());
        base.trim_end_matches('/').to_string()
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|gemini|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("fixflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        let database = patch.database.unwrap_or_default();
        merge(&mut self.database.url, database.url);
        merge(&mut self.database.max_connections, database.max_connections);
        merge(&mut self.database.timeout_secs, database.timeout_secs);

        let llm = patch.llm.unwrap_or_default();
        merge(&mut self.llm.provider, llm.provider);
        merge(&mut self.llm.api_key, llm.api_key.map(|key| Some(secret_value(key))));
        merge(&mut self.llm.base_url, llm.base_url.map(Some));
        merge(&mut self.llm.model, llm.model);
        merge(&mut self.llm.timeout_secs, llm.timeout_secs);

        let server = patch.server.unwrap_or_default();
        merge(&mut self.server.bind_address, server.bind_address);
        merge(&mut self.server.port, server.port);
        merge(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        merge(&mut self.server.request_timeout_secs, server.request_timeout_secs);

        let guardrails = patch.guardrails.unwrap_or_default();
        merge(&mut self.guardrails.max_output_tokens, guardrails.max_output_tokens);
        merge(&mut self.guardrails.tokens_per_word, guardrails.tokens_per_word);

        let logging = patch.logging.unwrap_or_default();
        merge(&mut self.logging.level, logging.level);
        merge(&mut self.logging.format, logging.format);
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let legacy_path =
            read_env("CONVERSATIONS_DB_PATH").map(|path| format!("sqlite://{path}?mode=rwc"));
        merge(&mut self.database.url, read_env("FIXFLOW_DATABASE_URL").or(legacy_path));
        merge(&mut self.database.max_connections, env_parsed("FIXFLOW_DATABASE_MAX_CONNECTIONS")?);
        merge(&mut self.database.timeout_secs, env_parsed("FIXFLOW_DATABASE_TIMEOUT_SECS")?);

        if let Some(provider) = read_env("FIXFLOW_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        let api_key = first_env(&["FIXFLOW_LLM_API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"]);
        merge(&mut self.llm.api_key, api_key.map(|key| Some(secret_value(key))));
        merge(&mut self.llm.base_url, read_env("FIXFLOW_LLM_BASE_URL").map(Some));
        merge(&mut self.llm.model, read_env("FIXFLOW_LLM_MODEL"));
        merge(&mut self.llm.timeout_secs, env_parsed("FIXFLOW_LLM_TIMEOUT_SECS")?);

        merge(&mut self.server.bind_address, read_env("FIXFLOW_SERVER_BIND_ADDRESS"));
        merge(&mut self.server.port, env_parsed("FIXFLOW_SERVER_PORT")?);
        merge(
            &mut self.server.graceful_shutdown_secs,
            env_parsed("FIXFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );
        merge(
            &mut self.server.request_timeout_secs,
            env_parsed("FIXFLOW_SERVER_REQUEST_TIMEOUT_SECS")?,
        );

        merge(
            &mut self.guardrails.max_output_tokens,
            env_parsed("FIXFLOW_GUARDRAILS_MAX_OUTPUT_TOKENS")?,
        );
        merge(
            &mut self.guardrails.tokens_per_word,
            env_parsed("FIXFLOW_GUARDRAILS_TOKENS_PER_WORD")?,
        );

        merge(&mut self.logging.level, first_env(&["FIXFLOW_LOGGING_LEVEL", "FIXFLOW_LOG_LEVEL"]));
        if let Some(format) = first_env(&["FIXFLOW_LOGGING_FORMAT", "FIXFLOW_LOG_FORMAT"]) {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.database.url, overrides.database_url);
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.llm.provider, overrides.llm_provider);
        merge(&mut self.llm.model, overrides.llm_model);
        merge(&mut self.llm.api_key, overrides.llm_api_key.map(|key| Some(secret_value(key))));
        merge(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_guardrails(&self.guardrails)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("fixflow.toml"), PathBuf::from("config/fixflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    if !(url.starts_with("sqlite:") || url == ":memory:") {
        return Err(invalid(format!("database.url `{url}` is not a sqlite URL")));
    }
    in_range(
        "database.max_connections",
        u64::from(database.max_connections),
        1..=u64::from(u32::MAX),
    )?;
    in_range("database.timeout_secs", database.timeout_secs, 1..=300)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    in_range("llm.timeout_secs", llm.timeout_secs, 1..=300)?;

    if llm.model.trim().is_empty() {
        return Err(invalid("llm.model must name a chat model"));
    }

    let has_key =
        llm.api_key.as_ref().is_some_and(|value| !value.expose_secret().trim().is_empty());
    if llm.provider.requires_api_key() && !has_key {
        return Err(invalid(format!(
            "llm.api_key is required for the {} provider (set FIXFLOW_LLM_API_KEY or GEMINI_API_KEY)",
            llm.provider.as_str()
        )));
    }

    match llm.base_url.as_deref() {
        Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
            Err(invalid(format!("llm.base_url `{url}` must be an http(s) URL")))
        }
        _ => Ok(()),
    }
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    in_range("server.port", u64::from(server.port), 1..=u64::from(u16::MAX))?;
    in_range("server.graceful_shutdown_secs", server.graceful_shutdown_secs, 1..=3600)?;
    in_range("server.request_timeout_secs", server.request_timeout_secs, 1..=600)
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    in_range(
        "guardrails.max_output_tokens",
        u64::from(guardrails.max_output_tokens),
        1..=u64::from(u32::MAX),
    )?;
    let ratio = guardrails.tokens_per_word;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(invalid(format!("guardrails.tokens_per_word must be positive, got {ratio}")));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    let level = logging.level.trim().to_ascii_lowercase();
    if LEVELS.contains(&level.as_str()) {
        Ok(())
    } else {
        Err(invalid(format!("logging.level `{level}` must be one of {}", LEVELS.join("|"))))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn in_range(field: &str, value: u64, range: RangeInclusive<u64>) -> Result<(), ConfigError> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(invalid(format!(
        "{field} must be in range {}..={}, got {value}",
        range.start(),
        range.end()
    )))
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| read_env(key))
}

/// Numeric env override; unparsable values name the offending variable.
fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value })
        })
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    max_output_tokens: Option<u32>,
    tokens_per_word: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
