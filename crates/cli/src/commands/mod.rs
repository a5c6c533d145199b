pub mod chat;
pub mod config;
pub mod doctor;
pub mod migrate;

use fixflow_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use tokio::runtime::Runtime;

/// What a command prints and the process exit code it maps to.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct Outcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: &'a str,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let output =
            render(&Outcome { command, status: "ok", error_class: None, message: &message });
        Self { exit_code: 0, output }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let message = message.into();
        let output = render(&Outcome {
            command,
            status: "error",
            error_class: Some(error_class),
            message: &message,
        });
        Self { exit_code, output }
    }
}

/// A classified command failure; `exit_code` is stable per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.class, self.message, self.exit_code)
    }
}

pub(crate) fn load_config() -> Result<AppConfig, CommandFailure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn current_thread_runtime() -> Result<Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandFailure::new(
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

fn render(outcome: &Outcome<'_>) -> String {
    serde_json::to_string(outcome).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
