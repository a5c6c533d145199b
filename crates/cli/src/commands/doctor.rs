use fixflow_agent::llm::OpenAiCompatibleClient;
use fixflow_core::config::AppConfig;
use fixflow_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match load_config() {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_model_endpoint(&config));
            checks.push(check_session_store(&config));
        }
        Err(failure) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: failure.message,
            });
            for name in ["model_endpoint", "session_store"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let (overall_status, summary) = if any_fail {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if all_pass {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    } else {
        (CheckStatus::Warn, "doctor: ready with warnings")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

/// Builds the model client without contacting the endpoint.
fn check_model_endpoint(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => {
            let key_state = if config.llm.api_key.is_some() { "api key set" } else { "no api key" };
            DoctorCheck {
                name: "model_endpoint",
                status: CheckStatus::Pass,
                details: format!(
                    "{} model `{}` at {} ({key_state})",
                    config.llm.provider.as_str(),
                    client.model(),
                    client.endpoint()
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "model_endpoint",
            status: CheckStatus::Fail,
            details: format!("model client could not be built: {error}"),
        },
    }
}

fn check_session_store(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return DoctorCheck {
                name: "session_store",
                status: CheckStatus::Fail,
                details: failure.message,
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let versions = migrations::applied_versions(&pool)
            .await
            .map_err(|error| format!("failed to read migration state: {error}"));
        pool.close().await;
        versions
    });

    match result {
        Ok(versions) if versions.is_empty() => DoctorCheck {
            name: "session_store",
            status: CheckStatus::Warn,
            details: format!(
                "connected using `{}` but no migrations applied; run `fixflow migrate`",
                config.database.url
            ),
        },
        Ok(versions) => DoctorCheck {
            name: "session_store",
            status: CheckStatus::Pass,
            details: format!(
                "connected using `{}` ({} migrations applied)",
                config.database.url,
                versions.len()
            ),
        },
        Err(error) => DoctorCheck { name: "session_store", status: CheckStatus::Fail, details: error },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
