use std::io;
use std::sync::Arc;

use fixflow_agent::domains::default_router;
use fixflow_agent::llm::OpenAiCompatibleClient;
use fixflow_agent::{AgentRuntime, MessageRequest};
use fixflow_core::config::AppConfig;
use fixflow_db::{
    connect_with_config, migrations, InMemorySessionRepository, SessionRepository,
    SqlSessionRepository,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::commands::{current_thread_runtime, load_config, CommandFailure, CommandResult};

const QUIT_COMMANDS: [&str; 2] = [":quit", ":exit"];

#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub domain: String,
    pub session: Option<String>,
    pub ephemeral: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatSummary {
    pub answered: usize,
    pub failed: usize,
    pub final_artifact: Option<Map<String, Value>>,
}

pub fn run(options: ChatOptions) -> CommandResult {
    match start(options) {
        Ok((session, summary)) => {
            let outcome = if summary.final_artifact.is_some() { "submitted" } else { "open" };
            CommandResult::success(
                "chat",
                format!(
                    "session {session} {outcome} after {} replies ({} failed turns)",
                    summary.answered, summary.failed
                ),
            )
        }
        Err(failure) => failure.into_result("chat"),
    }
}

fn start(options: ChatOptions) -> Result<(String, ChatSummary), CommandFailure> {
    let config = load_config()?;
    init_logging(&config);
    let runtime = current_thread_runtime()?;
    let ChatOptions { domain, session, ephemeral } = options;
    let session = session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));

    let summary = runtime.block_on(async {
        let sessions: Arc<dyn SessionRepository> = if ephemeral {
            Arc::new(InMemorySessionRepository::default())
        } else {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
            Arc::new(SqlSessionRepository::new(pool))
        };

        let client = OpenAiCompatibleClient::from_config(&config.llm)
            .map_err(|error| CommandFailure::new("model_client", error.to_string(), 2))?;
        let router = default_router(Arc::new(client), &config.guardrails)
            .map_err(|error| CommandFailure::new("catalog", error.to_string(), 2))?;
        let route = router
            .resolve(&domain)
            .map_err(|error| CommandFailure::new("unknown_domain", error.to_string(), 2))?;
        let agent = AgentRuntime::new(Arc::new(router), sessions);

        let io_failure = |error: io::Error| CommandFailure::new("io", error.to_string(), 6);
        let mut stdout = tokio::io::stdout();
        let banner = format!(
            "{} ({}), session {session}. Type :quit to leave.\n",
            route.label,
            route.key.as_str()
        );
        stdout.write_all(banner.as_bytes()).await.map_err(io_failure)?;

        converse(
            &agent,
            &domain,
            &session,
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
        )
        .await
        .map_err(io_failure)
    })?;

    Ok((session, summary))
}

/// Reads one message per line until EOF, a quit command, or a final artifact.
pub async fn converse<R, W>(
    agent: &AgentRuntime,
    domain: &str,
    session: &str,
    input: R,
    output: &mut W,
) -> io::Result<ChatSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = ChatSummary::default();
    let mut lines = input.lines();
    let mut turn = 0usize;

    loop {
        output.write_all(b"you> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if QUIT_COMMANDS.contains(&message) {
            break;
        }

        turn += 1;
        let correlation_id = format!("cli-{session}-{turn}");
        let request = MessageRequest {
            session_id: session.to_string(),
            domain_key: domain.to_string(),
            message: message.to_string(),
        };

        match agent.handle_message(request, &correlation_id).await {
            Ok(reply) => {
                summary.answered += 1;
                output.write_all(format!("agent> {}\n", reply.reply).as_bytes()).await?;
                if let Some(artifact) = reply.final_artifact {
                    let rendered = serde_json::to_string_pretty(&artifact)
                        .unwrap_or_else(|_| "{}".to_string());
                    output.write_all(format!("final complaint:\n{rendered}\n").as_bytes()).await?;
                    summary.final_artifact = Some(artifact);
                    break;
                }
            }
            Err(error) => {
                summary.failed += 1;
                let mapped = error.into_interface(correlation_id);
                output
                    .write_all(
                        format!("error [{}]: {}\n", mapped.code(), mapped.message()).as_bytes(),
                    )
                    .await?;
            }
        }
    }

    output.flush().await?;
    Ok(summary)
}

fn init_logging(config: &AppConfig) {
    use fixflow_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(io::stderr);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
