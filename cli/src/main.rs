//! CLI entrypoint for council
//!
//! Wires the layers together with dependency injection and runs either
//! the HTTP API server or a one-shot local deliberation.

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use council_application::ports::context_source::ContextSelectors;
use council_application::{SessionOrchestrator, StartRequest};
use council_domain::{CompanyId, Question, SessionEvent, StageId, UserId};
use council_infrastructure::{
    ConfigLoader, DirectoryContextSource, FileConfig, HttpLlmGateway, HttpQuotaGate,
    JsonlMessageLog, LocalQuotaGate, MemorySessionStore, QuotaMode,
};
use council_server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "council",
    about = "Council of AI advisors - parallel deliberation with a chairman synthesis"
)]
struct Cli {
    /// Explicit config file path (overrides discovery)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server
    Serve {
        /// Bind address override (default from config)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Ask the council one question and stream the deliberation to stdout
    Ask {
        question: String,

        /// Emit raw NDJSON events instead of readable output
        #[arg(long)]
        json: bool,

        /// Acting user id
        #[arg(long, default_value = "cli-user")]
        user: String,

        /// Company scope for model overrides and context
        #[arg(long)]
        company: Option<String>,
    },
}

fn init_logging(verbose: u8, log_file: Option<&PathBuf>) -> Option<impl Drop> {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    match log_file {
        Some(path) => {
            let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "council.log".to_string());
            let appender = tracing_appender::rolling::never(parent, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

/// Build the engine and its adapters from configuration.
fn build_state(config: &FileConfig) -> Result<AppState> {
    let gateway = Arc::new(HttpLlmGateway::new(
        &config.gateway.base_url,
        config.gateway.platform_key.clone(),
    ));

    let registry = Arc::new(config.model_registry());

    let quota: Arc<dyn council_application::QuotaGate> = match config.quota.mode {
        QuotaMode::Local => Arc::new(LocalQuotaGate::new(config.quota.monthly_sessions)),
        QuotaMode::Remote => {
            let Some(url) = &config.quota.url else {
                bail!("quota.mode = \"remote\" requires quota.url");
            };
            Arc::new(HttpQuotaGate::new(url))
        }
    };

    let mut store = MemorySessionStore::new();
    if let Some(path) = &config.server.message_log {
        if let Some(audit) = JsonlMessageLog::open(path) {
            store = store.with_audit_log(audit);
        }
    }
    let store: Arc<dyn council_application::SessionStore> = Arc::new(store);

    let context_root = config
        .context
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from("council-context"));
    let context = Arc::new(DirectoryContextSource::new(context_root));

    let orchestrator = SessionOrchestrator::new(
        gateway,
        registry,
        quota,
        Arc::clone(&store),
        context,
        config.engine_config(),
    );

    Ok(AppState {
        orchestrator,
        store,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_ref());

    let config = ConfigLoader::load(cli.config.as_ref()).map_err(|e| anyhow::anyhow!(e))?;
    let state = build_state(&config)?;

    match cli.command {
        Command::Serve { bind } => {
            info!("starting council api server");
            let addr = bind.unwrap_or_else(|| config.server.bind.clone());
            council_server::serve(state, &addr).await?;
        }
        Command::Ask {
            question,
            json,
            user,
            company,
        } => {
            let Some(question) = Question::try_new(question) else {
                bail!("question must not be empty");
            };
            ask(&state.orchestrator, question, user, company, json).await?;
        }
    }

    Ok(())
}

/// One-shot local run: start a session and narrate its event stream.
async fn ask(
    orchestrator: &SessionOrchestrator,
    question: Question,
    user: String,
    company: Option<String>,
    json: bool,
) -> Result<()> {
    let mut handle = orchestrator.start(StartRequest {
        user: UserId::new(user),
        company: company.map(CompanyId::new),
        conversation: None,
        question,
        attachments: Vec::new(),
        selectors: ContextSelectors::default(),
        api_key: None,
    });

    let mut failed: Option<String> = None;
    while let Some(envelope) = handle.events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&envelope)?);
            continue;
        }

        match &envelope.event {
            SessionEvent::SessionOpened { session_id, .. } => {
                eprintln!("session {session_id}");
            }
            SessionEvent::StageStarted { stage, .. } => {
                eprintln!("\n== {} ==", stage_banner(*stage));
            }
            SessionEvent::WorkerStarted { role, model } => {
                eprintln!("  {role} <- {model}");
            }
            SessionEvent::WorkerToken { role, text } => {
                // Only the chairman's answer streams to stdout.
                if role == "chairman" {
                    print!("{text}");
                }
            }
            SessionEvent::WorkerFinished { role, reason, .. } => {
                eprintln!("  {role} finished ({reason:?})");
            }
            SessionEvent::RankingAggregated { entries } => {
                if entries.is_empty() {
                    eprintln!("  (no usable ranking)");
                } else {
                    for entry in entries {
                        eprintln!(
                            "  {:.2}  {}  ({})",
                            entry.average_rank, entry.label, entry.model
                        );
                    }
                }
            }
            SessionEvent::StageFinished { stage, status, lost } => {
                if lost.is_empty() {
                    eprintln!("== {} {:?} ==", stage_banner(*stage), status);
                } else {
                    eprintln!(
                        "== {} {:?} (lost: {}) ==",
                        stage_banner(*stage),
                        status,
                        lost.join(", ")
                    );
                }
            }
            SessionEvent::SessionCompleted { usage } => {
                println!();
                eprintln!(
                    "done: {} in / {} out tokens",
                    usage.input_tokens, usage.output_tokens
                );
            }
            SessionEvent::SessionStopped { by } => {
                eprintln!("\nstopped ({by:?})");
            }
            SessionEvent::SessionFailed { code, message } => {
                failed = Some(format!("{code}: {message}"));
            }
            SessionEvent::Heartbeat { .. } => {}
        }
    }

    if let Some(failure) = failed {
        bail!("session failed - {failure}");
    }
    Ok(())
}

fn stage_banner(stage: StageId) -> &'static str {
    match stage {
        StageId::Draft => "stage 1: independent drafts",
        StageId::Rank => "stage 2: anonymous peer ranking",
        StageId::Synth => "stage 3: chairman synthesis",
    }
}
