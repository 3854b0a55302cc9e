//! Command line driver for remote agent sessions.
//!
//! Every subcommand prints JSON on stdout. Logs go to stderr and are
//! filtered with `RUST_LOG`.

use std::{collections::HashMap, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use session_fleet_core::config::{DEFAULT_AGENT_ID, DEFAULT_BASE_URL, DEFAULT_MAX_CONCURRENCY};
use session_fleet_dispatch::RetryPolicy;
use session_fleet_session::{
    BatchReport, ClientConfig, LoadTestPlan, SessionClient, SessionError, SessionId,
    SessionOrchestrator, StateBag,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "session-fleet")]
#[command(about = "Create, drive and load test remote agent sessions")]
struct Cli {
    /// Base URL of the agent runtime.
    #[arg(long, env = "SESSION_FLEET_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Agent new sessions are bound to.
    #[arg(long, env = "SESSION_FLEET_AGENT_ID", default_value = DEFAULT_AGENT_ID)]
    agent_id: String,
    /// Per-request timeout in seconds, applied to every call.
    #[arg(long, env = "SESSION_FLEET_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
    /// Maximum number of requests in flight.
    #[arg(long, env = "SESSION_FLEET_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    concurrency: usize,
    /// Attempts for get, list and delete.
    #[arg(long, default_value_t = 3)]
    attempts: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a session.
    Create(CreateArgs),
    /// Send one message to a session.
    Send { id: String, message: String },
    /// List sessions, optionally for one agent.
    List {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show a session.
    Get { id: String },
    /// Delete a session.
    Delete { id: String },
    /// Print the browser URL of a session.
    ChatUrl { id: String },
    /// Send the same message to several sessions at once.
    Broadcast {
        #[arg(long)]
        message: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Send messages to one session, in order.
    Converse {
        id: String,
        #[arg(required = true)]
        messages: Vec<String>,
    },
    /// Create many sessions, then run a short conversation in each.
    LoadTest {
        #[arg(long, default_value_t = 20)]
        sessions: usize,
        #[arg(long, default_value_t = 3)]
        messages: usize,
    },
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    user_name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    preferences: Option<String>,
    #[arg(long)]
    context: Option<String>,
    /// Extra state entry; the value is parsed as JSON when possible.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, Value)>,
}

impl CreateArgs {
    fn into_state(self) -> StateBag {
        let mut state = StateBag::new(self.user_name);
        if let Some(email) = self.email {
            state = state.with_email(email);
        }
        if let Some(preferences) = self.preferences {
            state = state.with_preferences(preferences);
        }
        if let Some(context) = self.context {
            state = state.with_context(context);
        }
        for (key, value) in self.set {
            state.insert(key, value);
        }
        state
    }
}

impl Cli {
    fn orchestrator(&self) -> SessionOrchestrator {
        let mut config = ClientConfig::new(&self.base_url)
            .with_agent_id(&self.agent_id)
            .with_max_concurrency(self.concurrency);
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        SessionOrchestrator::new(SessionClient::new(config))
            .with_retry(RetryPolicy::new(self.attempts))
    }
}

fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err("state key must not be empty".to_string());
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let orchestrator = cli.orchestrator();
    tracing::debug!(
        base_url = %orchestrator.client().config().base_url(),
        ceiling = orchestrator.ceiling(),
        "client configured"
    );

    run(cli.command, &orchestrator).await
}

async fn run(command: Commands, orchestrator: &SessionOrchestrator) -> anyhow::Result<ExitCode> {
    let client = orchestrator.client();
    match command {
        Commands::Create(args) => {
            let id = client
                .create_session(args.into_state())
                .await
                .context("failed to create session")?;
            print_json(&json!({ "session_id": id, "chat_url": client.chat_url(&id) }))?;
        }
        Commands::Send { id, message } => {
            let id = SessionId::from(id);
            let reply = client
                .send_message(&id, &message)
                .await
                .with_context(|| format!("failed to message session {id}"))?;
            print_json(&json!({ "session_id": id, "response": reply }))?;
        }
        Commands::List { agent } => {
            let sessions = orchestrator
                .list_sessions(agent.as_deref())
                .await
                .context("failed to list sessions")?;
            print_json(&json!({ "sessions": sessions }))?;
        }
        Commands::Get { id } => {
            let id = SessionId::from(id);
            let session = orchestrator
                .fetch_many(std::slice::from_ref(&id))
                .await
                .results
                .pop()
                .context("empty batch")?
                .with_context(|| format!("failed to fetch session {id}"))?;
            print_json(&session)?;
        }
        Commands::Delete { id } => {
            let id = SessionId::from(id);
            let deleted = orchestrator
                .delete_many(std::slice::from_ref(&id))
                .await
                .results
                .pop()
                .context("empty batch")?
                .with_context(|| format!("failed to delete session {id}"))?;
            print_json(&json!({ "session_id": id, "deleted": deleted }))?;
        }
        Commands::ChatUrl { id } => {
            println!("{}", client.chat_url(&SessionId::from(id)));
        }
        Commands::Broadcast { message, ids } => {
            let ids: Vec<SessionId> = ids.into_iter().map(SessionId::from).collect();
            let report = orchestrator.broadcast(&ids, &message).await;
            print_json(&batch_json(&report))?;
            return Ok(exit_code(report.failed()));
        }
        Commands::Converse { id, messages } => {
            let id = SessionId::from(id);
            let report = orchestrator.run_conversation(&id, messages).await;
            print_json(&batch_json(&report))?;
            return Ok(exit_code(report.failed()));
        }
        Commands::LoadTest { sessions, messages } => {
            let report = orchestrator
                .load_test(LoadTestPlan {
                    sessions,
                    messages_per_session: messages,
                })
                .await;
            let conversations: HashMap<&SessionId, Vec<Value>> = report
                .messaging
                .results
                .iter()
                .map(|(id, replies)| (id, replies.iter().map(slot_json).collect()))
                .collect();
            print_json(&json!({
                "total_operations": report.total_operations(),
                "failed_operations": report.failed_operations(),
                "elapsed_secs": report.elapsed().as_secs_f64(),
                "throughput": report.throughput(),
                "creation": batch_json(&report.creation),
                "conversations": conversations,
            }))?;
            return Ok(exit_code(report.failed_operations()));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn batch_json<T: Serialize>(report: &BatchReport<T>) -> Value {
    let failures: Vec<Value> = report
        .failures()
        .map(|(index, err)| error_json(Some(index), err))
        .collect();
    json!({
        "succeeded": report.succeeded(),
        "failed": report.failed(),
        "elapsed_secs": report.elapsed.as_secs_f64(),
        "throughput": report.throughput(),
        "results": report.results.iter().map(slot_json).collect::<Vec<_>>(),
        "failures": failures,
    })
}

fn slot_json<T: Serialize>(slot: &Result<T, SessionError>) -> Value {
    match slot {
        Ok(value) => json!({ "ok": value }),
        Err(err) => error_json(None, err),
    }
}

fn error_json(index: Option<usize>, err: &SessionError) -> Value {
    let mut value = json!({ "error": err.to_string(), "category": err.category() });
    if let Some(index) = index {
        value["index"] = json!(index);
    }
    value
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

const fn exit_code(failed: usize) -> ExitCode {
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
