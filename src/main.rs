mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, OnceCell};
use tracing_subscriber::EnvFilter;
use voicecore_domain::config::{ConfigSeverity, WorkerOptions};
use voicecore_domain::job::RunningJob;
use voicecore_pipeline::{Components, ConversationFlow};
use voicecore_registry::{RegistryClient, RegistryCommand, RegistryEvent, ReconnectBackoff};
use voicecore_tools::{tool_definitions, ProcessManager, ProcessToolDispatcher};
use voicecore_worker::{JobContext, Supervisor};

use cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (options, _config_path) = cli::load_config()?;
            run_worker(Arc::new(options)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (options, config_path) = cli::load_config()?;
            let valid = cli::validate_config(&options, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("voicecore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing, matching the teacher's `init_tracing` (only
/// engaged for `serve` — `config validate`/`version` print plain text).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,voicecore=debug")),
        )
        .json()
        .init();
}

/// Wire C1 (registry link) through C4 (job context) and hand off to the
/// pipeline layer. Each component is constructed and logged in dependency
/// order, mirroring the teacher's `run_server`.
async fn run_worker(options: Arc<WorkerOptions>) -> anyhow::Result<()> {
    tracing::info!(agent_id = %options.agent_id, "voicecore starting");

    // ── Config validation ─────────────────────────────────────────────
    let issues = options.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Tool execution (exec/process) ──────────────────────────────────
    let processes = Arc::new(ProcessManager::new(Default::default()));
    let tool_dispatcher: Arc<dyn voicecore_providers::traits::ToolDispatcher> =
        Arc::new(ProcessToolDispatcher::new(processes.clone()));
    let tools = tool_definitions();
    tracing::info!(tool_count = tools.len(), "tool dispatcher ready");

    // ── Registry client (C1) ────────────────────────────────────────────
    let (events_tx, events_rx) = mpsc::channel::<RegistryEvent>(64);
    let (commands_tx, commands_rx) = mpsc::channel::<RegistryCommand>(64);

    let registry_client = RegistryClient {
        registry_ws_url: options.signaling_base_url.clone(),
        auth_token: options.auth_token.clone(),
        agent_id: options.agent_id.clone(),
        agent_name: options.agent_id.clone(),
        namespace: "default".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        capabilities: vec!["voice".into()],
        load_threshold: options.load_threshold,
        max_processes: options.max_processes(),
        ping_interval: Duration::from_secs(options.ping_interval_s),
        initialize_timeout: Duration::from_secs(options.initialize_timeout_s),
        reconnect_backoff: ReconnectBackoff::default(),
    };
    tracing::info!(url = %options.signaling_base_url, "registry client ready");

    // ── Worker Supervisor (C2) ──────────────────────────────────────────
    // The entrypoint needs a handle back to the Supervisor (to report job
    // completion once a session actually ends) while the Supervisor needs
    // the entrypoint up front — resolved with a `OnceCell` filled in
    // immediately after construction, same shape as a forward reference.
    let supervisor_cell: Arc<OnceCell<Arc<Supervisor>>> = Arc::new(OnceCell::new());

    let entrypoint_tools = tools.clone();
    let entrypoint_dispatcher = tool_dispatcher.clone();
    let entrypoint_supervisor = supervisor_cell.clone();
    let entrypoint: voicecore_worker::Entrypoint = Arc::new(move |ctx: Arc<JobContext>, job: RunningJob| {
        let tools = entrypoint_tools.clone();
        let dispatcher = entrypoint_dispatcher.clone();
        let supervisor = entrypoint_supervisor.clone();
        Box::pin(async move { run_job(ctx, job, tools, dispatcher, supervisor).await })
    });

    let supervisor = Supervisor::new((*options).clone(), commands_tx, entrypoint);
    supervisor_cell
        .set(supervisor.clone())
        .unwrap_or_else(|_| unreachable!("supervisor cell set exactly once"));
    tracing::info!("worker supervisor ready");

    // ── Run: registry link + supervisor event loop concurrently ────────
    let shutdown = tokio_util::sync::CancellationToken::new();
    let registry_shutdown = shutdown.clone();
    let registry_handle = tokio::spawn(async move {
        if let Err(e) = registry_client.run(events_tx, commands_rx, registry_shutdown).await {
            tracing::error!(error = %e, "registry client exited");
        }
    });

    tracing::info!("voicecore ready, entering supervisor loop");
    supervisor.run(events_rx).await;

    shutdown.cancel();
    let _ = registry_handle.await;
    Ok(())
}

/// Per-job entrypoint (spec §4.4): build the conversation pipeline for this
/// job, connect the room, and run until the session ends.
///
/// Concrete STT/LLM/TTS/VAD/EOU providers are an out-of-scope collaborator
/// (spec §1/§6) — they're supplied by the embedding application through
/// [`Components`] before a job is dispatched to it in a real deployment.
/// This entrypoint wires the tool-execution side (which this workspace does
/// own) and leaves provider slots empty, so a bare `voicecore serve` still
/// demonstrates the full C1-C4 lifecycle end to end.
async fn run_job(
    ctx: Arc<JobContext>,
    job: RunningJob,
    tools: Vec<voicecore_domain::tool::ToolDefinition>,
    tool_dispatcher: Arc<dyn voicecore_providers::traits::ToolDispatcher>,
    supervisor: Arc<OnceCell<Arc<Supervisor>>>,
) -> voicecore_worker::Result<()> {
    tracing::info!(job_id = %job.job_id, room_id = %job.room.room_id, "job starting");

    let metrics = Arc::new(voicecore_metrics::CascadingMetricsCollector::new());
    let flow = ConversationFlow::new(Components::default(), tools, Some(tool_dispatcher), metrics);

    let job_id = job.job_id.clone();
    let shutdown_supervisor = supervisor.clone();
    ctx.add_shutdown_callback(move || async move {
        if let Some(sup) = shutdown_supervisor.get() {
            sup.complete_job(&job_id).await;
        }
    });

    let _ = flow.context();

    ctx.run_until_shutdown(
        None,
        || Box::pin(async move { tracing::info!("session started") }),
        || Box::pin(async move { tracing::info!("session closing") }),
    )
    .await;

    Ok(())
}
