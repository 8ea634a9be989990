//! agent-registry - optimistic-concurrency updates to a git-hosted registry
//!
//! Many independent processes share one JSON registry of agents, committed
//! to a git branch. Writers never lock it: each update pulls, re-reads,
//! transforms, commits and pushes, and starts over when the push is rejected.
//!
//! Exit codes:
//!   0 - Success (including updates that turned out to be no-ops)
//!   1 - Any failure (validation, git errors, exhausted retries)

mod cli;
mod config;
mod error;
mod models;
mod registry;
mod repo;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use cli::{Args, Command};
use config::{Config, CONFIG_FILE};
use error::RegistryError;
use models::{AgentRecord, Registry, RegistrySummary};
use registry::{store, transforms, OrchestratorConfig, UpdateOrchestrator, UpdateOutcome};
use repo::{GitClient, VersionControl};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    init_logging(&args);

    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr so `show` output can be piped.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

async fn run(args: Args) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;

    if matches!(args.command, Command::InitConfig) {
        return handle_init_config(&cwd);
    }

    let root = repo::discover_root(&cwd)?;
    info!("Repository at: {}", root.display());

    let mut config = load_config(&args, &root)?;
    config.merge_with_args(&args);

    match args.command {
        Command::Show { summary } => handle_show(&root.join(&config.registry.path), summary),
        command => {
            let orchestrator = build_orchestrator(&config, root)?;
            run_update(
                command,
                &orchestrator,
                &config.registry.commit_prefix,
                args.file_only,
            )
            .await
        }
    }
}

/// Run one of the writing subcommands through the orchestrator.
async fn run_update<V: VersionControl>(
    command: Command,
    orchestrator: &UpdateOrchestrator<V>,
    prefix: &str,
    file_only: bool,
) -> Result<()> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    match command {
        Command::Add { agent, message } => {
            let record = parse_agent(&agent, &now)?;
            let message = message.unwrap_or_else(|| format!("{} add agent {}", prefix, record.id));
            let id = record.id.clone();

            let outcome = publish(
                orchestrator,
                file_only,
                |current| Ok((transforms::add_agent(current, record.clone()), ())),
                &message,
            )
            .await?;

            if outcome.changed {
                println!("✅ Added agent {}", id);
            } else {
                println!("ℹ️  Agent {} is already registered", id);
            }
            report(&outcome);
        }

        Command::Remove {
            ids,
            reason,
            message,
        } => {
            let ids: Vec<String> = ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
            let message =
                message.unwrap_or_else(|| format!("{} remove {} ({})", prefix, ids.join(", "), reason));

            let outcome = publish(
                orchestrator,
                file_only,
                |current| Ok(transforms::remove_agents(current, &ids, &reason, &now)),
                &message,
            )
            .await?;

            if outcome.output.is_empty() {
                warn!("None of the requested agents were live: {}", ids.join(", "));
            }
            for record in &outcome.output {
                info!("Removed {}", record);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.output)?);
            report(&outcome);
        }

        Command::UpdateMetrics {
            agent_id,
            metrics,
            message,
        } => {
            let metrics = cli::read_json_object(&metrics).map_err(anyhow::Error::msg)?;
            let message =
                message.unwrap_or_else(|| format!("{} update metrics for {}", prefix, agent_id));

            let outcome = publish(
                orchestrator,
                file_only,
                |current| {
                    let next = transforms::update_metrics(current, &agent_id, metrics.clone(), &now)?;
                    Ok((next, ()))
                },
                &message,
            )
            .await?;

            println!("✅ Metrics recorded for {}", agent_id);
            report(&outcome);
        }

        Command::SetLead { agent_id, message } => {
            let message = message.unwrap_or_else(|| format!("{} set system lead {}", prefix, agent_id));

            let outcome = publish(
                orchestrator,
                file_only,
                |current| Ok((transforms::set_system_lead(current, &agent_id)?, ())),
                &message,
            )
            .await?;

            println!("✅ System lead is {}", agent_id);
            report(&outcome);
        }

        Command::Import { snapshot, message } => {
            let snapshot = parse_snapshot(&snapshot)?;
            let message = message.unwrap_or_else(|| {
                format!("{} import {} agent(s)", prefix, snapshot.agents.len())
            });

            let outcome = publish(
                orchestrator,
                file_only,
                |current| Ok((transforms::import_snapshot(current, &snapshot), ())),
                &message,
            )
            .await?;

            println!(
                "✅ Imported snapshot ({} live agents now)",
                outcome.registry.agents.len()
            );
            debug!("Live agents: {}", outcome.registry.agent_ids().join(", "));
            report(&outcome);
        }

        other => anyhow::bail!("{:?} does not modify the registry", other),
    }

    Ok(())
}

/// Route a transform through the full protocol, or the file-only path.
async fn publish<V, T, F>(
    orchestrator: &UpdateOrchestrator<V>,
    file_only: bool,
    transform: F,
    message: &str,
) -> Result<UpdateOutcome<T>, RegistryError>
where
    V: VersionControl,
    F: FnMut(Registry) -> error::Result<(Registry, T)>,
{
    if file_only {
        warn!("--file-only: the registry will not be pulled, committed or pushed");
        orchestrator.update_file_only(transform).await
    } else {
        orchestrator.update_with_occ(transform, message).await
    }
}

fn report<T>(outcome: &UpdateOutcome<T>) {
    match &outcome.commit {
        Some(commit) => println!(
            "   Commit {} published after {} attempt(s)",
            commit.short(),
            outcome.attempts
        ),
        None if outcome.changed => println!("   Registry file written (not committed)"),
        None => println!("   Nothing to commit"),
    }
}

/// Decode an `add` argument, stamping `spawned_at` when it was omitted.
fn parse_agent(raw: &str, now: &str) -> Result<AgentRecord> {
    let map = cli::read_json_object(raw).map_err(anyhow::Error::msg)?;
    let mut record: AgentRecord =
        serde_json::from_value(Value::Object(map)).context("Invalid agent record")?;

    if record.spawned_at.is_empty() {
        record.spawned_at = now.to_string();
    }
    record.validate().map_err(RegistryError::InvalidRecord)?;
    Ok(record)
}

/// Decode an `import` argument; every record must pass the same checks as `add`.
fn parse_snapshot(raw: &str) -> Result<Registry> {
    let map = cli::read_json_object(raw).map_err(anyhow::Error::msg)?;
    let snapshot: Registry =
        serde_json::from_value(Value::Object(map)).context("Invalid registry document")?;

    for record in snapshot.agents.iter().chain(&snapshot.hall_of_fame) {
        record.validate().map_err(RegistryError::InvalidRecord)?;
    }
    Ok(snapshot)
}

fn build_orchestrator(config: &Config, root: PathBuf) -> Result<UpdateOrchestrator<GitClient>> {
    let branch = match &config.git.branch {
        Some(branch) => branch.clone(),
        None => repo::current_branch(&root)
            .context("HEAD is detached; pass --branch or set git.branch in the config")?,
    };

    let mut client = GitClient::new(
        &root,
        &config.git.remote,
        &branch,
        Duration::from_secs(config.git.command_timeout_seconds),
    );
    if let (Some(name), Some(email)) = (&config.git.author_name, &config.git.author_email) {
        client = client.with_author(name, email);
    }
    debug!("Driving git in {}", client.root().display());

    let orchestrator = UpdateOrchestrator::new(
        client,
        OrchestratorConfig {
            root,
            registry_path: config.registry.path.clone(),
            branch,
            max_retries: config.retry.max_retries,
            base_delay: config.retry.base_delay(),
            max_stalled_pulls: config.retry.max_stalled_pulls,
        },
    );

    let settings = orchestrator.config();
    info!(
        "Registry {} on {}/{} (max {} attempts)",
        settings.registry_path.display(),
        config.git.remote,
        settings.branch,
        settings.max_retries
    );
    Ok(orchestrator)
}

/// Print the registry on disk. A missing file shows the empty skeleton.
fn handle_show(path: &Path, summary: bool) -> Result<()> {
    let registry = store::load(path)?;

    if summary {
        println!("{}", RegistrySummary::from_registry(&registry));
    } else {
        print!("{}", store::encode(&registry)?);
    }
    Ok(())
}

/// Handle `init-config`: generate a default .agent-registry.toml.
fn handle_init_config(cwd: &Path) -> Result<()> {
    let dir = repo::discover_root(cwd).unwrap_or_else(|_| cwd.to_path_buf());
    let path = dir.join(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            path.display()
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(&path, &content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Created {} with default settings.", path.display());
    println!("   Edit it to customize the registry path, remote, and retry policy.");
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args, root: &Path) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_from_repo(root)? {
        Some(config) => {
            info!("Loaded config from {}", CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
