//! polarctl entrypoint.
//!
//! This is the main entrypoint for the polarctl command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use polardb_provisioner::cli::{Cli, Commands, OutputFormatter, StateCommands};
use polardb_provisioner::cloud::{ClusterQuery, PolarDbClient, list_clusters};
use polardb_provisioner::config::{
    ConfigHasher, ConfigParser, ConfigValidator, DeployConfig, StateBackend, find_config_file,
};
use polardb_provisioner::error::{ProvisionerError, ReconcileError, Result};
use polardb_provisioner::planner::{DeploymentPlan, DiffEngine, PlanExecutor, observe};
use polardb_provisioner::reconciler::Reconciler;
use polardb_provisioner::state::{
    DeploymentState, LocalStateStore, S3StateStore, STATE_DIR, StateStore, generate_holder_id,
};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, &formatter).await,
        Commands::Apply {
            yes,
            continue_on_error,
        } => cmd_apply(config_path, yes, continue_on_error, &formatter).await,
        Commands::Status => cmd_status(config_path, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::List {
            name_regex,
            status,
            db_type,
            ids,
        } => {
            let query = ClusterQuery {
                name_regex,
                ids,
                description: None,
                status,
                db_type,
            };
            cmd_list(config_path, &query, &formatter).await
        }
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Validate the manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating manifest: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(parent_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    println!("{}", formatter.format_validation(&result, show_warnings));

    eprintln!("Manifest summary:");
    eprintln!("  Region: {}", config.provider.region);
    eprintln!("  State backend: {:?}", config.state.backend);
    eprintln!("  Clusters: {}", config.clusters.len());

    Ok(())
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let reconciler = create_reconciler(&config)?;

    let state = state_store.load().await?;
    let observed = observe(&reconciler, state.as_ref()).await?;

    let config_hash = ConfigHasher::new().hash_config(&config);
    let diff = DiffEngine::new().compute_diff(&config, state.as_ref(), &observed);
    let plan = DeploymentPlan::from_diff(&diff, &config, &config_hash);

    println!("{}", formatter.format_plan(&plan, detailed.then_some(&diff)));
    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let reconciler = create_reconciler(&config)?;

    let lock = state_store
        .acquire_lock(&generate_holder_id(), "apply")
        .await?;
    let outcome = apply_locked(
        &config,
        state_store.as_ref(),
        &reconciler,
        auto_approve,
        continue_on_error,
        formatter,
    )
    .await;
    state_store.release_lock(&lock.lock_id).await?;

    outcome
}

async fn apply_locked(
    config: &DeployConfig,
    state_store: &dyn StateStore,
    reconciler: &Reconciler,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut state = state_store
        .load()
        .await?
        .unwrap_or_else(|| DeploymentState::new(&config.provider.region));
    if state.region != config.provider.region {
        warn!(
            "State was written for region {} but the manifest targets {}",
            state.region, config.provider.region
        );
    }

    let observed = observe(reconciler, Some(&state)).await?;
    let config_hash = ConfigHasher::new().hash_config(config);
    let diff = DiffEngine::new().compute_diff(config, Some(&state), &observed);
    let plan = DeploymentPlan::from_diff(&diff, config, &config_hash);

    if plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    println!("{}", formatter.format_plan(&plan, Some(&diff)));

    if !auto_approve {
        let prompt = if plan.is_destructive() {
            "This plan DELETES clusters. Type 'yes' to apply: "
        } else {
            "Do you want to apply this plan? Type 'yes' to apply: "
        };
        if !confirm(prompt, "yes")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let result = PlanExecutor::new(reconciler)
        .with_store(state_store)
        .with_continue_on_error(continue_on_error)
        .execute(&plan, &mut state)
        .await?;

    println!("{}", formatter.format_execution(&result));

    if result.success {
        Ok(())
    } else {
        Err(ReconcileError::Aborted {
            reason: format!("{} of {} actions failed", result.failed, plan.action_count()),
        }
        .into())
    }
}

/// Show tracked clusters.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let reconciler = create_reconciler(&config)?;

    let state = state_store
        .load()
        .await?
        .unwrap_or_else(|| DeploymentState::new(&config.provider.region));
    let observed = observe(&reconciler, Some(&state)).await?;

    println!("{}", formatter.format_status(&state, &observed));
    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let reconciler = create_reconciler(&config)?;

    let state = state_store.load().await?;
    let observed = observe(&reconciler, state.as_ref()).await?;
    let diff = DiffEngine::new().compute_diff(&config, state.as_ref(), &observed);
    let report = diff.drift_report(config.clusters.len(), observed.len());

    println!("{}", formatter.format_drift(&report));
    Ok(())
}

/// Destroy every tracked cluster.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let reconciler = create_reconciler(&config)?;

    let Some(mut state) = state_store.load().await? else {
        eprintln!("No state found; nothing to destroy.");
        return Ok(());
    };

    let mut plan = DeploymentPlan::destroy(&state);
    if plan.is_empty() {
        eprintln!("No clusters to destroy.");
        return Ok(());
    }
    for action in &mut plan.actions {
        action.cluster = config.cluster(&action.resource_name).cloned();
    }

    eprintln!("The following clusters will be destroyed:");
    for action in &plan.actions {
        eprintln!(
            "  - {} ({})",
            action.resource_name,
            action.cluster_id.as_deref().unwrap_or("-")
        );
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let lock = state_store
        .acquire_lock(&generate_holder_id(), "destroy")
        .await?;
    let outcome = PlanExecutor::new(&reconciler)
        .with_store(state_store.as_ref())
        .with_continue_on_error(true)
        .execute(&plan, &mut state)
        .await;
    state_store.release_lock(&lock.lock_id).await?;

    let result = outcome?;
    println!("{}", formatter.format_execution(&result));

    if result.success {
        Ok(())
    } else {
        Err(ReconcileError::Aborted {
            reason: format!("{} cluster(s) could not be destroyed", result.failed),
        }
        .into())
    }
}

/// List clusters in the region.
async fn cmd_list(
    config_path: Option<&PathBuf>,
    query: &ClusterQuery,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    let parser = ConfigParser::new().with_base_path(parent_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let client = create_client(&config)?;
    let clusters = list_clusters(&client, query).await?;

    println!("{}", formatter.format_clusters(&clusters));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found.");
            }
            if let Some(lock) = state_store.get_lock_info().await? {
                println!("{}", formatter.format_lock(&lock));
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = state_store.acquire_lock(&holder, "manual").await?;
            println!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match state_store.force_unlock().await? {
                    Some(lock) => println!(
                        "{}",
                        formatter.message(true, &format!("Removed lock {} held by {}", lock.lock_id, lock.holder))
                    ),
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                println!("{}", formatter.message(true, "State unlocked."));
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim() == expected)
}

/// Loads and validates the manifest and opens its state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(DeployConfig, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(parent_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    let validation = ConfigValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || parent_dir(&config_file).join(STATE_DIR),
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| ProvisionerError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await)
        }
    };
    debug!("Using {} state backend", state_store.backend_type());

    Ok((config, state_store))
}

/// Creates the control-plane client for the manifest's provider.
fn create_client(config: &DeployConfig) -> Result<PolarDbClient> {
    let token = ConfigParser::get_api_token()?;
    let mut client = PolarDbClient::new(&token, &config.provider.region)?;

    if let Some(endpoint) = &config.provider.endpoint {
        client = client.with_endpoint(endpoint.clone());
    }
    if let Some(endpoint) = &config.provider.vpc_endpoint {
        client = client.with_vpc_endpoint(endpoint.clone());
    }

    Ok(client)
}

/// Creates a reconciler backed by the control-plane client.
fn create_reconciler(config: &DeployConfig) -> Result<Reconciler> {
    let client = Arc::new(create_client(config)?);

    Ok(
        Reconciler::new(client.clone(), client, &config.provider.region)
            .with_wait_settings(config.provider.wait),
    )
}
