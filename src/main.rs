//! storage-bootstrap
//!
//! Command line entry point: reconciles the storage appliance for the
//! cluster's CSI driver and prepares node disks for Longhorn.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_bootstrap::domain::ports::SecretStoreRef;
use storage_bootstrap::provision::{
    inventory, provision_node, resolve_target, KubeNodeDiskStore, ShellDiskOperations, SshSession,
};
use storage_bootstrap::reconcile::StepOutcome;
use storage_bootstrap::secrets::{resolve_api_key, KubeSecretStore, API_KEY_FIELD, API_KEY_PATH};
use storage_bootstrap::{
    ApplianceClient, Config, DiskOperations, Error, ErrorClass, Prompter, ProvisionRequest,
    Reconciler, SecretStore,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Bootstrap - appliance reconciliation and Longhorn disk provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, global = true, env = "STORAGE_BOOTSTRAP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Storage appliance operations
    #[command(subcommand)]
    Appliance(ApplianceCommand),

    /// Node disk operations
    #[command(subcommand)]
    Disks(DisksCommand),
}

#[derive(Subcommand, Debug)]
enum ApplianceCommand {
    /// Create or reuse pool, dataset, services and iSCSI plumbing
    Setup(SetupArgs),

    /// Check that every requirement is met without changing anything
    Validate(ApplianceArgs),

    /// Print the CSI connection descriptor for an already prepared appliance
    CsiConfig(ApplianceArgs),
}

#[derive(ClapArgs, Debug)]
struct ApplianceArgs {
    /// Appliance URL, e.g. https://192.168.1.100
    #[arg(long, env = "STORAGE_APPLIANCE_URL")]
    url: Option<String>,

    /// Appliance API key
    #[arg(long, env = "STORAGE_APPLIANCE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Pool name
    #[arg(long)]
    pool: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct SetupArgs {
    #[command(flatten)]
    appliance: ApplianceArgs,

    /// Exercise NFS and iSCSI end to end with throwaway resources
    #[arg(long)]
    full_test: bool,

    /// Validate only, then run the smoke test if requested
    #[arg(long)]
    skip_setup: bool,

    /// Store the given API key in the cluster secret store
    #[arg(long)]
    save_api_key: bool,
}

#[derive(Subcommand, Debug)]
enum DisksCommand {
    /// List disks on a node that are free for provisioning
    List(NodeArgs),

    /// Partition, format and mount disks, then register them with Longhorn
    Provision(ProvisionArgs),
}

#[derive(ClapArgs, Debug)]
struct NodeArgs {
    /// Longhorn node name
    #[arg(long)]
    node: String,

    /// SSH host, overriding the config entry for the node
    #[arg(long)]
    host: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct ProvisionArgs {
    #[command(flatten)]
    target: NodeArgs,

    /// Devices to provision (e.g. sdb,nvme0n1); asks interactively when omitted
    #[arg(long, value_delimiter = ',')]
    disks: Option<Vec<String>>,

    /// Show what would be done without touching the node or the cluster
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation
    #[arg(long)]
    yes: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            exit_code(&e)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match args.command {
        Command::Appliance(ApplianceCommand::Setup(setup)) => {
            apply_overrides(&mut config, &setup.appliance);
            appliance_setup(config, setup).await
        }
        Command::Appliance(ApplianceCommand::Validate(appliance)) => {
            apply_overrides(&mut config, &appliance);
            appliance_validate(config, &appliance, false).await
        }
        Command::Appliance(ApplianceCommand::CsiConfig(appliance)) => {
            apply_overrides(&mut config, &appliance);
            appliance_validate(config, &appliance, true).await
        }
        Command::Disks(DisksCommand::List(node)) => disks_list(&config, &node).await,
        Command::Disks(DisksCommand::Provision(provision)) => {
            disks_provision(&config, provision).await
        }
    }
}

fn apply_overrides(config: &mut Config, args: &ApplianceArgs) {
    if let Some(url) = &args.url {
        config.appliance.url = url.clone();
    }
    if let Some(pool) = &args.pool {
        config.pool.name = pool.clone();
    }
}

/// Process exit status per error class
fn exit_code(e: &anyhow::Error) -> ExitCode {
    let class = e.downcast_ref::<Error>().map(Error::class);
    ExitCode::from(match class {
        Some(ErrorClass::FatalConnection) => 2,
        Some(ErrorClass::FatalResource) => 3,
        Some(ErrorClass::InputValidation) => 4,
        Some(ErrorClass::Aborted) => 130,
        None => 1,
    })
}

// =============================================================================
// Appliance Commands
// =============================================================================

async fn secret_store(config: &Config) -> Option<SecretStoreRef> {
    match kube::Client::try_default().await {
        Ok(client) => Some(Arc::new(KubeSecretStore::new(client, &config.secrets.namespace))),
        Err(e) => {
            debug!("No Kubernetes client for the secret store: {}", e);
            None
        }
    }
}

async fn connect(config: &Config, args: &ApplianceArgs, save_api_key: bool) -> anyhow::Result<Reconciler> {
    config.validate()?;

    let explicit = config.appliance.api_key.as_deref().or(args.api_key.as_deref());
    let store = if explicit.is_none() || save_api_key {
        secret_store(config).await
    } else {
        None
    };

    let api_key = resolve_api_key(
        config.appliance.api_key.as_deref(),
        args.api_key.as_deref(),
        store.as_deref(),
    )
    .await?;

    if save_api_key {
        let store = store.context("--save-api-key needs access to the Kubernetes cluster")?;
        if explicit.is_none() {
            anyhow::bail!("--save-api-key needs a key from --api-key or the config file");
        }
        store.write(API_KEY_PATH, API_KEY_FIELD, &api_key).await?;
    }

    let client = ApplianceClient::new(&config.appliance, api_key)?;
    Ok(Reconciler::new(Arc::new(client), config.clone()))
}

async fn appliance_setup(config: Config, args: SetupArgs) -> anyhow::Result<()> {
    let reconciler = connect(&config, &args.appliance, args.save_api_key).await?;
    let api_url = config.appliance.url.clone();

    let (pool, portal, initiator, csi) = if args.skip_setup {
        info!("Skipping setup, validating existing configuration");
        let report = reconciler.validate_requirements().await?;
        let csi = report.csi_connection(&api_url);
        (report.pool.name, report.portal, report.initiator, csi)
    } else {
        let report = reconciler.setup().await?;
        println!(
            "Appliance {} ({})",
            report.system.hostname, report.system.version
        );
        println!("  pool     {} [{}]", report.pool.resource.name, report.pool.action);
        println!("  dataset  {} [{}]", report.dataset.resource.id, report.dataset.action);
        print_step("nfs", &report.nfs);
        print_step("iscsi", &report.iscsi.service);
        print_step("portal", &report.iscsi.portal);
        print_step("initiator", &report.iscsi.initiator);
        for warning in &report.warnings {
            println!("WARNING: {}", warning);
        }
        let csi = report.csi_connection(&api_url);
        (
            report.pool.resource.name,
            report.iscsi.portal.resource().cloned(),
            report.iscsi.initiator.resource().cloned(),
            csi,
        )
    };

    if args.full_test {
        let smoke = reconciler
            .smoke_test(&pool, portal.as_ref(), initiator.as_ref())
            .await?;
        println!("Smoke test passed: {}", smoke.exercised.join(", "));
        for warning in &smoke.warnings {
            println!("WARNING: {}", warning);
        }
    }

    println!("---");
    print!("{}", serde_yaml::to_string(&csi)?);
    Ok(())
}

fn print_step<T>(label: &str, step: &StepOutcome<T>) {
    let status = match step {
        StepOutcome::Skipped => "skipped".to_string(),
        StepOutcome::Done(ensured) => ensured.action.to_string(),
        StepOutcome::Failed { .. } => "FAILED".to_string(),
    };
    println!("  {:<9}{}", label, status);
}

async fn appliance_validate(config: Config, args: &ApplianceArgs, csi_only: bool) -> anyhow::Result<()> {
    let reconciler = connect(&config, args, false).await?;
    let report = reconciler.validate_requirements().await?;
    if !csi_only {
        println!(
            "All requirements met on {} (pool {}, dataset {})",
            report.system.hostname, report.pool.name, report.dataset.id
        );
        println!("---");
    }
    print!(
        "{}",
        serde_yaml::to_string(&report.csi_connection(&config.appliance.url))?
    );
    Ok(())
}

// =============================================================================
// Disk Commands
// =============================================================================

async fn disks_list(config: &Config, args: &NodeArgs) -> anyhow::Result<()> {
    let target = resolve_target(config, &args.node, args.host.as_deref())?;
    let session = SshSession::open(target).await?;
    let ops = ShellDiskOperations::new(session, config.provisioner.clone());

    let listed = ops.list_block_devices().await;
    if let Err(e) = ops.into_executor().close().await {
        warn!("Failed to close SSH session: {}", e);
    }

    let free = inventory::free_disks(&listed?);
    if free.is_empty() {
        println!("No free disks on {}", args.node);
    }
    for (i, disk) in free.iter().enumerate() {
        println!("{:>3}) /dev/{:<12} {}", i + 1, disk.name, disk.size);
    }
    Ok(())
}

async fn disks_provision(config: &Config, args: ProvisionArgs) -> anyhow::Result<()> {
    let target = resolve_target(config, &args.target.node, args.target.host.as_deref())?;
    let client = kube::Client::try_default()
        .await
        .context("connecting to the Kubernetes cluster")?;
    let store = KubeNodeDiskStore::new(client, &config.longhorn.namespace);

    let prompter = StdinPrompter::default();
    let prompting = prompter.prompting.clone();
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        // While a prompt is open nothing has been issued yet, so exit outright.
        // Otherwise stop before the next disk; a second interrupt exits.
        while tokio::signal::ctrl_c().await.is_ok() {
            if prompting.load(Ordering::SeqCst) || on_signal.is_cancelled() {
                eprintln!();
                std::process::exit(130);
            }
            warn!("Interrupted; no further disks will be touched");
            on_signal.cancel();
        }
    });

    let request = ProvisionRequest {
        node: args.target.node.clone(),
        disks: args.disks,
        dry_run: args.dry_run,
        assume_yes: args.yes,
    };
    let report = provision_node(target, config, &store, &prompter, &request, &cancel).await?;

    for plan in &report.plans {
        println!(
            "{}/dev/{} -> {} ({})",
            if report.dry_run { "[dry-run] " } else { "" },
            plan.device,
            plan.mountpoint,
            plan.filesystem
        );
    }
    for name in report.registration.additions.keys() {
        println!("Longhorn disk {} on node {}", name, report.node);
    }
    for path in &report.registration.skipped {
        println!("Already registered: {}", path);
    }
    Ok(())
}

// =============================================================================
// Prompting
// =============================================================================

/// Prompts on stderr, answers from stdin
#[derive(Default)]
struct StdinPrompter {
    /// Set while blocked on the operator
    prompting: Arc<AtomicBool>,
}

impl StdinPrompter {
    fn read_answer(&self, mut input: impl BufRead) -> storage_bootstrap::Result<String> {
        self.prompting.store(true, Ordering::SeqCst);
        let read = tokio::task::block_in_place(|| {
            let mut line = String::new();
            input.read_line(&mut line).map(|n| (n, line))
        });
        self.prompting.store(false, Ordering::SeqCst);

        let (n, line) = read?;
        if n == 0 {
            return Err(Error::Aborted("no input on stdin".to_string()));
        }
        Ok(line.trim_end().to_string())
    }
}

impl Prompter for StdinPrompter {
    fn read_line(&self, prompt: &str) -> storage_bootstrap::Result<String> {
        let mut stderr = std::io::stderr();
        stderr.write_all(prompt.as_bytes())?;
        stderr.flush()?;
        self.read_answer(std::io::stdin().lock())
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
