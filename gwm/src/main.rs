use clap::Parser;
use serde::{de::DeserializeOwned, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gwm_core::{
    abstractions::ServiceContainer,
    audit::TracingAuditSink,
    config::GwmConfig,
    dry_run::DryRunJobService,
    error::{GwmError, GwmResult},
    jobs::Dispatch,
    node_ops::NodeOperationCoordinator,
    state::SnapshotState,
    types::{ClusterId, User},
    validation::{
        EvacuateInput, MigrateInput, ModifyRequest, RenameInput, RoleChangeInput, VmCreateInput,
        VmModifyInput,
    },
    vm_ops::VmJobDispatcher,
};

#[derive(Parser)]
#[command(name = "gwm")]
#[command(about = "Validate and dispatch cluster VM and node operations", long_about = None)]
struct Cli {
    /// YAML snapshot of users, owners, clusters, VMs and grants
    #[arg(long)]
    state: PathBuf,

    /// TOML configuration file; the environment is used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// User the request is made as
    #[arg(long)]
    user: String,

    /// JSON request body; read from stdin when absent
    #[arg(long)]
    input: Option<PathBuf>,

    /// Write the updated snapshot back to the state file
    #[arg(long)]
    save: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Instance operations
    Vm {
        #[command(subcommand)]
        command: VmCommands,
    },
    /// Node operations
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
}

#[derive(clap::Args)]
struct VmTarget {
    /// Cluster ID
    #[arg(long)]
    cluster: u64,

    /// Instance hostname
    #[arg(long)]
    hostname: String,
}

#[derive(clap::Args)]
struct NodeTarget {
    /// Cluster ID
    #[arg(long)]
    cluster: u64,

    /// Node hostname
    #[arg(long)]
    node: String,
}

#[derive(clap::Subcommand)]
enum VmCommands {
    /// Create an instance, or recover a failed deployment
    Create,
    /// Current settings of an instance, as offered for modification
    ModifyForm(VmTarget),
    /// Validate a settings change without submitting it
    Preview(VmTarget),
    /// Validate and submit a settings change
    Modify(VmTarget),
    /// Submit a previewed change after validating it again
    Confirm(VmTarget),
    /// Rename an instance
    Rename(VmTarget),
    /// Live or non-live migrate an instance
    Migrate(VmTarget),
}

#[derive(clap::Subcommand)]
enum NodeCommands {
    /// Current role of a node and the roles it may be given
    RoleForm(NodeTarget),
    /// Change a node's role
    Role(NodeTarget),
    /// Migrate every primary instance off a node
    Migrate(NodeTarget),
    /// Evacuation choices for a node
    EvacuateForm(NodeTarget),
    /// Move every primary instance off a node, to another node or by allocator
    Evacuate(NodeTarget),
}

#[tokio::main]
async fn main() -> GwmResult<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GwmConfig::from_file(path)?,
        None => GwmConfig::from_env()?,
    };
    init_logging(&config.logging.level)?;

    let state = Arc::new(SnapshotState::from_file(&cli.state)?);
    let user = state.user(&cli.user).await?;
    let services = ServiceContainer::builder()
        .with_repository(state.clone())
        .with_authz(state.clone())
        .with_defaults(state.clone())
        .with_jobs(Arc::new(DryRunJobService::new()))
        .with_audit(Arc::new(TracingAuditSink))
        .build()?;
    tracing::debug!(user = %user.username, state = %cli.state.display(), "Loaded state");

    let input = cli.input.as_deref();
    let accepted = match cli.command {
        Commands::Vm { command } => {
            let dispatcher = VmJobDispatcher::new(services, &config);
            handle_vm_command(&dispatcher, &user, command, input).await?
        }
        Commands::Node { command } => {
            let coordinator = NodeOperationCoordinator::new(services, &config);
            handle_node_command(&coordinator, &user, command, input).await?
        }
    };

    if cli.save && accepted {
        let yaml = serde_yaml::to_string(&state.snapshot().await)?;
        std::fs::write(&cli.state, yaml)?;
        tracing::info!(state = %cli.state.display(), "Saved state");
    }
    if !accepted {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(level: &str) -> GwmResult<()> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in [format!("gwm={}", level), format!("gwm_core={}", level)] {
        filter = filter.add_directive(directive.parse().map_err(|e| {
            GwmError::configuration("logging", format!("Invalid log directive: {}", e))
        })?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Parse the request body from `path`, or stdin
fn read_input<T: DeserializeOwned>(path: Option<&Path>) -> GwmResult<T> {
    let body = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            body
        }
    };
    Ok(serde_json::from_str(&body)?)
}

fn print_json(value: &impl Serialize) -> GwmResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a dispatch and report whether it was submitted
fn report<T: Serialize>(dispatch: &Dispatch<T>) -> GwmResult<bool> {
    print_json(dispatch)?;
    Ok(dispatch.is_submitted())
}

async fn handle_vm_command(
    dispatcher: &VmJobDispatcher,
    user: &User,
    command: VmCommands,
    input: Option<&Path>,
) -> GwmResult<bool> {
    match command {
        VmCommands::Create => {
            let request: VmCreateInput = read_input(input)?;
            report(&dispatcher.create(user, request).await?)
        }
        VmCommands::ModifyForm(target) => {
            let form = dispatcher
                .modify_form(user, ClusterId(target.cluster), &target.hostname)
                .await?;
            print_json(&form)?;
            Ok(true)
        }
        VmCommands::Preview(target) => {
            let request: VmModifyInput = read_input(input)?;
            let result = dispatcher
                .preview_modify(user, ClusterId(target.cluster), &target.hostname, request)
                .await?;
            print_json(&result)?;
            Ok(result.is_valid())
        }
        VmCommands::Modify(target) => {
            let request: VmModifyInput = read_input(input)?;
            let dispatch = dispatcher
                .modify(user, ClusterId(target.cluster), &target.hostname, request)
                .await?;
            report(&dispatch)
        }
        VmCommands::Confirm(target) => {
            let change: ModifyRequest = read_input(input)?;
            let dispatch = dispatcher
                .confirm_modify(user, ClusterId(target.cluster), &target.hostname, change)
                .await?;
            report(&dispatch)
        }
        VmCommands::Rename(target) => {
            let request: RenameInput = read_input(input)?;
            let dispatch = dispatcher
                .rename(user, ClusterId(target.cluster), &target.hostname, &request)
                .await?;
            report(&dispatch)
        }
        VmCommands::Migrate(target) => {
            let request: MigrateInput = read_input(input)?;
            let dispatch = dispatcher
                .migrate(user, ClusterId(target.cluster), &target.hostname, &request)
                .await?;
            report(&dispatch)
        }
    }
}

async fn handle_node_command(
    coordinator: &NodeOperationCoordinator,
    user: &User,
    command: NodeCommands,
    input: Option<&Path>,
) -> GwmResult<bool> {
    match command {
        NodeCommands::RoleForm(target) => {
            let form = coordinator
                .role_form_initial(user, ClusterId(target.cluster), &target.node)
                .await?;
            print_json(&form)?;
            Ok(true)
        }
        NodeCommands::Role(target) => {
            let request: RoleChangeInput = read_input(input)?;
            let dispatch = coordinator
                .change_role(user, ClusterId(target.cluster), &target.node, &request)
                .await?;
            report(&dispatch)
        }
        NodeCommands::Migrate(target) => {
            let request: MigrateInput = read_input(input)?;
            let dispatch = coordinator
                .migrate(user, ClusterId(target.cluster), &target.node, &request)
                .await?;
            report(&dispatch)
        }
        NodeCommands::EvacuateForm(target) => {
            let form = coordinator
                .evacuate_form(user, ClusterId(target.cluster), &target.node)
                .await?;
            print_json(&form)?;
            Ok(true)
        }
        NodeCommands::Evacuate(target) => {
            let request: EvacuateInput = read_input(input)?;
            let dispatch = coordinator
                .evacuate(user, ClusterId(target.cluster), &target.node, &request)
                .await?;
            report(&dispatch)
        }
    }
}
