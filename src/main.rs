//! cloud-init-seed - datasource seed discovery and hotplug handling
//!
//! Focused on:
//! - NoCloud seed resolution across all seed sources
//! - Trusted datasource caching between boot stages
//! - Network hotplug events delivered by udev

use clap::{Parser, Subcommand, ValueEnum};
use serde_yaml::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cloud_init_seed::datasources::{DatasourceContext, Registry, fetch_datasource};
use cloud_init_seed::distro::networkd::NetworkdDistro;
use cloud_init_seed::hotplug::{self, Action, EnableOutcome, HotplugCoordinator, QueryOutcome, Subsystem};
use cloud_init_seed::seed::LinuxHost;
use cloud_init_seed::stages::StageContext;
use cloud_init_seed::state::{CloudPaths, InstanceState};
use cloud_init_seed::{CloudInitError, Stage, config, run_stages};

#[derive(Parser)]
#[command(name = "cloud-init-seed")]
#[command(author, version, about = "Datasource seed discovery and hotplug handling", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local and network stages
    Init,
    /// Run local stage (filesystem-only datasources)
    Local,
    /// Run network stage (after network is up)
    Network,
    /// Query cached instance metadata
    Query {
        /// Key to query (e.g., instance-id, local-hostname, user-data)
        key: String,
    },
    /// Handle hotplug events
    HotplugHook {
        /// Subsystem to act on
        #[arg(short, long, value_enum)]
        subsystem: SubsystemArg,

        #[command(subcommand)]
        action: HotplugAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SubsystemArg {
    Net,
}

impl From<SubsystemArg> for Subsystem {
    fn from(arg: SubsystemArg) -> Self {
        match arg {
            SubsystemArg::Net => Subsystem::Net,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum UdevActionArg {
    Add,
}

#[derive(Subcommand)]
enum HotplugAction {
    /// Query if hotplug is enabled for given subsystem
    Query,
    /// Handle the hotplug event
    Handle {
        /// Sysfs path to hotplugged device
        #[arg(short, long)]
        devpath: PathBuf,

        /// Specify action to take
        #[arg(short, long, value_enum)]
        udevaction: UdevActionArg,
    },
    /// Enable hotplug for a given subsystem
    Enable,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn datasource_context(paths: &CloudPaths) -> Result<DatasourceContext, CloudInitError> {
    let config = config::load_system_config(paths).await?;
    Ok(DatasourceContext {
        config,
        paths: paths.clone(),
        host: Arc::new(LinuxHost::new(paths.clone())),
    })
}

async fn run_boot(stages: &[Stage]) -> Result<ExitCode, CloudInitError> {
    let paths = CloudPaths::new();
    let ctx = StageContext::new(datasource_context(&paths).await?, Arc::new(NetworkdDistro::new()));
    run_stages(stages, &ctx).await?;
    Ok(ExitCode::SUCCESS)
}

async fn query(key: &str) -> Result<ExitCode, CloudInitError> {
    let state = InstanceState::new();
    let Some(cached) = state.load_cache().await? else {
        eprintln!("No cached datasource. Has the local or network stage run?");
        return Ok(ExitCode::FAILURE);
    };

    let value = match key {
        "user-data" => Some(Value::from(cached.bundle.user_data.clone())),
        "vendor-data" => Some(Value::from(cached.bundle.vendor_data.clone())),
        "network-config" => cached.bundle.network_config.clone(),
        "dsname" => Some(Value::from(cached.dsname.clone())),
        "seed" => Some(Value::from(cached.seed.clone())),
        _ => cached.bundle.metadata.get(key).cloned(),
    };

    match value {
        Some(Value::String(s)) => println!("{}", s),
        Some(other) => print!("{}", serde_yaml::to_string(&other)?),
        None => {
            eprintln!("Key not found: {}", key);
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn hotplug_hook(subsystem: Subsystem, action: HotplugAction) -> Result<ExitCode, CloudInitError> {
    if matches!(action, HotplugAction::Enable)
        && let Err(e) = hotplug::require_root()
    {
        eprintln!("{}", e);
        return Ok(ExitCode::FAILURE);
    }

    let paths = CloudPaths::new();
    let ctx = datasource_context(&paths).await?;
    let registry = Registry::builtin();
    let state = InstanceState::with_paths(paths.clone());
    let coordinator = HotplugCoordinator::new(ctx.config.clone(), paths);

    info!("Fetching datasource");
    let datasource = fetch_datasource(&registry, &ctx, &state, &[]).await;

    match action {
        HotplugAction::Query => {
            let datasource = match datasource {
                Ok(ds) => Some(ds),
                Err(CloudInitError::NoDatasource) => None,
                Err(e) => return Err(e),
            };
            match coordinator.query(datasource.as_deref(), subsystem).await {
                QueryOutcome::Enabled => println!("enabled"),
                QueryOutcome::Disabled => println!("disabled"),
                QueryOutcome::UnknownDatasource => {
                    println!("Unable to determine hotplug state. No datasource detected");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        HotplugAction::Handle { devpath, udevaction } => {
            let action = match udevaction {
                UdevActionArg::Add => Action::Add,
            };
            let mut datasource = datasource?;
            coordinator
                .handle(datasource.as_mut(), subsystem, &devpath, action)
                .await?;
        }
        HotplugAction::Enable => {
            let datasource = datasource?;
            match coordinator.enable(datasource.as_ref(), subsystem).await? {
                EnableOutcome::Unsupported => {
                    eprintln!("hotplug not supported for event of {}", subsystem);
                    return Ok(ExitCode::FAILURE);
                }
                EnableOutcome::AlreadyEnabled => {
                    eprintln!("Not installing hotplug for event of type {}. Reason: Already done.", subsystem);
                }
                EnableOutcome::Enabled => println!("Enabled cloud-init hotplug for subsystem={}", subsystem),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Init) | None => {
            info!("Running all stages");
            run_boot(&[Stage::Local, Stage::Network]).await
        }
        Some(Commands::Local) => {
            info!("Running local stage");
            run_boot(&[Stage::Local]).await
        }
        Some(Commands::Network) => {
            info!("Running network stage");
            run_boot(&[Stage::Network]).await
        }
        Some(Commands::Query { key }) => query(&key).await,
        Some(Commands::HotplugHook { subsystem, action }) => hotplug_hook(subsystem.into(), action).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
