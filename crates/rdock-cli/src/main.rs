//! rdock CLI
//!
//! Runs commands on Docker hosts over pooled SSH sessions and manages the
//! lifecycle of service containers deployed onto them.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rdock::commands::{self, CreateOptions};
use rdock::output::print_error;
use rdock::Runtime;
use rdock_core::service::ServiceKind;

#[derive(Parser)]
#[command(name = "rdock")]
#[command(author, version, about = "Remote Docker hosts over pooled SSH sessions")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on a remote host
    Exec {
        /// SSH target as user@host
        target: String,
        /// Command and arguments, passed to the remote shell
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Close the SSH session (and its tunnels) kept open for a host
    Disconnect {
        /// SSH target as user@host
        target: String,
    },

    /// Manage service containers
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    /// List managed services
    List {
        /// Show container and image columns
        #[arg(short, long)]
        long: bool,
    },

    /// Show a managed service
    Get {
        id: String,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deploy a new service container
    Create {
        /// SSH target as user@host
        #[arg(short, long, env = "RDOCK_TARGET")]
        target: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Container image
        #[arg(short, long)]
        image: String,
        /// Service type (filesystem, docker, shell, custom); inferred from the image if omitted
        #[arg(short, long)]
        kind: Option<ServiceKind>,
        /// Environment variable as KEY=VALUE
        #[arg(short, long = "env")]
        env: Vec<String>,
        /// Volume as SOURCE:TARGET
        #[arg(long = "volume")]
        volumes: Vec<String>,
        /// Wait for the deployment to finish
        #[arg(short, long)]
        wait: bool,
        /// Command to run in the container
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Start a stopped service
    Start {
        #[arg(short, long, env = "RDOCK_TARGET")]
        target: String,
        id: String,
    },

    /// Stop a running service
    Stop {
        #[arg(short, long, env = "RDOCK_TARGET")]
        target: String,
        id: String,
    },

    /// Remove a service and its container
    Delete {
        #[arg(short, long, env = "RDOCK_TARGET")]
        target: String,
        id: String,
    },

    /// Show recent container output
    Logs {
        #[arg(short, long, env = "RDOCK_TARGET")]
        target: String,
        id: String,
        /// Number of lines (defaults to the configured value)
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Show how clients connect to running services
    Info {
        #[arg(short, long, env = "RDOCK_TARGET")]
        target: String,
        /// Service id; all running services when omitted
        id: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_deref();

    let service = match cli.command {
        Commands::Config { action } => {
            return match action {
                ConfigAction::Show => commands::config_show(config_path),
                ConfigAction::Path => commands::config_path(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, force),
            };
        }
        Commands::Exec { target, command } => {
            let config = commands::load_or_default(config_path)?;
            let runtime = Runtime::start(config).await;
            let result = commands::exec_command(&runtime, &target, &command).await;
            runtime.detach().await;

            return match result {
                Ok(Some(0)) => Ok(()),
                Ok(status) => std::process::exit(status.unwrap_or(1)),
                Err(e) => {
                    print_error(&format!("{:#}", e));
                    std::process::exit(1);
                }
            };
        }
        Commands::Disconnect { target } => {
            let config = commands::load_or_default(config_path)?;
            let runtime = Runtime::start(config).await;
            let result = commands::disconnect(&runtime, &target).await;
            runtime.shutdown().await;
            return result;
        }
        Commands::Service { action } => action,
    };

    let config = commands::load_or_default(config_path)?;
    let runtime = Runtime::start(config).await;

    let result = match service {
        ServiceAction::List { long } => commands::service_list(&runtime, long).await,
        ServiceAction::Get { id, json } => commands::service_get(&runtime, &id, json).await,
        ServiceAction::Create {
            target,
            name,
            image,
            kind,
            env,
            volumes,
            wait,
            command,
        } => {
            let options = CreateOptions {
                name,
                image,
                kind,
                env,
                volumes,
                command,
                wait,
            };
            commands::service_create(&runtime, &target, options).await
        }
        ServiceAction::Start { target, id } => {
            commands::service_start(&runtime, &target, &id).await
        }
        ServiceAction::Stop { target, id } => commands::service_stop(&runtime, &target, &id).await,
        ServiceAction::Delete { target, id } => {
            commands::service_delete(&runtime, &target, &id).await
        }
        ServiceAction::Logs { target, id, lines } => {
            commands::service_logs(&runtime, &target, &id, lines).await
        }
        ServiceAction::Info { target, id, json } => {
            commands::service_info(&runtime, &target, id.as_deref(), json).await
        }
    };

    // Sessions stay up so the tunnels of running services keep working
    runtime.detach().await;

    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
