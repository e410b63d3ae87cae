//! apkforge - on-device Android build pipeline
//!
//! Command line entry point: parses arguments, sets up logging and
//! dispatches to the commands in [`apkforge::commands`].

use std::path::PathBuf;

use anyhow::Result;
use apkforge::commands::{BuildCommand, CheckUpdateCommand, ResolveCommand};
use apkforge::core::{APP_NAME, VERSION};
use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Build Android APKs without Gradle
#[derive(Parser)]
#[command(name = "apkforge", version, about)]
struct Cli {
    /// Print debug information
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline and produce an APK
    Build {
        /// Project directory
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Module directory inside the project
        #[arg(short, long, default_value = "app")]
        module: String,
    },
    /// Resolve declared dependencies and print the classpath
    Resolve {
        /// Project directory
        #[arg(default_value = ".")]
        project: PathBuf,
        /// Print the resolved artifacts as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a repository for a newer version of a coordinate
    CheckUpdate {
        /// `group:artifact:version`
        coordinate: String,
        /// Project whose repositories should be queried
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("{} v{} starting", APP_NAME, VERSION);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build { project, module } => {
            let apk = BuildCommand { project_path: project, module }.execute().await?;
            println!("{}", apk.display());
        }
        Command::Resolve { project, json } => {
            ResolveCommand { project_path: project, json }.execute().await?;
        }
        Command::CheckUpdate { coordinate, project } => {
            CheckUpdateCommand { project_path: project, coordinate }.execute().await?;
        }
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}
