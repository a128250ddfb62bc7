//! keel
//!
//! Bootstraps a Kubernetes management cluster, either in this process or on a
//! bootstrap VM that is followed over HTTP.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{error, info};

mod api;
mod config;
mod local;
mod logging;
mod remote;
mod router;
mod state;

use config::Config;

#[derive(Parser)]
#[command(name = "keel", version)]
#[command(about = "Management cluster bootstrap-then-pivot provisioner", long_about = None)]
struct Cli {
    /// Config file (defaults to $KEEL_CONFIG, ./keel.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a management cluster
    Deploy {
        /// Run the pipeline in this process instead of on a bootstrap VM
        #[arg(long)]
        local: bool,

        /// Address of an already created bootstrap VM
        #[arg(long, required_unless_present = "local")]
        bootstrap_ip: Option<IpAddr>,

        /// Allow a bootstrap VM address outside private ranges
        #[arg(long)]
        allow_routable: bool,

        /// Where logs and deliverables of a remote run are saved
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Follow a running provisioner until it finishes
    Watch {
        /// Progress server URL, e.g. http://10.0.0.50:8081
        url: String,
    },

    /// Download logs and deliverables of a finished run
    Finalize {
        /// Progress server URL
        url: String,

        /// Directory to save into
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Name used for the downloaded log file
        #[arg(long, default_value = "keel")]
        cluster: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy { local: true, .. } => {
            let config = Config::load(&Config::locate(cli.config.as_deref())?)?;
            logging::init(&config.daemon.log_level, Some(&config.spec.log_file))?;
            local::run(config).await?;
        }
        Commands::Deploy {
            bootstrap_ip,
            allow_routable,
            output_dir,
            ..
        } => {
            let path = Config::locate(cli.config.as_deref())?;
            let config = Config::load(&path)?;
            logging::init(&config.daemon.log_level, None)?;

            let host = bootstrap_ip.ok_or_else(|| eyre::eyre!("--bootstrap-ip is required"))?;
            remote::provision(host, &path, allow_routable).await?;

            let url = remote::progress_url(host);
            let outcome = remote::watch(&url).await;
            if let Err(e) = &outcome {
                error!(error = %e, "remote run failed");
            }
            remote::finalize(&url, &config.spec.cluster.name, &output_dir).await?;
            outcome?;
            info!(cluster = %config.spec.cluster.name, "management cluster ready");
        }
        Commands::Watch { url } => {
            logging::init("info", None)?;
            let status = remote::watch(&url).await?;
            info!(messages = status.messages.len(), "remote run succeeded");
        }
        Commands::Finalize {
            url,
            output_dir,
            cluster,
        } => {
            logging::init("info", None)?;
            remote::finalize(&url, &cluster, &output_dir).await?;
        }
    }

    Ok(())
}
