//! Remote run: start the provisioner on a bootstrap VM and follow it from here

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tracing::{info, warn};

use keel_api::ProgressStatus;
use keel_client::{ClientError, HttpClient, ProgressBridge};
use keel_core::{EventBus, LocalBus, log_sink};
use keel_exec::BootstrapTransport;
use keel_exec::transport::remote_deploy_command;

/// Port the remote progress server listens on
pub const PROGRESS_PORT: u16 = 8081;

const READY_LIMIT: Duration = Duration::from_secs(300);
const READY_TICK: Duration = Duration::from_secs(5);

/// Progress URL of a bootstrap VM
#[must_use]
pub fn progress_url(host: IpAddr) -> String {
    match host {
        IpAddr::V4(v4) => format!("http://{v4}:{PROGRESS_PORT}"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{PROGRESS_PORT}"),
    }
}

/// Upload this executable and `config_path` to the VM and start a local run there
///
/// # Errors
/// Returns an error if the address is refused or any transfer fails.
pub async fn provision(host: IpAddr, config_path: &Path, allow_routable: bool) -> eyre::Result<()> {
    let transport = if allow_routable {
        warn!(%host, "isolation check disabled for bootstrap transport");
        BootstrapTransport::new_unchecked(host)
    } else {
        BootstrapTransport::new(host)?
    };

    start_remote_run(&transport, config_path).await?;
    info!(%host, "remote run started");
    Ok(())
}

async fn start_remote_run(transport: &BootstrapTransport, config_path: &Path) -> eyre::Result<()> {
    transport.wait_until_ready(READY_LIMIT, READY_TICK).await?;

    let exe = std::env::current_exe().wrap_err("locating own executable")?;
    transport.upload_file(&exe).await?;
    transport.upload_config(config_path).await?;

    transport.run_async(&remote_deploy_command()).await?;
    Ok(())
}

/// Follow a remote run until it completes, rendering its events locally
///
/// # Errors
/// Returns an error if the run fails or the progress server stops answering.
pub async fn watch(url: &str) -> eyre::Result<ProgressStatus> {
    let bus = LocalBus::new();
    let sink = bus.subscribe(log_sink()).await?;

    let client = HttpClient::new(url)?;
    let outcome = ProgressBridge::new(client, Arc::new(bus.clone())).run().await;

    bus.close().await;
    sink.join().await;
    Ok(outcome?)
}

/// Copy the log file, kubeconfig and every deliverable of a run into `output_dir`
///
/// # Errors
/// Returns an error if the listing or any download fails. A kubeconfig that
/// does not exist yet is skipped.
pub async fn finalize(url: &str, cluster: &str, output_dir: &Path) -> eyre::Result<usize> {
    let client = HttpClient::new(url)?;
    let mut saved = 0;

    let logs = client.logs().await?;
    keel_client::http::write_artifact(&output_dir.join(format!("{cluster}.log")), &logs).await?;
    saved += 1;

    let deliverables = client.deliverables().await?;
    if !deliverables.iter().any(|d| d.name == "kubeconfig") {
        match client.kubeconfig().await {
            Ok(body) => {
                keel_client::http::write_artifact(&output_dir.join("kubeconfig"), &body).await?;
                saved += 1;
            }
            Err(ClientError::Api { status: 500, .. }) => {
                warn!("remote run has no kubeconfig");
            }
            Err(e) => return Err(e.into()),
        }
    }

    for deliverable in &deliverables {
        client
            .download(&deliverable.name, &output_dir.join(&deliverable.name))
            .await?;
        saved += 1;
    }

    info!(files = saved, dir = %output_dir.display(), "deployment files saved");
    Ok(saved)
}
