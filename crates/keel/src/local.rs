//! Local run: drive the pipeline in this process and serve its progress

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use keel_core::{
    Engine, EngineKind, EventBus, LocalBus, NatsBus, Pipeline, ProgressState, Subscription,
    log_sink,
};
use keel_exec::LocalRunner;

use crate::config::Config;
use crate::router::create_router;
use crate::state::AppState;

/// Event bus binding chosen by the daemon config
enum Bus {
    Local(LocalBus),
    Nats(NatsBus),
}

impl Bus {
    async fn connect(config: &Config) -> eyre::Result<Self> {
        Ok(match &config.daemon.nats_url {
            Some(url) => Bus::Nats(NatsBus::connect(url, &config.spec.cluster.name).await?),
            None => Bus::Local(LocalBus::new()),
        })
    }

    fn shared(&self) -> Arc<dyn EventBus> {
        match self {
            Bus::Local(bus) => Arc::new(bus.clone()),
            Bus::Nats(bus) => Arc::new(bus.clone()),
        }
    }

    /// Deliver everything still queued, then detach the sink
    async fn shutdown(self, sink: Subscription) {
        match self {
            Bus::Local(bus) => {
                bus.close().await;
                sink.join().await;
            }
            Bus::Nats(bus) => {
                if let Err(e) = bus.flush().await {
                    warn!(error = %e, "failed to flush event broker");
                }
                sink.cancel().await;
            }
        }
    }
}

/// Run every stage against `config` and keep the progress server up afterwards
///
/// # Errors
/// Returns the pipeline error, or a setup error if the bus, engine or
/// progress server cannot be created.
pub async fn run(config: Config) -> eyre::Result<()> {
    let bus = Bus::connect(&config).await?;
    let events = bus.shared();
    let sink = events.subscribe(log_sink()).await?;

    let engine = EngineKind::from_spec(config.spec.clone(), events, Arc::new(LocalRunner::new()))?;
    let kubeconfig = engine
        .deliverables()
        .into_iter()
        .find(|d| d.name == "kubeconfig")
        .map(|d| d.path)
        .unwrap_or_default();

    let progress = ProgressState::new();
    let state = Arc::new(AppState::new(
        progress.clone(),
        config.spec.log_file.clone(),
        kubeconfig,
    ));

    let listener = TcpListener::bind(&config.daemon.bind)
        .await
        .wrap_err_with(|| format!("binding progress server to {}", config.daemon.bind))?;
    info!(addr = %listener.local_addr()?, "progress server listening");
    let server = tokio::spawn(async move { axum::serve(listener, create_router(state)).await });

    let cluster = &config.spec.cluster;
    info!(
        cluster = %cluster.name,
        engine = %config.spec.engine,
        control_planes = cluster.control_plane_count,
        workers = cluster.worker_count,
        "launching cluster"
    );

    let started = Instant::now();
    let mut pipeline = Pipeline::new(engine, progress);
    let result = pipeline.run().await;
    info!(
        cluster = %cluster.name,
        success = result.is_ok(),
        duration_secs = started.elapsed().as_secs(),
        "mission complete"
    );

    bus.shutdown(sink).await;
    linger(Duration::from_secs(config.daemon.linger_secs)).await;
    server.abort();

    result.map_err(Into::into)
}

/// Keep serving so remote pollers can collect the outcome and artifacts
async fn linger(period: Duration) {
    if period.is_zero() {
        return;
    }
    info!(secs = period.as_secs(), "serving results; press ctrl-c to exit");
    tokio::select! {
        () = tokio::time::sleep(period) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
}
