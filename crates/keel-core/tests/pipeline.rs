use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use keel_api::{Level, StatusEvent};
use keel_core::*;
use keel_exec::ExecError;

// Mock implementations
#[derive(Default)]
struct RecordingBus {
    events: Mutex<Vec<StatusEvent>>,
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, event: StatusEvent) -> Result<(), CoreError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn subscribe(&self, handler: EventHandler) -> Result<Subscription, CoreError> {
        Ok(Subscription::spawn(futures::stream::empty(), handler))
    }
}

impl RecordingBus {
    fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.msg.clone())
            .collect()
    }
}

struct MockEngine {
    bus: Arc<RecordingBus>,
    missing: Vec<String>,
    fail_at: Option<StageName>,
    calls: Arc<Mutex<Vec<StageName>>>,
}

impl MockEngine {
    fn new(bus: Arc<RecordingBus>) -> Self {
        Self {
            bus,
            missing: Vec::new(),
            fail_at: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn stage(&self, stage: StageName) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(stage);
        if self.fail_at == Some(stage) {
            return Err(CoreError::Exec(ExecError::CommandFailed {
                command: "clusterctl init --infrastructure=vsphere".into(),
                status: 1,
                stderr: "connection refused".into(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn required_commands(&self) -> Vec<String> {
        self.missing.clone()
    }

    async fn create_bootstrap(&mut self) -> Result<(), CoreError> {
        self.stage(StageName::CreateBootstrap)
    }

    async fn install_control_plane(&mut self) -> Result<(), CoreError> {
        self.stage(StageName::InstallControlPlane)
    }

    async fn create_permanent(&mut self) -> Result<(), CoreError> {
        self.stage(StageName::CreatePermanent)
    }

    async fn pivot_control_plane(&mut self) -> Result<(), CoreError> {
        self.stage(StageName::PivotControlPlane)
    }

    async fn install_addons(&mut self) -> Result<(), CoreError> {
        self.stage(StageName::InstallAddons)
    }

    fn events(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    fn deliverables(&self) -> Vec<Deliverable> {
        vec![Deliverable::new("kubeconfig", "/tmp/mgmt/kubeconfig")]
    }
}

#[tokio::test]
async fn test_stages_run_in_order() {
    let bus = Arc::new(RecordingBus::default());
    let engine = MockEngine::new(bus.clone());
    let calls = engine.calls.clone();
    let progress = ProgressState::new();

    let mut pipeline = Pipeline::new(engine, progress.clone());
    pipeline.run().await.unwrap();

    assert_eq!(*calls.lock().unwrap(), StageName::ALL.to_vec());

    let status = progress.snapshot();
    assert!(status.complete);
    assert!(status.completed_successfully);
    let recorded: Vec<&str> = status.messages.iter().map(|m| m.msg.as_str()).collect();
    assert_eq!(
        recorded,
        vec![
            "Bootstrap cluster created",
            "Control plane components installed",
            "Permanent management cluster created",
            "Move to Permanent management cluster complete",
            "Addon installation complete"
        ]
    );
    assert_eq!(
        progress.deliverable("kubeconfig"),
        Some("/tmp/mgmt/kubeconfig".into())
    );

    let published = bus.messages();
    assert_eq!(published[0], "CreateBootstrap started");
    assert_eq!(published[1], "Bootstrap cluster created");
}

#[tokio::test]
async fn test_missing_commands_block_every_stage() {
    let bus = Arc::new(RecordingBus::default());
    let mut engine = MockEngine::new(bus.clone());
    engine.missing = vec!["kind".into(), "clusterctl".into()];
    let calls = engine.calls.clone();
    let progress = ProgressState::new();

    let err = Pipeline::new(engine, progress.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "the following commands were not found in $PATH: [kind, clusterctl]"
    );
    assert!(calls.lock().unwrap().is_empty());
    assert!(progress.is_complete());
    assert!(!progress.snapshot().completed_successfully);
}

fn injected_failure() -> CoreError {
    CoreError::Exec(ExecError::CommandFailed {
        command: "clusterctl init --infrastructure=vsphere".into(),
        status: 1,
        stderr: "connection refused".into(),
    })
}

#[tokio::test]
async fn test_failure_at_any_stage_stops_later_stages() {
    for (k, stage) in StageName::ALL.into_iter().enumerate() {
        let bus = Arc::new(RecordingBus::default());
        let mut engine = MockEngine::new(bus.clone());
        engine.fail_at = Some(stage);
        let calls = engine.calls.clone();
        let progress = ProgressState::new();

        let err = Pipeline::new(engine, progress.clone())
            .run()
            .await
            .unwrap_err();

        assert!(
            matches!(
                &err,
                CoreError::Exec(ExecError::CommandFailed { command, status: 1, stderr })
                    if command == "clusterctl init --infrastructure=vsphere"
                        && stderr == "connection refused"
            ),
            "{stage}: {err:?}"
        );
        assert_eq!(err, injected_failure());
        assert_eq!(*calls.lock().unwrap(), StageName::ALL[..=k].to_vec(), "{stage}");

        let status = progress.snapshot();
        assert!(status.complete);
        assert!(!status.completed_successfully);
        let recorded: Vec<&str> = status.messages.iter().map(|m| m.msg.as_str()).collect();
        let mut expected: Vec<String> = StageName::ALL[..k]
            .iter()
            .map(|s| s.completion_message().to_string())
            .collect();
        expected.push(err.to_string());
        assert_eq!(recorded, expected, "{stage}");
        assert!(progress.deliverable("kubeconfig").is_none());

        let events = bus.events.lock().unwrap();
        let failure = events.last().unwrap();
        assert_eq!(failure.level, Level::Info);
        assert_eq!(failure.msg, err.to_string());
    }
}

#[tokio::test]
async fn test_local_bus_observer_sees_stage_events() {
    let bus = LocalBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = bus
        .subscribe(Arc::new(move |event: StatusEvent| {
            sink.lock().unwrap().push(event.msg);
        }))
        .await
        .unwrap();

    struct LocalEngine(MockEngine, LocalBus);

    #[async_trait]
    impl Engine for LocalEngine {
        fn name(&self) -> &str {
            "local"
        }
        fn required_commands(&self) -> Vec<String> {
            Vec::new()
        }
        async fn create_bootstrap(&mut self) -> Result<(), CoreError> {
            self.0.create_bootstrap().await
        }
        async fn install_control_plane(&mut self) -> Result<(), CoreError> {
            self.0.install_control_plane().await
        }
        async fn create_permanent(&mut self) -> Result<(), CoreError> {
            self.0.create_permanent().await
        }
        async fn pivot_control_plane(&mut self) -> Result<(), CoreError> {
            self.0.pivot_control_plane().await
        }
        async fn install_addons(&mut self) -> Result<(), CoreError> {
            self.0.install_addons().await
        }
        fn events(&self) -> Arc<dyn EventBus> {
            Arc::new(self.1.clone())
        }
    }

    let engine = LocalEngine(MockEngine::new(Arc::new(RecordingBus::default())), bus.clone());
    Pipeline::new(engine, ProgressState::new())
        .run()
        .await
        .unwrap();

    bus.close().await;
    subscription.join().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 10);
    assert_eq!(seen[0], "CreateBootstrap started");
    assert_eq!(seen[9], "Addon installation complete");
}
