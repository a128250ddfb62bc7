//! Cluster API on vSphere
//!
//! A local kind cluster hosts the Cluster API controllers just long enough to
//! create the permanent cluster, then `clusterctl move` hands the cluster
//! objects over and the bootstrap cluster is no longer needed.

pub mod manifests;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, instrument};

use keel_exec::{CommandRunner, CommandSpec, missing_commands};

use crate::config::{CapvSettings, EngineSpec, Spec};
use crate::engine::{Deliverable, Engine};
use crate::engines::addons;
use crate::engines::{NODE_READY_JSONPATH, StageTimeouts, template_name, true_conditions};
use crate::error::CoreError;
use crate::events::EventBus;
use crate::poll::{retry_while_missing, wait_for_condition};
use crate::stage::{StageContext, kubeconfig_env};
use crate::workdir::ClusterDir;

const CAPV_NAMESPACE: &str = "capv-system";
const CAPV_CONTROLLER: &str = "capv-controller-manager";

pub struct CapvEngine {
    spec: Spec,
    settings: CapvSettings,
    ctx: StageContext,
    dir: ClusterDir,
    timeouts: StageTimeouts,
}

impl CapvEngine {
    /// Build the engine for a spec whose `engine.kind` is `capv`
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] for any other engine kind or if the
    /// working directory cannot be resolved.
    pub fn new(
        spec: Spec,
        events: Arc<dyn EventBus>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CoreError> {
        let EngineSpec::Capv(settings) = &spec.engine else {
            return Err(CoreError::Config(format!(
                "capv engine cannot run a `{}` spec",
                spec.engine
            )));
        };
        let settings = settings.clone();
        let dir = ClusterDir::for_spec(&spec)?;

        Ok(Self {
            spec,
            settings,
            ctx: StageContext::new(events, runner),
            dir,
            timeouts: StageTimeouts::default(),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &ClusterDir {
        &self.dir
    }

    fn bootstrap_cluster_name(&self) -> String {
        format!("{}-bootstrap", self.spec.cluster.name)
    }

    /// `clusterctl` environment for the vSphere provider
    fn vsphere_env(&self, kubeconfig: &Path) -> BTreeMap<String, String> {
        let s = &self.settings;
        let mut env = kubeconfig_env(kubeconfig);
        env.extend(
            [
                ("VSPHERE_PASSWORD", s.password.clone()),
                ("VSPHERE_USERNAME", s.username.clone()),
                ("VSPHERE_SERVER", s.url.clone()),
                ("VSPHERE_DATACENTER", s.datacenter.clone()),
                ("VSPHERE_DATASTORE", s.datastore.clone()),
                ("VSPHERE_NETWORK", s.management_network.clone()),
                ("VSPHERE_RESOURCE_POOL", s.resource_pool.clone()),
                ("VSPHERE_FOLDER", s.folder.clone()),
                ("VSPHERE_TEMPLATE", template_name(&s.node_template)),
                ("VSPHERE_HAPROXY_TEMPLATE", template_name(&s.load_balancer_template)),
                ("VSPHERE_SSH_AUTHORIZED_KEY", self.spec.ssh.authorized_key.clone()),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );
        env
    }

    async fn apply(&self, manifest: &str, kubeconfig: &Path) -> Result<(), CoreError> {
        self.ctx
            .run(
                CommandSpec::new("kubectl")
                    .arg("apply")
                    .arg(format!("--filename={manifest}"))
                    .envs(&kubeconfig_env(kubeconfig)),
            )
            .await?;
        Ok(())
    }

    async fn wait_for_ready_nodes(&self, kubeconfig: &Path, count: usize) -> Result<(), CoreError> {
        let ctx = &self.ctx;
        let spec = CommandSpec::new("kubectl")
            .args(["get", "nodes", NODE_READY_JSONPATH])
            .envs(&kubeconfig_env(kubeconfig));
        retry_while_missing(
            self.ctx.bus(),
            "nodes",
            "True",
            count,
            self.timeouts.poll(self.timeouts.nodes),
            move || ctx.output(spec.clone()),
        )
        .await
    }

    /// Kustomize the worker storage network into the final manifest
    async fn inject_storage_prerequisites(&self) -> Result<(), CoreError> {
        let cluster = &self.spec.cluster.name;
        self.dir
            .write(manifests::KUSTOMIZATION, manifests::kustomization(cluster))
            .await?;
        self.dir
            .write(
                manifests::STORAGE_NETWORK_PATCH,
                manifests::storage_network_patch(&self.settings.storage_network),
            )
            .await?;
        self.dir
            .write(manifests::ISCSI_PATCH, manifests::iscsi_patch())
            .await?;

        let result = self
            .ctx
            .run_strict(
                CommandSpec::new("kubectl")
                    .arg("kustomize")
                    .arg(self.dir.path().display().to_string()),
            )
            .await?;
        crate::workdir::write_file(&self.dir.final_manifest(), result.stdout).await
    }
}

#[async_trait]
impl Engine for CapvEngine {
    fn name(&self) -> &str {
        "capv"
    }

    fn required_commands(&self) -> Vec<String> {
        let mut required = vec!["kind", "clusterctl", "kubectl", "docker"];
        if self.spec.addons.observability.enable {
            required.push("helm");
        }
        if self.spec.addons.solidfire.enable {
            required.push("tridentctl");
        }
        missing_commands(&required)
    }

    #[instrument(skip(self), fields(cluster = %self.spec.cluster.name))]
    async fn create_bootstrap(&mut self) -> Result<(), CoreError> {
        let name = self.bootstrap_cluster_name();
        self.dir.ensure().await?;

        self.ctx.info("kind create cluster (bootstrap cluster)").await;
        self.ctx
            .run(CommandSpec::new("kind").args(["create", "cluster", "--name", &name]))
            .await?;

        self.ctx
            .info("getting and writing bootstrap cluster kubeconfig to disk")
            .await;
        let kubeconfig = self
            .ctx
            .run_strict(CommandSpec::new("kind").args(["get", "kubeconfig", "--name", &name]))
            .await?;
        let path = self.dir.bootstrap_kubeconfig();
        crate::workdir::write_file(&path, kubeconfig.stdout).await?;

        self.ctx.info("waiting for the bootstrap node to be Ready").await;
        self.wait_for_ready_nodes(&path, 1).await?;
        info!(cluster = %name, "bootstrap cluster ready");
        Ok(())
    }

    #[instrument(skip(self), fields(cluster = %self.spec.cluster.name))]
    async fn install_control_plane(&mut self) -> Result<(), CoreError> {
        let bootstrap = self.dir.bootstrap_kubeconfig();
        let cluster = &self.spec.cluster;

        let secret = self.dir.credentials_secret();
        crate::workdir::write_file(
            &secret,
            manifests::credentials_secret(&self.settings.username, &self.settings.password),
        )
        .await?;
        self.apply(&secret.display().to_string(), &bootstrap).await?;

        self.ctx.info("init capi in the bootstrap cluster").await;
        let env = self.vsphere_env(&bootstrap);
        self.ctx
            .run(
                CommandSpec::new("clusterctl")
                    .args(["init", "--infrastructure=vsphere"])
                    .envs(&env),
            )
            .await?;

        self.ctx.info("waiting for the CAPV controller").await;
        let ctx = &self.ctx;
        let deployment = CommandSpec::new("kubectl")
            .arg(format!("--namespace={CAPV_NAMESPACE}"))
            .args(["--output=json", "get", "deployment", CAPV_CONTROLLER])
            .envs(&kubeconfig_env(&bootstrap));
        let deployment = &deployment;
        wait_for_condition(
            self.ctx.bus(),
            &format!("deployment/{CAPV_CONTROLLER}"),
            "type",
            "Available",
            self.timeouts.poll(self.timeouts.controller),
            move || async move {
                let out = ctx.output(deployment.clone()).await?;
                Ok(true_conditions(serde_json::from_str(&out)?))
            },
        )
        .await?;

        self.ctx.info("writing CAPv spec file out").await;
        let manifest = self
            .ctx
            .run_strict(
                CommandSpec::new("clusterctl")
                    .args(["config", "cluster", &cluster.name, "--infrastructure=vsphere"])
                    .arg(format!("--kubernetes-version={}", cluster.kubernetes_version))
                    .arg(format!(
                        "--control-plane-machine-count={}",
                        cluster.control_plane_count
                    ))
                    .arg(format!("--worker-machine-count={}", cluster.worker_count))
                    .envs(&env),
            )
            .await?;
        crate::workdir::write_file(&self.dir.base_manifest(), manifest.stdout).await
    }

    #[instrument(skip(self), fields(cluster = %self.spec.cluster.name))]
    async fn create_permanent(&mut self) -> Result<(), CoreError> {
        let bootstrap = self.dir.bootstrap_kubeconfig();
        let cluster = &self.spec.cluster;

        let manifest = if self.spec.addons.solidfire.enable {
            self.inject_storage_prerequisites().await?;
            self.dir.final_manifest()
        } else {
            self.dir.base_manifest()
        };
        self.apply(&manifest.display().to_string(), &bootstrap).await?;

        self.ctx.info("waiting for machines to be Running").await;
        let ctx = &self.ctx;
        let machines = CommandSpec::new("kubectl")
            .arg(format!("--namespace={}", cluster.namespace))
            .args(["get", "machines", "--output=jsonpath={.items[*].status.phase}"])
            .envs(&kubeconfig_env(&bootstrap));
        retry_while_missing(
            self.ctx.bus(),
            "machines",
            "Running",
            cluster.machine_count(),
            self.timeouts.poll(self.timeouts.machines),
            || ctx.output(machines.clone()),
        )
        .await?;

        let secret = self
            .ctx
            .output(
                CommandSpec::new("kubectl")
                    .arg(format!("--namespace={}", cluster.namespace))
                    .args(["--output=json", "get", "secret"])
                    .arg(format!("{}-kubeconfig", cluster.name))
                    .envs(&kubeconfig_env(&bootstrap)),
            )
            .await?;
        let secret: serde_json::Value = serde_json::from_str(&secret)?;
        let encoded = secret
            .pointer("/data/value")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CoreError::Decode("kubeconfig secret has no data.value".into()))?;
        let kubeconfig = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Decode(format!("kubeconfig secret: {e}")))?;
        let permanent = self.dir.permanent_kubeconfig();
        crate::workdir::write_file(&permanent, kubeconfig).await?;

        self.ctx.info("applying the CNI to the permanent cluster").await;
        self.apply(&self.settings.cni_manifest, &permanent).await?;

        self.wait_for_ready_nodes(&permanent, cluster.machine_count())
            .await
    }

    #[instrument(skip(self), fields(cluster = %self.spec.cluster.name))]
    async fn pivot_control_plane(&mut self) -> Result<(), CoreError> {
        let bootstrap = self.dir.bootstrap_kubeconfig();
        let permanent = self.dir.permanent_kubeconfig();

        self.apply(&self.dir.credentials_secret().display().to_string(), &permanent)
            .await?;

        let namespace = &self.spec.cluster.namespace;
        let created = self
            .ctx
            .run(
                CommandSpec::new("kubectl")
                    .args(["create", "ns", namespace])
                    .envs(&kubeconfig_env(&permanent)),
            )
            .await;
        self.ctx
            .suppress(&format!("creating namespace {namespace}"), created)
            .await;

        self.ctx.info("init capi in the permanent cluster").await;
        self.ctx
            .run(
                CommandSpec::new("clusterctl")
                    .args(["init", "--infrastructure=vsphere"])
                    .envs(&self.vsphere_env(&permanent)),
            )
            .await?;

        let ctx = &self.ctx;
        let control_plane = CommandSpec::new("kubectl")
            .args([
                "get",
                "kubeadmcontrolplane",
                "--output=jsonpath={.items[0].status.ready}",
            ])
            .envs(&kubeconfig_env(&bootstrap));
        retry_while_missing(
            self.ctx.bus(),
            "kubeadmcontrolplane",
            "true",
            1,
            self.timeouts.poll(self.timeouts.control_plane),
            || ctx.output(control_plane.clone()),
        )
        .await?;

        self.ctx.info("moving cluster objects to the permanent cluster").await;
        self.ctx
            .run(
                CommandSpec::new("clusterctl")
                    .arg("move")
                    .arg(format!("--to-kubeconfig={}", permanent.display()))
                    .envs(&kubeconfig_env(&bootstrap)),
            )
            .await?;
        Ok(())
    }

    async fn install_addons(&mut self) -> Result<(), CoreError> {
        addons::install_addons(
            &self.ctx,
            &self.dir,
            &self.spec,
            &self.dir.permanent_kubeconfig(),
        )
        .await
    }

    fn events(&self) -> Arc<dyn EventBus> {
        self.ctx.events()
    }

    fn deliverables(&self) -> Vec<Deliverable> {
        vec![Deliverable::new("kubeconfig", self.dir.permanent_kubeconfig())]
    }
}
