//! RKE on operator-provided nodes, then Rancher
//!
//! There is no bootstrap cluster: the permanent cluster is brought up directly
//! with `rke up`, and the pivot stage installs Rancher into it.

pub mod nodes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use keel_exec::{CommandRunner, CommandSpec, missing_commands};

use crate::config::{EngineSpec, RkeSettings, Spec};
use crate::engine::{Deliverable, Engine};
use crate::engines::StageTimeouts;
use crate::engines::addons;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::mgmt::{RancherClient, wait_for_cluster_ready};
use crate::stage::StageContext;
use crate::workdir::{ClusterDir, write_file};

use nodes::{NodeAssignment, Role, assign_roles, is_control_plane};

pub const DEFAULT_HOSTNAME: &str = "my.rancher.org";
const CATTLE_SYSTEM: &str = "cattle-system";
const CERT_MANAGER: &str = "cert-manager";
const INGRESS_NAMESPACE: &str = "ingress-nginx";
const RANCHER_ISSUER: &str = "rancher-issuer.json";

#[derive(Debug, Serialize)]
struct RkeNode<'a> {
    address: &'a str,
    user: &'a str,
    role: &'a [Role],
    hostname_override: &'a str,
}

#[derive(Debug, Serialize)]
struct RkeConfig<'a> {
    cluster_name: &'a str,
    nodes: Vec<RkeNode<'a>>,
    ssh_key_path: String,
    kubernetes_version: &'a str,
    authentication: Authentication<'a>,
    services: Services<'a>,
    ingress: Ingress,
}

#[derive(Debug, Serialize)]
struct Authentication<'a> {
    strategy: &'static str,
    sans: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct Services<'a> {
    kube_controller: KubeController<'a>,
    kube_api: KubeApi<'a>,
}

#[derive(Debug, Serialize)]
struct KubeController<'a> {
    cluster_cidr: &'a str,
    service_cluster_ip_range: &'a str,
}

#[derive(Debug, Serialize)]
struct KubeApi<'a> {
    service_cluster_ip_range: &'a str,
}

#[derive(Debug, Serialize)]
struct Ingress {
    provider: &'static str,
}

/// Render the `rke up` cluster config
///
/// The API server certificate covers every control-plane address and the
/// Rancher `hostname`.
///
/// # Errors
/// Returns [`CoreError::Decode`] if serialization fails.
pub fn render_cluster_config(
    spec: &Spec,
    assigned: &[NodeAssignment],
    hostname: &str,
) -> Result<String, CoreError> {
    let cluster = &spec.cluster;
    let config = RkeConfig {
        cluster_name: &cluster.name,
        nodes: assigned
            .iter()
            .map(|n| RkeNode {
                address: &n.address,
                user: &spec.ssh.username,
                role: &n.roles,
                hostname_override: &n.key,
            })
            .collect(),
        ssh_key_path: spec.ssh.key_path.display().to_string(),
        kubernetes_version: &cluster.kubernetes_version,
        authentication: Authentication {
            strategy: "x509",
            sans: assigned
                .iter()
                .filter(|n| is_control_plane(&cluster.name, &n.key) || n.has(Role::ControlPlane))
                .map(|n| n.address.as_str())
                .chain(std::iter::once(hostname))
                .collect(),
        },
        services: Services {
            kube_controller: KubeController {
                cluster_cidr: &cluster.pod_cidr,
                service_cluster_ip_range: &cluster.service_cidr,
            },
            kube_api: KubeApi {
                service_cluster_ip_range: &cluster.service_cidr,
            },
        },
        ingress: Ingress { provider: "nginx" },
    };
    serde_yaml::to_string(&config).map_err(|e| CoreError::Decode(e.to_string()))
}

/// cert-manager `Issuer` the Rancher chart creates for its self-signed certificate
#[must_use]
pub fn rancher_issuer(rancher_version: &str) -> String {
    let issuer = json!({
        "apiVersion": "cert-manager.io/v1alpha2",
        "kind": "Issuer",
        "metadata": {
            "name": "rancher",
            "namespace": CATTLE_SYSTEM,
            "labels": {
                "app": "rancher",
                "chart": format!("rancher-{rancher_version}"),
                "heritage": "Helm",
                "release": "rancher"
            }
        },
        "spec": {
            "ca": { "secretName": "tls-rancher" }
        }
    });
    serde_json::to_string_pretty(&issuer).unwrap_or_else(|_| issuer.to_string())
}

/// Where `rke up` writes the kubeconfig for a given cluster config
#[must_use]
pub fn rke_kubeconfig(config_path: &Path) -> PathBuf {
    let name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    config_path.with_file_name(format!("kube_config_{name}"))
}

pub struct RkeEngine {
    spec: Spec,
    settings: RkeSettings,
    ctx: StageContext,
    dir: ClusterDir,
    timeouts: StageTimeouts,
    hostname: String,
    config_path: PathBuf,
    assigned: Vec<NodeAssignment>,
}

impl RkeEngine {
    /// Build the engine for a spec whose `engine.kind` is `rke`
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] for any other engine kind or if the
    /// working directory cannot be resolved.
    pub fn new(
        spec: Spec,
        events: Arc<dyn EventBus>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CoreError> {
        let EngineSpec::Rke(settings) = &spec.engine else {
            return Err(CoreError::Config(format!(
                "rke engine cannot run a `{}` spec",
                spec.engine
            )));
        };
        let settings = settings.clone();
        let dir = ClusterDir::for_spec(&spec)?;
        let hostname = settings
            .hostname
            .clone()
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        let config_path = settings
            .config_path
            .clone()
            .unwrap_or_else(|| dir.rke_config());

        Ok(Self {
            spec,
            settings,
            ctx: StageContext::new(events, runner),
            dir,
            timeouts: StageTimeouts::default(),
            hostname,
            config_path,
            assigned: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Node roles computed by the last `create_permanent`
    #[must_use]
    pub fn assignments(&self) -> &[NodeAssignment] {
        &self.assigned
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    #[must_use]
    pub fn kubeconfig(&self) -> PathBuf {
        rke_kubeconfig(&self.config_path)
    }

    fn kubeconfig_arg(&self) -> String {
        format!("--kubeconfig={}", self.kubeconfig().display())
    }

    fn helm(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("helm").args(args.iter().copied()).arg(self.kubeconfig_arg())
    }

    fn kubectl(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("kubectl").args(args.iter().copied()).arg(self.kubeconfig_arg())
    }

    async fn create_namespace(&self, namespace: &str) {
        let created = self
            .ctx
            .run(self.kubectl(&["create", "namespace", namespace]))
            .await;
        self.ctx
            .suppress(&format!("creating namespace {namespace}"), created)
            .await;
    }

    async fn install_cert_manager(&self) -> Result<(), CoreError> {
        let version = &self.settings.cert_manager_version;
        let crds = format!(
            "https://github.com/jetstack/cert-manager/releases/download/{version}/cert-manager.crds.yaml"
        );
        self.ctx.info("installing cert-manager").await;
        self.ctx
            .run(self.kubectl(&["apply", "--validate=false", &format!("--filename={crds}")]))
            .await?;
        self.ctx.run(self.helm(&["repo", "update"])).await?;
        self.ctx
            .run(self.helm(&[
                "install",
                CERT_MANAGER,
                "jetstack/cert-manager",
                &format!("--namespace={CERT_MANAGER}"),
                &format!("--version={version}"),
            ]))
            .await?;
        self.ctx
            .run(self.kubectl(&[
                &format!("--namespace={CERT_MANAGER}"),
                "rollout",
                "status",
                "deploy/cert-manager",
            ]))
            .await?;
        info!(version = %version, "cert-manager ready");
        Ok(())
    }

    fn wait_for_issuer(&self) -> CommandSpec {
        self.kubectl(&[
            "wait",
            "issuer",
            "rancher",
            "--for",
            "condition=ready",
            &format!("--namespace={CATTLE_SYSTEM}"),
        ])
    }

    /// Recreate the Rancher issuer if the chart's copy never becomes ready
    async fn ensure_rancher_issuer(&self) -> Result<(), CoreError> {
        match self.ctx.run(self.wait_for_issuer()).await {
            Ok(_) => {
                self.ctx.info("Rancher Issuer deployed successfully").await;
                return Ok(());
            }
            Err(e) => {
                self.ctx.info("Creating Rancher Issuer").await;
                self.ctx
                    .debug(format!("Rancher Issuer failed to deploy, recreating: {e}"))
                    .await;
            }
        }

        let manifest = self
            .dir
            .write(RANCHER_ISSUER, rancher_issuer(&self.settings.rancher_version))
            .await?;
        self.ctx
            .run(self.kubectl(&[
                &format!("--namespace={CATTLE_SYSTEM}"),
                "apply",
                &format!("--filename={}", manifest.display()),
            ]))
            .await?;
        self.ctx.run(self.wait_for_issuer()).await?;
        self.ctx.info("Rancher Issuer deployed successfully").await;
        Ok(())
    }

    async fn configure_management_plane(&self, password: &str) -> Result<(), CoreError> {
        let url = format!("https://{}", self.hostname);
        let mut client = RancherClient::new(&url)?;

        self.ctx.info("waiting for the Rancher API").await;
        client
            .wait_for_api(self.ctx.bus(), self.timeouts.poll(self.timeouts.management))
            .await?;
        client.login(password).await?;
        client.set_server_url(&url).await?;
        wait_for_cluster_ready(
            &client,
            self.ctx.bus(),
            self.timeouts.poll(self.timeouts.management),
        )
        .await?;

        info!(url = %url, "management plane configured");
        Ok(())
    }
}

#[async_trait]
impl Engine for RkeEngine {
    fn name(&self) -> &str {
        "rke"
    }

    fn required_commands(&self) -> Vec<String> {
        let mut required = vec!["rke", "kubectl", "helm"];
        if self.spec.addons.solidfire.enable {
            required.push("tridentctl");
        }
        missing_commands(&required)
    }

    async fn create_bootstrap(&mut self) -> Result<(), CoreError> {
        self.ctx.debug("CreateBootstrap - nothing to do").await;
        Ok(())
    }

    async fn install_control_plane(&mut self) -> Result<(), CoreError> {
        self.ctx.debug("InstallControlPlane - nothing to do").await;
        Ok(())
    }

    #[instrument(skip(self), fields(cluster = %self.spec.cluster.name))]
    async fn create_permanent(&mut self) -> Result<(), CoreError> {
        self.ctx.info("Installing HA RKE cluster").await;
        if self.settings.hostname.is_none() {
            self.ctx
                .debug(format!("Hostname not set, defaulting to {DEFAULT_HOSTNAME}"))
                .await;
        }
        if self.settings.config_path.is_none() {
            self.ctx
                .debug(format!(
                    "RKE config path not set, defaulting to {}",
                    self.config_path.display()
                ))
                .await;
        }

        self.assigned = assign_roles(&self.spec.cluster.name, &self.settings.nodes);
        if self.assigned.len() == 1 {
            self.ctx
                .debug("Non-HA RKE deployment detected, at least 3 nodes recommended")
                .await;
        }
        for node in &self.assigned {
            let roles: Vec<String> = node.roles.iter().map(ToString::to_string).collect();
            self.ctx
                .debug(format!("{} ({}): {}", node.key, node.address, roles.join(",")))
                .await;
        }

        let config = render_cluster_config(&self.spec, &self.assigned, &self.hostname)?;
        write_file(&self.config_path, config).await?;

        self.ctx
            .run(
                CommandSpec::new("rke")
                    .arg("up")
                    .arg(format!("--config={}", self.config_path.display())),
            )
            .await?;
        self.ctx.info("RKE cluster is up").await;
        Ok(())
    }

    #[instrument(skip(self), fields(cluster = %self.spec.cluster.name))]
    async fn pivot_control_plane(&mut self) -> Result<(), CoreError> {
        let custom_ssl = self.settings.ssl.clone();

        self.ctx
            .run(self.helm(&[
                "repo",
                "add",
                "rancher-stable",
                "https://releases.rancher.com/server-charts/stable",
            ]))
            .await?;
        if custom_ssl.is_none() {
            self.ctx
                .run(self.helm(&["repo", "add", "jetstack", "https://charts.jetstack.io"]))
                .await?;
        }

        self.create_namespace(CATTLE_SYSTEM).await;
        if custom_ssl.is_none() {
            self.create_namespace(CERT_MANAGER).await;
            self.install_cert_manager().await?;
        } else {
            self.ctx.run(self.helm(&["repo", "update"])).await?;
        }

        self.ctx.info("installing Rancher").await;
        let tls_source = if custom_ssl.is_some() { "secret" } else { "rancher" };
        let private_ca = custom_ssl.as_ref().is_some_and(|ssl| ssl.private_ca);
        let installed = self
            .ctx
            .run(self.helm(&[
                "install",
                "rancher",
                "rancher-stable/rancher",
                &format!("--namespace={CATTLE_SYSTEM}"),
                &format!("--version={}", self.settings.rancher_version),
                "--set",
                &format!("hostname={}", self.hostname),
                "--set",
                &format!("ingress.tls.source={tls_source}"),
                "--set",
                &format!("privateCA={private_ca}"),
            ]))
            .await;
        self.ctx.suppress("installing rancher", installed).await;

        match &custom_ssl {
            Some(ssl) if ssl.private_ca => {
                let ca = self.dir.write("cacerts.pem", &ssl.certificate).await?;
                self.ctx
                    .run(self.kubectl(&[
                        &format!("--namespace={CATTLE_SYSTEM}"),
                        "create",
                        "secret",
                        "generic",
                        "tls-ca",
                        &format!("--from-file=cacerts.pem={}", ca.display()),
                    ]))
                    .await?;
            }
            Some(_) => {
                self.ctx
                    .info(format!(
                        "Create the tls-rancher-ingress secret in {CATTLE_SYSTEM} before Rancher can serve"
                    ))
                    .await;
            }
            None => {}
        }

        self.ctx
            .run(self.kubectl(&[
                &format!("--namespace={CATTLE_SYSTEM}"),
                "rollout",
                "status",
                "deploy/rancher",
            ]))
            .await?;
        self.ctx
            .run(self.kubectl(&[
                &format!("--namespace={INGRESS_NAMESPACE}"),
                "rollout",
                "status",
                "deploy/default-http-backend",
            ]))
            .await?;

        if custom_ssl.is_none() {
            self.ensure_rancher_issuer().await?;
        }

        if let Some(password) = self.settings.bootstrap_password.clone() {
            self.configure_management_plane(&password).await?;
        }

        let addresses: Vec<&str> = self
            .assigned
            .iter()
            .filter(|n| n.has(Role::Worker))
            .map(|n| n.address.as_str())
            .collect();
        self.ctx
            .info(format!(
                "Make sure hostname {} resolves to {}",
                self.hostname,
                addresses.join(", ")
            ))
            .await;
        self.ctx
            .info(format!("HA Rancher install complete: https://{}", self.hostname))
            .await;
        Ok(())
    }

    async fn install_addons(&mut self) -> Result<(), CoreError> {
        let kubeconfig = self.kubeconfig();
        addons::install_addons(&self.ctx, &self.dir, &self.spec, &kubeconfig).await
    }

    fn events(&self) -> Arc<dyn EventBus> {
        self.ctx.events()
    }

    fn deliverables(&self) -> Vec<Deliverable> {
        vec![
            Deliverable::new("kubeconfig", self.kubeconfig()),
            Deliverable::new("rke-cluster.yml", self.config_path.clone()),
        ]
    }
}
