//! Provisioning spec types
//!
//! A [`Spec`] is loaded once by the binary and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Everything a provisioning run needs to know
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    /// Cluster identity
    pub cluster: ClusterSpec,
    /// SSH credential material handed to nodes
    #[serde(default)]
    pub ssh: SshSpec,
    /// Optional addons
    #[serde(default)]
    pub addons: Addons,
    /// Log file destination, truncated at the start of a run
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Parent of the per-cluster working directory (defaults to `~/.keel`)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Which engine to run
    pub engine: EngineSpec,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("keel.log")
}

/// Cluster identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name, also used to derive file names and the broker subject
    pub name: String,
    /// Number of control-plane machines
    #[serde(default = "default_control_plane_count")]
    pub control_plane_count: u32,
    /// Number of worker machines
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,
    /// Kubernetes version, e.g. `v1.17.3`
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,
    /// Pod network CIDR
    #[serde(default = "default_pod_cidr")]
    pub pod_cidr: String,
    /// Service network CIDR
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,
    /// Namespace the cluster objects live in
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_control_plane_count() -> u32 {
    1
}

fn default_worker_count() -> u32 {
    2
}

fn default_kubernetes_version() -> String {
    "v1.17.3".to_string()
}

fn default_pod_cidr() -> String {
    "192.168.0.0/16".to_string()
}

fn default_service_cidr() -> String {
    "10.96.0.0/12".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ClusterSpec {
    /// Total machine count
    #[must_use]
    pub fn machine_count(&self) -> usize {
        (self.control_plane_count + self.worker_count) as usize
    }
}

/// SSH credential material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSpec {
    /// Login user on the nodes
    #[serde(default = "default_ssh_username")]
    pub username: String,
    /// Public key installed on the nodes
    #[serde(default)]
    pub authorized_key: String,
    /// Private key used by the cluster bring-up tool
    #[serde(default = "default_ssh_key_path")]
    pub key_path: PathBuf,
}

fn default_ssh_username() -> String {
    "ubuntu".to_string()
}

fn default_ssh_key_path() -> PathBuf {
    PathBuf::from("~/.ssh/id_rsa")
}

impl Default for SshSpec {
    fn default() -> Self {
        Self {
            username: default_ssh_username(),
            authorized_key: String::new(),
            key_path: default_ssh_key_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Addons {
    #[serde(default)]
    pub observability: Observability,
    #[serde(default)]
    pub solidfire: Solidfire,
}

/// Prometheus/Loki stack
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observability {
    #[serde(default)]
    pub enable: bool,
    /// Namespace the charts are installed into
    #[serde(default = "default_observability_namespace")]
    pub namespace: String,
}

fn default_observability_namespace() -> String {
    "keel-system".to_string()
}

/// Trident storage backed by an Element cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solidfire {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub mvip: String,
    #[serde(default)]
    pub svip: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Engine selection and engine-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineSpec {
    /// Local kind bootstrap cluster, Cluster API on vSphere, then pivot
    Capv(CapvSettings),
    /// RKE directly on operator-provided nodes, then Rancher
    Rke(RkeSettings),
}

impl fmt::Display for EngineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineSpec::Capv(_) => write!(f, "capv"),
            EngineSpec::Rke(_) => write!(f, "rke"),
        }
    }
}

/// vSphere settings for the CAPV engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapvSettings {
    /// vCenter address
    pub url: String,
    pub username: String,
    pub password: String,
    pub datacenter: String,
    pub datastore: String,
    pub resource_pool: String,
    pub folder: String,
    pub management_network: String,
    /// Second NIC for storage traffic, only used with solidfire
    #[serde(default)]
    pub storage_network: String,
    /// Node OVA path; the template name is its basename without `.ova`
    pub node_template: String,
    /// Load balancer OVA path
    pub load_balancer_template: String,
    /// CNI manifest applied to the permanent cluster
    #[serde(default = "default_cni_manifest")]
    pub cni_manifest: String,
}

fn default_cni_manifest() -> String {
    "https://docs.projectcalico.org/v3.12/manifests/calico.yaml".to_string()
}

/// Settings for the RKE engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RkeSettings {
    /// Logical node key to address; keys prefixed `<cluster>-controlplane`
    /// mark control-plane nodes
    pub nodes: BTreeMap<String, String>,
    /// Rancher hostname
    #[serde(default)]
    pub hostname: Option<String>,
    /// Where the RKE cluster config is written
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Bring-your-own TLS; cert-manager is skipped when set
    #[serde(default)]
    pub ssl: Option<SslSpec>,
    #[serde(default = "default_rancher_version")]
    pub rancher_version: String,
    #[serde(default = "default_cert_manager_version")]
    pub cert_manager_version: String,
    /// Initial admin password; enables management-plane configuration
    #[serde(default)]
    pub bootstrap_password: Option<String>,
}

fn default_rancher_version() -> String {
    "2.4.3".to_string()
}

fn default_cert_manager_version() -> String {
    "v0.15.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslSpec {
    /// PEM certificate of the private CA
    pub certificate: String,
    #[serde(default)]
    pub private_ca: bool,
}

impl Spec {
    /// Check the invariants engines rely on
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), CoreError> {
        let name = &self.cluster.name;
        if name.is_empty() {
            return Err(CoreError::Config("cluster name must not be empty".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(CoreError::Config(format!(
                "cluster name `{name}` may only contain ASCII letters, digits and '-'"
            )));
        }
        if self.cluster.control_plane_count == 0 {
            return Err(CoreError::Config(
                "control_plane_count must be at least 1".into(),
            ));
        }

        match &self.engine {
            EngineSpec::Capv(capv) => {
                if self.addons.solidfire.enable && capv.storage_network.is_empty() {
                    return Err(CoreError::Config(
                        "solidfire requires engine.storage_network".into(),
                    ));
                }
            }
            EngineSpec::Rke(rke) => {
                if rke.nodes.is_empty() {
                    return Err(CoreError::Config("rke requires at least one node".into()));
                }
            }
        }
        Ok(())
    }
}
