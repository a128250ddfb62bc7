//! Manifests written by the CAPV engine

/// Names of the kustomize inputs that add the storage network to workers
pub const KUSTOMIZATION: &str = "kustomization.yaml";
pub const STORAGE_NETWORK_PATCH: &str = "storage-network-patch.yaml";
pub const ISCSI_PATCH: &str = "iscsi-patch.yaml";

/// Namespace and secret holding the vSphere credentials for the controller
#[must_use]
pub fn credentials_secret(username: &str, password: &str) -> String {
    format!(
        r"apiVersion: v1
kind: Namespace
metadata:
  name: capv-system
---
apiVersion: v1
kind: Secret
metadata:
  name: capv-manager-bootstrap-credentials
  namespace: capv-system
type: Opaque
stringData:
  username: {username:?}
  password: {password:?}
"
    )
}

#[must_use]
pub fn kustomization(cluster: &str) -> String {
    format!(
        r"resources:
  - {cluster}-base.yaml
patchesJson6902:
  - target:
      group: infrastructure.cluster.x-k8s.io
      version: v1alpha3
      kind: VSphereMachineTemplate
      name: {cluster}-md-0
    path: {STORAGE_NETWORK_PATCH}
  - target:
      group: bootstrap.cluster.x-k8s.io
      version: v1alpha3
      kind: KubeadmConfigTemplate
      name: {cluster}-md-0
    path: {ISCSI_PATCH}
"
    )
}

/// Second NIC on the worker template
#[must_use]
pub fn storage_network_patch(network: &str) -> String {
    format!(
        r"- op: add
  path: /spec/template/spec/network/devices/-
  value:
    networkName: {network:?}
    dhcp4: true
"
    )
}

/// Worker packages needed for iSCSI volumes
#[must_use]
pub fn iscsi_patch() -> &'static str {
    r"- op: add
  path: /spec/template/spec/preKubeadmCommands/-
  value: apt-get update && apt-get install -y open-iscsi lsscsi sg3-utils multipath-tools scsitools
- op: add
  path: /spec/template/spec/preKubeadmCommands/-
  value: systemctl enable --now iscsid multipath-tools
"
}
