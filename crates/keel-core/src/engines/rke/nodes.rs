//! Node role assignment for the RKE cluster config

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "etcd")]
    Etcd,
    #[serde(rename = "controlplane")]
    ControlPlane,
    #[serde(rename = "worker")]
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Etcd => write!(f, "etcd"),
            Role::ControlPlane => write!(f, "controlplane"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAssignment {
    /// Logical node key from the spec
    pub key: String,
    pub address: String,
    pub roles: Vec<Role>,
}

impl NodeAssignment {
    #[must_use]
    pub fn has(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Whether a node key marks a control-plane node of `cluster`
#[must_use]
pub fn is_control_plane(cluster: &str, key: &str) -> bool {
    key.to_lowercase()
        .starts_with(&format!("{}-controlplane", cluster.to_lowercase()))
}

/// Assign roles to every node, in key order
///
/// Every node starts with etcd plus either control plane or worker. A single
/// node carries all three roles. With an even node count the last worker (or
/// the last node, if there is none) drops etcd so the etcd count is odd.
#[must_use]
pub fn assign_roles(cluster: &str, nodes: &BTreeMap<String, String>) -> Vec<NodeAssignment> {
    let mut assigned: Vec<NodeAssignment> = nodes
        .iter()
        .map(|(key, address)| {
            let second = if is_control_plane(cluster, key) {
                Role::ControlPlane
            } else {
                Role::Worker
            };
            NodeAssignment {
                key: key.clone(),
                address: address.clone(),
                roles: vec![Role::Etcd, second],
            }
        })
        .collect();

    if let [only] = assigned.as_mut_slice() {
        only.roles = vec![Role::Etcd, Role::ControlPlane, Role::Worker];
        return assigned;
    }

    if assigned.len() % 2 == 0 {
        let drop_from = assigned
            .iter()
            .rposition(|n| !n.has(Role::ControlPlane))
            .unwrap_or(assigned.len() - 1);
        assigned[drop_from].roles.retain(|r| *r != Role::Etcd);
    }
    assigned
}
