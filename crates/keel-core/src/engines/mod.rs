//! Engine implementations

pub mod addons;
pub mod capv;
pub mod rke;

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::poll::PollSettings;

/// Deadlines for the polls inside engine stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Interval between polls
    pub tick: Duration,
    /// Machines reaching `Running`
    pub machines: Duration,
    /// Nodes reporting `Ready`
    pub nodes: Duration,
    /// Control plane reporting ready before the move
    pub control_plane: Duration,
    /// Controller deployments becoming available
    pub controller: Duration,
    /// Management plane API and local cluster readiness
    pub management: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(10),
            machines: Duration::from_secs(15 * 60),
            nodes: Duration::from_secs(15 * 60),
            control_plane: Duration::from_secs(5 * 60),
            controller: Duration::from_secs(5 * 60),
            management: Duration::from_secs(15 * 60),
        }
    }
}

impl StageTimeouts {
    #[must_use]
    pub fn poll(&self, timeout: Duration) -> PollSettings {
        PollSettings::new(timeout, self.tick)
    }

    /// Same deadlines for everything, mostly for tests
    #[must_use]
    pub fn uniform(timeout: Duration, tick: Duration) -> Self {
        Self {
            tick,
            machines: timeout,
            nodes: timeout,
            control_plane: timeout,
            controller: timeout,
            management: timeout,
        }
    }
}

/// Template name of an OVA path: its basename without `.ova`
#[must_use]
pub fn template_name(ova: &str) -> String {
    let base = Path::new(ova)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.split_once(".ova") {
        Some((name, _)) => name.to_string(),
        None => base,
    }
}

/// Keep only the conditions whose `status` is `"True"`
#[must_use]
pub fn true_conditions(mut doc: Value) -> Value {
    for pointer in ["/conditions", "/status/conditions"] {
        if let Some(conditions) = doc.pointer_mut(pointer).and_then(Value::as_array_mut) {
            conditions.retain(|c| c.get("status").and_then(Value::as_str) == Some("True"));
        }
    }
    doc
}

/// `jsonpath` selecting the Ready status of every node
pub(crate) const NODE_READY_JSONPATH: &str =
    r#"--output=jsonpath={.items[*].status.conditions[?(@.type=="Ready")].status}"#;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::poll::condition_values;

    #[test]
    fn test_template_name() {
        assert_eq!(template_name("/ova/ubuntu-1804-kube-v1.17.3.ova"), "ubuntu-1804-kube-v1.17.3");
        assert_eq!(template_name("capv-haproxy"), "capv-haproxy");
    }

    #[test]
    fn test_true_conditions_filter() {
        let doc = json!({ "status": { "conditions": [
            { "type": "Available", "status": "False" },
            { "type": "Progressing", "status": "True" }
        ]}});
        let filtered = true_conditions(doc);

        assert_eq!(condition_values(&filtered, "type"), vec!["Progressing"]);
    }
}
