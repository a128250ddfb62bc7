//! Response types for the progress endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::events::StatusEvent;

/// Snapshot of a run's progress, served at `GET /progress`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatus {
    /// Whether the run has finished
    pub complete: bool,
    /// Outcome of the run, meaningful once `complete` is set
    pub completed_successfully: bool,
    /// Every event appended so far, in order
    #[serde(default)]
    pub messages: Vec<StatusEvent>,
    /// When the run started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// An artifact available for download once a run finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeliverableInfo {
    /// Deliverable name, e.g. `kubeconfig`
    pub name: String,
    /// Path to fetch it from, relative to the progress endpoint
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_field_names() {
        let status = ProgressStatus {
            complete: true,
            completed_successfully: false,
            messages: vec![StatusEvent::info("done")],
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["complete"], true);
        assert_eq!(json["completedSuccessfully"], false);
        assert_eq!(json["messages"][0]["msg"], "done");
        assert!(json.get("startedAt").is_none());
    }

    #[test]
    fn test_progress_decodes_without_timestamps() {
        let raw = r#"{"complete":false,"completedSuccessfully":false,"messages":[]}"#;
        let status: ProgressStatus = serde_json::from_str(raw).unwrap();

        assert!(!status.complete);
        assert!(status.started_at.is_none());
    }
}
