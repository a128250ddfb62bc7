//! Broker binding of the event bus
//!
//! Events travel as JSON on one subject per cluster, so the engine process
//! and a remote CLI can rendezvous without a direct connection. Late
//! subscribers only see events published after they subscribe.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};

use keel_api::StatusEvent;

use crate::error::CoreError;
use crate::events::{EventBus, EventHandler, Subscription};

/// Subject carrying the events of one cluster
///
/// Characters with meaning in subject syntax are replaced with `_`.
#[must_use]
pub fn subject_for(cluster: &str) -> String {
    let token: String = cluster
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect();
    format!("keel.{token}.events")
}

/// NATS-backed event bus
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    subject: String,
}

impl NatsBus {
    /// Connect to a NATS server and bind to the cluster's subject
    ///
    /// # Errors
    /// Returns [`CoreError::Bus`] if the connection cannot be established.
    pub async fn connect(url: &str, cluster: &str) -> Result<Self, CoreError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| CoreError::Bus(format!("connecting to {url}: {e}")))?;
        let subject = subject_for(cluster);

        info!(url, subject = %subject, "connected to event broker");
        Ok(Self { client, subject })
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait until buffered publishes reach the server
    ///
    /// # Errors
    /// Returns [`CoreError::Bus`] if the flush fails.
    pub async fn flush(&self) -> Result<(), CoreError> {
        self.client
            .flush()
            .await
            .map_err(|e| CoreError::Bus(e.to_string()))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, event: StatusEvent) -> Result<(), CoreError> {
        let payload = serde_json::to_vec(&event)?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| CoreError::Bus(e.to_string()))
    }

    async fn subscribe(&self, handler: EventHandler) -> Result<Subscription, CoreError> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| CoreError::Bus(e.to_string()))?;

        let events = subscriber.filter_map(|message| async move {
            match serde_json::from_slice::<StatusEvent>(&message.payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable broker payload");
                    None
                }
            }
        });
        Ok(Subscription::spawn(events, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_is_cluster_scoped() {
        assert_eq!(subject_for("mgmt"), "keel.mgmt.events");
        assert_eq!(subject_for("prod.mgmt"), "keel.prod_mgmt.events");
    }
}
