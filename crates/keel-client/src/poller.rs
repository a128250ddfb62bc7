//! HTTP polling bridge
//!
//! Subscribers attached to a broker after a run started never see the
//! earlier events. The bridge instead polls the run's progress endpoint and
//! republishes every message it has not forwarded yet to a local bus. Since
//! the message list only grows, the number already forwarded is enough to
//! find the new suffix.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use keel_api::ProgressStatus;
use keel_core::EventBus;

use crate::error::{ClientError, Result};
use crate::http::HttpClient;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ProgressBridge {
    client: HttpClient,
    bus: Arc<dyn EventBus>,
    retry_delay: Duration,
    poll_interval: Duration,
    seen: usize,
}

impl ProgressBridge {
    pub fn new(client: HttpClient, bus: Arc<dyn EventBus>) -> Self {
        Self {
            client,
            bus,
            retry_delay: DEFAULT_RETRY_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            seen: 0,
        }
    }

    #[must_use]
    pub fn with_intervals(mut self, retry_delay: Duration, poll_interval: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.poll_interval = poll_interval;
        self
    }

    /// Number of messages forwarded so far
    #[must_use]
    pub fn forwarded(&self) -> usize {
        self.seen
    }

    /// Fetch progress, retrying transient failures after a fixed delay
    async fn fetch(&self) -> Result<ProgressStatus> {
        loop {
            match self.client.progress().await {
                Ok(status) => return Ok(status),
                Err(e) if e.is_transient() => {
                    warn!(url = %self.client.base_url(), error = %e, "progress fetch failed, retrying");
                    sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn forward(&mut self, status: &ProgressStatus) {
        let total = status.messages.len();
        if total < self.seen {
            warn!(seen = self.seen, total, "progress messages shrank, resetting");
            self.seen = total;
            return;
        }
        for event in &status.messages[self.seen..] {
            if let Err(e) = self.bus.publish(event.clone()).await {
                warn!(error = %e, "failed to forward progress event");
            }
        }
        if total > self.seen {
            debug!(new = total - self.seen, total, "forwarded progress");
        }
        self.seen = total;
    }

    /// Poll until the remote run completes
    ///
    /// Once a fetch reports completion, exactly one more fetch drains any
    /// final messages.
    ///
    /// # Errors
    /// Returns [`ClientError::RunFailed`] if the run completed unsuccessfully,
    /// or a non-transient request error.
    pub async fn run(&mut self) -> Result<ProgressStatus> {
        loop {
            let status = self.fetch().await?;
            self.forward(&status).await;

            if status.complete {
                let last = self.fetch().await?;
                self.forward(&last).await;
                info!(success = last.completed_successfully, messages = self.seen, "remote run complete");

                if last.completed_successfully {
                    return Ok(last);
                }
                let reason = last
                    .messages
                    .last()
                    .map_or_else(|| "no messages".to_string(), |m| m.msg.clone());
                return Err(ClientError::RunFailed(reason));
            }

            sleep(self.poll_interval).await;
        }
    }
}
