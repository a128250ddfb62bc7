//! Condition polling with bounded timeout
//!
//! Both pollers wait one tick before the first fetch and check the deadline
//! before every fetch, so a timeout of `n` ticks allows at most `n - 1` fetches.
//! Fetch errors are logged and polling continues.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, info, warn};

use keel_api::StatusEvent;

use crate::error::CoreError;
use crate::events::EventBus;

/// Tick interval and overall deadline of one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub tick: Duration,
}

impl PollSettings {
    #[must_use]
    pub const fn new(timeout: Duration, tick: Duration) -> Self {
        Self { timeout, tick }
    }
}

/// Collect the string form of `key` from each entry of the document's
/// conditions list (`conditions` or `status.conditions`)
#[must_use]
pub fn condition_values(doc: &Value, key: &str) -> Vec<String> {
    let conditions = doc
        .get("conditions")
        .or_else(|| doc.get("status").and_then(|s| s.get("conditions")))
        .and_then(Value::as_array);

    conditions
        .into_iter()
        .flatten()
        .filter_map(|condition| match condition.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

async fn announce(events: &dyn EventBus, event: StatusEvent) {
    if let Err(e) = events.publish(event).await {
        warn!(error = %e, "failed to publish poll event");
    }
}

/// Poll `fetch` until a condition with `key == expected` appears
///
/// Each condition value is announced once as an info event the first time it
/// is seen on this call.
///
/// # Errors
/// Returns [`CoreError::Timeout`] naming `resource`, `key` and `expected` once
/// `settings.timeout` elapses without a match.
pub async fn wait_for_condition<F, Fut>(
    events: &dyn EventBus,
    resource: &str,
    key: &str,
    expected: &str,
    settings: PollSettings,
    mut fetch: F,
) -> Result<(), CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, CoreError>>,
{
    let timed_out = || CoreError::Timeout {
        resource: resource.to_string(),
        key: key.to_string(),
        expected: expected.to_string(),
        timeout: settings.timeout,
    };

    let deadline = sleep(settings.timeout);
    tokio::pin!(deadline);
    let mut ticker = interval_at(Instant::now() + settings.tick, settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            biased;
            () = &mut deadline => return Err(timed_out()),
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            () = &mut deadline => return Err(timed_out()),
            result = fetch() => result,
        };

        let doc = match fetched {
            Ok(doc) => doc,
            Err(e) => {
                warn!(resource, error = %e, "fetch failed, retrying");
                continue;
            }
        };

        for value in condition_values(&doc, key) {
            if seen.insert(value.clone()) {
                info!(resource, key, value = %value, "new condition observed");
                announce(events, StatusEvent::info(format!("{resource}: {key}={value}"))).await;
            }
            if value == expected {
                return Ok(());
            }
        }

        debug!(resource, key, expected, "waiting for resource");
    }
}

/// Re-issue a text command until `target` occurs at least `expected_count` times
///
/// # Errors
/// Returns [`CoreError::Timeout`] once `settings.timeout` elapses.
pub async fn retry_while_missing<F, Fut>(
    events: &dyn EventBus,
    resource: &str,
    target: &str,
    expected_count: usize,
    settings: PollSettings,
    mut issue: F,
) -> Result<(), CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, CoreError>>,
{
    let timed_out = || CoreError::Timeout {
        resource: resource.to_string(),
        key: format!("count({target})"),
        expected: expected_count.to_string(),
        timeout: settings.timeout,
    };

    let deadline = sleep(settings.timeout);
    tokio::pin!(deadline);
    let mut ticker = interval_at(Instant::now() + settings.tick, settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_count = None;

    loop {
        tokio::select! {
            biased;
            () = &mut deadline => return Err(timed_out()),
            _ = ticker.tick() => {}
        }

        let issued = tokio::select! {
            biased;
            () = &mut deadline => return Err(timed_out()),
            result = issue() => result,
        };

        let output = match issued {
            Ok(output) => output,
            Err(e) => {
                warn!(resource, error = %e, "read command failed, retrying");
                continue;
            }
        };

        let count = output.matches(target).count();
        if count >= expected_count {
            return Ok(());
        }
        if last_count != Some(count) {
            last_count = Some(count);
            announce(
                events,
                StatusEvent::debug(format!(
                    "waiting for {resource}: {count}/{expected_count} {target}"
                )),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::stage::tests::RecordingBus;

    const T: Duration = Duration::from_secs(30);

    fn doc(types: &[&str]) -> Value {
        let conditions: Vec<Value> = types.iter().map(|t| json!({ "type": t })).collect();
        json!({ "conditions": conditions })
    }

    #[test]
    fn test_condition_values_reads_status_conditions() {
        let doc = json!({ "status": { "conditions": [
            { "type": "Available", "status": "True" },
            { "type": "Progressing", "status": true }
        ]}});

        assert_eq!(condition_values(&doc, "type"), vec!["Available", "Progressing"]);
        assert_eq!(condition_values(&doc, "status"), vec!["True", "true"]);
        assert!(condition_values(&json!({}), "type").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_on_third_poll() {
        let bus = RecordingBus::default();
        let polls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let counter = polls.clone();
        let result = wait_for_condition(
            &bus,
            "clusters/local",
            "type",
            "Ready",
            PollSettings::new(T * 10, T),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Ok(if n < 3 {
                        doc(&["Provisioning"])
                    } else {
                        doc(&["Provisioning", "Ready"])
                    })
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), T * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_matching_times_out() {
        let bus = RecordingBus::default();
        let start = Instant::now();

        let result = wait_for_condition(
            &bus,
            "clusters/local",
            "type",
            "Ready",
            PollSettings::new(T * 2, T),
            || async { Ok(doc(&["Provisioning"])) },
        )
        .await;

        match result {
            Err(CoreError::Timeout {
                resource,
                key,
                expected,
                ..
            }) => {
                assert_eq!(resource, "clusters/local");
                assert_eq!(key, "type");
                assert_eq!(expected, "Ready");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(start.elapsed(), T * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_conditions_reported_once() {
        let bus = RecordingBus::default();
        let polls = Arc::new(AtomicUsize::new(0));

        let counter = polls.clone();
        wait_for_condition(
            &bus,
            "machine",
            "type",
            "Ready",
            PollSettings::new(T * 10, T),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(match n {
                        0 | 1 => doc(&["Pending"]),
                        2 | 3 => doc(&["Pending", "Provisioning"]),
                        _ => doc(&["Pending", "Provisioning", "Ready"]),
                    })
                }
            },
        )
        .await
        .unwrap();

        let messages: Vec<String> = bus
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.msg.clone())
            .collect();
        assert_eq!(
            messages,
            vec![
                "machine: type=Pending",
                "machine: type=Provisioning",
                "machine: type=Ready"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_are_not_fatal() {
        let bus = RecordingBus::default();
        let polls = Arc::new(AtomicUsize::new(0));

        let counter = polls.clone();
        let result = wait_for_condition(
            &bus,
            "clusters/local",
            "type",
            "Ready",
            PollSettings::new(T * 10, T),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CoreError::Http("connection refused".into()))
                    } else {
                        Ok(doc(&["Ready"]))
                    }
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_while_missing_counts_occurrences() {
        let bus = RecordingBus::default();
        let polls = Arc::new(AtomicUsize::new(0));

        let counter = polls.clone();
        let result = retry_while_missing(
            &bus,
            "machines",
            "Running",
            3,
            PollSettings::new(T * 10, T),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(match n {
                        0 => "Provisioning Provisioning Provisioning".to_string(),
                        1 => "Running Provisioning Running".to_string(),
                        _ => "Running Running Running".to_string(),
                    })
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_while_missing_timeout() {
        let bus = RecordingBus::default();

        let result = retry_while_missing(
            &bus,
            "nodes",
            "True",
            3,
            PollSettings::new(T * 2, T),
            || async { Ok("True\nFalse\n".to_string()) },
        )
        .await;

        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }
}
