//! Fire-and-forget analytics.
//!
//! [`TelemetrySink::emit`] never fails and is never awaited: delivery happens
//! on a background task and failures are only logged.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

/// Analytics event as accepted by `POST /api/analytics/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsEvent {
    /// Event name (`page_view`, `project_view`, `ml_emotion_test`, ...).
    pub event_type: String,
    /// Optional subject of the event (project id).
    pub target_id: Option<i64>,
}

impl AnalyticsEvent {
    /// Event without a target.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            target_id: None,
        }
    }

    /// Attach a target id.
    #[must_use]
    pub const fn with_target(mut self, target_id: i64) -> Self {
        self.target_id = Some(target_id);
        self
    }
}

/// Destination of analytics events.
pub trait TelemetrySink: Send + Sync {
    /// Record `event`. Must not block, fail or panic.
    fn emit(&self, event: AnalyticsEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit(&self, event: AnalyticsEvent) {
        debug!(event_type = %event.event_type, "Analytics disabled, event dropped");
    }
}

/// Sink posting events to the analytics endpoint on a background task.
#[derive(Clone, Debug)]
pub struct HttpTelemetrySink {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTelemetrySink {
    /// Create a sink posting to `endpoint`.
    #[must_use]
    pub const fn new(client: Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

impl TelemetrySink for HttpTelemetrySink {
    fn emit(&self, event: AnalyticsEvent) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(event_type = %event.event_type, "No runtime, analytics event dropped");
            return;
        };

        let request = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&event);

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(event_type = %event.event_type, "Analytics event tracked");
                }
                Ok(response) => {
                    warn!(
                        event_type = %event.event_type,
                        status = response.status().as_u16(),
                        "Analytics event not tracked"
                    );
                }
                Err(err) => {
                    warn!(event_type = %event.event_type, %err, "Analytics endpoint unreachable");
                }
            }
        });
    }
}

/// Emits each `(event_type, target_id)` pair at most once per tracker.
///
/// Mirrors per-tab session storage: a fresh tracker is a fresh tab.
pub struct PageViewTracker {
    sink: Arc<dyn TelemetrySink>,
    seen: Mutex<HashSet<String>>,
}

impl PageViewTracker {
    /// Create a tracker forwarding to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Dedupe key of an event.
    #[must_use]
    pub fn session_key(event_type: &str, target_id: Option<i64>) -> String {
        target_id.map_or_else(
            || format!("tracked_{event_type}_global"),
            |id| format!("tracked_{event_type}_{id}"),
        )
    }

    /// Emit the event unless it was already tracked. Returns whether it was emitted.
    #[must_use]
    pub fn track(&self, event_type: &str, target_id: Option<i64>) -> bool {
        let key = Self::session_key(event_type, target_id);
        let first_time = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if first_time {
            self.sink.emit(AnalyticsEvent {
                event_type: event_type.to_string(),
                target_id,
            });
        }
        first_time
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{AnalyticsEvent, TelemetrySink};
    use std::sync::{Mutex, PoisonError};

    /// Sink keeping every event in memory.
    #[derive(Default)]
    pub struct RecordingTelemetry {
        events: Mutex<Vec<AnalyticsEvent>>,
    }

    impl RecordingTelemetry {
        pub fn events(&self) -> Vec<AnalyticsEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl TelemetrySink for RecordingTelemetry {
        fn emit(&self, event: AnalyticsEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }
}
