//! Webhook delivery of budget events.
//!
//! Events are POSTed as JSON:
//!
//! ```json
//! {"event_type": "soft_limit", "session_id": "sess_...", "data": { ...report... }}
//! ```
//!
//! Event types are `soft_limit`, `hard_limit` and `loop_detected`. Delivery
//! failures are logged and reported as `false`, never raised.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::Result;
use crate::report::SessionReport;
use crate::session::ReportCallback;

pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: f64 = 5.0;

/// Destination for budget event notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one event. Returns `true` on success.
    async fn emit(&self, event_type: &str, report: &SessionReport) -> bool;

    async fn on_soft_limit(&self, report: &SessionReport) -> bool {
        self.emit("soft_limit", report).await
    }

    async fn on_hard_limit(&self, report: &SessionReport) -> bool {
        self.emit("hard_limit", report).await
    }

    async fn on_loop_detected(&self, report: &SessionReport) -> bool {
        self.emit("loop_detected", report).await
    }
}

/// Posts budget events to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookEmitter {
    url: String,
    client: Client,
}

impl WebhookEmitter {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs_f64(DEFAULT_WEBHOOK_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        // Callbacks may deliver from short-lived runtimes; pooled connections
        // would outlive the runtime that drives them.
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Turns this emitter into a session callback for `event_type`.
    ///
    /// Delivery never blocks the session. Inside a tokio runtime it is
    /// spawned on that runtime; otherwise it runs on a detached thread with
    /// its own current-thread runtime.
    pub fn callback(self: &Arc<Self>, event_type: &'static str) -> ReportCallback {
        let emitter = Arc::clone(self);
        Arc::new(move |report: &SessionReport| {
            let emitter = Arc::clone(&emitter);
            let report = report.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        emitter.emit(event_type, &report).await;
                    });
                }
                Err(_) => deliver_detached(emitter, event_type, report),
            }
        })
    }
}

fn deliver_detached(emitter: Arc<WebhookEmitter>, event_type: &'static str, report: SessionReport) {
    let session_id = report.session_id.clone();
    let spawned = std::thread::Builder::new()
        .name("agentbudget-webhook".to_string())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => {
                    rt.block_on(emitter.emit(event_type, &report));
                }
                Err(e) => {
                    warn!(
                        event_type,
                        session_id = %report.session_id,
                        error = %e,
                        "Failed to start webhook runtime"
                    );
                }
            }
        });
    if let Err(e) = spawned {
        warn!(event_type, session_id = %session_id, error = %e, "Failed to spawn webhook thread");
    }
}

#[async_trait]
impl NotificationSink for WebhookEmitter {
    async fn emit(&self, event_type: &str, report: &SessionReport) -> bool {
        let payload = json!({
            "event_type": event_type,
            "session_id": report.session_id,
            "data": report,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(event_type, url = %self.url, "Webhook delivered");
                true
            }
            Ok(resp) => {
                warn!(
                    event_type,
                    url = %self.url,
                    status = %resp.status(),
                    "Webhook rejected"
                );
                false
            }
            Err(e) => {
                warn!(event_type, url = %self.url, error = %e, "Webhook delivery failed");
                false
            }
        }
    }
}
