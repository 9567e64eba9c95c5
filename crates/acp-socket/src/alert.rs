// SPDX-License-Identifier: MIT OR Apache-2.0
//! Best-effort operational alerting.
//!
//! Alert delivery must never take the listener down: every failure here is
//! logged and swallowed.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Default PagerDuty Events API v2 endpoint.
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// An external alert sink with trigger/resolve semantics.
///
/// `dedup_key` identifies the incident; a trigger and its resolve carry the
/// same key.
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Open (or re-notify) an incident.
    async fn trigger(&self, summary: &str, dedup_key: &str);

    /// Close an incident previously opened with the same key.
    async fn resolve(&self, dedup_key: &str);
}

/// Alerter used when no routing key is configured: logs and does nothing.
pub struct NoopAlerter;

#[async_trait]
impl Alerter for NoopAlerter {
    async fn trigger(&self, summary: &str, dedup_key: &str) {
        info!(
            target: "acp.alert",
            dedup_key,
            summary,
            "alerting disabled, incident not delivered"
        );
    }

    async fn resolve(&self, _dedup_key: &str) {}
}

/// PagerDuty Events API v2 alerter.
pub struct PagerDutyAlerter {
    http: reqwest::Client,
    routing_key: String,
    endpoint: String,
}

impl PagerDutyAlerter {
    /// Create an alerter posting to the public PagerDuty endpoint.
    #[must_use]
    pub fn new(routing_key: impl Into<String>) -> Self {
        Self::with_endpoint(routing_key, PAGERDUTY_EVENTS_URL)
    }

    /// Create an alerter posting to a custom endpoint. Primarily for tests.
    #[must_use]
    pub fn with_endpoint(routing_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            routing_key: routing_key.into(),
            endpoint: endpoint.into(),
        }
    }

    async fn send(&self, action: &str, dedup_key: &str, summary: Option<&str>) {
        let mut body = json!({
            "routing_key": self.routing_key,
            "event_action": action,
            "dedup_key": dedup_key,
        });
        if let Some(summary) = summary {
            body["payload"] = json!({
                "summary": summary,
                "severity": "critical",
                "source": "acp-seller",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
        }

        match self.http.post(&self.endpoint).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(target: "acp.alert", action, dedup_key, "alert delivered");
            }
            Ok(response) => {
                warn!(
                    target: "acp.alert",
                    action,
                    dedup_key,
                    status = response.status().as_u16(),
                    "alert endpoint rejected event"
                );
            }
            Err(err) => {
                warn!(
                    target: "acp.alert",
                    action,
                    dedup_key,
                    error = %err,
                    "alert delivery failed"
                );
            }
        }
    }
}

#[async_trait]
impl Alerter for PagerDutyAlerter {
    async fn trigger(&self, summary: &str, dedup_key: &str) {
        self.send("trigger", dedup_key, Some(summary)).await;
    }

    async fn resolve(&self, dedup_key: &str) {
        self.send("resolve", dedup_key, None).await;
    }
}

/// Build the configured alerter: PagerDuty when a routing key is present,
/// no-op otherwise.
#[must_use]
pub fn alerter_from_key(routing_key: Option<String>) -> Arc<dyn Alerter> {
    match routing_key {
        Some(key) if !key.trim().is_empty() => Arc::new(PagerDutyAlerter::new(key)),
        _ => Arc::new(NoopAlerter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn trigger_posts_events_api_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .and(body_partial_json(serde_json::json!({
                "routing_key": "rk-123",
                "event_action": "trigger",
                "dedup_key": "incident-1",
                "payload": {"severity": "critical", "source": "acp-seller"},
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let alerter =
            PagerDutyAlerter::with_endpoint("rk-123", format!("{}/v2/enqueue", server.uri()));
        alerter.trigger("socket down", "incident-1").await;
    }

    #[tokio::test]
    async fn resolve_omits_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .and(body_partial_json(serde_json::json!({
                "event_action": "resolve",
                "dedup_key": "incident-1",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let alerter =
            PagerDutyAlerter::with_endpoint("rk-123", format!("{}/v2/enqueue", server.uri()));
        alerter.resolve("incident-1").await;
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        // Nothing listening on the endpoint; the call must still return.
        let alerter = PagerDutyAlerter::with_endpoint("rk", "http://127.0.0.1:1/enqueue");
        alerter.trigger("down", "incident").await;
        alerter.resolve("incident").await;
    }

    #[tokio::test]
    async fn alerter_from_key_selects_noop_for_empty() {
        let _ = alerter_from_key(None);
        let _ = alerter_from_key(Some("  ".into()));
        let _ = alerter_from_key(Some("rk".into()));
        NoopAlerter.trigger("s", "k").await;
        NoopAlerter.resolve("k").await;
    }
}
