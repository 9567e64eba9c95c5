// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-retry
#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

// ---------------------------------------------------------------------------
// HttpCallError
// ---------------------------------------------------------------------------

/// A failed remote call, carrying the HTTP status when one was observed.
///
/// The HTTP adapter maps every non-2xx response and transport failure into
/// this type so classification does not depend on the underlying client.
#[derive(Debug, Clone, thiserror::Error)]
pub struct HttpCallError {
    /// Remote status code, absent for transport-level failures.
    pub status: Option<u16>,
    /// Response body or transport error text.
    pub message: String,
}

impl std::fmt::Display for HttpCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "http {code}: {}", self.message),
            None => write!(f, "http transport error: {}", self.message),
        }
    }
}

impl HttpCallError {
    /// A failure with a remote status code.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            message: message.into(),
        }
    }

    /// A transport-level failure with no status code.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error-body parsing
// ---------------------------------------------------------------------------

/// Status and message extracted from a rendered error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpErrorInfo {
    /// Remote status code, when one could be recovered.
    pub status_code: Option<u16>,
    /// Remote message, when one could be recovered.
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct WireErrorBody {
    #[serde(rename = "statusCode")]
    status_code: Option<serde_json::Value>,
    message: Option<String>,
}

/// Extract `{statusCode, message}` from an error string.
///
/// Backends deliver error bodies as JSON-in-a-string
/// (`{"statusCode": 429, "message": "rate limited"}`), sometimes embedded in
/// surrounding text. Unparseable input yields an empty info.
#[must_use]
pub fn parse_http_error(raw: &str) -> HttpErrorInfo {
    let candidate = match serde_json::from_str::<WireErrorBody>(raw) {
        Ok(body) => Some(body),
        Err(_) => embedded_json(raw).and_then(|s| serde_json::from_str(s).ok()),
    };
    let Some(body) = candidate else {
        return HttpErrorInfo::default();
    };
    let status_code = body.status_code.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    HttpErrorInfo {
        status_code,
        message: body.message,
    }
}

/// The outermost `{...}` span inside `raw`, if any.
fn embedded_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

const TRANSIENT_MARKERS: [&str; 4] = ["econnreset", "etimedout", "socket hang up", "network"];

fn status_is_retryable(code: u16) -> bool {
    code == 429 || (500..600).contains(&code)
}

/// Whether an error is worth retrying.
///
/// Retryable: HTTP 429, any 5xx, or socket-level failures whose rendered
/// message names a connection reset, timeout, hang-up, or generic network
/// problem. Everything else fails fast.
#[must_use]
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(call) = err.downcast_ref::<HttpCallError>() {
        if let Some(code) = call.status {
            return status_is_retryable(code);
        }
    }

    let rendered = format!("{err:#}").to_lowercase();
    if let Some(code) = parse_http_error(&rendered).status_code {
        if status_is_retryable(code) {
            return true;
        }
    }
    TRANSIENT_MARKERS.iter().any(|m| rendered.contains(m))
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff with additive jitter and a bounded attempt count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling applied to the un-jittered delay.
    pub max_delay: Duration,
    /// Additive jitter fraction in `[0, 1]`; the wait gains a uniform amount
    /// in `[0, jitter · delay)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Override the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Override the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Override the delay ceiling.
    #[must_use]
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Disable jitter. Useful in tests that assert exact delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// The un-jittered delay before attempt `n + 1`, for 1-based attempt `n`:
    /// `min(max_delay, base · 2^(n−1))`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(1 << 16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// [`delay_for`](Self::delay_for) plus the jitter contribution.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = base.as_secs_f64() * self.jitter * rand::thread_rng().gen_range(0.0..1.0);
        base + Duration::from_secs_f64(extra)
    }
}

// ---------------------------------------------------------------------------
// with_retry
// ---------------------------------------------------------------------------

/// Run `op` under `policy`, retrying transient failures.
///
/// Successful attempts return immediately; non-retryable errors and the final
/// attempt's error are re-raised as-is. A warn line is logged before each
/// wait.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    with_retry_hook(policy, op, |attempt, delay, err| {
        warn!(
            target: "acp.retry",
            label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
    })
    .await
}

/// [`with_retry`] with a caller-supplied hook invoked before each wait.
pub async fn with_retry_hook<T, F, Fut, H>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: H,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    H: FnMut(u32, Duration, &anyhow::Error),
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = policy.jittered_delay(attempt);
                on_retry(attempt, delay, &err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
