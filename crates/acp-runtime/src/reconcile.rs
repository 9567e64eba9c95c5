// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull-based catch-up loop over the backend's active jobs.
//!
//! The socket is the fast path; this loop is the safety net that re-observes
//! anything the socket missed (dropped frames, outages, restarts). Both feed
//! the same dispatcher, which makes duplicate observations harmless.

use acp_client::AcpClient;
use acp_core::payload;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dispatch::{JobSource, SellerEngine};

/// Growth factor applied to the interval on each consecutive failure.
const FAILURE_BACKOFF_FACTOR: f64 = 1.8;
/// Interval ceiling while the backend is failing.
const MAX_FAILURE_INTERVAL: Duration = Duration::from_secs(120);

/// The poll reconciler: periodically pulls active jobs and feeds them to the
/// dispatcher.
pub struct PollReconciler {
    client: AcpClient,
    engine: Arc<SellerEngine>,
    interval: Duration,
    page_size: u32,
}

impl PollReconciler {
    /// Create a reconciler polling every `interval` with the given page size.
    #[must_use]
    pub fn new(
        client: AcpClient,
        engine: Arc<SellerEngine>,
        interval: Duration,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            engine,
            interval,
            page_size,
        }
    }

    /// Run until the `shutdown` future completes. The first poll happens
    /// immediately as a startup catch-up.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut current = self.interval;
        info!(
            target: "acp.reconcile",
            interval_ms = self.interval.as_millis() as u64,
            page_size = self.page_size,
            "poll reconciler starting"
        );
        loop {
            match self.poll_once().await {
                Ok(matched) => {
                    debug!(target: "acp.reconcile", matched, "poll pass complete");
                    current = self.interval;
                }
                Err(err) => {
                    current = grow_interval(current);
                    warn!(
                        target: "acp.reconcile",
                        error = %format_args!("{err:#}"),
                        next_ms = current.as_millis() as u64,
                        "poll failed, backing off"
                    );
                }
            }
            tokio::select! {
                () = &mut shutdown => {
                    info!(target: "acp.reconcile", "poll reconciler stopping");
                    return;
                }
                () = sleep(current) => {}
            }
        }
    }

    /// One full paginated sweep. Returns how many jobs matched our wallet.
    async fn poll_once(&self) -> anyhow::Result<usize> {
        let mut page = 1u32;
        let mut matched = 0usize;
        loop {
            let jobs = self.client.active_jobs(page, self.page_size).await?;
            let count = jobs.len();
            for job in &jobs {
                if self.is_ours(job) {
                    self.engine.handle_job(job, JobSource::Poll).await;
                    matched += 1;
                }
            }
            if count < self.page_size as usize {
                return Ok(matched);
            }
            page += 1;
        }
    }

    fn is_ours(&self, job: &Value) -> bool {
        payload::provider_address(job).as_deref() == Some(self.engine.wallet())
    }
}

/// Next interval after a failure: multiply, then clamp.
fn grow_interval(current: Duration) -> Duration {
    current.mul_f64(FAILURE_BACKOFF_FACTOR).min(MAX_FAILURE_INTERVAL)
}
