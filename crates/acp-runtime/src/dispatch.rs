// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-entry job dispatch and the stage executor.
//!
//! Every ingested payload — socket push or poll pull — goes through
//! [`SellerEngine::handle_job`]. The handler is total: malformed payloads
//! produce a warning and return. Stage side effects are guarded three ways:
//! the in-flight set (no concurrent stages per job), the ledger (no repeats
//! within a process lifetime), and backend observations (TRANSACTION memos
//! and populated deliverables short-circuit re-synced jobs after a restart).
//!
//! Requirement payloads and memo contents may carry buyer secrets and are
//! never placed in log fields.

use acp_client::AcpClient;
use acp_core::{Deliverable, JobContext, PayableDetail, Phase, payload};
use acp_delivery::{ensure_job_dir, write_job_snapshot};
use acp_offering::OfferingRegistry;
use acp_retry::{RetryPolicy, with_retry};
use anyhow::Context;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ledger::StageLedger;

/// Which channel produced a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    /// Push socket (`onNewTask` / `onEvaluate`).
    Socket,
    /// Poll reconciler.
    Poll,
}

impl JobSource {
    /// Short label used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Poll => "poll",
        }
    }
}

/// The stage executor: one instance per process, shared by both event
/// producers.
pub struct SellerEngine {
    client: AcpClient,
    registry: Arc<OfferingRegistry>,
    ledger: StageLedger,
    wallet_lc: String,
    retry: RetryPolicy,
    delivery_root: PathBuf,
}

impl SellerEngine {
    /// Create an engine for the given wallet. The wallet comparison is
    /// case-insensitive, so the address is normalized once here.
    #[must_use]
    pub fn new(
        client: AcpClient,
        registry: Arc<OfferingRegistry>,
        wallet_address: &str,
        delivery_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            registry,
            ledger: StageLedger::new(),
            wallet_lc: payload::normalize_address(wallet_address).unwrap_or_default(),
            retry: RetryPolicy::default(),
            delivery_root: delivery_root.into(),
        }
    }

    /// Override the stage-level retry policy. Primarily for tests.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The normalized wallet address this engine sells for.
    #[must_use]
    pub fn wallet(&self) -> &str {
        &self.wallet_lc
    }

    /// The process-wide stage ledger.
    #[must_use]
    pub fn ledger(&self) -> &StageLedger {
        &self.ledger
    }

    /// Handle one raw job payload from either event source.
    pub async fn handle_job(&self, raw: &Value, source: JobSource) {
        let Some(job_id) = payload::job_id(raw) else {
            warn!(target: "acp.dispatch", source = source.as_str(), "job event without id, dropping");
            return;
        };

        if let Some(provider) = payload::provider_address(raw) {
            if provider != self.wallet_lc {
                return;
            }
        }

        let phase_value = raw.get("phase").cloned().unwrap_or(Value::Null);
        let Some(phase) = Phase::normalize(&phase_value) else {
            warn!(
                target: "acp.dispatch",
                job_id,
                phase = %Phase::label(&phase_value),
                source = source.as_str(),
                "unknown phase, dropping"
            );
            return;
        };

        if !self.ledger.begin(job_id) {
            debug!(target: "acp.dispatch", job_id, "job already in flight, dropping event");
            return;
        }

        info!(
            target: "acp.dispatch",
            job_id,
            phase = %phase,
            source = source.as_str(),
            "job event"
        );

        let outcome = match phase {
            Phase::Request | Phase::Negotiation => self.accept_stage(job_id, raw).await,
            Phase::Transaction | Phase::Evaluation => self.deliver_stage(job_id, raw).await,
            Phase::Completed | Phase::Rejected | Phase::Expired => Ok(()),
        };
        if let Err(err) = outcome {
            error!(
                target: "acp.dispatch",
                job_id,
                phase = %phase,
                error = %format_args!("{err:#}"),
                "stage failed"
            );
        }

        self.ledger.finish(job_id);
    }

    // -- Accept stage -------------------------------------------------------

    /// Accept the job and issue its payment request, at most once.
    async fn accept_stage(&self, job_id: u64, raw: &Value) -> anyhow::Result<()> {
        // A TRANSACTION-bound memo means a payment request is already on
        // record, whether issued by this process or a previous one.
        if payload::has_memo_with_next_phase(raw, Phase::Transaction) {
            debug!(target: "acp.stage", job_id, "payment request already on record");
            self.ledger.mark_accepted(job_id);
            return Ok(());
        }
        if self.ledger.is_accepted(job_id) {
            return Ok(());
        }

        let Some(offering_name) = payload::resolve_offering_name(raw) else {
            self.reject(job_id, "Invalid offering name (could not resolve)").await?;
            self.ledger.mark_accepted(job_id);
            return Ok(());
        };

        let requirements = payload::resolve_service_requirements(raw);

        let loaded = match self.registry.load(&offering_name) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(
                    target: "acp.stage",
                    job_id,
                    offering = %offering_name,
                    error = %err,
                    "offering load failed, rejecting"
                );
                self.reject(job_id, &format!("Offering not configured locally: {offering_name}"))
                    .await?;
                self.ledger.mark_accepted(job_id);
                return Ok(());
            }
        };

        let ctx = match self.build_context(job_id, &offering_name, raw) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(
                    target: "acp.stage",
                    job_id,
                    error = %format_args!("{err:#}"),
                    "could not prepare job directory"
                );
                return Ok(());
            }
        };

        let validation = loaded
            .handlers
            .validate_requirements(&requirements, &ctx)
            .await
            .context("validate_requirements handler failed")?;
        if !validation.is_valid() {
            let reason = validation.reason().unwrap_or("Validation failed").to_string();
            self.reject(job_id, &reason).await?;
            self.ledger.mark_accepted(job_id);
            return Ok(());
        }

        self.accept(job_id).await?;

        let funds = if loaded.config.required_funds {
            loaded
                .handlers
                .request_additional_funds(&requirements, &ctx)
                .await
                .context("request_additional_funds handler failed")?
        } else {
            None
        };
        let content = match loaded
            .handlers
            .request_payment(&requirements, &ctx)
            .await
            .context("request_payment handler failed")?
        {
            Some(content) => content,
            None => funds
                .as_ref()
                .and_then(|f| f.content.clone())
                .unwrap_or_else(|| "Request accepted".to_string()),
        };
        let payable = funds.as_ref().map(|f| f.payable());
        self.request_payment(job_id, content, payable).await?;

        self.ledger.mark_accepted(job_id);
        Ok(())
    }

    // -- Deliver stage ------------------------------------------------------

    /// Execute the offering and submit its deliverable, at most once.
    async fn deliver_stage(&self, job_id: u64, raw: &Value) -> anyhow::Result<()> {
        if payload::deliverable_present(raw) {
            debug!(target: "acp.stage", job_id, "deliverable already present");
            self.ledger.mark_delivered(job_id);
            return Ok(());
        }
        if self.ledger.is_delivered(job_id) {
            return Ok(());
        }

        let Some(offering_name) = payload::resolve_offering_name(raw) else {
            warn!(target: "acp.stage", job_id, "cannot resolve offering for delivery");
            return Ok(());
        };
        let loaded = match self.registry.load(&offering_name) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(
                    target: "acp.stage",
                    job_id,
                    offering = %offering_name,
                    error = %err,
                    "offering load failed at delivery"
                );
                return Ok(());
            }
        };

        let requirements = payload::resolve_service_requirements(raw);
        let ctx = match self.build_context(job_id, &offering_name, raw) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(
                    target: "acp.stage",
                    job_id,
                    error = %format_args!("{err:#}"),
                    "could not prepare job directory"
                );
                return Ok(());
            }
        };

        // The one place arbitrary offering code runs. Never retried:
        // handlers may have non-idempotent external side effects. On failure
        // the job stays in its backend phase and will be re-observed by the
        // poll loop.
        let result = loaded
            .handlers
            .execute_job(&requirements, &ctx)
            .await
            .with_context(|| format!("execute_job failed for offering '{offering_name}'"))?;

        self.deliver(job_id, result.deliverable, result.payable_detail).await?;
        self.ledger.mark_delivered(job_id);
        Ok(())
    }

    // -- Retried backend calls ---------------------------------------------

    fn build_context(
        &self,
        job_id: u64,
        offering_name: &str,
        raw: &Value,
    ) -> anyhow::Result<JobContext> {
        let dirs = ensure_job_dir(&self.delivery_root, job_id)?;
        write_job_snapshot(&dirs.job_dir, raw)?;
        Ok(JobContext {
            job_id,
            offering_name: offering_name.to_string(),
            delivery_root: dirs.delivery_root,
            job_dir: dirs.job_dir,
            job: raw.clone(),
        })
    }

    async fn accept(&self, job_id: u64) -> anyhow::Result<()> {
        let client = self.client.clone();
        with_retry(&self.retry, "accept", move || {
            let client = client.clone();
            async move { client.accept_or_reject(job_id, true, Some("Job accepted")).await }
        })
        .await
    }

    async fn reject(&self, job_id: u64, reason: &str) -> anyhow::Result<()> {
        info!(target: "acp.stage", job_id, reason, "rejecting job");
        let client = self.client.clone();
        let reason = reason.to_string();
        with_retry(&self.retry, "reject", move || {
            let client = client.clone();
            let reason = reason.clone();
            async move { client.accept_or_reject(job_id, false, Some(&reason)).await }
        })
        .await
    }

    async fn request_payment(
        &self,
        job_id: u64,
        content: String,
        payable: Option<PayableDetail>,
    ) -> anyhow::Result<()> {
        let client = self.client.clone();
        with_retry(&self.retry, "request_payment", move || {
            let client = client.clone();
            let content = content.clone();
            let payable = payable.clone();
            async move { client.request_payment(job_id, &content, payable.as_ref()).await }
        })
        .await
    }

    async fn deliver(
        &self,
        job_id: u64,
        deliverable: Deliverable,
        payable: Option<PayableDetail>,
    ) -> anyhow::Result<()> {
        let client = self.client.clone();
        with_retry(&self.retry, "deliver", move || {
            let client = client.clone();
            let deliverable = deliverable.clone();
            let payable = payable.clone();
            async move { client.deliver_job(job_id, &deliverable, payable.as_ref()).await }
        })
        .await
    }
}
