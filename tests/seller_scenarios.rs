// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end seller scenarios: one engine, a mocked backend, real offerings,
//! and the on-disk artifact contract.

use acp_client::AcpClient;
use acp_core::{ExecuteJobResult, FundsRequest, JobContext};
use acp_delivery::JOB_SNAPSHOT_FILE;
use acp_offering::{OfferingConfig, OfferingHandlers, OfferingRegistry};
use acp_retry::RetryPolicy;
use acp_runtime::{JobSource, SellerEngine};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WALLET: &str = "0xsellerwallet";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .without_jitter()
}

fn engine_with(
    server: &MockServer,
    delivery_root: &std::path::Path,
    config: Value,
    handlers: impl OfferingHandlers + 'static,
) -> Arc<SellerEngine> {
    let mut registry = OfferingRegistry::new(delivery_root.join("offerings"));
    let config: OfferingConfig = serde_json::from_value(config).unwrap();
    registry.register_builtin(config, handlers);

    let client = AcpClient::new(server.uri(), "key").with_retry_policy(fast_retry());
    Arc::new(
        SellerEngine::new(client, Arc::new(registry), WALLET, delivery_root.join("out"))
            .with_retry_policy(fast_retry()),
    )
}

struct ReportHandlers;

#[async_trait]
impl OfferingHandlers for ReportHandlers {
    async fn execute_job(
        &self,
        requirements: &Map<String, Value>,
        _ctx: &JobContext,
    ) -> anyhow::Result<ExecuteJobResult> {
        let subject = requirements
            .get("apiDescription")
            .and_then(Value::as_str)
            .unwrap_or("unspecified");
        Ok(ExecuteJobResult::text(format!("Implemented: {subject}")))
    }
}

struct EscrowHandlers;

#[async_trait]
impl OfferingHandlers for EscrowHandlers {
    async fn execute_job(
        &self,
        _requirements: &Map<String, Value>,
        _ctx: &JobContext,
    ) -> anyhow::Result<ExecuteJobResult> {
        Ok(ExecuteJobResult::text("escrowed work"))
    }

    async fn request_additional_funds(
        &self,
        _requirements: &Map<String, Value>,
        _ctx: &JobContext,
    ) -> anyhow::Result<Option<FundsRequest>> {
        Ok(Some(FundsRequest {
            amount: 5.0,
            token_address: "0xtoken".into(),
            recipient: "0xvault".into(),
            content: Some("Escrow 5 tokens to start".into()),
        }))
    }
}

#[tokio::test]
async fn full_lifecycle_accept_then_deliver() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(
        &server,
        tmp.path(),
        json!({"name": "typescript_api_development"}),
        ReportHandlers,
    );

    Mock::given(method("POST"))
        .and(path("/acp/providers/jobs/123/accept"))
        .and(body_json(json!({"accept": true, "reason": "Job accepted"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/acp/providers/jobs/123/requirement"))
        .and(body_json(json!({"content": "Request accepted"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/acp/providers/jobs/123/deliverable"))
        .and(body_json(json!({"deliverable": "Implemented: Build /health"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let memo_content =
        "{\"name\":\"typescript_api_development\",\"requirement\":{\"apiDescription\":\"Build /health\"}}";
    let negotiation = json!({
        "id": 123,
        "phase": "NEGOTIATION",
        "providerAddress": WALLET,
        "memos": [{"id": 999, "nextPhase": "NEGOTIATION", "content": memo_content}],
    });
    engine.handle_job(&negotiation, JobSource::Socket).await;
    assert!(engine.ledger().is_accepted(123));

    // The backend moves the job to TRANSACTION once the buyer pays; the
    // payment-request memo now rides along.
    let transaction = json!({
        "id": 123,
        "phase": "TRANSACTION",
        "providerAddress": WALLET,
        "deliverable": null,
        "memos": [
            {"id": 999, "nextPhase": "NEGOTIATION", "content": memo_content},
            {"id": 1000, "nextPhase": "TRANSACTION", "content": "{}"},
        ],
    });
    engine.handle_job(&transaction, JobSource::Poll).await;
    assert!(engine.ledger().is_delivered(123));

    // The job directory carries the raw snapshot.
    let snapshot = tmp.path().join("out/123").join(JOB_SNAPSHOT_FILE);
    assert!(snapshot.is_file());
    let snapshot: Value = serde_json::from_str(&std::fs::read_to_string(snapshot).unwrap()).unwrap();
    assert_eq!(snapshot["id"], 123);

    // A late duplicate of either event is a no-op.
    engine.handle_job(&negotiation, JobSource::Poll).await;
    engine.handle_job(&transaction, JobSource::Socket).await;
}

#[tokio::test]
async fn required_funds_flow_attaches_payable_detail() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(
        &server,
        tmp.path(),
        json!({"name": "escrowed_service", "requiredFunds": true}),
        EscrowHandlers,
    );

    Mock::given(method("POST"))
        .and(path("/acp/providers/jobs/9/accept"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/acp/providers/jobs/9/requirement"))
        .and(body_json(json!({
            "content": "Escrow 5 tokens to start",
            "payableDetail": {
                "amount": 5.0,
                "tokenAddress": "0xtoken",
                "recipient": "0xvault",
            },
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let job = json!({
        "id": 9,
        "phase": "REQUEST",
        "providerAddress": WALLET,
        "context": {"jobOfferingName": "escrowed_service"},
    });
    engine.handle_job(&job, JobSource::Socket).await;
    assert!(engine.ledger().is_accepted(9));
}

#[tokio::test]
async fn requirements_resolve_identically_from_context_and_memo() {
    // The same buyer intent, expressed the two common ways, must produce the
    // same deliverable.
    for (label, job) in [
        (
            "context",
            json!({
                "id": 31,
                "phase": "TRANSACTION",
                "providerAddress": WALLET,
                "deliverable": null,
                "context": {
                    "jobOfferingName": "typescript_api_development",
                    "requirement": {"apiDescription": "Build /health"},
                },
                "memos": [{"id": 1, "nextPhase": "TRANSACTION", "content": "{}"}],
            }),
        ),
        (
            "memo",
            json!({
                "id": 31,
                "phase": "TRANSACTION",
                "providerAddress": WALLET,
                "deliverable": null,
                "memos": [
                    {
                        "id": 1,
                        "nextPhase": "NEGOTIATION",
                        "content": "{\"name\":\"typescript_api_development\",\"requirement\":{\"apiDescription\":\"Build /health\"}}",
                    },
                    {"id": 2, "nextPhase": "TRANSACTION", "content": "{}"},
                ],
            }),
        ),
    ] {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with(
            &server,
            tmp.path(),
            json!({"name": "typescript_api_development"}),
            ReportHandlers,
        );

        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/31/deliverable"))
            .and(body_json(json!({"deliverable": "Implemented: Build /health"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        engine.handle_job(&job, JobSource::Poll).await;
        assert!(engine.ledger().is_delivered(31), "variant: {label}");
    }
}
