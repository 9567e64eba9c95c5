// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-client
#![deny(unsafe_code)]
#![warn(missing_docs)]

use acp_core::{Deliverable, PayableDetail};
use acp_retry::{HttpCallError, RetryPolicy, with_retry};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

/// Header carrying the static backend API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Per-request transport timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts used by the client-level retry layer.
const CLIENT_RETRY_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// AcpClient
// ---------------------------------------------------------------------------

/// HTTP adapter for the backend's seller surface.
#[derive(Debug, Clone)]
pub struct AcpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

/// Wallet identity returned by the agent-info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// The agent's wallet address as the backend knows it.
    pub wallet_address: String,
}

impl AcpClient {
    /// Create a client against `base_url` authenticating with `api_key`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry: RetryPolicy::default().with_attempts(CLIENT_RETRY_ATTEMPTS),
        }
    }

    /// Override the client-level retry policy. Primarily for tests.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `POST /acp/providers/jobs/{id}/accept` — accept or reject a job.
    pub async fn accept_or_reject(
        &self,
        job_id: u64,
        accept: bool,
        reason: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "accept": accept });
        if let Some(reason) = reason {
            body["reason"] = json!(reason);
        }
        let path = format!("/acp/providers/jobs/{job_id}/accept");
        self.post(&path, &body, "accept").await?;
        info!(
            target: "acp.client",
            job_id,
            endpoint = "accept",
            accepted = accept,
            "seller api call"
        );
        Ok(())
    }

    /// `POST /acp/providers/jobs/{id}/requirement` — issue the payment
    /// request. `content` is never logged.
    pub async fn request_payment(
        &self,
        job_id: u64,
        content: &str,
        payable: Option<&PayableDetail>,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "content": content });
        if let Some(payable) = payable {
            body["payableDetail"] = serde_json::to_value(payable)?;
        }
        let path = format!("/acp/providers/jobs/{job_id}/requirement");
        self.post(&path, &body, "requirement").await?;
        info!(
            target: "acp.client",
            job_id,
            endpoint = "requirement",
            has_payable = payable.is_some(),
            "seller api call"
        );
        Ok(())
    }

    /// `POST /acp/providers/jobs/{id}/deliverable` — submit the deliverable.
    /// Deliverable content is never logged.
    pub async fn deliver_job(
        &self,
        job_id: u64,
        deliverable: &Deliverable,
        payable: Option<&PayableDetail>,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "deliverable": serde_json::to_value(deliverable)? });
        if let Some(payable) = payable {
            body["payableDetail"] = serde_json::to_value(payable)?;
        }
        let path = format!("/acp/providers/jobs/{job_id}/deliverable");
        self.post(&path, &body, "deliverable").await?;
        info!(
            target: "acp.client",
            job_id,
            endpoint = "deliverable",
            has_payable = payable.is_some(),
            "seller api call"
        );
        Ok(())
    }

    /// `GET /acp/jobs/active` — one page of active jobs. The backend has
    /// shipped both `{data: [...]}` and a bare array; both shapes parse.
    pub async fn active_jobs(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<Value>> {
        let path = format!("/acp/jobs/active?page={page}&pageSize={page_size}");
        let value = self.get(&path, "active_jobs").await?;
        let jobs = match value {
            Value::Array(jobs) => jobs,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(jobs)) => jobs,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        info!(
            target: "acp.client",
            page,
            count = jobs.len(),
            endpoint = "active_jobs",
            "seller api call"
        );
        Ok(jobs)
    }

    /// `GET /acp/agents/info` — resolve the agent's wallet address.
    pub async fn agent_info(&self) -> anyhow::Result<AgentInfo> {
        let value = self.get("/acp/agents/info", "agent_info").await?;
        let body = match value.get("data") {
            Some(data) if data.is_object() => data.clone(),
            _ => value,
        };
        let info: AgentInfo = serde_json::from_value(body)?;
        Ok(info)
    }

    async fn post(&self, path: &str, body: &Value, label: &str) -> anyhow::Result<Value> {
        let url = format!("{}{path}", self.base_url);
        // The builder is rebuilt per attempt; reqwest builders are consumed
        // by send().
        with_retry(&self.retry, label, || {
            let request = self
                .http
                .post(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(body);
            send_once(request)
        })
        .await
    }

    async fn get(&self, path: &str, label: &str) -> anyhow::Result<Value> {
        let url = format!("{}{path}", self.base_url);
        with_retry(&self.retry, label, || {
            let request = self
                .http
                .get(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .timeout(REQUEST_TIMEOUT);
            send_once(request)
        })
        .await
    }
}

async fn send_once(request: reqwest::RequestBuilder) -> anyhow::Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| HttpCallError::transport(e.to_string()))?;
    read_response(response).await
}

/// Surface non-2xx statuses as [`HttpCallError`] carrying the body text, so
/// retry classification can see the status and any JSON error document.
async fn read_response(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(HttpCallError::status(status.as_u16(), body).into());
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(server: &MockServer) -> AcpClient {
        AcpClient::new(server.uri(), "test-key").with_retry_policy(
            RetryPolicy::default()
                .with_attempts(CLIENT_RETRY_ATTEMPTS)
                .with_base_delay(Duration::from_millis(1))
                .without_jitter(),
        )
    }

    #[tokio::test]
    async fn accept_posts_expected_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/123/accept"))
            .and(header(API_KEY_HEADER, "test-key"))
            .and(body_json(json!({"accept": true, "reason": "Job accepted"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        fast_client(&server)
            .accept_or_reject(123, true, Some("Job accepted"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reject_omits_absent_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/5/accept"))
            .and(body_json(json!({"accept": false})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        fast_client(&server).accept_or_reject(5, false, None).await.unwrap();
    }

    #[tokio::test]
    async fn payment_request_carries_payable_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/7/requirement"))
            .and(body_json(json!({
                "content": "Request accepted",
                "payableDetail": {"amount": 2.0, "tokenAddress": "0xtok", "recipient": "0xme"},
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let payable = PayableDetail {
            amount: 2.0,
            token_address: "0xtok".into(),
            recipient: Some("0xme".into()),
        };
        fast_client(&server)
            .request_payment(7, "Request accepted", Some(&payable))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deliver_accepts_string_and_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/8/deliverable"))
            .and(body_json(json!({"deliverable": "all done"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/9/deliverable"))
            .and(body_json(json!({
                "deliverable": {"type": "application/json", "value": {"ok": true}},
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(&server);
        client
            .deliver_job(8, &Deliverable::Text("all done".into()), None)
            .await
            .unwrap();
        client
            .deliver_job(9, &Deliverable::typed("application/json", json!({"ok": true})), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/1/accept"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"statusCode": 429, "message": "rate limited"})),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/1/accept"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        fast_client(&server).accept_or_reject(1, true, None).await.unwrap();
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/acp/providers/jobs/1/accept"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = fast_client(&server)
            .accept_or_reject(1, true, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn active_jobs_parses_both_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acp/jobs/active"))
            .and(query_param("page", "1"))
            .and(query_param("pageSize", "50"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 1}, {"id": 2}]})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/acp/jobs/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}])))
            .mount(&server)
            .await;

        let client = fast_client(&server);
        let first = client.active_jobs(1, 50).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = client.active_jobs(2, 50).await.unwrap();
        assert_eq!(second, vec![json!({"id": 3})]);
    }

    #[tokio::test]
    async fn agent_info_tolerates_data_wrapper() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acp/agents/info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"walletAddress": "0xAAA"}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/acp/agents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"walletAddress": "0xBBB"})))
            .mount(&server)
            .await;

        let client = fast_client(&server);
        assert_eq!(client.agent_info().await.unwrap().wallet_address, "0xAAA");
        assert_eq!(client.agent_info().await.unwrap().wallet_address, "0xBBB");
    }
}
