// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the ACP seller runtime.
//!
//! If you only take one dependency, take this one.

/// Job lifecycle phases and tolerant phase decoding.
pub mod phase;
/// Tolerant accessors over raw job payloads.
pub mod payload;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub use phase::Phase;

/// Per-invocation context handed to offering handlers.
///
/// Built fresh for every stage invocation; never cached. The `job` field is
/// the raw payload as observed on the wire, for handlers that need fields the
/// normalizer does not surface.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobContext {
    /// Backend-assigned numeric job id.
    pub job_id: u64,

    /// Logical offering name the job resolved to.
    pub offering_name: String,

    /// Root directory for all deliverable artifacts.
    pub delivery_root: PathBuf,

    /// Per-job artifact directory (`<delivery_root>/<job_id>`).
    pub job_dir: PathBuf,

    /// The raw job payload.
    pub job: Value,
}

/// A deliverable as accepted by the backend: either a bare string or a
/// typed `{type, value}` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Deliverable {
    /// Plain text deliverable.
    Text(String),
    /// Structured deliverable with an application-defined type tag.
    Typed(TypedDeliverable),
}

/// Structured deliverable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TypedDeliverable {
    /// Application-defined type tag (e.g. `"application/json"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON value.
    pub value: Value,
}

impl Deliverable {
    /// Construct a typed deliverable.
    pub fn typed(kind: impl Into<String>, value: Value) -> Self {
        Self::Typed(TypedDeliverable {
            kind: kind.into(),
            value,
        })
    }
}

impl From<String> for Deliverable {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Deliverable {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// An optional return-transfer attached to a payment request or deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayableDetail {
    /// Token amount.
    pub amount: f64,

    /// ERC-20 token contract address.
    pub token_address: String,

    /// Recipient wallet; omitted on the deliverable path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// Additional-funds request produced by an offering's
/// `request_additional_funds` hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundsRequest {
    /// Token amount the buyer must escrow.
    pub amount: f64,

    /// ERC-20 token contract address.
    pub token_address: String,

    /// Wallet that receives the funds.
    pub recipient: String,

    /// Optional human-readable payment-request text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FundsRequest {
    /// The [`PayableDetail`] this request maps to on the requirement path.
    #[must_use]
    pub fn payable(&self) -> PayableDetail {
        PayableDetail {
            amount: self.amount,
            token_address: self.token_address.clone(),
            recipient: Some(self.recipient.clone()),
        }
    }
}

/// Outcome of an offering's requirement validation hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    /// Requirements are acceptable.
    Valid,
    /// Requirements were rejected, optionally with a buyer-facing reason.
    Invalid {
        /// Reason sent back to the buyer on the reject path.
        reason: Option<String>,
    },
}

impl Validation {
    /// Convenience constructor for an invalid outcome with a reason.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: Some(reason.into()),
        }
    }

    /// Whether the outcome is [`Validation::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The rejection reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid { reason } => reason.as_deref(),
        }
    }
}

/// Result of an offering's `execute_job` hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteJobResult {
    /// The deliverable handed to the backend.
    pub deliverable: Deliverable,

    /// Optional return-transfer on the deliverable path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payable_detail: Option<PayableDetail>,
}

impl ExecuteJobResult {
    /// A plain-text deliverable with no return transfer.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            deliverable: Deliverable::Text(content.into()),
            payable_detail: None,
        }
    }

    /// A typed deliverable with no return transfer.
    pub fn typed(kind: impl Into<String>, value: Value) -> Self {
        Self {
            deliverable: Deliverable::typed(kind, value),
            payable_detail: None,
        }
    }
}
