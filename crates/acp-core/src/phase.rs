// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job lifecycle phases and tolerant phase decoding.
//!
//! The backend serializes phases as integers in some payloads and as
//! symbolic strings in others; older deployments have been observed sending
//! numeric strings. [`Phase::normalize`] accepts all three shapes so the
//! rest of the runtime never sees the dual form.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A discrete state in a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Buyer has initiated a job; seller has not yet responded.
    Request,
    /// Buyer and seller are agreeing on requirements and price.
    Negotiation,
    /// Payment escrowed; the job is ready to execute.
    Transaction,
    /// Deliverable submitted; awaiting evaluation.
    Evaluation,
    /// Terminal: accepted and paid out.
    Completed,
    /// Terminal: rejected by either party.
    Rejected,
    /// Terminal: expired before completion.
    Expired,
}

impl Phase {
    /// All phases, in wire order.
    pub const ALL: [Self; 7] = [
        Self::Request,
        Self::Negotiation,
        Self::Transaction,
        Self::Evaluation,
        Self::Completed,
        Self::Rejected,
        Self::Expired,
    ];

    /// The numeric wire index of this phase.
    #[must_use]
    pub fn index(self) -> u64 {
        match self {
            Self::Request => 0,
            Self::Negotiation => 1,
            Self::Transaction => 2,
            Self::Evaluation => 3,
            Self::Completed => 4,
            Self::Rejected => 5,
            Self::Expired => 6,
        }
    }

    /// Decode a numeric wire index.
    #[must_use]
    pub fn from_index(n: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(n).ok()?).copied()
    }

    /// Decode a symbolic phase name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .copied()
    }

    /// The canonical symbolic name of this phase.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Negotiation => "NEGOTIATION",
            Self::Transaction => "TRANSACTION",
            Self::Evaluation => "EVALUATION",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Decode any wire shape: integer, numeric string, or symbolic string.
    ///
    /// Anything else yields `None`; callers are expected to drop the event.
    #[must_use]
    pub fn normalize(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => Self::from_index(n.as_u64()?),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<u64>() {
                    Self::from_index(n)
                } else {
                    Self::from_name(s)
                }
            }
            _ => None,
        }
    }

    /// A display label for any wire value: the canonical name when the value
    /// normalizes, `"unknown"` otherwise.
    #[must_use]
    pub fn label(v: &Value) -> String {
        match Self::normalize(v) {
            Some(p) => p.name().to_string(),
            None => "unknown".to_string(),
        }
    }

    /// Whether the phase is terminal (no further seller action possible).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Expired)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
