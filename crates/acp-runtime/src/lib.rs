// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-runtime
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Single-entry job dispatch and the stage executor.
pub mod dispatch;
/// In-memory stage idempotency ledger and in-flight set.
pub mod ledger;
/// Pull-based catch-up loop over the backend's active jobs.
pub mod reconcile;
/// Process-wide shutdown signalling.
pub mod shutdown;

pub use dispatch::{JobSource, SellerEngine};
pub use ledger::{StageLedger, StageRecord};
pub use reconcile::PollReconciler;
pub use shutdown::ShutdownToken;
