// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # SDP session state machines
//!
//! ## Overview
//!
//! The payment fabric mediates a stream of data deliveries with a stream of
//! monotonically growing, signed receipt aggregate vouchers (RAVs). Two
//! sidecars take part:
//!
//! - The **consumer** side opens a session against an escrow tuple, mints a
//!   zero-value RAV, and signs a fresh RAV every time usage is reported.
//! - The **provider** side admits a session after validating the incoming RAV
//!   against its accepted signers, tracks delivered usage, periodically asks
//!   the consumer for an updated RAV, decides whether the stream should
//!   continue from the escrow headroom, and submits the final RAV for
//!   on-chain collection when the stream ends.
//!
//! Sessions live in a process-wide [`SessionRegistry`], one long-lived
//! instance per machine. Each [`Session`] serializes its own mutation behind
//! a mutex, so the value aggregate and timestamp of its RAV grow strictly
//! within a session without any further coordination.
//!
//! The on-chain world is reached only through the [`adapters`] capability
//! traits; an in-memory implementation backs the tests.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod adapters;
mod consumer;
mod error;
mod provider;
mod registry;
mod session;

pub use consumer::{ConsumerSessionInit, ConsumerSessionManager};
pub use error::SessionError;
pub use provider::{
    PaymentDecision, ProviderConfig, ProviderSessionClosed, ProviderSessionManager, RavRequest,
    RejectionReason, ServiceParams, SessionStatusReport, StopReason, UsageDecision,
};
pub use registry::SessionRegistry;
pub use session::{
    CollectionTuple, EndReason, EscrowTuple, Session, SessionId, SessionStatus, Usage,
};

pub(crate) fn now_ns() -> Result<u64, SessionError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| SessionError::InvalidSystemTime {
            source_error_message: err.to_string(),
        })?
        .as_nanos() as u64)
}
