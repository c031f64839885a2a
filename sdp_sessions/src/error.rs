// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use alloy::primitives::{Address, FixedBytes};
use sdp_eip712_message::Eip712Error;

use crate::session::SessionId;

/// Errors surfaced at the session machine boundary.
///
/// Validation failures carry no side effects on session state; adapter
/// failures are wrapped with the operation that hit them and left to the
/// caller to retry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session with the given id
    #[error("session not found: {session_id}")]
    NotFound { session_id: SessionId },

    /// The session exists but is in the wrong state for the requested action
    #[error("{message}")]
    FailedPrecondition { message: String },

    /// Malformed input: addresses, signatures, or out-of-range values
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Recovered signer is not in the accepted signers set
    #[error("recovered signer not accepted: {address}")]
    InvalidSigner { address: Address },

    /// Recovered RAV signer is not in the accepted signers set
    #[error("recovered RAV signer not accepted: {address}")]
    RavSignerMismatch { address: Address },

    /// A timestamp failed the strict monotonicity requirement
    #[error("invalid timestamp: {received_timestamp} (expected min {timestamp_min})")]
    InvalidTimestamp {
        received_timestamp: u64,
        timestamp_min: u64,
    },

    /// The value aggregate would exceed `u128::MAX`
    #[error("aggregating usage cost results in overflow")]
    AggregateOverflow,

    /// Collection id disagreement between a voucher and its session
    #[error("collection id {received:#x} does not match {expected:#x}")]
    CollectionMismatch {
        expected: FixedBytes<32>,
        received: FixedBytes<32>,
    },

    /// Payer disagreement between a voucher and its session
    #[error("payer {received} does not match {expected}")]
    PayerMismatch { expected: Address, received: Address },

    /// Service provider disagreement between a voucher and its session
    #[error("service provider {received} does not match {expected}")]
    ServiceProviderMismatch { expected: Address, received: Address },

    /// Data service disagreement between a voucher and its session
    #[error("data service {received} does not match {expected}")]
    DataServiceMismatch { expected: Address, received: Address },

    /// The on-chain escrow balance could not be read
    #[error("escrow balance unavailable: {source}")]
    EscrowUnavailable {
        #[source]
        source: anyhow::Error,
    },

    /// The operation deadline expired before pending adapter I/O completed
    #[error("{operation} cancelled: deadline expired")]
    Cancelled { operation: &'static str },

    /// An on-chain adapter call failed
    #[error("error from adapter during {operation}: {source}")]
    AdapterError {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Failed to get current system time
    #[error("failed to get current system time: {source_error_message}")]
    InvalidSystemTime { source_error_message: String },

    /// Bug-class failure in the cryptographic stack
    #[error(transparent)]
    Internal(#[from] Eip712Error),
}
